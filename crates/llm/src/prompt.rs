//! Prompt templates and chat message types
//!
//! Templates are plain Markdown files under a prompt directory, addressed
//! by relative name (`"decision/llm_structured"` →
//! `<dir>/decision/llm_structured.md`). Variables use `${name}` syntax.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::LlmError;

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Loads and renders prompt templates from disk.
pub struct PromptManager {
    prompt_dir: PathBuf,
    cache: RwLock<HashMap<String, String>>,
}

impl PromptManager {
    pub fn new(prompt_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompt_dir: prompt_dir.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn load(&self, name: &str) -> Result<String, LlmError> {
        if let Some(cached) = self.cache.read().get(name) {
            return Ok(cached.clone());
        }
        let path = self.prompt_dir.join(format!("{name}.md"));
        let text = std::fs::read_to_string(&path)
            .map_err(|_| LlmError::TemplateNotFound(path.display().to_string()))?;
        debug!(template = name, "loaded prompt template");
        self.cache.write().insert(name.to_string(), text.clone());
        Ok(text)
    }

    fn substitute(template: &str, vars: &HashMap<String, String>) -> String {
        let mut out = template.to_string();
        for (key, value) in vars {
            out = out.replace(&format!("${{{key}}}"), value);
        }
        out
    }

    fn first_unresolved(text: &str) -> Option<String> {
        let start = text.find("${")?;
        let rest = &text[start + 2..];
        let end = rest.find('}')?;
        Some(rest[..end].to_string())
    }

    /// Renders a template; any unresolved variable is an error.
    pub fn render(&self, name: &str, vars: &HashMap<String, String>) -> Result<String, LlmError> {
        let rendered = Self::substitute(&self.load(name)?, vars);
        if let Some(variable) = Self::first_unresolved(&rendered) {
            return Err(LlmError::MissingVariable {
                template: name.to_string(),
                variable,
            });
        }
        Ok(rendered)
    }

    /// Renders a template, leaving unresolved variables in place.
    pub fn render_safe(&self, name: &str, vars: &HashMap<String, String>) -> Result<String, LlmError> {
        Ok(Self::substitute(&self.load(name)?, vars))
    }

    /// Extracts one `## heading` block (safe substitution applied).
    pub fn extract_section(
        &self,
        name: &str,
        section: &str,
        vars: &HashMap<String, String>,
    ) -> Result<String, LlmError> {
        let text = self.load(name)?;
        let header = format!("## {section}");
        let mut lines = text.lines();
        let mut body = Vec::new();
        let mut found = false;

        for line in lines.by_ref() {
            if line.trim() == header {
                found = true;
                break;
            }
        }
        if !found {
            return Err(LlmError::SectionNotFound {
                template: name.to_string(),
                section: section.to_string(),
            });
        }
        for line in lines {
            if line.trim_start().starts_with("## ") {
                break;
            }
            body.push(line);
        }

        Ok(Self::substitute(body.join("\n").trim(), vars))
    }

    /// Drops the template cache (tests, hot-reload).
    pub fn clear_cache(&self) {
        self.cache.write().clear();
    }
}

/// Convenience for building the vars map.
#[macro_export]
macro_rules! prompt_vars {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(map.insert($key.to_string(), $value.to_string());)*
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt_vars;

    fn manager_with(name: &str, body: &str) -> (tempfile::TempDir, PromptManager) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("{name}.md"));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, body).unwrap();
        let manager = PromptManager::new(dir.path());
        (dir, manager)
    }

    #[test]
    fn test_render_substitutes() {
        let (_dir, manager) = manager_with("greet", "Hello ${name}, you are ${mood}.");
        let out = manager
            .render("greet", &prompt_vars! {"name" => "Ai", "mood" => "happy"})
            .unwrap();
        assert_eq!(out, "Hello Ai, you are happy.");
    }

    #[test]
    fn test_render_missing_variable_errors() {
        let (_dir, manager) = manager_with("greet", "Hello ${name}.");
        let err = manager.render("greet", &HashMap::new()).unwrap_err();
        assert!(matches!(err, LlmError::MissingVariable { .. }));
    }

    #[test]
    fn test_render_safe_tolerates_missing() {
        let (_dir, manager) = manager_with("greet", "Hello ${name}.");
        let out = manager.render_safe("greet", &HashMap::new()).unwrap();
        assert_eq!(out, "Hello ${name}.");
    }

    #[test]
    fn test_extract_section() {
        let body = "# Template\n\n## System\nYou are ${bot}.\n\n## User Message\n${text}\n";
        let (_dir, manager) = manager_with("decision/structured", body);
        let section = manager
            .extract_section("decision/structured", "User Message", &prompt_vars! {"text" => "hi"})
            .unwrap();
        assert_eq!(section, "hi");

        let system = manager
            .extract_section("decision/structured", "System", &prompt_vars! {"bot" => "Ai"})
            .unwrap();
        assert_eq!(system, "You are Ai.");

        let err = manager
            .extract_section("decision/structured", "Nope", &HashMap::new())
            .unwrap_err();
        assert!(matches!(err, LlmError::SectionNotFound { .. }));
    }

    #[test]
    fn test_missing_template() {
        let (_dir, manager) = manager_with("a", "x");
        assert!(matches!(
            manager.render("missing", &HashMap::new()),
            Err(LlmError::TemplateNotFound(_))
        ));
    }
}
