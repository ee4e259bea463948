//! LLM decision provider
//!
//! Sends the message plus recent conversation history through a prompt
//! template to a named LLM client, parses the structured JSON reply into
//! a full intent, and falls back to a simple echo when anything in that
//! chain fails. One `decide()` publishes exactly one intent (unless the
//! operator configured `fallback_mode = "error"`).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use aituber_core::{DecisionProvider, Intent, IntentAction, NormalizedMessage, ProviderError};
use aituber_llm::{ChatRequest, MessageRole};
use aituber_provider::ProviderContext;

use crate::parse::{clean_llm_json, intent_from_json, source_context_for};
use crate::providers::publish_intent;

pub const PROVIDER_NAME: &str = "llm";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmDecisionConfig {
    /// Named client in the LLM pool.
    pub client: String,
    /// `simple` (reply with the input), `echo` (quoted input) or `error`
    /// (publish nothing, log).
    pub fallback_mode: String,
    /// Prompt template name under the prompt directory.
    pub template: String,
    /// Turns of history fed into the prompt.
    pub history_limit: usize,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl Default for LlmDecisionConfig {
    fn default() -> Self {
        Self {
            client: "llm".into(),
            fallback_mode: "simple".into(),
            template: "decision/llm_structured".into(),
            history_limit: 10,
            temperature: None,
            max_tokens: None,
        }
    }
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

pub struct LlmDecisionProvider {
    config: LlmDecisionConfig,
    context: Arc<ProviderContext>,
    counters: Counters,
}

impl LlmDecisionProvider {
    pub fn new(config: LlmDecisionConfig, context: Arc<ProviderContext>) -> Self {
        Self {
            config,
            context,
            counters: Counters::default(),
        }
    }

    fn persona_vars(&self) -> std::collections::HashMap<String, String> {
        let persona = self
            .context
            .config_service()
            .map(|c| c.get_section("persona"))
            .unwrap_or_default();
        let get = |key: &str, default: &str| {
            persona
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(default)
                .to_string()
        };
        let mut vars = std::collections::HashMap::new();
        vars.insert("bot_name".into(), get("bot_name", "Ai"));
        vars.insert(
            "personality".into(),
            get("personality", "cheerful and a little mischievous"),
        );
        vars.insert(
            "style_constraints".into(),
            get("style_constraints", "conversational, short sentences"),
        );
        vars
    }

    fn history_text(&self, session_id: &str) -> String {
        let Some(context_service) = self.context.context_service() else {
            return String::new();
        };
        context_service
            .history(session_id, self.config.history_limit)
            .iter()
            .map(|m| {
                let who = match m.role {
                    MessageRole::User => "User",
                    MessageRole::Assistant => "Assistant",
                };
                format!("{who}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn build_prompt(&self, message: &NormalizedMessage, history: &str) -> Option<String> {
        let prompt_service = self.context.prompt_service()?;
        let mut vars = self.persona_vars();
        vars.insert("text".into(), message.text.clone());
        vars.insert("history".into(), history.to_string());
        match prompt_service.render_safe(&self.config.template, &vars) {
            Ok(prompt) => Some(prompt),
            Err(e) => {
                warn!(template = %self.config.template, error = %e, "prompt template unavailable");
                None
            }
        }
    }

    async fn run_llm(&self, message: &NormalizedMessage) -> Option<Intent> {
        let llm = self.context.llm_service()?;

        let session_id = message.source.clone();
        if let Some(context_service) = self.context.context_service() {
            context_service.add_message(&session_id, MessageRole::User, message.text.clone());
        }
        // History excluding the message just recorded.
        let history = {
            let text = self.history_text(&session_id);
            text.lines()
                .take(text.lines().count().saturating_sub(1))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let prompt = self.build_prompt(message, &history)?;

        let mut request = ChatRequest::new(prompt).with_client(self.config.client.clone());
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(max_tokens) = self.config.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }

        let response = llm.chat(request).await;
        if !response.success {
            error!(
                client = %self.config.client,
                error = response.error.as_deref().unwrap_or("unknown"),
                "LLM call failed"
            );
            return None;
        }

        let cleaned = clean_llm_json(&response.content);
        let parsed: Value = match serde_json::from_str(&cleaned) {
            Ok(parsed) => parsed,
            Err(e) => {
                error!(
                    error = %e,
                    preview = %cleaned.chars().take(200).collect::<String>(),
                    "LLM reply is not valid JSON"
                );
                return None;
            }
        };

        let intent = intent_from_json(&parsed, message);
        if let Some(context_service) = self.context.context_service() {
            context_service.add_message(
                &session_id,
                MessageRole::Assistant,
                intent.response_text.clone(),
            );
        }
        Some(intent)
    }

    async fn publish_fallback(&self, message: &NormalizedMessage) {
        let response_text = match self.config.fallback_mode.as_str() {
            "echo" => format!("You said: {}", message.text),
            "error" => {
                error!("LLM decision failed and fallback_mode is 'error', publishing nothing");
                return;
            }
            _ => message.text.clone(),
        };

        let mut intent = Intent::new(message.text.clone(), response_text)
            .with_source_context(source_context_for(message))
            .with_metadata("parser", "llm_fallback".into());
        intent.actions.push(IntentAction::default_blink());
        publish_intent(self.context.event_bus(), intent, PROVIDER_NAME).await;
    }
}

#[async_trait]
impl DecisionProvider for LlmDecisionProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn start(&self) -> Result<(), ProviderError> {
        let has_client = self
            .context
            .llm_service()
            .is_some_and(|llm| llm.has_client(&self.config.client));
        if has_client {
            info!(client = %self.config.client, "LLM decision provider ready");
        } else {
            warn!(
                client = %self.config.client,
                "LLM client not configured, every decision will use the fallback"
            );
        }
        Ok(())
    }

    async fn decide(&self, message: NormalizedMessage) {
        self.counters.total.fetch_add(1, Ordering::SeqCst);

        match self.run_llm(&message).await {
            Some(mut intent) => {
                self.counters.succeeded.fetch_add(1, Ordering::SeqCst);
                intent
                    .metadata
                    .insert("parser".into(), "llm_structured".into());
                debug!(response = %intent.response_text.chars().take(50).collect::<String>(),
                       "LLM decision succeeded");
                publish_intent(self.context.event_bus(), intent, PROVIDER_NAME).await;
            }
            None => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                self.publish_fallback(&message).await;
            }
        }
    }

    async fn cleanup(&self) {
        let total = self.counters.total.load(Ordering::SeqCst);
        let succeeded = self.counters.succeeded.load(Ordering::SeqCst);
        info!(
            total,
            succeeded,
            failed = self.counters.failed.load(Ordering::SeqCst),
            "LLM decision provider cleaned up"
        );
    }
}
