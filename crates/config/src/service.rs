//! The configuration service
//!
//! Owns the parsed config tree. Sections are served as
//! `serde_json::Value` maps so the two-level merge and per-provider
//! schema validation can stay format-agnostic; the on-disk format is TOML.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::merge::deep_merge;
use crate::migration::migrate_if_outdated;
use crate::ConfigError;

const MAIN_CONFIG: &str = "config.toml";
const TEMPLATE_CONFIG: &str = "config-template.toml";

/// One of the three provider domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderLayer {
    Input,
    Decision,
    Output,
}

impl ProviderLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderLayer::Input => "input",
            ProviderLayer::Decision => "decision",
            ProviderLayer::Output => "output",
        }
    }

    /// Domain-level keys that are not per-provider tables.
    fn meta_fields(&self) -> &'static [&'static str] {
        match self {
            ProviderLayer::Input => &["enabled", "enabled_inputs"],
            ProviderLayer::Decision => &["enabled", "active_provider", "available_providers"],
            ProviderLayer::Output => &[
                "enabled",
                "enabled_outputs",
                "concurrent_rendering",
                "error_handling",
                "render_timeout",
            ],
        }
    }

    /// The config key listing enabled providers for this layer.
    fn enabled_list_key(&self) -> &'static str {
        match self {
            ProviderLayer::Input => "enabled_inputs",
            ProviderLayer::Decision => "available_providers",
            ProviderLayer::Output => "enabled_outputs",
        }
    }
}

impl std::fmt::Display for ProviderLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What `initialize` did.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitReport {
    /// The main config was seeded from the template.
    pub newly_copied: bool,
    /// A schema-version migration rewrote the config.
    pub migrated: bool,
}

/// Unified configuration access for every component.
pub struct ConfigService {
    base_dir: PathBuf,
    main_config: RwLock<Value>,
    initialized: AtomicBool,
    last_report: Mutex<InitReport>,
}

impl ConfigService {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            main_config: RwLock::new(Value::Object(Map::new())),
            initialized: AtomicBool::new(false),
            last_report: Mutex::new(InitReport::default()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Loads the main config, seeding from the template and migrating when
    /// needed. Idempotent: a second call returns the first call's report
    /// without touching state.
    pub fn initialize(&self) -> Result<InitReport, ConfigError> {
        if self.initialized.load(Ordering::SeqCst) {
            warn!("config service already initialized, skipping");
            return Ok(*self.last_report.lock());
        }

        let config_path = self.base_dir.join(MAIN_CONFIG);
        let template_path = self.base_dir.join(TEMPLATE_CONFIG);
        let mut report = InitReport::default();

        if !config_path.exists() {
            if !template_path.exists() {
                return Err(ConfigError::FileNotFound(format!(
                    "{} (and no {} to seed from)",
                    config_path.display(),
                    template_path.display()
                )));
            }
            std::fs::copy(&template_path, &config_path)?;
            report.newly_copied = true;
            info!(path = %config_path.display(), "seeded main config from template");
        } else {
            // Only an existing (possibly user-edited) config is migrated.
            report.migrated = migrate_if_outdated(&config_path, &template_path)?;
        }

        let text = std::fs::read_to_string(&config_path)?;
        let parsed: toml::Value = text.parse()?;
        let json = serde_json::to_value(parsed)
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        *self.main_config.write() = json;
        *self.last_report.lock() = report;
        self.initialized.store(true, Ordering::SeqCst);
        info!(path = %config_path.display(), "config service initialized");
        Ok(report)
    }

    fn require_initialized(&self) -> bool {
        if !self.initialized.load(Ordering::SeqCst) {
            warn!("config service not initialized, returning empty config");
            return false;
        }
        true
    }

    /// Looks up a section by dotted path (`"providers.input.console_input"`).
    ///
    /// Returns an empty map when any path element is missing.
    pub fn get_section(&self, path: &str) -> Map<String, Value> {
        if !self.require_initialized() {
            return Map::new();
        }
        let config = self.main_config.read();
        let mut current: &Value = &config;
        for part in path.split('.') {
            match current.get(part) {
                Some(next) => current = next,
                None => {
                    debug!(section = path, at = part, "config section missing");
                    return Map::new();
                }
            }
        }
        current.as_object().cloned().unwrap_or_default()
    }

    /// Looks up one key, optionally inside a dotted section.
    pub fn get(&self, key: &str, section: Option<&str>) -> Option<Value> {
        if !self.require_initialized() {
            return None;
        }
        match section {
            Some(path) => self.get_section(path).get(key).cloned(),
            None => self.main_config.read().get(key).cloned(),
        }
    }

    /// Config for one pipeline, read from `[pipelines.<name>]`.
    pub fn get_pipeline_config(&self, name: &str) -> Map<String, Value> {
        self.get_section(&format!("pipelines.{name}"))
    }

    pub fn get_all_pipeline_configs(&self) -> Map<String, Value> {
        self.get_section("pipelines")
    }

    /// A pipeline is enabled when its section defines `priority`.
    pub fn is_pipeline_enabled(&self, name: &str) -> bool {
        self.get_pipeline_config(name).contains_key("priority")
    }

    /// Every per-provider table for a layer (meta fields excluded).
    pub fn get_all_provider_configs(&self, layer: ProviderLayer) -> Map<String, Value> {
        let section = self.get_section(&format!("providers.{layer}"));
        section
            .into_iter()
            .filter(|(key, value)| {
                !layer.meta_fields().contains(&key.as_str()) && value.is_object()
            })
            .collect()
    }

    /// Names listed in the layer's enabled list.
    pub fn enabled_providers(&self, layer: ProviderLayer) -> Vec<String> {
        self.get_section(&format!("providers.{layer}"))
            .get(layer.enabled_list_key())
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Membership test against the layer's enabled list.
    pub fn is_provider_enabled(&self, name: &str, layer: ProviderLayer) -> bool {
        self.enabled_providers(layer).iter().any(|n| n == name)
    }

    /// The raw `[providers.<layer>.<name>]` override table.
    pub fn provider_override(&self, layer: ProviderLayer, name: &str) -> Value {
        Value::Object(self.get_section(&format!("providers.{layer}.{name}")))
    }

    /// Two-level merge: schema defaults ← main-config override.
    ///
    /// `schema_defaults` is the serialized default config of the provider
    /// (from the registry); pass `None` for schema-less providers.
    pub fn merged_provider_config(
        &self,
        layer: ProviderLayer,
        name: &str,
        schema_defaults: Option<&Value>,
    ) -> Value {
        let base = schema_defaults
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        deep_merge(&base, &self.provider_override(layer, name))
    }

    /// Typed variant of [`merged_provider_config`]: merges and validates
    /// against a serde schema struct. Unknown fields are preserved in the
    /// returned raw value.
    ///
    /// [`merged_provider_config`]: ConfigService::merged_provider_config
    pub fn provider_config_with_defaults<S>(
        &self,
        name: &str,
        layer: ProviderLayer,
    ) -> Result<(S, Value), ConfigError>
    where
        S: Serialize + DeserializeOwned + Default,
    {
        let defaults = serde_json::to_value(S::default())
            .map_err(|e| ConfigError::Parse(e.to_string()))?;
        let merged = self.merged_provider_config(layer, name, Some(&defaults));
        let typed: S =
            serde_json::from_value(merged.clone()).map_err(|e| ConfigError::SchemaValidation {
                provider: name.to_string(),
                message: e.to_string(),
            })?;
        Ok((typed, merged))
    }
}
