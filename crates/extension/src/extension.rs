//! The extension contract

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use aituber_events::EventBus;

use crate::ExtensionError;

/// Static description of an extension.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtensionInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    /// Extensions that must be set up before this one.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Provider names this extension owns.
    #[serde(default)]
    pub providers: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ExtensionInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A composite unit owning several providers.
///
/// # Lifecycle
///
/// 1. Construction from its `[extensions.<name>]` config (via the
///    registered factory).
/// 2. `setup()`: create and start owned providers, subscribe to events;
///    returns the names of the providers it now owns.
/// 3. `cleanup()`: unsubscribe, stop providers, release resources.
#[async_trait]
pub trait Extension: Send + Sync {
    fn info(&self) -> ExtensionInfo;

    fn dependencies(&self) -> Vec<String> {
        self.info().dependencies
    }

    async fn setup(&self, event_bus: EventBus, config: Value)
        -> Result<Vec<String>, ExtensionError>;

    async fn cleanup(&self) -> Result<(), ExtensionError>;
}
