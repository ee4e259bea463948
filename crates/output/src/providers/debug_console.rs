//! Debug console output provider
//!
//! Renders every intent as a structured log line. Handy while wiring a
//! pipeline together or when no real renderer is connected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;

use aituber_core::{Intent, OutputProvider, ProviderError};
use aituber_provider::ProviderContext;

pub const PROVIDER_NAME: &str = "debug_console";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConsoleConfig {
    pub show_actions: bool,
    /// Keep the last N rendered intents for inspection.
    pub history_size: usize,
}

impl Default for DebugConsoleConfig {
    fn default() -> Self {
        Self {
            show_actions: true,
            history_size: 20,
        }
    }
}

pub struct DebugConsoleOutputProvider {
    config: DebugConsoleConfig,
    rendered: AtomicU64,
    recent: Mutex<Vec<Intent>>,
    _context: Arc<ProviderContext>,
}

impl DebugConsoleOutputProvider {
    pub fn new(config: DebugConsoleConfig, context: Arc<ProviderContext>) -> Self {
        Self {
            config,
            rendered: AtomicU64::new(0),
            recent: Mutex::new(Vec::new()),
            _context: context,
        }
    }

    /// Recently rendered intents, oldest first.
    pub fn recent_intents(&self) -> Vec<Intent> {
        self.recent.lock().clone()
    }
}

#[async_trait]
impl OutputProvider for DebugConsoleOutputProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn output_type(&self) -> &str {
        "debug"
    }

    async fn start(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn execute(&self, intent: &Intent) -> Result<(), ProviderError> {
        let count = self.rendered.fetch_add(1, Ordering::SeqCst) + 1;
        if self.config.show_actions {
            let actions: Vec<String> = intent
                .actions_by_priority()
                .iter()
                .map(|a| format!("{:?}({})", a.action_type, a.priority))
                .collect();
            info!(
                count,
                emotion = ?intent.emotion,
                response = %intent.response_text,
                actions = actions.join(", "),
                "render"
            );
        } else {
            info!(count, response = %intent.response_text, "render");
        }

        let mut recent = self.recent.lock();
        recent.push(intent.clone());
        let excess = recent.len().saturating_sub(self.config.history_size);
        if excess > 0 {
            recent.drain(..excess);
        }
        Ok(())
    }
}
