//! Replay decision provider
//!
//! Echoes the input text straight through as the response. Used to verify
//! the input→output data flow without any model in between.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aituber_core::{DecisionProvider, Intent, IntentAction, NormalizedMessage, ProviderError};
use aituber_provider::ProviderContext;

use crate::parse::source_context_for;
use crate::providers::publish_intent;

pub const PROVIDER_NAME: &str = "replay";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Append the default blink action to every intent.
    pub add_default_action: bool,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            add_default_action: true,
        }
    }
}

pub struct ReplayDecisionProvider {
    config: ReplayConfig,
    context: Arc<ProviderContext>,
    replayed: AtomicU64,
}

impl ReplayDecisionProvider {
    pub fn new(config: ReplayConfig, context: Arc<ProviderContext>) -> Self {
        Self {
            config,
            context,
            replayed: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl DecisionProvider for ReplayDecisionProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn start(&self) -> Result<(), ProviderError> {
        info!("replay decision provider ready");
        Ok(())
    }

    async fn decide(&self, message: NormalizedMessage) {
        let count = self.replayed.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            count,
            preview = %message.text.chars().take(50).collect::<String>(),
            "replaying message"
        );

        let mut intent = Intent::new(message.text.clone(), message.text.clone())
            .with_source_context(source_context_for(&message))
            .with_metadata("parser", "replay".into());
        if self.config.add_default_action {
            intent.actions.push(IntentAction::default_blink());
        }

        publish_intent(self.context.event_bus(), intent, PROVIDER_NAME).await;
    }

    async fn cleanup(&self) {
        info!(
            total = self.replayed.load(Ordering::SeqCst),
            "replay decision provider cleaned up"
        );
    }
}
