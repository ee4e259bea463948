//! Output provider contract

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::intent::Intent;

/// Renders intents to a target (TTS audio, subtitle overlay, avatar
/// protocol, stream graphics, …).
#[async_trait]
pub trait OutputProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Category reported in render events (e.g. `"audio"`, `"text"`,
    /// `"expression"`).
    fn output_type(&self) -> &str {
        "generic"
    }

    /// Connects to the target and subscribes to whatever the provider
    /// consumes beyond intents (e.g. the audio stream channel).
    async fn start(&self) -> Result<(), ProviderError>;

    /// Performs the side effect for one intent. The manager enforces the
    /// configured render timeout around this call.
    async fn execute(&self, intent: &Intent) -> Result<(), ProviderError>;

    async fn stop(&self) {
        self.cleanup().await;
    }

    async fn cleanup(&self) {}
}
