//! Decision provider contract

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::message::NormalizedMessage;

/// Turns normalized messages into intents.
///
/// Exactly one decision provider is active at a time. `decide()` is
/// fire-and-forget: the provider publishes exactly one `decision.intent`
/// event per call: the decided intent on success, a fallback intent on
/// failure. It never surfaces an error for an unreachable backend; the
/// pipeline must keep flowing.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Initializes the provider (connects to its backend if it has one).
    async fn start(&self) -> Result<(), ProviderError>;

    /// Decides on one message and publishes the resulting intent.
    async fn decide(&self, message: NormalizedMessage);

    async fn stop(&self) {
        self.cleanup().await;
    }

    async fn cleanup(&self) {}
}
