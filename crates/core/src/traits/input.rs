//! Input provider contract

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::ProviderError;
use crate::message::NormalizedMessage;

/// Stream of normalized messages yielded by an input provider.
pub type MessageStream<'a> = BoxStream<'a, NormalizedMessage>;

/// A source of normalized messages (live-stream chat, console, screen
/// capture, …).
///
/// # Lifecycle
///
/// 1. Construction with `(config, context)` via the registry factory.
/// 2. `start()`: open external resources.
/// 3. `stream()`: yield messages until stopped; every yielded message must
///    be fully normalized (non-empty text, importance in `[0, 1]`).
/// 4. `stop()`: flag the stream to finish; calls `cleanup()`.
///
/// A failure inside the stream aborts this provider only; the manager
/// isolates it from its siblings.
#[async_trait]
pub trait InputProvider: Send + Sync {
    /// Stable provider identifier, also used as the message `source`.
    fn name(&self) -> &str;

    /// Opens external resources. Called once before `stream()`.
    async fn start(&self) -> Result<(), ProviderError>;

    /// The message stream. The stream ends when the provider is stopped or
    /// the source is exhausted.
    fn stream(&self) -> MessageStream<'_>;

    /// Signals the stream to finish and releases resources.
    async fn stop(&self) {
        self.cleanup().await;
    }

    /// Releases external resources (sockets, files). Safe to call twice.
    async fn cleanup(&self) {}
}
