//! Console input provider
//!
//! Reads lines from stdin and yields them as normalized text messages.
//! Mostly a development tool, but it is a full provider: it respects
//! stop, skips blank lines, and tags messages with a configurable
//! sender identity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_stream::stream;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, info};

use aituber_core::{
    DataType, InputProvider, MessageStream, NormalizedMessage, ProviderError, RawUser,
};

pub const PROVIDER_NAME: &str = "console_input";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleInputConfig {
    /// Sender id attached to every console message.
    pub user_id: String,
    pub user_name: String,
    pub importance: f64,
}

impl Default for ConsoleInputConfig {
    fn default() -> Self {
        Self {
            user_id: "console_user".into(),
            user_name: "Console".into(),
            importance: 0.5,
        }
    }
}

pub struct ConsoleInputProvider {
    config: ConsoleInputConfig,
    stopped: Arc<AtomicBool>,
    stop_notify: Arc<Notify>,
}

impl ConsoleInputProvider {
    pub fn new(config: ConsoleInputConfig) -> Self {
        Self {
            config,
            stopped: Arc::new(AtomicBool::new(false)),
            stop_notify: Arc::new(Notify::new()),
        }
    }

    fn build_message(&self, line: String) -> NormalizedMessage {
        NormalizedMessage::new(line, PROVIDER_NAME)
            .with_data_type(DataType::Text)
            .with_importance(self.config.importance)
            .with_raw(RawUser {
                user_id: self.config.user_id.clone(),
                user_name: Some(self.config.user_name.clone()),
                display_text: None,
                extra: serde_json::Map::new(),
            })
    }
}

#[async_trait]
impl InputProvider for ConsoleInputProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn start(&self) -> Result<(), ProviderError> {
        self.stopped.store(false, Ordering::SeqCst);
        info!("console input ready, type messages followed by enter");
        Ok(())
    }

    fn stream(&self) -> MessageStream<'_> {
        let stopped = Arc::clone(&self.stopped);
        let stop_notify = Arc::clone(&self.stop_notify);

        Box::pin(stream! {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                if stopped.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    _ = stop_notify.notified() => break,
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                let trimmed = line.trim();
                                if trimmed.is_empty() {
                                    continue;
                                }
                                yield self.build_message(trimmed.to_string());
                            }
                            Ok(None) => {
                                debug!("stdin closed, ending console stream");
                                break;
                            }
                            Err(e) => {
                                debug!(error = %e, "stdin read failed, ending console stream");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
        self.cleanup().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_carries_configured_identity() {
        let provider = ConsoleInputProvider::new(ConsoleInputConfig::default());
        let msg = provider.build_message("hello".into());
        assert_eq!(msg.source, PROVIDER_NAME);
        assert_eq!(msg.user_id(), Some("console_user"));
        assert_eq!(msg.importance, 0.5);
        assert!(msg.is_valid());
    }
}
