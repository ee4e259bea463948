//! Pass-through message logging
//!
//! Writes one structured line per message and never filters. Runs early
//! so the log shows traffic before any other pipeline touches it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aituber_core::{ErrorHandling, InputPipeline, NormalizedMessage, PipelineError};

use super::{user_key, PipelineCommonConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageLogConfig {
    #[serde(flatten)]
    pub common: PipelineCommonConfig,
    /// Truncate logged text to this many characters.
    pub max_preview_chars: usize,
}

impl Default for MessageLogConfig {
    fn default() -> Self {
        Self {
            common: PipelineCommonConfig {
                priority: 10,
                ..Default::default()
            },
            max_preview_chars: 120,
        }
    }
}

pub struct MessageLogPipeline {
    config: MessageLogConfig,
}

impl MessageLogPipeline {
    pub fn new(config: MessageLogConfig) -> Self {
        Self { config }
    }

    pub fn from_config(value: &serde_json::Value) -> Self {
        let config: MessageLogConfig = serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "invalid message_log config, using defaults");
            MessageLogConfig::default()
        });
        Self::new(config)
    }
}

#[async_trait]
impl InputPipeline for MessageLogPipeline {
    fn name(&self) -> &str {
        "message_log"
    }

    fn priority(&self) -> i32 {
        self.config.common.priority
    }

    fn enabled(&self) -> bool {
        self.config.common.enabled
    }

    fn error_handling(&self) -> ErrorHandling {
        self.config.common.error_handling()
    }

    fn timeout(&self) -> Duration {
        self.config.common.timeout()
    }

    async fn process(
        &self,
        message: NormalizedMessage,
    ) -> Result<Option<NormalizedMessage>, PipelineError> {
        info!(
            source = %message.source,
            data_type = %message.data_type,
            user = %user_key(&message),
            importance = message.importance,
            text = %message
                .text
                .chars()
                .take(self.config.max_preview_chars)
                .collect::<String>(),
            "input message"
        );
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_passes_through() {
        let pipeline = MessageLogPipeline::new(MessageLogConfig::default());
        let msg = NormalizedMessage::new("anything", "test");
        let out = pipeline.process(msg.clone()).await.unwrap().unwrap();
        assert_eq!(out.text, msg.text);
        assert_eq!(pipeline.priority(), 10);
    }
}
