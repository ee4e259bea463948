//! Subtitle output provider
//!
//! Forwards the response text to the stream-graphics layer via
//! `obs.send_text`. The actual OBS connection lives behind that event;
//! this provider only decides what the overlay should say.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use aituber_core::{Intent, OutputProvider, ProviderError};
use aituber_events::{names, EmitOptions, EventPayload, ObsSendTextPayload};
use aituber_provider::ProviderContext;

pub const PROVIDER_NAME: &str = "subtitle";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubtitleConfig {
    /// OBS text source receiving the subtitle.
    pub source_name: String,
    /// Cap on displayed characters; longer responses are cut with an
    /// ellipsis.
    pub max_chars: usize,
}

impl Default for SubtitleConfig {
    fn default() -> Self {
        Self {
            source_name: "subtitle".into(),
            max_chars: 120,
        }
    }
}

pub struct SubtitleOutputProvider {
    config: SubtitleConfig,
    context: Arc<ProviderContext>,
}

impl SubtitleOutputProvider {
    pub fn new(config: SubtitleConfig, context: Arc<ProviderContext>) -> Self {
        Self { config, context }
    }

    fn clip(&self, text: &str) -> String {
        if text.chars().count() <= self.config.max_chars {
            return text.to_string();
        }
        let cut: String = text.chars().take(self.config.max_chars.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[async_trait]
impl OutputProvider for SubtitleOutputProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    fn output_type(&self) -> &str {
        "text"
    }

    async fn start(&self) -> Result<(), ProviderError> {
        info!(source = %self.config.source_name, "subtitle provider ready");
        Ok(())
    }

    async fn execute(&self, intent: &Intent) -> Result<(), ProviderError> {
        let text = self.clip(&intent.response_text);
        debug!(text = %text, "sending subtitle");
        self.context
            .event_bus()
            .emit(
                names::OBS_SEND_TEXT,
                EventPayload::ObsSendText(ObsSendTextPayload {
                    text,
                    source_name: Some(self.config.source_name.clone()),
                }),
                PROVIDER_NAME,
                EmitOptions::default(),
            )
            .await
            .map_err(|e| ProviderError::Runtime(e.to_string()))
    }
}
