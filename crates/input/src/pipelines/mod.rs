//! Built-in input pipelines

mod message_log;
mod rate_limit;
mod similar_filter;

pub use message_log::{MessageLogConfig, MessageLogPipeline};
pub use rate_limit::{RateLimitConfig, RateLimitPipeline};
pub use similar_filter::{similarity, SimilarityFilterConfig, SimilarityFilterPipeline};

use serde::{Deserialize, Serialize};

/// Settings shared by every pipeline, read from `[pipelines.<name>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineCommonConfig {
    pub priority: i32,
    pub enabled: bool,
    pub error_handling: String,
    pub timeout_seconds: f64,
}

impl Default for PipelineCommonConfig {
    fn default() -> Self {
        Self {
            priority: 500,
            enabled: true,
            error_handling: "continue".into(),
            timeout_seconds: 5.0,
        }
    }
}

impl PipelineCommonConfig {
    pub fn error_handling(&self) -> aituber_core::ErrorHandling {
        aituber_core::ErrorHandling::parse_lenient(&self.error_handling)
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.timeout_seconds.max(0.01))
    }
}

/// Sender id used for per-user accounting when the platform gave us one.
pub(crate) fn user_key(message: &aituber_core::NormalizedMessage) -> String {
    if let Some(id) = message.user_id() {
        return id.to_string();
    }
    message
        .metadata
        .get("user_id")
        .and_then(serde_json::Value::as_str)
        .unwrap_or("unknown_user")
        .to_string()
}
