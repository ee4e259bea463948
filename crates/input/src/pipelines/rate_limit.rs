//! Sliding-window rate limiting
//!
//! Two budgets apply per window: one global, one per sender. Either being
//! exhausted drops the message.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aituber_core::{
    unix_now, ErrorHandling, InputPipeline, NormalizedMessage, PipelineError,
};

use super::{user_key, PipelineCommonConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    #[serde(flatten)]
    pub common: PipelineCommonConfig,
    /// Messages per window across all senders.
    pub global_rate_limit: usize,
    /// Messages per window per sender.
    pub user_rate_limit: usize,
    /// Window length in seconds.
    pub window_size: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            common: PipelineCommonConfig {
                priority: 100,
                ..Default::default()
            },
            global_rate_limit: 100,
            user_rate_limit: 10,
            window_size: 60.0,
        }
    }
}

#[derive(Default)]
struct Windows {
    global: VecDeque<f64>,
    per_user: HashMap<String, VecDeque<f64>>,
}

pub struct RateLimitPipeline {
    config: RateLimitConfig,
    windows: Mutex<Windows>,
}

impl RateLimitPipeline {
    pub fn new(config: RateLimitConfig) -> Self {
        info!(
            global = config.global_rate_limit,
            per_user = config.user_rate_limit,
            window_secs = config.window_size,
            "rate limit pipeline initialized"
        );
        Self {
            config,
            windows: Mutex::new(Windows::default()),
        }
    }

    pub fn from_config(value: &serde_json::Value) -> Self {
        let config: RateLimitConfig = serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "invalid rate_limit config, using defaults");
            RateLimitConfig::default()
        });
        Self::new(config)
    }

    /// Evaluation at an explicit clock, for deterministic window tests.
    fn check_at(&self, user: &str, now: f64) -> bool {
        let cutoff = now - self.config.window_size;
        let mut windows = self.windows.lock();

        while windows.global.front().is_some_and(|&ts| ts < cutoff) {
            windows.global.pop_front();
        }
        windows.per_user.retain(|_, timestamps| {
            while timestamps.front().is_some_and(|&ts| ts < cutoff) {
                timestamps.pop_front();
            }
            // Empty buckets are garbage-collected.
            !timestamps.is_empty()
        });

        if windows.global.len() >= self.config.global_rate_limit {
            warn!(
                count = windows.global.len(),
                limit = self.config.global_rate_limit,
                "global rate limit hit"
            );
            return false;
        }
        if windows
            .per_user
            .get(user)
            .is_some_and(|w| w.len() >= self.config.user_rate_limit)
        {
            warn!(user, limit = self.config.user_rate_limit, "user rate limit hit");
            return false;
        }

        windows.global.push_back(now);
        windows.per_user.entry(user.to_string()).or_default().push_back(now);
        true
    }

    /// Drops all recorded timestamps (reconnect scenarios).
    pub fn reset(&self) {
        let mut windows = self.windows.lock();
        windows.global.clear();
        windows.per_user.clear();
    }
}

#[async_trait]
impl InputPipeline for RateLimitPipeline {
    fn name(&self) -> &str {
        "rate_limit"
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
        let user = user_key(&message);
        if self.check_at(&user, unix_now()) {
            Ok(Some(message))
        } else {
            info!(
                user,
                preview = %message.text.chars().take(50).collect::<String>(),
                "message rate limited"
            );
            Ok(None)
        }
    }
}
