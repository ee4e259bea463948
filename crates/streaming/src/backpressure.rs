//! Backpressure strategies and subscriber configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What happens on a full subscriber queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureStrategy {
    /// The publisher waits for a free slot.
    Block,
    /// The incoming chunk is discarded.
    #[default]
    DropNewest,
    /// The oldest queued chunk is evicted to make room.
    DropOldest,
    /// The publisher gets an error for this subscriber; others still work.
    FailFast,
}

/// Per-subscriber tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    pub queue_size: usize,
    pub backpressure_strategy: BackpressureStrategy,
    /// Warn once when the drop rate exceeds this fraction.
    pub degradation_threshold: f64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            queue_size: 100,
            backpressure_strategy: BackpressureStrategy::DropNewest,
            degradation_threshold: 0.8,
        }
    }
}

impl SubscriberConfig {
    /// Clamps out-of-range values into their documented bounds.
    pub fn normalized(mut self) -> Self {
        self.queue_size = self.queue_size.clamp(1, 1000);
        self.degradation_threshold = self.degradation_threshold.clamp(0.0, 1.0);
        self
    }
}

/// Outcome of publishing one chunk across all subscribers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishResult {
    pub success_count: usize,
    pub drop_count: usize,
    /// Subscriber name → error message (fail-fast rejections).
    pub errors: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_normalization() {
        let config = SubscriberConfig {
            queue_size: 0,
            degradation_threshold: 3.0,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.queue_size, 1);
        assert_eq!(config.degradation_threshold, 1.0);

        let config = SubscriberConfig {
            queue_size: 50_000,
            ..Default::default()
        }
        .normalized();
        assert_eq!(config.queue_size, 1000);
    }

    #[test]
    fn test_strategy_config_strings() {
        let config: SubscriberConfig =
            serde_json::from_str(r#"{"backpressure_strategy": "drop_oldest"}"#).unwrap();
        assert_eq!(config.backpressure_strategy, BackpressureStrategy::DropOldest);
    }
}
