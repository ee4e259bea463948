//! Per-event statistics

use serde::{Deserialize, Serialize};

/// Counters kept by the bus for each event name.
///
/// Reads return copies so callers cannot mutate the bus's internal state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub emit_count: u64,
    /// Listener count at the time of the last emit.
    pub listener_count: usize,
    pub error_count: u64,
    pub last_emit_time: f64,
    pub last_error_time: f64,
    pub total_execution_time_ms: f64,
}
