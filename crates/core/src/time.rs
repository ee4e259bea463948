//! Timestamp helpers
//!
//! The wire format for events and messages uses Unix seconds as `f64`,
//! matching the serialized shapes in the event schema.

use chrono::Utc;

/// Current Unix time in seconds, with sub-second precision.
pub fn unix_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unix_now_is_recent() {
        let now = unix_now();
        // Sometime after 2024 and before 2100.
        assert!(now > 1_700_000_000.0);
        assert!(now < 4_100_000_000.0);
    }
}
