//! Deep merge for configuration values
//!
//! Merge rules:
//! - scalars: override replaces base
//! - maps: recurse
//! - lists: override replaces base wholesale (no element merge)
//! - `null` override: skipped, base value survives

use serde_json::Value;

/// Merges `override_value` on top of `base`, returning the result.
///
/// Idempotent: merging the same override twice yields the same result as
/// merging it once.
pub fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut result = base_map.clone();
            for (key, value) in override_map {
                if value.is_null() {
                    continue;
                }
                match result.get(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        let merged = deep_merge(existing, value);
                        result.insert(key.clone(), merged);
                    }
                    _ => {
                        result.insert(key.clone(), value.clone());
                    }
                }
            }
            Value::Object(result)
        }
        (_, Value::Null) => base.clone(),
        _ => override_value.clone(),
    }
}
