//! Event registry: event-name → payload-kind bindings
//!
//! Subscribing through the typed API registers the binding implicitly;
//! emitting a bound event with a different payload kind fails
//! synchronously. Events outside the core prefixes are never bound and
//! carry whatever payload the publisher chose.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::names;
use crate::EventError;

/// Name → expected payload kind.
#[derive(Default)]
pub struct EventRegistry {
    bindings: RwLock<HashMap<String, &'static str>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds a core event name to a payload kind.
    ///
    /// Names outside the core prefixes are ignored (extension events stay
    /// unvalidated). Re-binding to a different kind warns and overwrites.
    pub fn register(&self, event_name: &str, kind: &'static str) -> bool {
        if !names::is_core_event(event_name) {
            debug!(event = event_name, "not a core event name, skipping registration");
            return false;
        }

        let mut bindings = self.bindings.write();
        if let Some(existing) = bindings.get(event_name) {
            if *existing != kind {
                warn!(
                    event = event_name,
                    old = existing,
                    new = kind,
                    "re-binding event to a different payload kind"
                );
            } else {
                return true;
            }
        }
        bindings.insert(event_name.to_string(), kind);
        debug!(event = event_name, kind, "registered event binding");
        true
    }

    /// Expected payload kind for an event, when bound.
    pub fn expected_kind(&self, event_name: &str) -> Option<&'static str> {
        self.bindings.read().get(event_name).copied()
    }

    pub fn is_registered(&self, event_name: &str) -> bool {
        self.bindings.read().contains_key(event_name)
    }

    /// Checks an outgoing payload against the binding for its event.
    ///
    /// Unbound events pass (with a debug note for core-prefixed names).
    pub fn validate(&self, event_name: &str, actual_kind: &'static str) -> Result<(), EventError> {
        match self.expected_kind(event_name) {
            Some(expected) if expected != actual_kind => Err(EventError::PayloadType {
                event: event_name.to_string(),
                expected,
                actual: actual_kind,
            }),
            Some(_) => Ok(()),
            None => {
                if names::is_core_event(event_name) {
                    debug!(event = event_name, "core event emitted without a registered binding");
                }
                Ok(())
            }
        }
    }

    pub fn unregister(&self, event_name: &str) -> bool {
        self.bindings.write().remove(event_name).is_some()
    }

    pub fn list(&self) -> Vec<(String, &'static str)> {
        self.bindings
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    pub fn clear(&self) {
        self.bindings.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_validate() {
        let registry = EventRegistry::new();
        assert!(registry.register(names::DECISION_INTENT, "IntentPayload"));
        assert!(registry.validate(names::DECISION_INTENT, "IntentPayload").is_ok());

        let err = registry
            .validate(names::DECISION_INTENT, "StartupPayload")
            .unwrap_err();
        assert!(matches!(err, EventError::PayloadType { .. }));
    }

    #[test]
    fn test_non_core_names_not_bound() {
        let registry = EventRegistry::new();
        assert!(!registry.register("plugin.custom", "CustomPayload"));
        assert!(!registry.is_registered("plugin.custom"));
        // Unbound events always validate.
        assert!(registry.validate("plugin.custom", "CustomPayload").is_ok());
    }

    #[test]
    fn test_rebind_same_kind_is_quiet() {
        let registry = EventRegistry::new();
        registry.register(names::DATA_MESSAGE, "MessageReadyPayload");
        registry.register(names::DATA_MESSAGE, "MessageReadyPayload");
        assert_eq!(
            registry.expected_kind(names::DATA_MESSAGE),
            Some("MessageReadyPayload")
        );
    }
}
