//! The provider registry
//!
//! One name → factory map per layer. Factories receive the merged
//! provider config (a JSON value the core never interprets) and the
//! shared [`ProviderContext`]. Schema defaults registered alongside the
//! factory feed the two-level config merge.
//!
//! Registration happens in an explicit startup module (the compile-time
//! counterpart of import-side-effect discovery), so only enabled
//! providers ever get built.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use aituber_core::{DecisionProvider, InputProvider, OutputProvider};

use crate::context::ProviderContext;
use crate::RegistryError;

type Factory<T> =
    Box<dyn Fn(Value, Arc<ProviderContext>) -> Result<Arc<T>, RegistryError> + Send + Sync>;

struct Registration<T: ?Sized> {
    factory: Factory<T>,
    source: String,
    schema_defaults: Option<Value>,
}

struct Layer<T: ?Sized> {
    name: &'static str,
    entries: RwLock<HashMap<String, Registration<T>>>,
}

impl<T: ?Sized> Layer<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn register(
        &self,
        name: &str,
        source: &str,
        schema_defaults: Option<Value>,
        factory: Factory<T>,
    ) {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(name) {
            warn!(
                layer = self.name,
                provider = name,
                old_source = %existing.source,
                new_source = source,
                "provider already registered, overwriting"
            );
        }
        entries.insert(
            name.to_string(),
            Registration {
                factory,
                source: source.to_string(),
                schema_defaults,
            },
        );
        debug!(layer = self.name, provider = name, source, "registered provider");
    }

    fn create(
        &self,
        name: &str,
        config: Value,
        context: Arc<ProviderContext>,
    ) -> Result<Arc<T>, RegistryError> {
        let entries = self.entries.read();
        let Some(registration) = entries.get(name) else {
            let mut names: Vec<&str> = entries.keys().map(String::as_str).collect();
            names.sort_unstable();
            let available = if names.is_empty() {
                "none".to_string()
            } else {
                names.join(", ")
            };
            return Err(RegistryError::UnknownProvider {
                layer: self.name,
                name: name.to_string(),
                available,
            });
        };
        (registration.factory)(config, context)
    }

    fn schema_defaults(&self, name: &str) -> Option<Value> {
        self.entries
            .read()
            .get(name)
            .and_then(|r| r.schema_defaults.clone())
    }

    fn unregister(&self, name: &str) -> bool {
        self.entries.write().remove(name).is_some()
    }

    fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    fn info(&self) -> Value {
        let entries = self.entries.read();
        let map: serde_json::Map<String, Value> = entries
            .iter()
            .map(|(name, reg)| {
                (
                    name.clone(),
                    json!({
                        "source": reg.source,
                        "has_schema": reg.schema_defaults.is_some(),
                    }),
                )
            })
            .collect();
        Value::Object(map)
    }

    fn clear(&self) {
        self.entries.write().clear();
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

/// Registration counts per layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryInfo {
    pub input: usize,
    pub decision: usize,
    pub output: usize,
}

impl RegistryInfo {
    pub fn total(&self) -> usize {
        self.input + self.decision + self.output
    }
}

/// Name → factory maps for all three layers.
pub struct ProviderRegistry {
    input: Layer<dyn InputProvider>,
    decision: Layer<dyn DecisionProvider>,
    output: Layer<dyn OutputProvider>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            input: Layer::new("input"),
            decision: Layer::new("decision"),
            output: Layer::new("output"),
        }
    }

    // ---- registration -----------------------------------------------------

    pub fn register_input<F>(&self, name: &str, source: &str, factory: F)
    where
        F: Fn(Value, Arc<ProviderContext>) -> Result<Arc<dyn InputProvider>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.input.register(name, source, None, Box::new(factory));
    }

    /// Registers an input provider along with its config schema defaults
    /// (the serialized `Default` of the schema struct).
    pub fn register_input_with_schema<S, F>(&self, name: &str, source: &str, factory: F)
    where
        S: Serialize + Default,
        F: Fn(Value, Arc<ProviderContext>) -> Result<Arc<dyn InputProvider>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.input
            .register(name, source, schema_defaults_of::<S>(name), Box::new(factory));
    }

    pub fn register_decision<F>(&self, name: &str, source: &str, factory: F)
    where
        F: Fn(Value, Arc<ProviderContext>) -> Result<Arc<dyn DecisionProvider>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.decision.register(name, source, None, Box::new(factory));
    }

    pub fn register_decision_with_schema<S, F>(&self, name: &str, source: &str, factory: F)
    where
        S: Serialize + Default,
        F: Fn(Value, Arc<ProviderContext>) -> Result<Arc<dyn DecisionProvider>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.decision
            .register(name, source, schema_defaults_of::<S>(name), Box::new(factory));
    }

    pub fn register_output<F>(&self, name: &str, source: &str, factory: F)
    where
        F: Fn(Value, Arc<ProviderContext>) -> Result<Arc<dyn OutputProvider>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.output.register(name, source, None, Box::new(factory));
    }

    pub fn register_output_with_schema<S, F>(&self, name: &str, source: &str, factory: F)
    where
        S: Serialize + Default,
        F: Fn(Value, Arc<ProviderContext>) -> Result<Arc<dyn OutputProvider>, RegistryError>
            + Send
            + Sync
            + 'static,
    {
        self.output
            .register(name, source, schema_defaults_of::<S>(name), Box::new(factory));
    }

    // ---- creation ---------------------------------------------------------

    pub fn create_input(
        &self,
        name: &str,
        config: Value,
        context: Arc<ProviderContext>,
    ) -> Result<Arc<dyn InputProvider>, RegistryError> {
        self.input.create(name, config, context)
    }

    pub fn create_decision(
        &self,
        name: &str,
        config: Value,
        context: Arc<ProviderContext>,
    ) -> Result<Arc<dyn DecisionProvider>, RegistryError> {
        self.decision.create(name, config, context)
    }

    pub fn create_output(
        &self,
        name: &str,
        config: Value,
        context: Arc<ProviderContext>,
    ) -> Result<Arc<dyn OutputProvider>, RegistryError> {
        self.output.create(name, config, context)
    }

    // ---- schema access ----------------------------------------------------

    pub fn input_schema_defaults(&self, name: &str) -> Option<Value> {
        self.input.schema_defaults(name)
    }

    pub fn decision_schema_defaults(&self, name: &str) -> Option<Value> {
        self.decision.schema_defaults(name)
    }

    pub fn output_schema_defaults(&self, name: &str) -> Option<Value> {
        self.output.schema_defaults(name)
    }

    // ---- queries ----------------------------------------------------------

    pub fn registered_inputs(&self) -> Vec<String> {
        self.input.names()
    }

    pub fn registered_decisions(&self) -> Vec<String> {
        self.decision.names()
    }

    pub fn registered_outputs(&self) -> Vec<String> {
        self.output.names()
    }

    pub fn counts(&self) -> RegistryInfo {
        RegistryInfo {
            input: self.input.len(),
            decision: self.decision.len(),
            output: self.output.len(),
        }
    }

    /// Debug dump of every registration.
    pub fn registry_info(&self) -> Value {
        json!({
            "input_providers": self.input.info(),
            "decision_providers": self.decision.info(),
            "output_providers": self.output.info(),
        })
    }

    // ---- removal ----------------------------------------------------------

    pub fn unregister_input(&self, name: &str) -> bool {
        self.input.unregister(name)
    }

    pub fn unregister_decision(&self, name: &str) -> bool {
        self.decision.unregister(name)
    }

    pub fn unregister_output(&self, name: &str) -> bool {
        self.output.unregister(name)
    }

    /// Drops every registration. Tests only.
    pub fn clear_all(&self) {
        self.input.clear();
        self.decision.clear();
        self.output.clear();
        debug!("cleared all registered providers");
    }
}

fn schema_defaults_of<S: Serialize + Default>(name: &str) -> Option<Value> {
    match serde_json::to_value(S::default()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(provider = name, error = %e, "failed to serialize schema defaults");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aituber_core::{MessageStream, NormalizedMessage, ProviderError};
    use aituber_events::EventBus;
    use async_trait::async_trait;
    use serde::Deserialize;

    struct NullInput;

    #[async_trait]
    impl InputProvider for NullInput {
        fn name(&self) -> &str {
            "null"
        }

        async fn start(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        fn stream(&self) -> MessageStream<'_> {
            Box::pin(futures::stream::empty::<NormalizedMessage>())
        }
    }

    fn test_context() -> Arc<ProviderContext> {
        Arc::new(ProviderContext::new(EventBus::new()))
    }

    #[test]
    fn test_create_registered_provider() {
        let registry = ProviderRegistry::new();
        registry.register_input("null", "builtin:null", |_config, _ctx| Ok(Arc::new(NullInput)));

        let provider = registry
            .create_input("null", Value::Null, test_context())
            .unwrap();
        assert_eq!(provider.name(), "null");
        assert_eq!(registry.counts().input, 1);
    }

    #[test]
    fn test_unknown_provider_enumerates_available() {
        let registry = ProviderRegistry::new();
        registry.register_input("console_input", "builtin", |_c, _x| Ok(Arc::new(NullInput)));
        registry.register_input("mock_danmaku", "builtin", |_c, _x| Ok(Arc::new(NullInput)));

        let err = match registry.create_input("typo", Value::Null, test_context()) {
            Err(e) => e,
            Ok(_) => panic!("expected unknown provider error"),
        };
        let message = err.to_string();
        assert!(message.contains("unknown input provider"));
        assert!(message.contains("console_input, mock_danmaku"));
    }

    #[test]
    fn test_empty_registry_says_none() {
        let registry = ProviderRegistry::new();
        let err = match registry.create_decision("anything", Value::Null, test_context()) {
            Err(e) => e,
            Ok(_) => panic!("expected empty registry error"),
        };
        assert!(err.to_string().contains("none"));
    }

    #[test]
    fn test_schema_defaults_registered_with_factory() {
        #[derive(Serialize, Deserialize)]
        #[serde(default)]
        struct NullConfig {
            interval: f64,
        }
        impl Default for NullConfig {
            fn default() -> Self {
                Self { interval: 1.5 }
            }
        }

        let registry = ProviderRegistry::new();
        registry.register_input_with_schema::<NullConfig, _>("null", "builtin", |_c, _x| {
            Ok(Arc::new(NullInput))
        });

        let defaults = registry.input_schema_defaults("null").unwrap();
        assert_eq!(defaults["interval"], 1.5);
        assert!(registry.input_schema_defaults("missing").is_none());
    }

    #[test]
    fn test_clear_all_resets() {
        let registry = ProviderRegistry::new();
        registry.register_input("a", "builtin", |_c, _x| Ok(Arc::new(NullInput)));
        registry.clear_all();
        assert_eq!(registry.counts().total(), 0);
    }
}
