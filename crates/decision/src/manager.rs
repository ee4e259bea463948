//! The decision provider manager
//!
//! Exactly one decision provider is active. The manager creates it from
//! config via the registry, bridges `data.message` events into its
//! fire-and-forget `decide()`, and supports runtime switching where the
//! old provider survives a failed switch.
//!
//! Architecture constraint (three-domain flow): this manager only
//! subscribes to input-domain events and only publishes decision-domain
//! events, never anything from the output domain.

use std::sync::{Arc, Weak};

use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use aituber_config::ProviderLayer;
use aituber_core::{DecisionProvider, NormalizedMessage};
use aituber_events::{
    names, EmitOptions, EventBus, EventPayload, MessageReadyPayload, ProviderConnectedPayload,
    ProviderDisconnectedPayload, SubscriptionId,
};
use aituber_provider::{ProviderContext, ProviderRegistry};

use crate::DecisionError;

/// Fallback active-provider name when config names none.
const DEFAULT_PROVIDER: &str = "llm";

#[derive(Default)]
struct Active {
    provider: Option<Arc<dyn DecisionProvider>>,
    name: Option<String>,
}

/// Owns the single active decision provider.
pub struct DecisionProviderManager {
    event_bus: EventBus,
    registry: Arc<ProviderRegistry>,
    context: Arc<ProviderContext>,
    /// Guards provider switches end to end.
    active: Mutex<Active>,
    subscription: SyncMutex<Option<SubscriptionId>>,
    /// Outstanding fire-and-forget decide tasks; cancelled on cleanup.
    decide_tasks: SyncMutex<Vec<JoinHandle<()>>>,
}

impl DecisionProviderManager {
    pub fn new(
        event_bus: EventBus,
        registry: Arc<ProviderRegistry>,
        context: Arc<ProviderContext>,
    ) -> Arc<Self> {
        Arc::new(Self {
            event_bus,
            registry,
            context,
            active: Mutex::new(Active::default()),
            subscription: SyncMutex::new(None),
            decide_tasks: SyncMutex::new(Vec::new()),
        })
    }

    fn resolve_name(
        provider_name: Option<&str>,
        decision_config: &serde_json::Map<String, Value>,
    ) -> String {
        provider_name
            .map(str::to_string)
            .or_else(|| {
                decision_config
                    .get("active_provider")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| DEFAULT_PROVIDER.to_string())
    }

    fn provider_config(&self, name: &str, override_config: Option<Value>) -> Value {
        if let Some(config) = override_config {
            return config;
        }
        let defaults = self.registry.decision_schema_defaults(name);
        match self.context.config_service() {
            Some(service) => {
                service.merged_provider_config(ProviderLayer::Decision, name, defaults.as_ref())
            }
            None => defaults.unwrap_or(Value::Object(serde_json::Map::new())),
        }
    }

    /// Creates, starts, and activates the configured provider, then
    /// subscribes to `data.message` (first call only).
    ///
    /// On start failure the manager is left with no active provider and
    /// the error is returned.
    pub async fn setup(
        self: &Arc<Self>,
        provider_name: Option<&str>,
        provider_config: Option<Value>,
        decision_config: &serde_json::Map<String, Value>,
    ) -> Result<(), DecisionError> {
        let name = Self::resolve_name(provider_name, decision_config);

        let available: Vec<String> = decision_config
            .get("available_providers")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !available.is_empty() && !available.iter().any(|n| n == &name) {
            warn!(
                provider = %name,
                available = ?available,
                "active provider is not in available_providers, trying anyway"
            );
        }

        let config = self.provider_config(&name, provider_config);

        let mut active = self.active.lock().await;
        if let (Some(old), Some(old_name)) = (&active.provider, &active.name) {
            info!(provider = %old_name, "cleaning up current decision provider");
            old.cleanup().await;
        }
        active.provider = None;
        active.name = None;

        let endpoint = endpoint_of(&config);
        let provider = self
            .registry
            .create_decision(&name, config, Arc::clone(&self.context))?;

        if let Err(e) = provider.start().await {
            error!(provider = %name, error = %e, "decision provider failed to start");
            return Err(DecisionError::Connection {
                provider: name,
                message: e.to_string(),
            });
        }

        active.provider = Some(provider);
        active.name = Some(name.clone());
        drop(active);

        info!(provider = %name, "decision provider active");
        self.emit_connected(&name, endpoint, None).await;
        self.subscribe_data_message();
        Ok(())
    }

    /// Switches to a new provider at runtime. The new provider is built
    /// and started first; only on success is the old one torn down, so a
    /// failed switch leaves the old provider active.
    pub async fn switch_provider(
        self: &Arc<Self>,
        name: &str,
        config: Value,
    ) -> Result<(), DecisionError> {
        let mut active = self.active.lock().await;
        let old_name = active.name.clone();
        info!(from = ?old_name, to = %name, "switching decision provider");

        let endpoint = endpoint_of(&config);
        let new_provider = self
            .registry
            .create_decision(name, config, Arc::clone(&self.context))?;

        if let Err(e) = new_provider.start().await {
            error!(provider = %name, error = %e, "new provider failed to start, keeping old");
            return Err(DecisionError::Connection {
                provider: name.to_string(),
                message: e.to_string(),
            });
        }

        if let Some(old) = active.provider.take() {
            if let Err(e) =
                tokio::time::timeout(std::time::Duration::from_secs(5), old.cleanup()).await
            {
                warn!(error = %e, "old provider cleanup timed out");
            }
        }
        active.provider = Some(new_provider);
        active.name = Some(name.to_string());
        drop(active);

        self.emit_connected(name, endpoint, old_name).await;
        info!(provider = %name, "decision provider switch complete");
        Ok(())
    }

    /// Fire-and-forget decision. Returns immediately; the provider
    /// publishes `decision.intent` from a tracked background task.
    /// Silently does nothing when no provider is active.
    pub async fn decide(self: &Arc<Self>, message: NormalizedMessage) {
        let (provider, name) = {
            let active = self.active.lock().await;
            match (&active.provider, &active.name) {
                (Some(provider), Some(name)) => (Arc::clone(provider), name.clone()),
                _ => {
                    warn!("no active decision provider, skipping message");
                    return;
                }
            }
        };

        debug!(provider = %name, "dispatching decision");
        let task = tokio::spawn(async move {
            provider.decide(message).await;
        });

        let mut tasks = self.decide_tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Unsubscribes, cancels outstanding decisions, and tears down the
    /// active provider.
    pub async fn cleanup(self: &Arc<Self>) {
        if let Some(id) = self.subscription.lock().take() {
            self.event_bus.off(names::DATA_MESSAGE, id);
        }

        for task in self.decide_tasks.lock().drain(..) {
            task.abort();
        }

        let mut active = self.active.lock().await;
        if let (Some(provider), Some(name)) = (active.provider.take(), active.name.take()) {
            info!(provider = %name, "cleaning up decision provider");
            provider.cleanup().await;

            let payload = EventPayload::ProviderDisconnected(ProviderDisconnectedPayload::new(
                name, "cleanup",
            ));
            if let Err(e) = self
                .event_bus
                .emit(
                    names::DECISION_PROVIDER_DISCONNECTED,
                    payload,
                    "DecisionProviderManager",
                    EmitOptions::default(),
                )
                .await
            {
                warn!(error = %e, "failed to emit provider disconnected event");
            }
        }
        info!("decision provider manager cleaned up");
    }

    pub async fn current_provider_name(&self) -> Option<String> {
        self.active.lock().await.name.clone()
    }

    pub fn available_providers(&self) -> Vec<String> {
        self.registry.registered_decisions()
    }

    fn subscribe_data_message(self: &Arc<Self>) {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            debug!("already subscribed to data.message");
            return;
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let id = self.event_bus.on_typed::<MessageReadyPayload, _, _>(
            names::DATA_MESSAGE,
            100,
            move |_event, payload, _source| {
                let weak = weak.clone();
                async move {
                    if let Some(manager) = weak.upgrade() {
                        manager.decide(payload.message).await;
                    }
                    Ok(())
                }
            },
        );
        *subscription = Some(id);
        info!("decision manager subscribed to data.message");
    }

    async fn emit_connected(
        self: &Arc<Self>,
        name: &str,
        endpoint: Option<String>,
        previous: Option<String>,
    ) {
        let mut payload = ProviderConnectedPayload::new(name);
        payload.endpoint = endpoint;
        if let Some(previous) = previous {
            payload
                .metadata
                .insert("previous_provider".into(), previous.into());
        }
        if let Err(e) = self
            .event_bus
            .emit(
                names::DECISION_PROVIDER_CONNECTED,
                EventPayload::ProviderConnected(payload),
                "DecisionProviderManager",
                EmitOptions::default(),
            )
            .await
        {
            warn!(error = %e, "failed to emit provider connected event");
        }
    }
}

fn endpoint_of(config: &Value) -> Option<String> {
    for key in ["host", "ws_url", "endpoint"] {
        if let Some(value) = config.get(key).and_then(Value::as_str) {
            return Some(value.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ReplayConfig, ReplayDecisionProvider};
    use aituber_core::ProviderError;
    use aituber_events::IntentPayload;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct FailingProvider;

    #[async_trait]
    impl DecisionProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }

        async fn start(&self) -> Result<(), ProviderError> {
            Err(ProviderError::Connection("backend unreachable".into()))
        }

        async fn decide(&self, _message: NormalizedMessage) {}
    }

    fn registry_with_builtins() -> Arc<ProviderRegistry> {
        let registry = Arc::new(ProviderRegistry::new());
        registry.register_decision("replay", "builtin:replay", |config, context| {
            let config: ReplayConfig = serde_json::from_value(config).unwrap_or_default();
            Ok(Arc::new(ReplayDecisionProvider::new(config, context)))
        });
        registry.register_decision("failing", "test:failing", |_config, _context| {
            Ok(Arc::new(FailingProvider))
        });
        registry
    }

    fn decision_config(active: &str) -> serde_json::Map<String, Value> {
        serde_json::json!({
            "active_provider": active,
            "available_providers": ["replay", "failing"],
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    fn manager_on(bus: &EventBus) -> Arc<DecisionProviderManager> {
        let registry = registry_with_builtins();
        let context = Arc::new(ProviderContext::new(bus.clone()));
        DecisionProviderManager::new(bus.clone(), registry, context)
    }

    fn intent_counter(bus: &EventBus) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        bus.on_typed::<IntentPayload, _, _>(names::DECISION_INTENT, 100, move |_n, _p, _s| {
            let count = Arc::clone(&count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        count
    }

    #[tokio::test]
    async fn test_setup_wires_data_message_to_intent() {
        let bus = EventBus::new();
        let intents = intent_counter(&bus);
        let manager = manager_on(&bus);

        manager
            .setup(None, None, &decision_config("replay"))
            .await
            .unwrap();
        assert_eq!(manager.current_provider_name().await.as_deref(), Some("replay"));

        let payload = EventPayload::MessageReady(MessageReadyPayload::from_message(
            NormalizedMessage::new("hello", "console_input"),
        ));
        bus.emit(names::DATA_MESSAGE, payload, "test", EmitOptions::wait())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(intents.load(Ordering::SeqCst), 1);
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn test_unknown_provider_is_registry_error() {
        let bus = EventBus::new();
        let manager = manager_on(&bus);
        let err = manager
            .setup(Some("nope"), None, &decision_config("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::Registry(_)));
    }

    #[tokio::test]
    async fn test_failed_start_leaves_no_provider() {
        let bus = EventBus::new();
        let manager = manager_on(&bus);
        let err = manager
            .setup(Some("failing"), None, &decision_config("failing"))
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::Connection { .. }));
        assert!(manager.current_provider_name().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_switch_keeps_old_provider() {
        let bus = EventBus::new();
        let manager = manager_on(&bus);
        manager
            .setup(None, None, &decision_config("replay"))
            .await
            .unwrap();

        let err = manager
            .switch_provider("failing", Value::Object(Default::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, DecisionError::Connection { .. }));
        assert_eq!(manager.current_provider_name().await.as_deref(), Some("replay"));
        manager.cleanup().await;
    }

    #[tokio::test]
    async fn test_connected_and_disconnected_events() {
        let bus = EventBus::new();
        let connected = Arc::new(AtomicUsize::new(0));
        let disconnected = Arc::new(AtomicUsize::new(0));
        {
            let connected = Arc::clone(&connected);
            bus.on_typed::<ProviderConnectedPayload, _, _>(
                names::DECISION_PROVIDER_CONNECTED,
                100,
                move |_n, _p, _s| {
                    let connected = Arc::clone(&connected);
                    async move {
                        connected.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            );
        }
        {
            let disconnected = Arc::clone(&disconnected);
            bus.on_typed::<ProviderDisconnectedPayload, _, _>(
                names::DECISION_PROVIDER_DISCONNECTED,
                100,
                move |_n, _p, _s| {
                    let disconnected = Arc::clone(&disconnected);
                    async move {
                        disconnected.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            );
        }

        let manager = manager_on(&bus);
        manager
            .setup(None, None, &decision_config("replay"))
            .await
            .unwrap();
        manager.cleanup().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(disconnected.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_decide_without_provider_is_silent() {
        let bus = EventBus::new();
        let intents = intent_counter(&bus);
        let manager = manager_on(&bus);
        manager.decide(NormalizedMessage::new("void", "test")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(intents.load(Ordering::SeqCst), 0);
    }
}
