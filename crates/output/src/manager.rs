//! The output provider manager

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use aituber_config::{ConfigService, ProviderLayer};
use aituber_core::{Intent, OutputProvider, ProviderError};
use aituber_events::{
    names, EmitOptions, EventBus, EventPayload, IntentPayload, RenderCompletedPayload,
    RenderFailedPayload, SubscriptionId,
};
use aituber_provider::{ProviderContext, ProviderRegistry};

/// Domain-level settings read from the `[providers.output]` meta fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDomainConfig {
    /// Render with one task per provider instead of serially.
    pub concurrent_rendering: bool,
    /// Per-provider budget for one `execute()` call, in seconds.
    pub render_timeout: f64,
}

impl Default for OutputDomainConfig {
    fn default() -> Self {
        Self {
            concurrent_rendering: true,
            render_timeout: 10.0,
        }
    }
}

impl OutputDomainConfig {
    pub fn from_section(section: &serde_json::Map<String, Value>) -> Self {
        serde_json::from_value(Value::Object(section.clone())).unwrap_or_else(|e| {
            warn!(error = %e, "invalid [providers.output] settings, using defaults");
            Self::default()
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.render_timeout.max(0.1))
    }
}

/// Dispatches every published intent to all enabled output providers.
pub struct OutputProviderManager {
    event_bus: EventBus,
    config: OutputDomainConfig,
    providers: Mutex<Vec<Arc<dyn OutputProvider>>>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl OutputProviderManager {
    pub fn new(event_bus: EventBus, config: OutputDomainConfig) -> Arc<Self> {
        Arc::new(Self {
            event_bus,
            config,
            providers: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        })
    }

    /// Builds every provider named in `enabled_outputs`; failures are
    /// logged and skipped.
    pub fn load_from_config(
        &self,
        registry: &ProviderRegistry,
        config_service: &ConfigService,
        context: &Arc<ProviderContext>,
    ) -> Vec<Arc<dyn OutputProvider>> {
        let enabled = config_service.enabled_providers(ProviderLayer::Output);
        if enabled.is_empty() {
            warn!("no output providers enabled (enabled_outputs is empty)");
            return Vec::new();
        }
        info!(providers = ?enabled, "loading output providers");

        let mut created = Vec::new();
        for name in &enabled {
            let defaults = registry.output_schema_defaults(name);
            let config = config_service.merged_provider_config(
                ProviderLayer::Output,
                name,
                defaults.as_ref(),
            );
            match registry.create_output(name, config, Arc::clone(context)) {
                Ok(provider) => created.push(provider),
                Err(e) => {
                    error!(provider = %name, error = %e, "failed to create output provider, skipping")
                }
            }
        }
        created
    }

    /// Starts each provider and subscribes the manager to
    /// `decision.intent`. A provider whose `start()` fails is dropped.
    pub async fn setup_all(self: &Arc<Self>, providers: Vec<Arc<dyn OutputProvider>>) {
        let mut started = Vec::new();
        for provider in providers {
            match provider.start().await {
                Ok(()) => {
                    info!(provider = provider.name(), "output provider started");
                    started.push(provider);
                }
                Err(e) => {
                    error!(provider = provider.name(), error = %e, "output provider failed to start, dropping");
                }
            }
        }
        *self.providers.lock() = started;

        let mut subscription = self.subscription.lock();
        if subscription.is_none() {
            let weak = Arc::downgrade(self);
            let id = self.event_bus.on_typed::<IntentPayload, _, _>(
                names::DECISION_INTENT,
                100,
                move |_event, payload, _source| {
                    let weak = weak.clone();
                    async move {
                        if let Some(manager) = weak.upgrade() {
                            manager.dispatch(payload.intent_data).await;
                        }
                        Ok(())
                    }
                },
            );
            *subscription = Some(id);
            info!("output manager subscribed to decision.intent");
        }
    }

    /// Renders one intent on every provider, per the dispatch policy.
    pub async fn dispatch(self: &Arc<Self>, intent: Intent) {
        let providers: Vec<Arc<dyn OutputProvider>> = self.providers.lock().clone();
        if providers.is_empty() {
            debug!("no output providers, intent dropped");
            return;
        }
        debug!(
            intent = %intent.id,
            providers = providers.len(),
            concurrent = self.config.concurrent_rendering,
            "dispatching intent"
        );

        if self.config.concurrent_rendering {
            let mut tasks = Vec::with_capacity(providers.len());
            for provider in providers {
                let manager = Arc::clone(self);
                let intent = intent.clone();
                tasks.push(tokio::spawn(async move {
                    manager.render_one(provider, &intent).await;
                }));
            }
            for task in tasks {
                let _ = task.await;
            }
        } else {
            for provider in providers {
                self.render_one(provider, &intent).await;
            }
        }
    }

    async fn render_one(&self, provider: Arc<dyn OutputProvider>, intent: &Intent) {
        let name = provider.name().to_string();
        let output_type = provider.output_type().to_string();
        let start = Instant::now();

        let outcome = tokio::time::timeout(self.config.timeout(), provider.execute(intent)).await;
        let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok(Ok(())) => {
                self.emit_completed(&name, &output_type, duration_ms).await;
            }
            Ok(Err(e)) => {
                error!(provider = %name, error = %e, "render failed");
                self.emit_failed(&name, &output_type, error_kind(&e), &e.to_string())
                    .await;
            }
            Err(_elapsed) => {
                error!(
                    provider = %name,
                    timeout_secs = self.config.render_timeout,
                    "render timed out"
                );
                self.emit_failed(
                    &name,
                    &output_type,
                    "timeout",
                    &format!("render exceeded {:.1}s", self.config.render_timeout),
                )
                .await;
            }
        }
    }

    async fn emit_completed(&self, provider: &str, output_type: &str, duration_ms: f64) {
        let payload = EventPayload::RenderCompleted(RenderCompletedPayload {
            provider: provider.to_string(),
            output_type: output_type.to_string(),
            success: true,
            duration_ms,
            timestamp: aituber_core::unix_now(),
            metadata: serde_json::Map::new(),
        });
        if let Err(e) = self
            .event_bus
            .emit(names::RENDER_COMPLETED, payload, provider, EmitOptions::default())
            .await
        {
            warn!(error = %e, "failed to emit render.completed");
        }
    }

    async fn emit_failed(
        &self,
        provider: &str,
        output_type: &str,
        error_type: &str,
        error_message: &str,
    ) {
        let payload = EventPayload::RenderFailed(RenderFailedPayload {
            provider: provider.to_string(),
            output_type: output_type.to_string(),
            error_type: error_type.to_string(),
            error_message: error_message.to_string(),
            recoverable: true,
            timestamp: aituber_core::unix_now(),
            metadata: serde_json::Map::new(),
        });
        if let Err(e) = self
            .event_bus
            .emit(names::RENDER_FAILED, payload, provider, EmitOptions::default())
            .await
        {
            warn!(error = %e, "failed to emit render.failed");
        }
    }

    /// Stops providers in reverse insertion order and unsubscribes.
    pub async fn stop_all(&self) {
        if let Some(id) = self.subscription.lock().take() {
            self.event_bus.off(names::DECISION_INTENT, id);
        }
        let providers: Vec<Arc<dyn OutputProvider>> =
            self.providers.lock().drain(..).collect();
        for provider in providers.into_iter().rev() {
            info!(provider = provider.name(), "stopping output provider");
            provider.stop().await;
        }
        info!("all output providers stopped");
    }

    pub fn provider_count(&self) -> usize {
        self.providers.lock().len()
    }
}

fn error_kind(error: &ProviderError) -> &'static str {
    match error {
        ProviderError::Init(_) => "init",
        ProviderError::Connection(_) => "connection",
        ProviderError::Runtime(_) => "runtime",
        ProviderError::Config(_) => "config",
        ProviderError::Timeout(_) => "timeout",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct RecordingProvider {
        name: &'static str,
        executed: Arc<Mutex<Vec<String>>>,
        fail: bool,
        delay: Duration,
        stopped_order: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl OutputProvider for RecordingProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn output_type(&self) -> &str {
            "test"
        }

        async fn start(&self) -> Result<(), ProviderError> {
            Ok(())
        }

        async fn execute(&self, intent: &Intent) -> Result<(), ProviderError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProviderError::Runtime("render exploded".into()));
            }
            self.executed.lock().push(intent.response_text.clone());
            Ok(())
        }

        async fn stop(&self) {
            self.stopped_order.lock().push(self.name);
        }
    }

    struct Sinks {
        completed: Arc<AtomicUsize>,
        failed: Arc<AtomicUsize>,
        failed_types: Arc<Mutex<Vec<String>>>,
    }

    fn render_sinks(bus: &EventBus) -> Sinks {
        let completed = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let failed_types: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let completed = Arc::clone(&completed);
            bus.on_typed::<RenderCompletedPayload, _, _>(
                names::RENDER_COMPLETED,
                100,
                move |_n, _p, _s| {
                    let completed = Arc::clone(&completed);
                    async move {
                        completed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
            );
        }
        {
            let failed = Arc::clone(&failed);
            let failed_types = Arc::clone(&failed_types);
            bus.on_typed::<RenderFailedPayload, _, _>(
                names::RENDER_FAILED,
                100,
                move |_n, p, _s| {
                    let failed = Arc::clone(&failed);
                    let failed_types = Arc::clone(&failed_types);
                    async move {
                        failed.fetch_add(1, Ordering::SeqCst);
                        failed_types.lock().push(p.error_type);
                        Ok(())
                    }
                },
            );
        }
        Sinks {
            completed,
            failed,
            failed_types,
        }
    }

    fn recorder(
        name: &'static str,
        fail: bool,
        delay: Duration,
        executed: &Arc<Mutex<Vec<String>>>,
        stopped: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn OutputProvider> {
        Arc::new(RecordingProvider {
            name,
            executed: Arc::clone(executed),
            fail,
            delay,
            stopped_order: Arc::clone(stopped),
        })
    }

    #[tokio::test]
    async fn test_intent_event_reaches_all_providers() {
        let bus = EventBus::new();
        let sinks = render_sinks(&bus);
        let executed = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(Mutex::new(Vec::new()));

        let manager = OutputProviderManager::new(bus.clone(), OutputDomainConfig::default());
        manager
            .setup_all(vec![
                recorder("subtitle", false, Duration::ZERO, &executed, &stopped),
                recorder("tts", false, Duration::ZERO, &executed, &stopped),
            ])
            .await;

        let intent = Intent::new("hello", "hi");
        bus.emit(
            names::DECISION_INTENT,
            EventPayload::Intent(IntentPayload::from_intent(intent, "mock")),
            "test",
            EmitOptions::wait(),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(executed.lock().len(), 2);
        assert_eq!(sinks.completed.load(Ordering::SeqCst), 2);
        assert_eq!(sinks.failed.load(Ordering::SeqCst), 0);
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_failure_is_isolated_and_reported() {
        let bus = EventBus::new();
        let sinks = render_sinks(&bus);
        let executed = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(Mutex::new(Vec::new()));

        let manager = OutputProviderManager::new(bus.clone(), OutputDomainConfig::default());
        manager
            .setup_all(vec![
                recorder("broken", true, Duration::ZERO, &executed, &stopped),
                recorder("healthy", false, Duration::ZERO, &executed, &stopped),
            ])
            .await;

        manager.dispatch(Intent::new("x", "y")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(executed.lock().len(), 1);
        assert_eq!(sinks.completed.load(Ordering::SeqCst), 1);
        assert_eq!(sinks.failed.load(Ordering::SeqCst), 1);
        assert_eq!(sinks.failed_types.lock()[0], "runtime");
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_render_timeout_reports_failure() {
        let bus = EventBus::new();
        let sinks = render_sinks(&bus);
        let executed = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(Mutex::new(Vec::new()));

        let manager = OutputProviderManager::new(
            bus.clone(),
            OutputDomainConfig {
                concurrent_rendering: true,
                render_timeout: 0.1,
            },
        );
        manager
            .setup_all(vec![recorder(
                "sleeper",
                false,
                Duration::from_secs(5),
                &executed,
                &stopped,
            )])
            .await;

        manager.dispatch(Intent::new("x", "y")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(sinks.failed.load(Ordering::SeqCst), 1);
        assert_eq!(sinks.failed_types.lock()[0], "timeout");
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_serial_dispatch_and_reverse_stop_order() {
        let bus = EventBus::new();
        let _sinks = render_sinks(&bus);
        let executed = Arc::new(Mutex::new(Vec::new()));
        let stopped = Arc::new(Mutex::new(Vec::new()));

        let manager = OutputProviderManager::new(
            bus.clone(),
            OutputDomainConfig {
                concurrent_rendering: false,
                render_timeout: 5.0,
            },
        );
        manager
            .setup_all(vec![
                recorder("first", false, Duration::ZERO, &executed, &stopped),
                recorder("second", false, Duration::ZERO, &executed, &stopped),
            ])
            .await;

        manager.dispatch(Intent::new("a", "b")).await;
        assert_eq!(executed.lock().len(), 2);

        manager.stop_all().await;
        assert_eq!(*stopped.lock(), vec!["second", "first"]);
        assert_eq!(manager.provider_count(), 0);
    }
}
