//! The input provider manager
//!
//! Loads enabled providers from config and runs each one in a supervised
//! task: pull from `stream()`, filter through the pipeline chain, publish
//! `data.message`. Publishing uses `wait: true` so the decision domain
//! observes messages in stream order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use aituber_config::{ConfigService, ProviderLayer};
use aituber_core::InputProvider;
use aituber_events::{names, EmitOptions, EventBus, EventPayload, MessageReadyPayload};
use aituber_provider::{ProviderContext, ProviderRegistry};

use crate::pipeline::InputPipelineManager;

const STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Supervises every enabled input provider.
pub struct InputProviderManager {
    event_bus: EventBus,
    pipeline_manager: Option<Arc<InputPipelineManager>>,
    providers: Mutex<Vec<Arc<dyn InputProvider>>>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    started: AtomicBool,
}

impl InputProviderManager {
    pub fn new(event_bus: EventBus, pipeline_manager: Option<Arc<InputPipelineManager>>) -> Self {
        if pipeline_manager.is_some() {
            info!("input pipelines attached to provider manager");
        }
        Self {
            event_bus,
            pipeline_manager,
            providers: Mutex::new(Vec::new()),
            tasks: Mutex::new(HashMap::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Builds every provider named in `enabled_inputs`.
    ///
    /// A provider that fails to construct is logged and skipped; the rest
    /// still load.
    pub fn load_from_config(
        &self,
        registry: &ProviderRegistry,
        config_service: &ConfigService,
        context: &Arc<ProviderContext>,
    ) -> Vec<Arc<dyn InputProvider>> {
        let enabled = config_service.enabled_providers(ProviderLayer::Input);
        if enabled.is_empty() {
            warn!("no input providers enabled (enabled_inputs is empty)");
            return Vec::new();
        }
        info!(providers = ?enabled, "loading input providers");

        let mut created = Vec::new();
        for name in &enabled {
            let defaults = registry.input_schema_defaults(name);
            let config =
                config_service.merged_provider_config(ProviderLayer::Input, name, defaults.as_ref());
            match registry.create_input(name, config, Arc::clone(context)) {
                Ok(provider) => {
                    info!(provider = %name, "input provider created");
                    created.push(provider);
                }
                Err(e) => {
                    error!(provider = %name, error = %e, "failed to create input provider, skipping");
                }
            }
        }

        if created.len() < enabled.len() {
            warn!(
                loaded = created.len(),
                configured = enabled.len(),
                "some input providers failed to load"
            );
        }
        created
    }

    /// Spawns one supervised task per provider and returns promptly.
    /// Repeat calls after start are rejected.
    pub fn start_all(&self, providers: Vec<Arc<dyn InputProvider>>) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("input provider manager already started, ignoring");
            return;
        }

        info!(count = providers.len(), "starting input providers");
        let mut tasks = self.tasks.lock();
        for provider in &providers {
            let name = provider.name().to_string();
            let task = Self::spawn_provider(
                self.event_bus.clone(),
                self.pipeline_manager.clone(),
                Arc::clone(provider),
            );
            tasks.insert(name, task);
        }
        *self.providers.lock() = providers;
    }

    fn spawn_provider(
        event_bus: EventBus,
        pipeline_manager: Option<Arc<InputPipelineManager>>,
        provider: Arc<dyn InputProvider>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let name = provider.name().to_string();
            info!(provider = %name, "input provider task running");

            let run = async {
                provider.start().await.map_err(|e| e.to_string())?;

                let mut stream = provider.stream();
                while let Some(message) = stream.next().await {
                    let message = match &pipeline_manager {
                        Some(pm) => match pm.process(message).await {
                            Ok(Some(message)) => message,
                            Ok(None) => {
                                debug!(provider = %name, "message dropped by pipeline");
                                continue;
                            }
                            Err(e) => {
                                error!(provider = %name, error = %e, "pipeline aborted message");
                                continue;
                            }
                        },
                        None => message,
                    };

                    if !message.is_valid() {
                        warn!(provider = %name, "provider yielded an invalid message, dropping");
                        continue;
                    }

                    let payload =
                        EventPayload::MessageReady(MessageReadyPayload::from_message(message));
                    if let Err(e) = event_bus
                        .emit(names::DATA_MESSAGE, payload, &name, EmitOptions::wait())
                        .await
                    {
                        error!(provider = %name, error = %e, "failed to publish message");
                    }
                }
                Ok::<(), String>(())
            };

            if let Err(e) = run.await {
                error!(provider = %name, error = %e, "input provider failed");
            }

            // Resource release happens in every exit path.
            provider.stop().await;
            info!(provider = %name, "input provider task finished");
        })
    }

    /// Stops every provider, waits for their tasks, cancels stragglers.
    pub async fn stop_all(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            warn!("input provider manager not started, ignoring stop");
            return;
        }
        info!("stopping input providers");

        let providers: Vec<Arc<dyn InputProvider>> = self.providers.lock().clone();
        for provider in &providers {
            provider.stop().await;
        }

        let mut handles: Vec<JoinHandle<()>> =
            self.tasks.lock().drain().map(|(_, handle)| handle).collect();

        if tokio::time::timeout(STOP_TIMEOUT, futures::future::join_all(handles.iter_mut()))
            .await
            .is_err()
        {
            warn!("timed out waiting for provider tasks, cancelling");
            for handle in &handles {
                handle.abort();
            }
        }

        self.providers.lock().clear();
        info!("all input providers stopped");
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn provider_count(&self) -> usize {
        self.providers.lock().len()
    }

    /// Finds a running provider by its source name.
    pub fn provider_by_source(&self, source: &str) -> Option<Arc<dyn InputProvider>> {
        self.providers
            .lock()
            .iter()
            .find(|p| p.name() == source)
            .cloned()
    }
}
