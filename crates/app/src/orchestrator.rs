//! The orchestrator
//!
//! Builds the shared services, wires the three domain managers over the
//! event bus, and drives the whole agent's lifecycle. Teardown unwinds
//! in reverse construction order so each layer can still use what it
//! depends on while shutting down.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde_json::Value;
use tracing::{info, warn};

use aituber_config::ConfigService;
use aituber_decision::DecisionProviderManager;
use aituber_events::{
    names, EmitOptions, EventBus, EventPayload, ShutdownPayload, StartupPayload,
};
use aituber_extension::ExtensionManager;
use aituber_input::{
    InputPipelineManager, InputProviderManager, MessageLogPipeline, RateLimitPipeline,
    SimilarityFilterPipeline,
};
use aituber_llm::{ContextService, LlmManager, PromptManager};
use aituber_output::{OutputDomainConfig, OutputProviderManager};
use aituber_provider::{ProviderContext, ProviderRegistry};
use aituber_streaming::AudioStreamChannel;

use crate::registration::register_builtin_providers;

/// Everything one running agent owns.
pub struct Orchestrator {
    config_service: Arc<ConfigService>,
    event_bus: EventBus,
    audio_channel: Arc<AudioStreamChannel>,
    registry: Arc<ProviderRegistry>,
    provider_context: Arc<ProviderContext>,
    pipeline_manager: Arc<InputPipelineManager>,
    input_manager: Arc<InputProviderManager>,
    decision_manager: Arc<DecisionProviderManager>,
    output_manager: Arc<OutputProviderManager>,
    extension_manager: Arc<ExtensionManager>,
}

impl Orchestrator {
    /// Assembles services and managers from the config in `base_dir`.
    /// Fatal config problems surface here, before anything starts.
    pub fn build(base_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let base_dir = base_dir.into();

        let config_service = Arc::new(ConfigService::new(&base_dir));
        let report = config_service
            .initialize()
            .context("configuration bootstrap failed")?;
        if report.newly_copied {
            info!("config.toml was seeded from the template; review it before going live");
        }
        if report.migrated {
            info!("config.toml was migrated to the current schema version");
        }

        let event_bus = EventBus::new();
        let audio_channel = Arc::new(AudioStreamChannel::new());

        let llm = Arc::new(LlmManager::from_config(&config_service.get_section("llm")));
        let prompt_dir = config_service
            .get("prompt_dir", Some("general"))
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "prompts".to_string());
        let prompts = Arc::new(PromptManager::new(base_dir.join(prompt_dir)));
        let history_limit = config_service
            .get("history_limit", Some("general"))
            .and_then(|v| v.as_u64())
            .unwrap_or(50) as usize;
        let context_service = Arc::new(ContextService::new(history_limit));

        let registry = Arc::new(ProviderRegistry::new());
        register_builtin_providers(&registry, &config_service);

        let provider_context = Arc::new(
            ProviderContext::new(event_bus.clone())
                .with_config_service(Arc::clone(&config_service))
                .with_llm_service(llm)
                .with_prompt_service(prompts)
                .with_context_service(context_service)
                .with_audio_stream_channel(Arc::clone(&audio_channel)),
        );

        let pipeline_manager = Arc::new(InputPipelineManager::new());
        let input_manager = Arc::new(InputProviderManager::new(
            event_bus.clone(),
            Some(Arc::clone(&pipeline_manager)),
        ));
        let decision_manager = DecisionProviderManager::new(
            event_bus.clone(),
            Arc::clone(&registry),
            Arc::clone(&provider_context),
        );
        let output_config =
            OutputDomainConfig::from_section(&config_service.get_section("providers.output"));
        let output_manager = OutputProviderManager::new(event_bus.clone(), output_config);
        let extension_manager = Arc::new(ExtensionManager::new(event_bus.clone()));

        Ok(Self {
            config_service,
            event_bus,
            audio_channel,
            registry,
            provider_context,
            pipeline_manager,
            input_manager,
            decision_manager,
            output_manager,
            extension_manager,
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config_service(&self) -> &Arc<ConfigService> {
        &self.config_service
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn extension_manager(&self) -> &Arc<ExtensionManager> {
        &self.extension_manager
    }

    pub fn audio_channel(&self) -> &Arc<AudioStreamChannel> {
        &self.audio_channel
    }

    fn register_enabled_pipelines(&self) {
        for name in ["message_log", "rate_limit", "similar_filter"] {
            if !self.config_service.is_pipeline_enabled(name) {
                continue;
            }
            let config = Value::Object(self.config_service.get_pipeline_config(name));
            match name {
                "message_log" => self
                    .pipeline_manager
                    .register(Arc::new(MessageLogPipeline::from_config(&config))),
                "rate_limit" => self
                    .pipeline_manager
                    .register(Arc::new(RateLimitPipeline::from_config(&config))),
                "similar_filter" => self
                    .pipeline_manager
                    .register(Arc::new(SimilarityFilterPipeline::from_config(&config))),
                _ => unreachable!(),
            }
        }
        info!(
            pipelines = self.pipeline_manager.pipeline_count(),
            "input pipelines registered"
        );
    }

    /// Starts the whole pipeline: outputs first (so nothing published is
    /// lost), then decision, then inputs, then extensions on top.
    pub async fn start(&self) -> anyhow::Result<()> {
        info!("starting orchestrator");

        let outputs = self.output_manager.load_from_config(
            &self.registry,
            &self.config_service,
            &self.provider_context,
        );
        self.output_manager.setup_all(outputs).await;

        let decision_config = self.config_service.get_section("providers.decision");
        self.decision_manager
            .setup(None, None, &decision_config)
            .await
            .context("decision provider setup failed")?;

        self.register_enabled_pipelines();
        let inputs = self.input_manager.load_from_config(
            &self.registry,
            &self.config_service,
            &self.provider_context,
        );
        self.input_manager.start_all(inputs);

        let extensions_config = self.config_service.get_section("extensions");
        self.extension_manager
            .load_all(&extensions_config)
            .await
            .context("extension loading failed")?;

        self.event_bus
            .emit(
                names::CORE_STARTUP,
                EventPayload::Startup(StartupPayload {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    timestamp: aituber_core::unix_now(),
                }),
                "Orchestrator",
                EmitOptions::default(),
            )
            .await
            .ok();

        info!("orchestrator running");
        Ok(())
    }

    /// Graceful teardown in reverse order of construction.
    pub async fn shutdown(&self, reason: &str) {
        info!(reason, "shutting down orchestrator");

        self.event_bus
            .emit(
                names::CORE_SHUTDOWN,
                EventPayload::Shutdown(ShutdownPayload {
                    reason: reason.to_string(),
                    timestamp: aituber_core::unix_now(),
                }),
                "Orchestrator",
                EmitOptions::wait(),
            )
            .await
            .ok();

        self.extension_manager.cleanup_all().await;
        self.input_manager.stop_all().await;
        self.decision_manager.cleanup().await;
        self.output_manager.stop_all().await;
        self.audio_channel.close();

        if self
            .event_bus
            .cleanup(Duration::from_secs(5), false)
            .await
            .is_err()
        {
            warn!("event bus still busy, forcing cleanup");
            self.event_bus
                .cleanup(Duration::from_secs(1), true)
                .await
                .ok();
        }

        info!("orchestrator stopped");
    }
}
