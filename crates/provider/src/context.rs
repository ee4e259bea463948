//! The provider dependency context
//!
//! A read-only bundle of service handles constructed once during
//! orchestrator assembly and cloned into every provider. Providers take
//! what they need and ignore the rest; optional services stay `None` in
//! minimal deployments (and in tests).

use std::sync::Arc;

use aituber_config::ConfigService;
use aituber_events::EventBus;
use aituber_llm::{ContextService, LlmManager, PromptManager};
use aituber_streaming::AudioStreamChannel;

/// Immutable service bundle handed to every provider at construction.
#[derive(Clone)]
pub struct ProviderContext {
    event_bus: EventBus,
    config_service: Option<Arc<ConfigService>>,
    llm_service: Option<Arc<LlmManager>>,
    prompt_service: Option<Arc<PromptManager>>,
    context_service: Option<Arc<ContextService>>,
    audio_stream_channel: Option<Arc<AudioStreamChannel>>,
}

impl ProviderContext {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            config_service: None,
            llm_service: None,
            prompt_service: None,
            context_service: None,
            audio_stream_channel: None,
        }
    }

    pub fn with_config_service(mut self, service: Arc<ConfigService>) -> Self {
        self.config_service = Some(service);
        self
    }

    pub fn with_llm_service(mut self, service: Arc<LlmManager>) -> Self {
        self.llm_service = Some(service);
        self
    }

    pub fn with_prompt_service(mut self, service: Arc<PromptManager>) -> Self {
        self.prompt_service = Some(service);
        self
    }

    pub fn with_context_service(mut self, service: Arc<ContextService>) -> Self {
        self.context_service = Some(service);
        self
    }

    pub fn with_audio_stream_channel(mut self, channel: Arc<AudioStreamChannel>) -> Self {
        self.audio_stream_channel = Some(channel);
        self
    }

    /// Every provider can publish and subscribe.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn config_service(&self) -> Option<&Arc<ConfigService>> {
        self.config_service.as_ref()
    }

    pub fn llm_service(&self) -> Option<&Arc<LlmManager>> {
        self.llm_service.as_ref()
    }

    pub fn prompt_service(&self) -> Option<&Arc<PromptManager>> {
        self.prompt_service.as_ref()
    }

    pub fn context_service(&self) -> Option<&Arc<ContextService>> {
        self.context_service.as_ref()
    }

    pub fn audio_stream_channel(&self) -> Option<&Arc<AudioStreamChannel>> {
        self.audio_stream_channel.as_ref()
    }
}
