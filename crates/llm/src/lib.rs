//! LLM access for the VTuber orchestrator
//!
//! Three services live here:
//! - [`LlmManager`]: a pool of named clients (`llm`, `llm_fast`, `vlm`, …)
//!   with a uniform chat interface and opt-in retry
//! - [`PromptManager`]: `.md` templates with variable substitution and
//!   section extraction; no domain prompt text is embedded in the core
//! - [`ContextService`]: bounded per-session conversation history

pub mod backend;
pub mod context;
pub mod manager;
pub mod prompt;

pub use backend::{BackendResponse, GenerationOptions, LlmBackend, OllamaBackend, OpenAiBackend};
pub use context::{ContextMessage, ContextService, MessageRole};
pub use manager::{ChatRequest, LlmClientConfig, LlmManager, LlmResponse, RetryConfig, TokenUsage};
pub use prompt::{Message, PromptManager, Role};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("request timed out")]
    Timeout,

    #[error("unknown client '{0}'")]
    UnknownClient(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("missing template variable '{variable}' in '{template}'")]
    MissingVariable { template: String, variable: String },

    #[error("section '{section}' not found in template '{template}'")]
    SectionNotFound { template: String, section: String },
}

impl LlmError {
    /// Transient failures worth retrying with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Network(_) | LlmError::Timeout)
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}
