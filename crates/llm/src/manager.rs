//! The LLM client manager
//!
//! A named pool of backends behind one chat interface. Callers address
//! clients by role name (`llm`, `llm_fast`, `vlm`, …) so providers never
//! care which vendor or model serves a role. `chat` returns an envelope
//! rather than an error: decision providers degrade on failure, they do
//! not crash.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::backend::{GenerationOptions, LlmBackend, OllamaBackend, OpenAiBackend};
use crate::prompt::Message;
use crate::LlmError;

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Caller-opt-in retry policy (exponential backoff with jitter).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 100,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            jitter: false,
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff_ms.saturating_mul(1u64 << attempt.min(16));
        let ms = if self.jitter {
            let spread = (base / 4).max(1);
            base + rand::thread_rng().gen_range(0..spread)
        } else {
            base
        };
        Duration::from_millis(ms)
    }
}

/// Config for one named client, read from `[llm.clients.<name>]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmClientConfig {
    /// `"openai"` (any OpenAI-compatible endpoint) or `"ollama"`.
    pub backend: String,
    pub model: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: f64,
    pub retry: RetryConfig,
}

impl Default for LlmClientConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".into(),
            model: "qwen2.5:7b-instruct-q4_K_M".into(),
            endpoint: "http://localhost:11434".into(),
            api_key: None,
            temperature: 0.7,
            max_tokens: 256,
            timeout_secs: 30.0,
            retry: RetryConfig::default(),
        }
    }
}

/// One chat call against a named client.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub client_type: String,
    pub system_message: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl ChatRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            client_type: "llm".into(),
            system_message: None,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_client(mut self, client_type: impl Into<String>) -> Self {
        self.client_type = client_type.into();
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system_message = Some(system.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Chat result envelope. `success == false` carries the error message
/// instead of propagating it.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub success: bool,
    pub content: String,
    pub error: Option<String>,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

impl LlmResponse {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error: Some(error.into()),
            model: String::new(),
            usage: None,
        }
    }
}

struct ClientEntry {
    backend: Arc<dyn LlmBackend>,
    retry: RetryConfig,
}

/// Named LLM client pool.
#[derive(Default)]
pub struct LlmManager {
    clients: HashMap<String, ClientEntry>,
}

impl LlmManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the pool from the `[llm]` section of the main config
    /// (`clients` sub-table, one entry per name). Invalid entries are
    /// skipped with a warning; an empty pool is legal (decision providers
    /// then run on their fallbacks).
    pub fn from_config(llm_section: &serde_json::Map<String, Value>) -> Self {
        let mut manager = Self::new();
        let Some(clients) = llm_section.get("clients").and_then(Value::as_object) else {
            info!("no [llm.clients] configured, LLM pool is empty");
            return manager;
        };

        for (name, value) in clients {
            let config: LlmClientConfig = match serde_json::from_value(value.clone()) {
                Ok(config) => config,
                Err(e) => {
                    warn!(client = %name, error = %e, "invalid LLM client config, skipping");
                    continue;
                }
            };
            if let Err(e) = manager.add_client(name, config) {
                warn!(client = %name, error = %e, "failed to build LLM client, skipping");
            }
        }
        manager
    }

    pub fn add_client(&mut self, name: &str, config: LlmClientConfig) -> Result<(), LlmError> {
        let timeout = Duration::from_secs_f64(config.timeout_secs);
        let backend: Arc<dyn LlmBackend> = match config.backend.as_str() {
            "openai" => Arc::new(OpenAiBackend::new(
                config.endpoint.clone(),
                config.api_key.clone(),
                config.model.clone(),
                config.temperature,
                config.max_tokens,
                timeout,
            )?),
            "ollama" => Arc::new(OllamaBackend::new(
                config.endpoint.clone(),
                config.model.clone(),
                config.temperature,
                config.max_tokens,
                timeout,
            )?),
            other => {
                return Err(LlmError::Configuration(format!(
                    "unknown backend kind '{other}' (expected 'openai' or 'ollama')"
                )))
            }
        };

        info!(client = name, model = %config.model, backend = %config.backend, "LLM client registered");
        self.clients.insert(
            name.to_string(),
            ClientEntry {
                backend,
                retry: config.retry,
            },
        );
        Ok(())
    }

    /// Registers a pre-built backend (tests, extensions).
    pub fn add_backend(&mut self, name: &str, backend: Arc<dyn LlmBackend>, retry: RetryConfig) {
        self.clients.insert(name.to_string(), ClientEntry { backend, retry });
    }

    pub fn has_client(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub fn client_names(&self) -> Vec<String> {
        self.clients.keys().cloned().collect()
    }

    /// Sends one chat request, retrying transient failures per the
    /// client's retry policy.
    pub async fn chat(&self, request: ChatRequest) -> LlmResponse {
        let Some(entry) = self.clients.get(&request.client_type) else {
            return LlmResponse::failure(LlmError::UnknownClient(request.client_type).to_string());
        };

        let mut messages = Vec::new();
        if let Some(system) = &request.system_message {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(request.prompt.clone()));

        let opts = GenerationOptions {
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut last_error = None;
        for attempt in 0..=entry.retry.max_retries {
            if attempt > 0 {
                let backoff = entry.retry.backoff_for(attempt - 1);
                warn!(
                    client = %request.client_type,
                    attempt,
                    max = entry.retry.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    "LLM request failed, retrying"
                );
                tokio::time::sleep(backoff).await;
            }

            match entry.backend.chat(&messages, opts).await {
                Ok(response) => {
                    return LlmResponse {
                        success: true,
                        content: response.content,
                        error: None,
                        model: response.model,
                        usage: response.usage,
                    };
                }
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return LlmResponse::failure(e.to_string()),
            }
        }

        LlmResponse::failure(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "max retries exceeded".to_string()),
        )
    }

    /// Streaming chat: tokens arrive on `tx` as generated; the final
    /// envelope carries the concatenated reply. Streams are not retried.
    pub async fn stream_chat(
        &self,
        request: ChatRequest,
        tx: tokio::sync::mpsc::Sender<String>,
    ) -> LlmResponse {
        let Some(entry) = self.clients.get(&request.client_type) else {
            return LlmResponse::failure(LlmError::UnknownClient(request.client_type).to_string());
        };

        let mut messages = Vec::new();
        if let Some(system) = &request.system_message {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(request.prompt.clone()));

        let opts = GenerationOptions {
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        match entry.backend.chat_stream(&messages, opts, tx).await {
            Ok(response) => LlmResponse {
                success: true,
                content: response.content,
                error: None,
                model: response.model,
                usage: response.usage,
            },
            Err(e) => LlmResponse::failure(e.to_string()),
        }
    }

    /// Multimodal chat over base64-encoded images (`vlm`-style clients).
    pub async fn vision(&self, request: ChatRequest, images: &[String]) -> LlmResponse {
        let Some(entry) = self.clients.get(&request.client_type) else {
            return LlmResponse::failure(LlmError::UnknownClient(request.client_type).to_string());
        };

        let opts = GenerationOptions {
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        match entry.backend.vision(&request.prompt, images, opts).await {
            Ok(response) => LlmResponse {
                success: true,
                content: response.content,
                error: None,
                model: response.model,
                usage: response.usage,
            },
            Err(e) => LlmResponse::failure(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyBackend {
        fail_times: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LlmBackend for FlakyBackend {
        async fn chat(
            &self,
            _messages: &[Message],
            _opts: GenerationOptions,
        ) -> Result<BackendResponse, LlmError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                return Err(LlmError::Network("connection reset".into()));
            }
            Ok(BackendResponse {
                content: "ok".into(),
                model: "mock".into(),
                usage: None,
            })
        }

        async fn is_available(&self) -> bool {
            true
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    #[tokio::test]
    async fn test_unknown_client_fails_soft() {
        let manager = LlmManager::new();
        let response = manager.chat(ChatRequest::new("hi")).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("unknown client"));
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let mut manager = LlmManager::new();
        manager.add_backend(
            "llm",
            Arc::new(FlakyBackend {
                fail_times: 2,
                calls: AtomicU32::new(0),
            }),
            RetryConfig {
                max_retries: 3,
                initial_backoff_ms: 1,
                jitter: false,
            },
        );

        let response = manager.chat(ChatRequest::new("hi")).await;
        assert!(response.success);
        assert_eq!(response.content, "ok");
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let mut manager = LlmManager::new();
        manager.add_backend(
            "llm",
            Arc::new(FlakyBackend {
                fail_times: 10,
                calls: AtomicU32::new(0),
            }),
            RetryConfig {
                max_retries: 1,
                initial_backoff_ms: 1,
                jitter: false,
            },
        );

        let response = manager.chat(ChatRequest::new("hi")).await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        struct ApiErrorBackend {
            calls: AtomicU32,
        }

        #[async_trait]
        impl LlmBackend for ApiErrorBackend {
            async fn chat(
                &self,
                _messages: &[Message],
                _opts: GenerationOptions,
            ) -> Result<BackendResponse, LlmError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Err(LlmError::Api("bad request".into()))
            }

            async fn is_available(&self) -> bool {
                true
            }

            fn model_name(&self) -> &str {
                "mock"
            }
        }

        let backend = Arc::new(ApiErrorBackend {
            calls: AtomicU32::new(0),
        });
        let mut manager = LlmManager::new();
        manager.add_backend("llm", backend.clone(), RetryConfig::default());

        let response = manager.chat(ChatRequest::new("hi")).await;
        assert!(!response.success);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_chat_default_delivers_whole_reply() {
        let mut manager = LlmManager::new();
        manager.add_backend(
            "llm",
            Arc::new(FlakyBackend {
                fail_times: 0,
                calls: AtomicU32::new(0),
            }),
            RetryConfig::disabled(),
        );

        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let response = manager.stream_chat(ChatRequest::new("hi"), tx).await;
        assert!(response.success);
        assert_eq!(response.content, "ok");
        // The fallback streaming path sends the reply as one token.
        assert_eq!(rx.recv().await.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_vision_unsupported_backend_fails_soft() {
        let mut manager = LlmManager::new();
        manager.add_backend(
            "vlm",
            Arc::new(FlakyBackend {
                fail_times: 0,
                calls: AtomicU32::new(0),
            }),
            RetryConfig::disabled(),
        );

        let response = manager
            .vision(ChatRequest::new("what is this").with_client("vlm"), &["aGk=".into()])
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("not supported"));
    }

    #[test]
    fn test_from_config_skips_invalid_entries() {
        let section = serde_json::json!({
            "clients": {
                "llm": {"backend": "ollama", "model": "m", "endpoint": "http://localhost:11434"},
                "broken": {"backend": "martian"},
            }
        });
        let manager = LlmManager::from_config(section.as_object().unwrap());
        assert!(manager.has_client("llm"));
        assert!(!manager.has_client("broken"));
    }
}
