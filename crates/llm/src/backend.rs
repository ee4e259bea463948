//! LLM backend implementations
//!
//! Two wire protocols cover the deployments this system targets: an
//! OpenAI-compatible chat endpoint (hosted APIs and most gateways) and
//! Ollama for local models.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;

use crate::manager::TokenUsage;
use crate::prompt::Message;
use crate::LlmError;

/// Per-request generation knobs; `None` falls back to client config.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

/// One completed (non-streaming) generation.
#[derive(Debug, Clone)]
pub struct BackendResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
}

/// A single LLM endpoint speaking one wire protocol.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn chat(
        &self,
        messages: &[Message],
        opts: GenerationOptions,
    ) -> Result<BackendResponse, LlmError>;

    /// Streaming generation: tokens go to `tx` as they arrive, the full
    /// response is returned at the end. Backends without incremental
    /// streaming deliver the complete reply as a single token.
    async fn chat_stream(
        &self,
        messages: &[Message],
        opts: GenerationOptions,
        tx: mpsc::Sender<String>,
    ) -> Result<BackendResponse, LlmError> {
        let response = self.chat(messages, opts).await?;
        let _ = tx.send(response.content.clone()).await;
        Ok(response)
    }

    /// Multimodal generation over base64-encoded images. Backends that
    /// cannot see images report an API error.
    async fn vision(
        &self,
        _prompt: &str,
        _images: &[String],
        _opts: GenerationOptions,
    ) -> Result<BackendResponse, LlmError> {
        Err(LlmError::Api("vision is not supported by this backend".into()))
    }

    /// Cheap reachability probe.
    async fn is_available(&self) -> bool;

    fn model_name(&self) -> &str;
}

fn build_client(timeout: Duration) -> Result<Client, LlmError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::Configuration(format!("failed to create HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// OpenAI-compatible

/// Backend for OpenAI-compatible `/chat/completions` endpoints.
pub struct OpenAiBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl OpenAiBackend {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            temperature,
            max_tokens,
        })
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    temperature: f32,
    max_tokens: usize,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    model: String,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
    async fn chat(
        &self,
        messages: &[Message],
        opts: GenerationOptions,
    ) -> Result<BackendResponse, LlmError> {
        let request = OpenAiRequest {
            model: &self.model,
            messages,
            temperature: opts.temperature.unwrap_or(self.temperature),
            max_tokens: opts.max_tokens.unwrap_or(self.max_tokens),
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {body}")));
            }
            return Err(LlmError::Api(format!("{status}: {body}")));
        }

        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))?;

        Ok(BackendResponse {
            content: choice.message.content,
            model: if parsed.model.is_empty() {
                self.model.clone()
            } else {
                parsed.model
            },
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn vision(
        &self,
        prompt: &str,
        images: &[String],
        opts: GenerationOptions,
    ) -> Result<BackendResponse, LlmError> {
        let mut content = vec![json!({"type": "text", "text": prompt})];
        for image in images {
            content.push(json!({
                "type": "image_url",
                "image_url": {"url": format!("data:image/png;base64,{image}")},
            }));
        }
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": content}],
            "temperature": opts.temperature.unwrap_or(self.temperature),
            "max_tokens": opts.max_tokens.unwrap_or(self.max_tokens),
        });

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.endpoint))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {text}")));
        }
        let parsed: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("no choices in response".into()))?;
        Ok(BackendResponse {
            content: choice.message.content,
            model: self.model.clone(),
            usage: parsed.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            }),
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/models", self.endpoint))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Ollama

/// Backend for a local Ollama server.
pub struct OllamaBackend {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

impl OllamaBackend {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: usize,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature,
            max_tokens,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/api{}", self.endpoint, path)
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

impl From<&Message> for OllamaMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: msg.role.to_string(),
            content: msg.content.clone(),
        }
    }
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: i32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn chat(
        &self,
        messages: &[Message],
        opts: GenerationOptions,
    ) -> Result<BackendResponse, LlmError> {
        let request = OllamaChatRequest {
            model: &self.model,
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: false,
            options: OllamaOptions {
                temperature: opts.temperature.unwrap_or(self.temperature),
                num_predict: opts.max_tokens.unwrap_or(self.max_tokens) as i32,
            },
        };

        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(LlmError::Network(format!("server error {status}: {body}")));
            }
            return Err(LlmError::Api(body));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let prompt_tokens = parsed.prompt_eval_count.unwrap_or(0);
        let completion_tokens = parsed.eval_count.unwrap_or(0);
        Ok(BackendResponse {
            content: parsed.message.content,
            model: self.model.clone(),
            usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }),
        })
    }

    async fn chat_stream(
        &self,
        messages: &[Message],
        opts: GenerationOptions,
        tx: mpsc::Sender<String>,
    ) -> Result<BackendResponse, LlmError> {
        use futures::StreamExt;

        let request = OllamaChatRequest {
            model: &self.model,
            messages: messages.iter().map(OllamaMessage::from).collect(),
            stream: true,
            options: OllamaOptions {
                temperature: opts.temperature.unwrap_or(self.temperature),
                num_predict: opts.max_tokens.unwrap_or(self.max_tokens) as i32,
            },
        };

        let response = self
            .client
            .post(self.api_url("/chat"))
            .json(&request)
            .send()
            .await?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(body));
        }

        let mut full_response = String::new();
        let mut stream = response.bytes_stream();
        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            // NDJSON: one JSON object per line.
            for line in String::from_utf8_lossy(&chunk).lines() {
                if line.is_empty() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<OllamaStreamChunk>(line) else {
                    continue;
                };
                full_response.push_str(&parsed.message.content);
                if tx.send(parsed.message.content).await.is_err() {
                    // Receiver gone: generation cancelled.
                    break 'outer;
                }
                if parsed.done {
                    break 'outer;
                }
            }
        }

        Ok(BackendResponse {
            content: full_response,
            model: self.model.clone(),
            usage: None,
        })
    }

    async fn is_available(&self) -> bool {
        self.client
            .get(self.api_url("/tags"))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Deserialize)]
struct OllamaStreamChunk {
    message: OllamaMessage,
    #[serde(default)]
    done: bool,
}
