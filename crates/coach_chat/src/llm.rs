//! Text generation.
//!
//! `Generator` is the seam between the chat system and a model provider.
//! `LlmAdapter` talks to OpenAI or Anthropic, selected via environment
//! variables, and supports both one-shot completion and SSE streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::{ChatError, ChatResult};
use crate::types::MessageRole;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const MAX_RETRIES: u32 = 3;

/// One role-tagged conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: MessageRole,
    pub content: String,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Everything a generator needs for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system: String,
    pub turns: Vec<Turn>,
    pub max_tokens: u32,
}

/// Result of a generation call, including usage info
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generation {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub model: String,
}

/// A text-generation provider.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run the request to completion.
    async fn complete(&self, request: &GenerationRequest) -> ChatResult<Generation>;

    /// Run the request, sending each text delta as it arrives.
    ///
    /// A closed delta receiver does not fail the call; the full generation is
    /// still returned.
    async fn stream(
        &self,
        request: &GenerationRequest,
        deltas: mpsc::Sender<String>,
    ) -> ChatResult<Generation>;

    fn model(&self) -> &str;
}

/// LLM provider type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProvider {
    OpenAI,
    Anthropic,
}

impl LlmProvider {
    fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAI => "gpt-4o-mini",
            Self::Anthropic => "claude-3-5-haiku-latest",
        }
    }
}

/// LLM adapter that handles API calls
pub struct LlmAdapter {
    provider: LlmProvider,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl LlmAdapter {
    /// Create a new LLM adapter with explicit configuration
    pub fn new(provider: LlmProvider, api_key: String, model: Option<String>) -> Self {
        Self {
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
            provider,
            api_key,
            client: reqwest::Client::new(),
        }
    }

    /// Create an LLM adapter from environment variables
    ///
    /// Checks in order:
    /// 1. OPENAI_API_KEY
    /// 2. ANTHROPIC_API_KEY
    ///
    /// `COACH_LLM_MODEL` overrides the model.
    pub fn from_env() -> ChatResult<Self> {
        let custom_model = non_empty_env("COACH_LLM_MODEL");

        if let Some(api_key) = non_empty_env("OPENAI_API_KEY") {
            return Ok(Self::new(LlmProvider::OpenAI, api_key, custom_model));
        }
        if let Some(api_key) = non_empty_env("ANTHROPIC_API_KEY") {
            return Ok(Self::new(LlmProvider::Anthropic, api_key, custom_model));
        }

        Err(ChatError::LlmNotConfigured)
    }

    /// Create an adapter honoring the configured provider and model.
    ///
    /// Environment variables still supply the credentials; `COACH_LLM_MODEL`
    /// wins over the configured model.
    pub fn from_config(config: &LlmConfig) -> ChatResult<Self> {
        let model = non_empty_env("COACH_LLM_MODEL").or_else(|| config.model.clone());

        match config.provider.as_deref().map(str::to_lowercase).as_deref() {
            None => Self::from_env().map(|adapter| match model {
                Some(model) => Self::new(adapter.provider, adapter.api_key, Some(model)),
                None => adapter,
            }),
            Some("openai") => non_empty_env("OPENAI_API_KEY")
                .map(|key| Self::new(LlmProvider::OpenAI, key, model))
                .ok_or(ChatError::LlmNotConfigured),
            Some("anthropic") => non_empty_env("ANTHROPIC_API_KEY")
                .map(|key| Self::new(LlmProvider::Anthropic, key, model))
                .ok_or(ChatError::LlmNotConfigured),
            Some(other) => Err(ChatError::Config(format!("unknown LLM provider '{}'", other))),
        }
    }

    /// Get the current provider
    pub fn provider(&self) -> LlmProvider {
        self.provider
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> Value {
        match self.provider {
            LlmProvider::OpenAI => {
                let mut messages = vec![serde_json::json!({
                    "role": "system",
                    "content": request.system,
                })];
                messages.extend(request.turns.iter().map(|t| {
                    serde_json::json!({ "role": role_name(t.role), "content": t.content })
                }));
                let mut body = serde_json::json!({
                    "model": self.model,
                    "messages": messages,
                    "max_completion_tokens": request.max_tokens,
                });
                if stream {
                    body["stream"] = Value::Bool(true);
                    body["stream_options"] = serde_json::json!({ "include_usage": true });
                }
                body
            }
            LlmProvider::Anthropic => {
                let messages: Vec<Value> = request
                    .turns
                    .iter()
                    .map(|t| serde_json::json!({ "role": role_name(t.role), "content": t.content }))
                    .collect();
                let mut body = serde_json::json!({
                    "model": self.model,
                    "max_tokens": request.max_tokens,
                    "system": request.system,
                    "messages": messages,
                });
                if stream {
                    body["stream"] = Value::Bool(true);
                }
                body
            }
        }
    }

    fn post(&self, body: &Value) -> reqwest::RequestBuilder {
        let builder = match self.provider {
            LlmProvider::OpenAI => self
                .client
                .post(OPENAI_URL)
                .header("Authorization", format!("Bearer {}", self.api_key)),
            LlmProvider::Anthropic => self
                .client
                .post(ANTHROPIC_URL)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01"),
        };
        builder.header("Content-Type", "application/json").json(body)
    }

    fn provider_name(&self) -> &'static str {
        match self.provider {
            LlmProvider::OpenAI => "OpenAI",
            LlmProvider::Anthropic => "Anthropic",
        }
    }

    /// Send with retries for transient errors (5xx, rate limits, network issues)
    async fn send_with_retry(&self, body: &Value) -> ChatResult<reqwest::Response> {
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 2s, 4s
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }

            let response = match self.post(body).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(ChatError::Llm(format!("Network error: {}", e)));
                    continue;
                }
            };

            let status = response.status();
            if status.is_server_error() || status.as_u16() == 429 {
                let text = response.text().await.unwrap_or_default();
                warn!(
                    "{} API error {} (attempt {}/{})",
                    self.provider_name(),
                    status,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(ChatError::Llm(format!(
                    "{} API error {}: {}",
                    self.provider_name(),
                    status,
                    text
                )));
                continue;
            }

            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ChatError::Llm(format!(
                    "{} API error {}: {}",
                    self.provider_name(),
                    status,
                    text
                )));
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or_else(|| ChatError::Llm("Max retries exceeded".to_string())))
    }
}

#[async_trait]
impl Generator for LlmAdapter {
    async fn complete(&self, request: &GenerationRequest) -> ChatResult<Generation> {
        let body = self.request_body(request, false);
        let response = self.send_with_retry(&body).await?;
        let value: Value = response
            .json()
            .await
            .map_err(|e| ChatError::Llm(format!("Failed to parse response: {}", e)))?;

        let generation = match self.provider {
            LlmProvider::OpenAI => {
                let parsed: OpenAIResponse = serde_json::from_value(value)?;
                let content = parsed
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content)
                    .ok_or_else(|| ChatError::Llm("No response from OpenAI".to_string()))?;
                let (input_tokens, output_tokens) = parsed
                    .usage
                    .map(|u| (u.prompt_tokens, u.completion_tokens))
                    .unwrap_or((0, 0));
                Generation {
                    content,
                    input_tokens,
                    output_tokens,
                    model: self.model.clone(),
                }
            }
            LlmProvider::Anthropic => {
                let parsed: AnthropicResponse = serde_json::from_value(value)?;
                let content: String = parsed
                    .content
                    .iter()
                    .filter_map(|c| c.text.as_deref())
                    .collect();
                if content.is_empty() {
                    return Err(ChatError::Llm("No response from Anthropic".to_string()));
                }
                let (input_tokens, output_tokens) = parsed
                    .usage
                    .map(|u| (u.input_tokens, u.output_tokens))
                    .unwrap_or((0, 0));
                Generation {
                    content,
                    input_tokens,
                    output_tokens,
                    model: self.model.clone(),
                }
            }
        };

        Ok(generation)
    }

    async fn stream(
        &self,
        request: &GenerationRequest,
        deltas: mpsc::Sender<String>,
    ) -> ChatResult<Generation> {
        let body = self.request_body(request, true);
        let response = self.post(&body).send().await.map_err(|e| {
            ChatError::Llm(format!("Network error: {}", e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChatError::Llm(format!(
                "{} API error {}: {}",
                self.provider_name(),
                status,
                text
            )));
        }

        let mut generation = Generation {
            model: self.model.clone(),
            ..Generation::default()
        };
        let mut receiver_open = true;
        let mut buffer = String::new();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| ChatError::Llm(format!("Stream interrupted: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            // Process complete SSE lines
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);

                let Some(data) = line.strip_prefix("data:").map(str::trim) else {
                    continue;
                };
                if data == "[DONE]" {
                    continue;
                }

                let event: Value = match serde_json::from_str(data) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!("Skipping unparsable SSE chunk: {}", e);
                        continue;
                    }
                };

                let delta = match self.provider {
                    LlmProvider::OpenAI => apply_openai_event(&event, &mut generation),
                    LlmProvider::Anthropic => apply_anthropic_event(&event, &mut generation)?,
                };

                if let Some(delta) = delta {
                    generation.content.push_str(&delta);
                    if receiver_open && deltas.send(delta).await.is_err() {
                        debug!("Delta receiver closed, continuing without forwarding");
                        receiver_open = false;
                    }
                }
            }
        }

        if generation.content.is_empty() {
            return Err(ChatError::Llm(format!(
                "Empty stream from {}",
                self.provider_name()
            )));
        }

        Ok(generation)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

/// Text delta of an OpenAI chunk; usage arrives in the final chunk.
fn apply_openai_event(event: &Value, generation: &mut Generation) -> Option<String> {
    if let Some(usage) = event.get("usage").filter(|u| !u.is_null()) {
        generation.input_tokens = usage["prompt_tokens"].as_u64().unwrap_or(0);
        generation.output_tokens = usage["completion_tokens"].as_u64().unwrap_or(0);
    }
    event["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Text delta of an Anthropic event; usage is split across start and delta.
fn apply_anthropic_event(event: &Value, generation: &mut Generation) -> ChatResult<Option<String>> {
    match event["type"].as_str() {
        Some("message_start") => {
            generation.input_tokens = event["message"]["usage"]["input_tokens"]
                .as_u64()
                .unwrap_or(0);
            Ok(None)
        }
        Some("content_block_delta") => Ok(event["delta"]["text"]
            .as_str()
            .filter(|s| !s.is_empty())
            .map(str::to_string)),
        Some("message_delta") => {
            if let Some(tokens) = event["usage"]["output_tokens"].as_u64() {
                generation.output_tokens = tokens;
            }
            Ok(None)
        }
        Some("error") => Err(ChatError::Llm(format!(
            "Anthropic stream error: {}",
            event["error"]["message"].as_str().unwrap_or("unknown")
        ))),
        _ => Ok(None),
    }
}

// OpenAI API types
#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: Option<String>,
}

// Anthropic API types
#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    text: Option<String>,
}
