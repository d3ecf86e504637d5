//! Generative provider abstraction.
//!
//! [`Generator`] is the one seam between the graph code and a text model:
//! given role-tagged messages it returns either the whole completion with
//! token counts or a stream of text fragments.
//!
//! - **[`DisabledGenerator`]**: always fails. Term extraction and entity
//!   extraction fall back to their offline behaviour.
//! - **[`OpenAiGenerator`]**: any OpenAI-compatible `/chat/completions`
//!   endpoint, with retries and SSE streaming.
//!
//! # Retry Strategy
//!
//! - HTTP 429 and 5xx → retry
//! - other 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, ... capped at 32s
//!
//! Only opening a request is retried. Once a stream has started, a
//! failure ends it with an error item.

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};

const SOURCE_NAME: &str = "llm";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

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

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Text fragments in arrival order. Dropping it closes the upstream request.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait Generator: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;

    /// Open an incremental generation. An `Err` here means nothing was
    /// produced; errors after that arrive as stream items.
    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream>;
}

/// Build the generator named by `llm.provider`.
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAiGenerator::from_config(config)?)),
        other => Err(Error::Config(format!("unknown llm provider: {}", other))),
    }
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        Err(Error::upstream(SOURCE_NAME, "llm provider is disabled"))
    }

    async fn stream(&self, _request: &CompletionRequest) -> Result<FragmentStream> {
        Err(Error::upstream(SOURCE_NAME, "llm provider is disabled"))
    }
}

// ============ OpenAI-compatible ============

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
}

/// One parsed server-sent-events line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Fragment(String),
    Done,
    Error(String),
}

/// Parse a line of an SSE chat stream. Blank lines, comments and chunks
/// without content yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|s| !s.is_empty())
            .map(SseEvent::Fragment),
        Err(e) => Some(SseEvent::Error(format!("unreadable stream chunk: {}", e))),
    }
}

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Turn a chunked SSE body into text fragments.
///
/// Lines are split on raw bytes so a multi-byte character spanning two
/// chunks decodes intact. A gap of more than `idle_timeout` between chunks
/// ends the stream with an error.
pub fn sse_fragments<S, B, E>(body: S, idle_timeout: Duration) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let stream = async_stream::stream! {
        let mut body = Box::pin(body);
        let mut buffer: Vec<u8> = Vec::new();

        loop {
            let chunk_result = match tokio::time::timeout(idle_timeout, body.next()).await {
                Ok(Some(chunk_result)) => chunk_result,
                Ok(None) => break,
                Err(_) => {
                    yield Err(Error::Stream(format!(
                        "no data received for {}s",
                        idle_timeout.as_secs_f32()
                    )));
                    return;
                }
            };
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend_from_slice(bytes.as_ref());

                    while let Some(newline_pos) = buffer.iter().position(|b| *b == b'\n') {
                        let raw: Vec<u8> = buffer.drain(..=newline_pos).collect();
                        let line = match std::str::from_utf8(&raw) {
                            Ok(line) => line,
                            Err(e) => {
                                yield Err(Error::Stream(format!("stream is not utf-8: {}", e)));
                                return;
                            }
                        };
                        match parse_sse_line(line) {
                            Some(SseEvent::Fragment(text)) => yield Ok(text),
                            Some(SseEvent::Done) => return,
                            Some(SseEvent::Error(msg)) => {
                                yield Err(Error::Stream(msg));
                                return;
                            }
                            None => {}
                        }
                    }
                }
                Err(e) => {
                    yield Err(Error::Stream(e.to_string()));
                    return;
                }
            }
        }

        if let Ok(rest) = std::str::from_utf8(&buffer) {
            if let Some(SseEvent::Fragment(text)) = parse_sse_line(rest) {
                yield Ok(text);
            }
        }
    };

    Box::pin(stream)
}

impl OpenAiGenerator {
    /// `timeout_secs` bounds a whole completion, the wait for a stream to
    /// open, and each gap between stream chunks.
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64, max_retries: u32) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("llm http client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout: Duration::from_secs(timeout_secs),
            max_retries,
        })
    }

    /// Reads the API key from the environment variable named in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| Error::Config(format!("{} not set", config.api_key_env)))?;
        Self::new(
            &config.base_url,
            &api_key,
            config.timeout_secs,
            config.max_retries,
        )
    }

    async fn send(&self, body: &ChatBody<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let mut request = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body);
            if !body.stream {
                request = request.timeout(self.timeout);
            }

            let resp = match tokio::time::timeout(self.timeout, request.send()).await {
                Ok(resp) => resp.map_err(|e| e.to_string()),
                Err(_) => Err(format!(
                    "no response within {}s",
                    self.timeout.as_secs_f32()
                )),
            };

            match resp {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    let err = Error::upstream(
                        SOURCE_NAME,
                        format!(
                            "HTTP {}: {}",
                            status,
                            body_text.chars().take(300).collect::<String>()
                        ),
                    );
                    if status.as_u16() == 429 || status.is_server_error() {
                        tracing::debug!(attempt, %status, "llm request retryable failure");
                        last_err = Some(err);
                        continue;
                    }
                    return Err(err);
                }
                Err(msg) => {
                    last_err = Some(Error::upstream(SOURCE_NAME, msg));
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| Error::upstream(SOURCE_NAME, "request failed after retries")))
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = ChatBody {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        };
        let response = self.send(&body).await?;
        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream(SOURCE_NAME, format!("bad completion body: {}", e)))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::upstream(SOURCE_NAME, "completion had no content"))?;

        Ok(Completion {
            text,
            usage: parsed.usage,
        })
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<FragmentStream> {
        let body = ChatBody {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        };
        let response = self.send(&body).await?;

        Ok(sse_fragments(response.bytes_stream(), self.timeout))
    }
}
