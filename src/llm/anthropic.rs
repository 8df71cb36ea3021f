//! Anthropic Messages API provider.
//!
//! Claude models cannot watch videos, so direct-mode requests only carry the URL.

use super::{sse, AnswerRequest, LlmProvider, TextStream};
use crate::config::Prompts;
use crate::error::{ChatPyeError, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

const API_VERSION: &str = "2023-06-01";

/// Provider for `claude-*` models.
pub struct AnthropicProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    prompts: Prompts,
    max_tokens: u32,
}

impl AnthropicProvider {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        prompts: Prompts,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChatPyeError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            prompts,
            max_tokens: 1024,
        })
    }

    /// Read the key from `ANTHROPIC_API_KEY`.
    pub fn from_env(base_url: &str, prompts: Prompts, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").ok().filter(|k| !k.is_empty());
        Self::new(base_url, api_key, prompts, timeout)
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens.max(1);
        self
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ChatPyeError::Config("ANTHROPIC_API_KEY is not set".to_string()))
    }

    fn build_body(&self, model: &str, request: &AnswerRequest, stream: bool) -> MessagesRequest {
        let (system, user) = request.render(&self.prompts);
        MessagesRequest {
            model: model.to_string(),
            max_tokens: self.max_tokens,
            system,
            messages: vec![Message {
                role: "user".to_string(),
                content: user,
            }],
            stream,
        }
    }

    async fn post(&self, body: &MessagesRequest) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.api_key()?)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ChatPyeError::Llm(format!("Anthropic returned {}: {}", status, text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn handles(&self, model: &str) -> bool {
        model.starts_with("claude-")
    }

    fn accepts_video(&self) -> bool {
        false
    }

    #[instrument(skip(self, request), fields(grounded = request.source.is_grounded()))]
    async fn generate(&self, model: &str, request: &AnswerRequest) -> Result<String> {
        let body = self.build_body(model, request, false);
        let response: MessagesResponse = self.post(&body).await?.json().await?;

        let answer = response.text();
        if answer.trim().is_empty() {
            return Err(ChatPyeError::Llm("Empty response from Anthropic".to_string()));
        }

        debug!("Generated {} characters", answer.len());
        Ok(answer)
    }

    #[instrument(skip(self, request), fields(grounded = request.source.is_grounded()))]
    async fn generate_stream(&self, model: &str, request: &AnswerRequest) -> Result<TextStream> {
        let body = self.build_body(model, request, true);
        let response = self.post(&body).await?;
        Ok(text_stream(response.bytes_stream()))
    }
}

/// Turn a raw Messages SSE body into answer fragments.
fn text_stream<S, B, E>(body: S) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatPyeError> + Send + 'static,
{
    let mut lines = sse::lines(body);
    let stream = async_stream::stream! {
        while let Some(line) = lines.next().await {
            match line.and_then(|line| parse_sse_line(&line)) {
                Ok(StreamEvent::Text(text)) => yield Ok(text),
                Ok(StreamEvent::Skip) => {}
                Ok(StreamEvent::Stop) => return,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };
    stream.boxed()
}

#[derive(Debug, PartialEq)]
enum StreamEvent {
    Text(String),
    Skip,
    Stop,
}

/// Interpret one line of the SSE response. Only `data:` lines carry payloads.
fn parse_sse_line(line: &str) -> Result<StreamEvent> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(StreamEvent::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(StreamEvent::Skip);
    }

    let event: StreamPayload = serde_json::from_str(data)?;
    match event.kind.as_str() {
        "content_block_delta" => Ok(event
            .delta
            .and_then(|d| d.text)
            .filter(|t| !t.is_empty())
            .map_or(StreamEvent::Skip, StreamEvent::Text)),
        "message_stop" => Ok(StreamEvent::Stop),
        "error" => {
            let message = event
                .error
                .map(|e| format!("{}: {}", e.kind, e.message))
                .unwrap_or_else(|| "unknown error".to_string());
            Err(ChatPyeError::Llm(format!("Anthropic stream failed: {}", message)))
        }
        _ => Ok(StreamEvent::Skip),
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

impl MessagesResponse {
    fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamPayload {
    #[serde(rename = "type")]
    kind: String,
    delta: Option<Delta>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}
