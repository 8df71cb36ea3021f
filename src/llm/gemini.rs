//! Gemini provider over the Generative Language REST API.
//!
//! Gemini accepts YouTube URLs as file parts, so direct-mode requests let the model
//! watch the video itself.

use super::{sse, AnswerRequest, AnswerSource, LlmProvider, TextStream};
use crate::config::Prompts;
use crate::error::{ChatPyeError, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Provider for `gemini-*` models.
pub struct GeminiProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    prompts: Prompts,
}

impl GeminiProvider {
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
        })
    }

    /// Read the key from `GEMINI_API_KEY`.
    pub fn from_env(base_url: &str, prompts: Prompts, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty());
        Self::new(base_url, api_key, prompts, timeout)
    }

    fn api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ChatPyeError::Config("GEMINI_API_KEY is not set".to_string()))
    }

    fn build_body(&self, request: &AnswerRequest) -> GenerateRequest {
        let (system, user) = request.render(&self.prompts);

        let mut parts = Vec::new();
        if let AnswerSource::Video(video) = &request.source {
            parts.push(Part::File {
                file_data: FileData {
                    file_uri: video.url.clone(),
                },
            });
        }
        parts.push(Part::Text { text: user });

        GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part::Text { text: system }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
        }
    }

    async fn post(&self, url: String, body: &GenerateRequest) -> Result<reqwest::Response> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", self.api_key()?)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ChatPyeError::Llm(format!("Gemini returned {}: {}", status, text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn handles(&self, model: &str) -> bool {
        model.starts_with("gemini-")
    }

    fn accepts_video(&self) -> bool {
        true
    }

    #[instrument(skip(self, request), fields(grounded = request.source.is_grounded()))]
    async fn generate(&self, model: &str, request: &AnswerRequest) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let body = self.build_body(request);

        let response: GenerateResponse = self.post(url, &body).await?.json().await?;
        let answer = response.text();
        if answer.trim().is_empty() {
            return Err(ChatPyeError::Llm("Empty response from Gemini".to_string()));
        }

        debug!("Generated {} characters", answer.len());
        Ok(answer)
    }

    #[instrument(skip(self, request), fields(grounded = request.source.is_grounded()))]
    async fn generate_stream(&self, model: &str, request: &AnswerRequest) -> Result<TextStream> {
        let url = format!("{}/models/{}:streamGenerateContent?alt=sse", self.base_url, model);
        let body = self.build_body(request);

        let response = self.post(url, &body).await?;
        Ok(text_stream(response.bytes_stream()))
    }
}

/// Turn a raw SSE body into answer fragments.
fn text_stream<S, B, E>(body: S) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<ChatPyeError> + Send + 'static,
{
    let mut lines = sse::lines(body);
    let stream = async_stream::stream! {
        while let Some(line) = lines.next().await {
            let parsed = line.and_then(|line| parse_sse_line(&line));
            match parsed {
                Ok(Some(text)) => yield Ok(text),
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    };
    stream.boxed()
}

/// Extract the text from one `data:` line of the SSE response.
fn parse_sse_line(line: &str) -> Result<Option<String>> {
    let Some(data) = line.trim().strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(None);
    }

    let response: GenerateResponse = serde_json::from_str(data)?;
    if let Some(reason) = response.prompt_feedback.as_ref().and_then(|f| f.block_reason.as_ref()) {
        warn!("Gemini blocked the prompt: {}", reason);
        return Err(ChatPyeError::Llm(format!("Prompt blocked: {}", reason)));
    }

    let text = response.text();
    Ok((!text.is_empty()).then_some(text))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    File {
        #[serde(rename = "fileData")]
        file_data: FileData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    file_uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| match p {
                        Part::Text { text } => Some(text.as_str()),
                        Part::File { .. } => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GroundingContext, VideoReference};

    fn provider(key: Option<&str>) -> GeminiProvider {
        GeminiProvider::new(
            "https://generativelanguage.googleapis.com/v1beta/",
            key.map(str::to_string),
            Prompts::default(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_direct_request_attaches_video() {
        let p = provider(Some("key"));
        let request = AnswerRequest::direct(
            "Summarize",
            VideoReference {
                video_id: "dQw4w9WgXcQ".to_string(),
                url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string(),
            },
        );

        let body = serde_json::to_value(p.build_body(&request)).unwrap();
        let parts = &body["contents"][0]["parts"];
        assert_eq!(
            parts[0]["fileData"]["fileUri"],
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ"
        );
        assert!(parts[1]["text"].as_str().unwrap().contains("Summarize"));
        assert!(body["systemInstruction"]["parts"][0]["text"].is_string());
        assert!(body["systemInstruction"].get("role").is_none());
    }

    #[test]
    fn test_grounded_request_is_text_only() {
        let p = provider(Some("key"));
        let request = AnswerRequest::grounded(
            "Why?",
            vec![GroundingContext {
                text: "Because.".to_string(),
                start_seconds: 3.0,
                end_seconds: 9.0,
            }],
        );
        let body = serde_json::to_value(p.build_body(&request)).unwrap();
        let parts = body["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 1);
        assert!(parts[0]["text"].as_str().unwrap().contains("[3s - 9s] Because."));
        assert!(p.handles("gemini-2.0-flash"));
        assert!(p.accepts_video());
    }

    #[test]
    fn test_parse_sse_line() {
        let line = r#"data: {"candidates":[{"content":{"role":"model","parts":[{"text":"Hel"},{"text":"lo"}]}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), Some("Hello".to_string()));
        assert_eq!(parse_sse_line("").unwrap(), None);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), None);

        let blocked = r#"data: {"promptFeedback":{"blockReason":"SAFETY"}}"#;
        assert!(parse_sse_line(blocked).is_err());
    }

    #[tokio::test]
    async fn test_stream_keeps_multibyte_text_split_across_chunks() {
        let raw = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"café über\"}]}}]}\n\n"
            .as_bytes()
            .to_vec();
        let split = raw.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let chunks = vec![
            Ok::<_, ChatPyeError>(raw[..split].to_vec()),
            Ok(raw[split..].to_vec()),
        ];

        let out: String = text_stream(futures::stream::iter(chunks))
            .map(|t| t.unwrap())
            .collect()
            .await;
        assert_eq!(out, "café über");
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let p = provider(None);
        let request = AnswerRequest::grounded("Why?", Vec::new());
        let err = p.generate("gemini-2.0-flash", &request).await.unwrap_err();
        assert!(matches!(err, ChatPyeError::Config(_)));
    }
}
