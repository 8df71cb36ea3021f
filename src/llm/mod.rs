//! LLM providers for answer generation.
//!
//! Providers answer either from grounding transcript segments or from a direct reference
//! to the video. Each provider formats its own prompt from an [`AnswerRequest`].

mod anthropic;
mod gemini;
mod openai;
mod sse;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai::OpenAiProvider;

use crate::config::Prompts;
use crate::error::{ChatPyeError, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Incremental answer text.
pub type TextStream = BoxStream<'static, Result<String>>;

/// A transcript span handed to the model as grounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingContext {
    pub text: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

impl GroundingContext {
    /// Prompt line citing the span as `[Xs - Ys]`.
    pub fn format_for_prompt(&self) -> String {
        format!(
            "[{}s - {}s] {}",
            self.start_seconds.round() as u64,
            self.end_seconds.round() as u64,
            self.text
        )
    }
}

/// A video the model is asked about directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoReference {
    pub video_id: String,
    pub url: String,
}

/// What the answer is based on.
#[derive(Debug, Clone)]
pub enum AnswerSource {
    /// Retrieval-augmented: answer only from these segments.
    Grounded(Vec<GroundingContext>),
    /// Direct: answer from the video itself.
    Video(VideoReference),
}

impl AnswerSource {
    pub fn is_grounded(&self) -> bool {
        matches!(self, AnswerSource::Grounded(_))
    }
}

/// A question plus the material to answer it from.
#[derive(Debug, Clone)]
pub struct AnswerRequest {
    pub question: String,
    pub source: AnswerSource,
}

impl AnswerRequest {
    pub fn grounded(question: impl Into<String>, context: Vec<GroundingContext>) -> Self {
        Self {
            question: question.into(),
            source: AnswerSource::Grounded(context),
        }
    }

    pub fn direct(question: impl Into<String>, video: VideoReference) -> Self {
        Self {
            question: question.into(),
            source: AnswerSource::Video(video),
        }
    }

    /// System and user prompt for this request.
    pub fn render(&self, prompts: &Prompts) -> (String, String) {
        let mut vars = HashMap::new();
        vars.insert("question".to_string(), self.question.clone());

        match &self.source {
            AnswerSource::Grounded(context) => {
                let context = context
                    .iter()
                    .map(GroundingContext::format_for_prompt)
                    .collect::<Vec<_>>()
                    .join("\n\n");
                vars.insert("context".to_string(), context);
                (
                    prompts.rag.grounded_system.clone(),
                    prompts.render_with_custom(&prompts.rag.grounded_user, &vars),
                )
            }
            AnswerSource::Video(video) => {
                vars.insert("video_url".to_string(), video.url.clone());
                vars.insert("video_id".to_string(), video.video_id.clone());
                (
                    prompts.rag.direct_system.clone(),
                    prompts.render_with_custom(&prompts.rag.direct_user, &vars),
                )
            }
        }
    }
}

/// A backend that can generate answers for some family of models.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &'static str;

    /// Whether this provider serves the given model id.
    fn handles(&self, model: &str) -> bool;

    /// Whether the provider can consume a video reference natively.
    fn accepts_video(&self) -> bool;

    /// Generate a complete answer.
    async fn generate(&self, model: &str, request: &AnswerRequest) -> Result<String>;

    /// Generate an answer as a stream of text fragments.
    async fn generate_stream(&self, model: &str, request: &AnswerRequest) -> Result<TextStream>;
}

/// Resolves model ids to providers.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    providers: Vec<Arc<dyn LlmProvider>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider. Earlier providers take precedence.
    pub fn with_provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// First provider that handles `model`.
    pub fn resolve(&self, model: &str) -> Result<Arc<dyn LlmProvider>> {
        let model = model.trim();
        if model.is_empty() {
            return Err(ChatPyeError::InvalidInput("Model id is required".to_string()));
        }
        self.providers
            .iter()
            .find(|p| p.handles(model))
            .cloned()
            .ok_or_else(|| ChatPyeError::InvalidInput(format!("Unknown model: {}", model)))
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }
}
