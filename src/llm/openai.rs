//! OpenAI chat completions provider.
//!
//! OpenAI models cannot watch videos, so direct-mode requests only carry the URL.

use super::{AnswerRequest, LlmProvider, TextStream};
use crate::config::Prompts;
use crate::error::{ChatPyeError, Result};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, instrument};

/// Provider for `gpt-*` and `o*` models.
pub struct OpenAiProvider {
    client: Client<OpenAIConfig>,
    prompts: Prompts,
    temperature: f32,
}

impl OpenAiProvider {
    pub fn new(client: Client<OpenAIConfig>, prompts: Prompts) -> Self {
        Self {
            client,
            prompts,
            temperature: 0.7,
        }
    }

    fn build_request(
        &self,
        model: &str,
        request: &AnswerRequest,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest> {
        let (system, user) = request.render(&self.prompts);

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(system)
                .build()
                .map_err(|e| ChatPyeError::Llm(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(user)
                .build()
                .map_err(|e| ChatPyeError::Llm(e.to_string()))?
                .into(),
        ];

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(model).messages(messages).stream(stream);
        // Reasoning models reject a custom temperature.
        if !is_reasoning_model(model) {
            args.temperature(self.temperature);
        }
        args.build().map_err(|e| ChatPyeError::Llm(e.to_string()))
    }
}

fn is_reasoning_model(model: &str) -> bool {
    let mut chars = model.chars();
    chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn handles(&self, model: &str) -> bool {
        model.starts_with("gpt-") || model.starts_with("chatgpt-") || is_reasoning_model(model)
    }

    fn accepts_video(&self) -> bool {
        false
    }

    #[instrument(skip(self, request), fields(grounded = request.source.is_grounded()))]
    async fn generate(&self, model: &str, request: &AnswerRequest) -> Result<String> {
        let req = self.build_request(model, request, false)?;

        let response = self
            .client
            .chat()
            .create(req)
            .await
            .map_err(|e| ChatPyeError::OpenAI(format!("Failed to generate response: {}", e)))?;

        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ChatPyeError::Llm("Empty response from LLM".to_string()))?;

        debug!("Generated {} characters", answer.len());
        Ok(answer)
    }

    #[instrument(skip(self, request), fields(grounded = request.source.is_grounded()))]
    async fn generate_stream(&self, model: &str, request: &AnswerRequest) -> Result<TextStream> {
        let req = self.build_request(model, request, true)?;

        let stream = self
            .client
            .chat()
            .create_stream(req)
            .await
            .map_err(|e| ChatPyeError::OpenAI(format!("Failed to start stream: {}", e)))?;

        let fragments = stream.filter_map(|item| async move {
            match item {
                Ok(chunk) => chunk
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.delta.content)
                    .filter(|s| !s.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(ChatPyeError::OpenAI(format!("Stream error: {}", e)))),
            }
        });

        Ok(fragments.boxed())
    }
}
