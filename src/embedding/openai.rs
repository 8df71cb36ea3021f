//! OpenAI embeddings implementation.

use super::Embedder;
use crate::error::{ChatPyeError, Result};
use crate::openai::create_client;
use async_openai::config::OpenAIConfig;
use async_openai::types::{CreateEmbeddingRequestArgs, EmbeddingInput};
use async_openai::Client;
use async_trait::async_trait;
use tracing::{debug, instrument};

/// Maximum inputs per embeddings request.
const MAX_INPUTS_PER_REQUEST: usize = 100;

/// OpenAI-based embedder.
pub struct OpenAIEmbedder {
    client: Client<OpenAIConfig>,
    model: String,
    dimensions: usize,
}

impl OpenAIEmbedder {
    /// Create an embedder for `text-embedding-3-small`.
    pub fn new() -> Result<Self> {
        Self::with_config("text-embedding-3-small", 1536)
    }

    /// Create an embedder with a custom model and dimensions.
    pub fn with_config(model: &str, dimensions: usize) -> Result<Self> {
        Ok(Self::with_client(create_client()?, model, dimensions))
    }

    /// Create an embedder around an existing client.
    pub fn with_client(client: Client<OpenAIConfig>, model: &str, dimensions: usize) -> Self {
        Self {
            client,
            model: model.to_string(),
            dimensions,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    #[instrument(skip(self, text))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| ChatPyeError::Embedding("Empty embedding response".to_string()))
    }

    #[instrument(skip(self, texts), fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for batch in texts.chunks(MAX_INPUTS_PER_REQUEST) {
            let request = CreateEmbeddingRequestArgs::default()
                .model(&self.model)
                .input(EmbeddingInput::StringArray(batch.to_vec()))
                .dimensions(self.dimensions as u32)
                .build()
                .map_err(|e| ChatPyeError::Embedding(format!("Failed to build request: {}", e)))?;

            let response = self
                .client
                .embeddings()
                .create(request)
                .await
                .map_err(|e| ChatPyeError::OpenAI(format!("Embedding API error: {}", e)))?;

            if response.data.len() != batch.len() {
                return Err(ChatPyeError::Embedding(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    response.data.len()
                )));
            }

            let mut embeddings = response.data;
            embeddings.sort_by_key(|e| e.index);
            all_embeddings.extend(embeddings.into_iter().map(|e| e.embedding));
        }

        debug!("Generated {} embeddings", all_embeddings.len());
        Ok(all_embeddings)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedder_creation() {
        let client = Client::with_config(OpenAIConfig::new().with_api_key("test"));
        let embedder = OpenAIEmbedder::with_client(client.clone(), "text-embedding-3-small", 1536);
        assert_eq!(embedder.dimensions(), 1536);

        let embedder = OpenAIEmbedder::with_client(client, "text-embedding-3-large", 3072);
        assert_eq!(embedder.dimensions(), 3072);
        assert_eq!(embedder.model(), "text-embedding-3-large");
    }

    #[tokio::test]
    async fn test_empty_batch_skips_request() {
        let client = Client::with_config(OpenAIConfig::new().with_api_key("test"));
        let embedder = OpenAIEmbedder::with_client(client, "text-embedding-3-small", 8);
        assert!(embedder.embed_batch(&[]).await.unwrap().is_empty());
    }
}
