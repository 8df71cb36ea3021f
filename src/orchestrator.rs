//! Wiring for ChatPye.
//!
//! Builds stores, providers, and both pipelines from [`Settings`].

use crate::chunking::TranscriptChunker;
use crate::config::{Prompts, Settings, StoreProvider};
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::Result;
use crate::ingest::{IngestionPipeline, JobQueue};
use crate::llm::{AnthropicProvider, GeminiProvider, ModelRegistry, OpenAiProvider};
use crate::openai::create_client_with_timeout;
use crate::rag::{QueryPipeline, RelevanceRanker};
use crate::store::{SqliteStore, Stores};
use crate::transcript::{TranscriptSource, YoutubeSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// The assembled application.
pub struct Orchestrator {
    settings: Settings,
    stores: Stores,
    source: Arc<dyn TranscriptSource>,
    ingestion: Arc<IngestionPipeline>,
    query: QueryPipeline,
}

impl Orchestrator {
    /// Build everything from settings.
    pub fn new(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let stores = match settings.store.provider {
            StoreProvider::Sqlite => {
                let path = settings.sqlite_path();
                info!("Using SQLite store at {}", path.display());
                Stores::from_backend(Arc::new(SqliteStore::new(&path)?))
            }
            StoreProvider::Memory => {
                info!("Using in-memory store");
                Stores::in_memory()
            }
        };

        let timeout = Duration::from_secs(settings.llm.timeout_seconds);
        let client = create_client_with_timeout(timeout)?;

        let embedder: Arc<dyn Embedder> = Arc::new(OpenAIEmbedder::with_client(
            client.clone(),
            &settings.embedding.model,
            settings.embedding.dimensions as usize,
        ));

        let registry = ModelRegistry::new()
            .with_provider(Arc::new(OpenAiProvider::new(client, prompts.clone())))
            .with_provider(Arc::new(GeminiProvider::from_env(
                &settings.llm.gemini_base_url,
                prompts.clone(),
                timeout,
            )?))
            .with_provider(Arc::new(
                AnthropicProvider::from_env(&settings.llm.anthropic_base_url, prompts.clone(), timeout)?
                    .with_max_tokens(settings.llm.anthropic_max_tokens),
            ));

        let source: Arc<dyn TranscriptSource> = Arc::new(YoutubeSource::new(&settings.youtube)?);

        Ok(Self::with_components(settings, stores, source, embedder, registry, prompts))
    }

    /// Assemble from pre-built components.
    pub fn with_components(
        settings: Settings,
        stores: Stores,
        source: Arc<dyn TranscriptSource>,
        embedder: Arc<dyn Embedder>,
        registry: ModelRegistry,
        prompts: Prompts,
    ) -> Self {
        let ingestion = IngestionPipeline::new(stores.clone(), source.clone(), embedder.clone())
            .with_chunker(TranscriptChunker::new(settings.chunking.max_chunk_chars))
            .with_batch_size(settings.ingestion.embedding_batch_size);

        let ranker = RelevanceRanker::new(embedder)
            .with_top_k(settings.rag.top_k)
            .with_min_score(settings.rag.min_score);

        let query = QueryPipeline::new(
            stores.clone(),
            registry,
            ranker,
            prompts,
            &settings.rag.default_model,
        );

        Self {
            settings,
            stores,
            source,
            ingestion: Arc::new(ingestion),
            query,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn source(&self) -> Arc<dyn TranscriptSource> {
        self.source.clone()
    }

    pub fn ingestion(&self) -> Arc<IngestionPipeline> {
        self.ingestion.clone()
    }

    pub fn query(&self) -> &QueryPipeline {
        &self.query
    }

    /// Start the background job worker and re-queue jobs left unfinished.
    pub async fn start_queue(&self) -> Result<(JobQueue, JoinHandle<()>)> {
        let (queue, worker) = JobQueue::start(
            self.ingestion.clone(),
            self.settings.ingestion.max_concurrent_jobs,
        );
        queue.recover(&self.ingestion).await?;
        Ok((queue, worker))
    }
}
