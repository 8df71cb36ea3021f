//! Persistence for jobs, transcript chunks, and cached responses.
//!
//! Provides trait-based interfaces with SQLite and in-memory backends. Each backend
//! implements all three traits; [`Stores`] hands them out as separate trait objects.

mod memory;
mod models;
mod sqlite;

pub use memory::MemoryStore;
pub use models::{
    format_seconds, CacheKey, CachedResponse, JobStatus, JobUpdate, TranscriptChunk,
    TranscriptStatus, VideoJob,
};
pub use sqlite::SqliteStore;

use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Video job records, keyed by job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails if the job id already exists.
    async fn insert_job(&self, job: &VideoJob) -> Result<VideoJob>;

    /// Look up a job by id.
    async fn find_job(&self, job_id: &str) -> Result<Option<VideoJob>>;

    /// Apply a partial update and return the updated job.
    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<VideoJob>;

    /// Most recent completed job with a found transcript for this owner and video,
    /// excluding `exclude_job_id`.
    async fn find_reusable_job(
        &self,
        owner_id: &str,
        video_id: &str,
        exclude_job_id: &str,
    ) -> Result<Option<VideoJob>>;

    /// Most recent completed job for a video, regardless of owner.
    async fn find_latest_completed_job(&self, video_id: &str) -> Result<Option<VideoJob>>;

    /// Jobs still pending or processing.
    async fn find_unfinished_jobs(&self) -> Result<Vec<VideoJob>>;
}

/// Transcript chunks, keyed by `(job_id, chunk_id)`.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Insert chunks in one bulk write. Fails without writing anything on a duplicate key.
    async fn insert_chunks(&self, chunks: &[TranscriptChunk]) -> Result<usize>;

    /// All chunks of a job, ordered by start time.
    async fn find_chunks(&self, job_id: &str) -> Result<Vec<TranscriptChunk>>;

    /// Set a chunk's embedding. Embeddings cannot be replaced once set.
    async fn update_chunk_embedding(&self, job_id: &str, chunk_id: u32, embedding: &[f32]) -> Result<()>;

    /// Remove every chunk of a job.
    async fn delete_chunks(&self, job_id: &str) -> Result<usize>;
}

/// Cached LLM responses, keyed by `(job_id, cache key, model)`.
#[async_trait]
pub trait ResponseStore: Send + Sync {
    async fn find_cached_response(
        &self,
        job_id: &str,
        key: &CacheKey,
        model: &str,
    ) -> Result<Option<CachedResponse>>;

    /// Insert or replace the response for this identity.
    async fn upsert_cached_response(
        &self,
        job_id: &str,
        key: &CacheKey,
        model: &str,
        text: &str,
    ) -> Result<CachedResponse>;
}

/// The three stores, backed by one shared backend.
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub chunks: Arc<dyn ChunkStore>,
    pub responses: Arc<dyn ResponseStore>,
}

impl Stores {
    /// Hand out one backend as all three stores.
    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: JobStore + ChunkStore + ResponseStore + 'static,
    {
        Self {
            jobs: backend.clone(),
            chunks: backend.clone(),
            responses: backend,
        }
    }

    /// Fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self::from_backend(Arc::new(MemoryStore::new()))
    }
}

/// Select the newest job among candidates.
pub(crate) fn latest_job<'a>(jobs: impl Iterator<Item = &'a VideoJob>) -> Option<VideoJob> {
    jobs.max_by_key(|j| j.created_at).cloned()
}
