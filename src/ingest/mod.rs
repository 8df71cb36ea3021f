//! Video ingestion: transcript fetch, chunking, and embedding.
//!
//! Jobs move `pending → processing → {completed, failed}`. Missing transcripts do not
//! fail a job; it completes with `transcriptStatus = not_found` and is answered in
//! direct mode instead.

mod queue;

pub use queue::{JobQueue, DEFAULT_MAX_CONCURRENT_JOBS};

use crate::chunking::TranscriptChunker;
use crate::embedding::Embedder;
use crate::error::{ChatPyeError, Result};
use crate::store::{JobStatus, JobUpdate, Stores, TranscriptChunk, TranscriptStatus, VideoJob};
use crate::transcript::{parse_video_id, watch_url, TranscriptSource};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Default number of chunks embedded concurrently.
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 5;

/// Runs ingestion jobs against the stores.
pub struct IngestionPipeline {
    stores: Stores,
    source: Arc<dyn TranscriptSource>,
    embedder: Arc<dyn Embedder>,
    chunker: TranscriptChunker,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        stores: Stores,
        source: Arc<dyn TranscriptSource>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            stores,
            source,
            embedder,
            chunker: TranscriptChunker::default(),
            batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
        }
    }

    /// Set the chunker.
    pub fn with_chunker(mut self, chunker: TranscriptChunker) -> Self {
        self.chunker = chunker;
        self
    }

    /// Set how many chunks are embedded concurrently.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Record a new pending job. The work itself happens in [`run`](Self::run).
    #[instrument(skip(self))]
    pub async fn submit(&self, source_url: &str, owner_id: &str) -> Result<VideoJob> {
        let source_url = source_url.trim();
        let owner_id = owner_id.trim();
        if source_url.is_empty() {
            return Err(ChatPyeError::InvalidInput("Video URL is required".to_string()));
        }
        if owner_id.is_empty() {
            return Err(ChatPyeError::InvalidInput("Owner id is required".to_string()));
        }

        let job = self.stores.jobs.insert_job(&VideoJob::new(source_url, owner_id)).await?;
        info!("Created job {} for {}", job.job_id, source_url);
        Ok(job)
    }

    /// Submit and run a job in the foreground.
    pub async fn process(&self, source_url: &str, owner_id: &str) -> Result<VideoJob> {
        let job = self.submit(source_url, owner_id).await?;
        self.run(&job.job_id).await
    }

    /// Run a job to completion and return its final state.
    ///
    /// Jobs already `completed` or `failed` are returned unchanged, so re-running a job
    /// is harmless. Only store failures surface as errors; everything else is recorded on
    /// the job.
    #[instrument(skip(self))]
    pub async fn run(&self, job_id: &str) -> Result<VideoJob> {
        let job = self
            .stores
            .jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| ChatPyeError::NotFound(format!("Job {}", job_id)))?;

        if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            debug!("Job {} already {}", job_id, job.status);
            return Ok(job);
        }

        let job = self
            .update(
                job_id,
                JobUpdate::new()
                    .status(JobStatus::Processing)
                    .progress("Resolving video..."),
            )
            .await?;

        // Partial chunks from an interrupted run.
        let stale = self.stores.chunks.delete_chunks(job_id).await?;
        if stale > 0 {
            info!("Removed {} chunks left by an earlier attempt", stale);
        }

        let video_id = match parse_video_id(&job.source_url) {
            Ok(id) => id,
            Err(e) => {
                return self
                    .fail(job_id, TranscriptStatus::Failed, format!("Invalid YouTube URL: {}", e))
                    .await
            }
        };

        let job = self
            .update(
                job_id,
                JobUpdate::new()
                    .video_id(video_id.as_str())
                    .progress("Checking for previous processing..."),
            )
            .await?;

        if let Some(previous) = self
            .stores
            .jobs
            .find_reusable_job(&job.owner_id, &video_id, job_id)
            .await?
        {
            if let Some(done) = self.clone_from(&job, &previous).await? {
                return Ok(done);
            }
        }

        self.update(job_id, JobUpdate::new().progress("Fetching video details..."))
            .await?;

        let metadata = match self.source.fetch_metadata(&video_id).await {
            Ok(m) => m,
            Err(e) => {
                return self
                    .fail(
                        job_id,
                        TranscriptStatus::Error,
                        format!("Failed to fetch video details: {}", e),
                    )
                    .await
            }
        };

        let job = self
            .update(
                job_id,
                JobUpdate::new()
                    .title(metadata.title.as_str())
                    .progress(format!("Fetching transcript for \"{}\"...", metadata.title)),
            )
            .await?;

        let (transcript_status, progress) = match self.ingest_transcript(&job, &video_id).await {
            Ok(0) => (
                TranscriptStatus::NotFound,
                "No transcript available for this video. Answers will come from the video directly."
                    .to_string(),
            ),
            Ok(count) => (
                TranscriptStatus::Found,
                format!("Processing complete. {} transcript chunks indexed.", count),
            ),
            Err(e) => {
                warn!("Transcript ingestion failed for job {}: {}", job_id, e);
                if let Err(cleanup) = self.stores.chunks.delete_chunks(job_id).await {
                    error!("Failed to remove partial chunks for job {}: {}", job_id, cleanup);
                }
                (
                    TranscriptStatus::NotFound,
                    format!(
                        "Transcript unavailable ({}). Answers will come from the video directly.",
                        e
                    ),
                )
            }
        };

        let job = self
            .update(
                job_id,
                JobUpdate::new()
                    .status(JobStatus::Completed)
                    .transcript_status(transcript_status)
                    .progress(progress),
            )
            .await?;

        info!("Job {} completed ({})", job_id, job.transcript_status);
        Ok(job)
    }

    /// Fetch, chunk, persist, and embed the transcript. Returns the number of chunks.
    async fn ingest_transcript(&self, job: &VideoJob, video_id: &str) -> Result<usize> {
        let segments = self.source.fetch_transcript(&watch_url(video_id)).await?;
        let chunks = self.chunker.chunk(&segments);
        if chunks.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let records: Vec<TranscriptChunk> = chunks
            .into_iter()
            .enumerate()
            .map(|(i, c)| TranscriptChunk {
                job_id: job.job_id.clone(),
                chunk_id: i as u32,
                text_content: c.text,
                start_seconds: c.start_seconds,
                end_seconds: c.end_seconds,
                segment_count: c.segment_count,
                embedding: Vec::new(),
                owner_id: job.owner_id.clone(),
                video_id: video_id.to_string(),
                created_at: now,
            })
            .collect();

        let total = self.stores.chunks.insert_chunks(&records).await?;
        self.update(
            &job.job_id,
            JobUpdate::new().progress(format!(
                "Saved {} transcript chunks. Generating embeddings...",
                total
            )),
        )
        .await?;

        let mut failed = 0;
        for (batch_index, batch) in records.chunks(self.batch_size).enumerate() {
            failed += batch.len() - self.embed_chunks(batch).await;

            let first = batch_index * self.batch_size + 1;
            let last = first + batch.len() - 1;
            self.update(
                &job.job_id,
                JobUpdate::new().progress(format!(
                    "Processed chunks {}-{} of {}...",
                    first, last, total
                )),
            )
            .await?;
        }

        if failed > 0 {
            warn!("{} of {} chunks could not be embedded", failed, total);
        }
        Ok(total)
    }

    /// Embed a batch in one request. If the request fails, each chunk is retried on
    /// its own so one bad chunk does not cost the whole batch. Returns the number stored.
    async fn embed_chunks(&self, batch: &[TranscriptChunk]) -> usize {
        let texts: Vec<String> = batch.iter().map(|c| c.text_content.clone()).collect();

        let stored = match self.embedder.embed_batch(&texts).await {
            Ok(embeddings) if embeddings.len() == batch.len() => {
                join_all(
                    batch
                        .iter()
                        .zip(&embeddings)
                        .map(|(chunk, embedding)| self.store_embedding(chunk, embedding)),
                )
                .await
            }
            Ok(embeddings) => {
                warn!(
                    "Got {} embeddings for {} chunks, embedding individually",
                    embeddings.len(),
                    batch.len()
                );
                join_all(batch.iter().map(|chunk| self.embed_chunk(chunk))).await
            }
            Err(e) => {
                warn!("Batch embedding failed, embedding individually: {}", e);
                join_all(batch.iter().map(|chunk| self.embed_chunk(chunk))).await
            }
        };

        stored.into_iter().filter(|ok| *ok).count()
    }

    /// Embed one chunk. Failures are logged and leave the chunk without an embedding.
    async fn embed_chunk(&self, chunk: &TranscriptChunk) -> bool {
        match self.embedder.embed(&chunk.text_content).await {
            Ok(embedding) => self.store_embedding(chunk, &embedding).await,
            Err(e) => {
                warn!("Failed to embed chunk {}/{}: {}", chunk.job_id, chunk.chunk_id, e);
                false
            }
        }
    }

    async fn store_embedding(&self, chunk: &TranscriptChunk, embedding: &[f32]) -> bool {
        let expected = self.embedder.dimensions();
        if embedding.len() != expected {
            warn!(
                "Chunk {}/{} got {} dimensions, expected {}",
                chunk.job_id,
                chunk.chunk_id,
                embedding.len(),
                expected
            );
            return false;
        }

        match self
            .stores
            .chunks
            .update_chunk_embedding(&chunk.job_id, chunk.chunk_id, embedding)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to store embedding for chunk {}/{}: {}", chunk.job_id, chunk.chunk_id, e);
                false
            }
        }
    }

    /// Copy a previous job's chunks into `job` and complete it.
    ///
    /// Returns `None` when the previous job has no chunks to reuse.
    async fn clone_from(&self, job: &VideoJob, previous: &VideoJob) -> Result<Option<VideoJob>> {
        let source_chunks = self.stores.chunks.find_chunks(&previous.job_id).await?;
        if source_chunks.is_empty() {
            debug!("Job {} has no chunks to reuse", previous.job_id);
            return Ok(None);
        }

        let now = Utc::now();
        let cloned: Vec<TranscriptChunk> = source_chunks
            .into_iter()
            .enumerate()
            .map(|(i, c)| TranscriptChunk {
                job_id: job.job_id.clone(),
                chunk_id: i as u32,
                created_at: now,
                owner_id: job.owner_id.clone(),
                ..c
            })
            .collect();

        let count = self.stores.chunks.insert_chunks(&cloned).await?;

        let mut update = JobUpdate::new()
            .status(JobStatus::Completed)
            .transcript_status(TranscriptStatus::Found)
            .cloned_from(previous.job_id.as_str())
            .progress(format!(
                "Processing complete. Reused {} transcript chunks from job {}.",
                count, previous.job_id
            ));
        if let Some(title) = &previous.title {
            update = update.title(title.as_str());
        }

        let done = self.update(&job.job_id, update).await?;
        info!("Job {} reused {} chunks from job {}", job.job_id, count, previous.job_id);
        Ok(Some(done))
    }

    async fn fail(&self, job_id: &str, transcript_status: TranscriptStatus, message: String) -> Result<VideoJob> {
        error!("Job {} failed: {}", job_id, message);
        self.update(
            job_id,
            JobUpdate::new()
                .status(JobStatus::Failed)
                .transcript_status(transcript_status)
                .progress(message),
        )
        .await
    }

    async fn update(&self, job_id: &str, update: JobUpdate) -> Result<VideoJob> {
        self.stores.jobs.update_job(job_id, update).await
    }
}
