//! In-memory store implementation.
//!
//! Useful for testing and for ephemeral servers.

use super::{
    latest_job, CacheKey, CachedResponse, ChunkStore, JobStatus, JobStore, JobUpdate,
    ResponseStore, TranscriptChunk, TranscriptStatus, VideoJob,
};
use crate::error::{ChatPyeError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type ResponseKey = (String, CacheKey, String);

/// In-memory store.
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, VideoJob>>,
    chunks: RwLock<HashMap<String, BTreeMap<u32, TranscriptChunk>>>,
    responses: RwLock<HashMap<ResponseKey, CachedResponse>>,
}

impl MemoryStore {
    /// Create a new, empty in-memory store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(HashMap::new()),
            responses: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|e| ChatPyeError::Store(format!("Failed to acquire lock: {}", e)))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|e| ChatPyeError::Store(format!("Failed to acquire lock: {}", e)))
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &VideoJob) -> Result<VideoJob> {
        let mut jobs = write(&self.jobs)?;
        if jobs.contains_key(&job.job_id) {
            return Err(ChatPyeError::Store(format!("Job {} already exists", job.job_id)));
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(job.clone())
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<VideoJob>> {
        Ok(read(&self.jobs)?.get(job_id).cloned())
    }

    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<VideoJob> {
        let mut jobs = write(&self.jobs)?;
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| ChatPyeError::NotFound(format!("Job {}", job_id)))?;
        job.apply(update)?;
        Ok(job.clone())
    }

    async fn find_reusable_job(
        &self,
        owner_id: &str,
        video_id: &str,
        exclude_job_id: &str,
    ) -> Result<Option<VideoJob>> {
        let jobs = read(&self.jobs)?;
        Ok(latest_job(jobs.values().filter(|j| {
            j.owner_id == owner_id
                && j.video_id.as_deref() == Some(video_id)
                && j.job_id != exclude_job_id
                && j.status == JobStatus::Completed
                && j.transcript_status == TranscriptStatus::Found
        })))
    }

    async fn find_latest_completed_job(&self, video_id: &str) -> Result<Option<VideoJob>> {
        let jobs = read(&self.jobs)?;
        Ok(latest_job(jobs.values().filter(|j| {
            j.video_id.as_deref() == Some(video_id) && j.status == JobStatus::Completed
        })))
    }

    async fn find_unfinished_jobs(&self) -> Result<Vec<VideoJob>> {
        let jobs = read(&self.jobs)?;
        let mut unfinished: Vec<VideoJob> = jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Pending | JobStatus::Processing))
            .cloned()
            .collect();
        unfinished.sort_by_key(|j| j.created_at);
        Ok(unfinished)
    }
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn insert_chunks(&self, chunks: &[TranscriptChunk]) -> Result<usize> {
        let mut store = write(&self.chunks)?;

        // Check every key before writing so the bulk insert is all-or-nothing.
        let mut seen = std::collections::HashSet::new();
        for chunk in chunks {
            let exists = store
                .get(&chunk.job_id)
                .is_some_and(|m| m.contains_key(&chunk.chunk_id));
            if exists || !seen.insert((chunk.job_id.as_str(), chunk.chunk_id)) {
                return Err(ChatPyeError::Store(format!(
                    "Chunk {}/{} already exists",
                    chunk.job_id, chunk.chunk_id
                )));
            }
        }

        for chunk in chunks {
            store
                .entry(chunk.job_id.clone())
                .or_default()
                .insert(chunk.chunk_id, chunk.clone());
        }
        Ok(chunks.len())
    }

    async fn find_chunks(&self, job_id: &str) -> Result<Vec<TranscriptChunk>> {
        let store = read(&self.chunks)?;
        let mut chunks: Vec<TranscriptChunk> = store
            .get(job_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        chunks.sort_by(|a, b| a.start_seconds.total_cmp(&b.start_seconds));
        Ok(chunks)
    }

    async fn update_chunk_embedding(&self, job_id: &str, chunk_id: u32, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(ChatPyeError::InvalidInput(format!(
                "Empty embedding for chunk {}/{}",
                job_id, chunk_id
            )));
        }
        let mut store = write(&self.chunks)?;
        let chunk = store
            .get_mut(job_id)
            .and_then(|m| m.get_mut(&chunk_id))
            .ok_or_else(|| ChatPyeError::NotFound(format!("Chunk {}/{}", job_id, chunk_id)))?;

        if chunk.has_embedding() {
            return Err(ChatPyeError::Integrity(format!(
                "Chunk {}/{} already has an embedding",
                job_id, chunk_id
            )));
        }
        chunk.embedding = embedding.to_vec();
        Ok(())
    }

    async fn delete_chunks(&self, job_id: &str) -> Result<usize> {
        let mut store = write(&self.chunks)?;
        Ok(store.remove(job_id).map(|m| m.len()).unwrap_or(0))
    }
}

#[async_trait]
impl ResponseStore for MemoryStore {
    async fn find_cached_response(
        &self,
        job_id: &str,
        key: &CacheKey,
        model: &str,
    ) -> Result<Option<CachedResponse>> {
        let responses = read(&self.responses)?;
        Ok(responses
            .get(&(job_id.to_string(), key.clone(), model.to_string()))
            .cloned())
    }

    async fn upsert_cached_response(
        &self,
        job_id: &str,
        key: &CacheKey,
        model: &str,
        text: &str,
    ) -> Result<CachedResponse> {
        let mut responses = write(&self.responses)?;
        let now = Utc::now();
        let entry = responses
            .entry((job_id.to_string(), key.clone(), model.to_string()))
            .and_modify(|r| {
                r.response_text = text.to_string();
                r.updated_at = now;
            })
            .or_insert_with(|| CachedResponse {
                job_id: job_id.to_string(),
                key: key.clone(),
                model: model.to_string(),
                response_text: text.to_string(),
                created_at: now,
                updated_at: now,
            });
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JobUpdate;

    fn chunk(job_id: &str, chunk_id: u32, start: f64, end: f64) -> TranscriptChunk {
        TranscriptChunk {
            job_id: job_id.to_string(),
            chunk_id,
            text_content: format!("chunk {}", chunk_id),
            start_seconds: start,
            end_seconds: end,
            segment_count: 1,
            embedding: Vec::new(),
            owner_id: "owner".to_string(),
            video_id: "video".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_job_roundtrip_and_update() {
        let store = MemoryStore::new();
        let job = VideoJob::new("https://youtu.be/dQw4w9WgXcQ", "owner");
        store.insert_job(&job).await.unwrap();
        assert!(store.insert_job(&job).await.is_err());

        let updated = store
            .update_job(&job.job_id, JobUpdate::new().status(JobStatus::Processing).progress("Working"))
            .await
            .unwrap();
        assert_eq!(updated.status, JobStatus::Processing);
        assert_eq!(updated.progress, "Working");

        let found = store.find_job(&job.job_id).await.unwrap().unwrap();
        assert_eq!(found.progress, "Working");

        let missing = store.update_job("nope", JobUpdate::new()).await.unwrap_err();
        assert!(matches!(missing, ChatPyeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_chunks_sorted_and_bulk_insert_atomic() {
        let store = MemoryStore::new();
        store
            .insert_chunks(&[chunk("job", 1, 10.0, 20.0), chunk("job", 0, 0.0, 10.0)])
            .await
            .unwrap();

        let chunks = store.find_chunks("job").await.unwrap();
        assert_eq!(chunks.iter().map(|c| c.chunk_id).collect::<Vec<_>>(), vec![0, 1]);

        // One duplicate key rejects the whole batch.
        let err = store
            .insert_chunks(&[chunk("job", 2, 20.0, 30.0), chunk("job", 1, 10.0, 20.0)])
            .await;
        assert!(err.is_err());
        assert_eq!(store.find_chunks("job").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_embedding_set_once() {
        let store = MemoryStore::new();
        store.insert_chunks(&[chunk("job", 0, 0.0, 10.0)]).await.unwrap();

        let err = store.update_chunk_embedding("job", 0, &[]).await.unwrap_err();
        assert!(matches!(err, ChatPyeError::InvalidInput(_)));
        store.update_chunk_embedding("job", 0, &[1.0, 0.0]).await.unwrap();
        let err = store.update_chunk_embedding("job", 0, &[0.0, 1.0]).await.unwrap_err();
        assert!(matches!(err, ChatPyeError::Integrity(_)));

        let chunks = store.find_chunks("job").await.unwrap();
        assert_eq!(chunks[0].embedding, vec![1.0, 0.0]);
        assert_eq!(store.delete_chunks("job").await.unwrap(), 1);
        assert!(store.find_chunks("job").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_bumps_updated_at() {
        let store = MemoryStore::new();
        let key = CacheKey::Question("what is this?".to_string());

        let first = store.upsert_cached_response("job", &key, "m", "v1").await.unwrap();
        let second = store.upsert_cached_response("job", &key, "m", "v2").await.unwrap();

        assert_eq!(second.response_text, "v2");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);

        let found = store.find_cached_response("job", &key, "m").await.unwrap().unwrap();
        assert_eq!(found.response_text, "v2");
        assert!(store.find_cached_response("job", &key, "other").await.unwrap().is_none());
    }
}
