//! SQLite-based store implementation.
//!
//! One connection behind a mutex; embeddings are stored as little-endian f32 blobs.

use super::{
    CacheKey, CachedResponse, ChunkStore, JobStore, JobUpdate, ResponseStore, TranscriptChunk,
    VideoJob,
};
use crate::error::{ChatPyeError, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS video_jobs (
        job_id TEXT PRIMARY KEY,
        source_url TEXT NOT NULL,
        video_id TEXT,
        owner_id TEXT NOT NULL,
        status TEXT NOT NULL,
        transcript_status TEXT NOT NULL,
        progress TEXT NOT NULL,
        title TEXT,
        cloned_from TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_video_jobs_video_id ON video_jobs(video_id);
    CREATE INDEX IF NOT EXISTS idx_video_jobs_status ON video_jobs(status);

    CREATE TABLE IF NOT EXISTS transcript_chunks (
        job_id TEXT NOT NULL,
        chunk_id INTEGER NOT NULL,
        text_content TEXT NOT NULL,
        start_seconds REAL NOT NULL,
        end_seconds REAL NOT NULL,
        segment_count INTEGER NOT NULL,
        embedding BLOB,
        owner_id TEXT NOT NULL,
        video_id TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (job_id, chunk_id)
    );

    CREATE INDEX IF NOT EXISTS idx_transcript_chunks_start
        ON transcript_chunks(job_id, start_seconds);

    CREATE TABLE IF NOT EXISTS cached_responses (
        job_id TEXT NOT NULL,
        cache_kind TEXT NOT NULL,
        cache_key TEXT NOT NULL,
        model TEXT NOT NULL,
        response_text TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (job_id, cache_kind, cache_key, model)
    );
"#;

const JOB_COLUMNS: &str = "job_id, source_url, video_id, owner_id, status, transcript_status, \
                           progress, title, cloned_from, created_at, updated_at";

const CHUNK_COLUMNS: &str = "job_id, chunk_id, text_content, start_seconds, end_seconds, \
                             segment_count, embedding, owner_id, video_id, created_at";

/// SQLite-backed store for jobs, chunks, and cached responses.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file.
    #[instrument(skip_all)]
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;

        info!("Initialized SQLite store at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory database (useful for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| ChatPyeError::Store(format!("Failed to acquire lock: {}", e)))
    }

    fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| {
                let arr: [u8; 4] = chunk.try_into().unwrap_or_default();
                f32::from_le_bytes(arr)
            })
            .collect()
    }
}

fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, err: ChatPyeError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, ChatPyeError::Store(format!("Bad timestamp {}: {}", raw, e))))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<VideoJob> {
    let status: String = row.get(4)?;
    let transcript_status: String = row.get(5)?;

    Ok(VideoJob {
        job_id: row.get(0)?,
        source_url: row.get(1)?,
        video_id: row.get(2)?,
        owner_id: row.get(3)?,
        status: status.parse().map_err(|e| conversion_error(4, e))?,
        transcript_status: transcript_status.parse().map_err(|e| conversion_error(5, e))?,
        progress: row.get(6)?,
        title: row.get(7)?,
        cloned_from: row.get(8)?,
        created_at: parse_timestamp(row, 9)?,
        updated_at: parse_timestamp(row, 10)?,
    })
}

fn chunk_from_row(row: &Row<'_>) -> rusqlite::Result<TranscriptChunk> {
    let embedding: Option<Vec<u8>> = row.get(6)?;

    Ok(TranscriptChunk {
        job_id: row.get(0)?,
        chunk_id: row.get(1)?,
        text_content: row.get(2)?,
        start_seconds: row.get(3)?,
        end_seconds: row.get(4)?,
        segment_count: row.get(5)?,
        embedding: embedding
            .map(|bytes| SqliteStore::bytes_to_embedding(&bytes))
            .unwrap_or_default(),
        owner_id: row.get(7)?,
        video_id: row.get(8)?,
        created_at: parse_timestamp(row, 9)?,
    })
}

fn response_from_row(row: &Row<'_>) -> rusqlite::Result<CachedResponse> {
    let kind: String = row.get(1)?;
    let value: String = row.get(2)?;

    Ok(CachedResponse {
        job_id: row.get(0)?,
        key: CacheKey::from_parts(&kind, &value).map_err(|e| conversion_error(1, e))?,
        model: row.get(3)?,
        response_text: row.get(4)?,
        created_at: parse_timestamp(row, 5)?,
        updated_at: parse_timestamp(row, 6)?,
    })
}

fn query_job(conn: &Connection, job_id: &str) -> Result<Option<VideoJob>> {
    let sql = format!("SELECT {} FROM video_jobs WHERE job_id = ?1", JOB_COLUMNS);
    Ok(conn.query_row(&sql, params![job_id], job_from_row).optional()?)
}

#[async_trait]
impl JobStore for SqliteStore {
    #[instrument(skip(self, job), fields(job_id = %job.job_id))]
    async fn insert_job(&self, job: &VideoJob) -> Result<VideoJob> {
        let conn = self.lock()?;

        conn.execute(
            &format!(
                "INSERT INTO video_jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                JOB_COLUMNS
            ),
            params![
                job.job_id,
                job.source_url,
                job.video_id,
                job.owner_id,
                job.status.as_str(),
                job.transcript_status.as_str(),
                job.progress,
                job.title,
                job.cloned_from,
                timestamp(&job.created_at),
                timestamp(&job.updated_at),
            ],
        )?;

        debug!("Inserted job {}", job.job_id);
        Ok(job.clone())
    }

    async fn find_job(&self, job_id: &str) -> Result<Option<VideoJob>> {
        let conn = self.lock()?;
        query_job(&conn, job_id)
    }

    #[instrument(skip(self, update))]
    async fn update_job(&self, job_id: &str, update: JobUpdate) -> Result<VideoJob> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut job = query_job(&tx, job_id)?
            .ok_or_else(|| ChatPyeError::NotFound(format!("Job {}", job_id)))?;
        job.apply(update)?;

        tx.execute(
            r#"
            UPDATE video_jobs
            SET video_id = ?2, status = ?3, transcript_status = ?4, progress = ?5,
                title = ?6, cloned_from = ?7, updated_at = ?8
            WHERE job_id = ?1
            "#,
            params![
                job.job_id,
                job.video_id,
                job.status.as_str(),
                job.transcript_status.as_str(),
                job.progress,
                job.title,
                job.cloned_from,
                timestamp(&job.updated_at),
            ],
        )?;
        tx.commit()?;

        Ok(job)
    }

    #[instrument(skip(self))]
    async fn find_reusable_job(
        &self,
        owner_id: &str,
        video_id: &str,
        exclude_job_id: &str,
    ) -> Result<Option<VideoJob>> {
        let conn = self.lock()?;
        let sql = format!(
            r#"
            SELECT {} FROM video_jobs
            WHERE owner_id = ?1 AND video_id = ?2 AND job_id != ?3
              AND status = 'completed' AND transcript_status = 'found'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            JOB_COLUMNS
        );
        Ok(conn
            .query_row(&sql, params![owner_id, video_id, exclude_job_id], job_from_row)
            .optional()?)
    }

    #[instrument(skip(self))]
    async fn find_latest_completed_job(&self, video_id: &str) -> Result<Option<VideoJob>> {
        let conn = self.lock()?;
        let sql = format!(
            r#"
            SELECT {} FROM video_jobs
            WHERE video_id = ?1 AND status = 'completed'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            JOB_COLUMNS
        );
        Ok(conn.query_row(&sql, params![video_id], job_from_row).optional()?)
    }

    async fn find_unfinished_jobs(&self) -> Result<Vec<VideoJob>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM video_jobs WHERE status IN ('pending', 'processing') ORDER BY created_at",
            JOB_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let jobs = stmt
            .query_map([], job_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }
}

#[async_trait]
impl ChunkStore for SqliteStore {
    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    async fn insert_chunks(&self, chunks: &[TranscriptChunk]) -> Result<usize> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO transcript_chunks ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                CHUNK_COLUMNS
            ))?;

            for chunk in chunks {
                let embedding = chunk
                    .has_embedding()
                    .then(|| Self::embedding_to_bytes(&chunk.embedding));

                stmt.execute(params![
                    chunk.job_id,
                    chunk.chunk_id,
                    chunk.text_content,
                    chunk.start_seconds,
                    chunk.end_seconds,
                    chunk.segment_count,
                    embedding,
                    chunk.owner_id,
                    chunk.video_id,
                    timestamp(&chunk.created_at),
                ])?;
            }
        }

        tx.commit()?;
        info!("Inserted {} chunks", chunks.len());
        Ok(chunks.len())
    }

    #[instrument(skip(self))]
    async fn find_chunks(&self, job_id: &str) -> Result<Vec<TranscriptChunk>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM transcript_chunks WHERE job_id = ?1 ORDER BY start_seconds, chunk_id",
            CHUNK_COLUMNS
        ))?;

        let chunks = stmt
            .query_map(params![job_id], chunk_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        debug!("Found {} chunks for job {}", chunks.len(), job_id);
        Ok(chunks)
    }

    #[instrument(skip(self, embedding))]
    async fn update_chunk_embedding(&self, job_id: &str, chunk_id: u32, embedding: &[f32]) -> Result<()> {
        if embedding.is_empty() {
            return Err(ChatPyeError::InvalidInput(format!(
                "Empty embedding for chunk {}/{}",
                job_id, chunk_id
            )));
        }
        let conn = self.lock()?;

        let updated = conn.execute(
            r#"
            UPDATE transcript_chunks SET embedding = ?3
            WHERE job_id = ?1 AND chunk_id = ?2 AND embedding IS NULL
            "#,
            params![job_id, chunk_id, Self::embedding_to_bytes(embedding)],
        )?;

        if updated == 1 {
            return Ok(());
        }

        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM transcript_chunks WHERE job_id = ?1 AND chunk_id = ?2",
            params![job_id, chunk_id],
            |row| row.get(0),
        )?;

        if exists == 0 {
            Err(ChatPyeError::NotFound(format!("Chunk {}/{}", job_id, chunk_id)))
        } else {
            Err(ChatPyeError::Integrity(format!(
                "Chunk {}/{} already has an embedding",
                job_id, chunk_id
            )))
        }
    }

    #[instrument(skip(self))]
    async fn delete_chunks(&self, job_id: &str) -> Result<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM transcript_chunks WHERE job_id = ?1", params![job_id])?;
        info!("Deleted {} chunks for job {}", deleted, job_id);
        Ok(deleted)
    }
}

#[async_trait]
impl ResponseStore for SqliteStore {
    async fn find_cached_response(
        &self,
        job_id: &str,
        key: &CacheKey,
        model: &str,
    ) -> Result<Option<CachedResponse>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                r#"
                SELECT job_id, cache_kind, cache_key, model, response_text, created_at, updated_at
                FROM cached_responses
                WHERE job_id = ?1 AND cache_kind = ?2 AND cache_key = ?3 AND model = ?4
                "#,
                params![job_id, key.kind(), key.value(), model],
                response_from_row,
            )
            .optional()?)
    }

    #[instrument(skip(self, key, text), fields(kind = key.kind()))]
    async fn upsert_cached_response(
        &self,
        job_id: &str,
        key: &CacheKey,
        model: &str,
        text: &str,
    ) -> Result<CachedResponse> {
        let conn = self.lock()?;
        let now = timestamp(&Utc::now());

        conn.execute(
            r#"
            INSERT INTO cached_responses
                (job_id, cache_kind, cache_key, model, response_text, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
            ON CONFLICT (job_id, cache_kind, cache_key, model)
            DO UPDATE SET response_text = excluded.response_text, updated_at = excluded.updated_at
            "#,
            params![job_id, key.kind(), key.value(), model, text, now],
        )?;

        let response = conn.query_row(
            r#"
            SELECT job_id, cache_kind, cache_key, model, response_text, created_at, updated_at
            FROM cached_responses
            WHERE job_id = ?1 AND cache_kind = ?2 AND cache_key = ?3 AND model = ?4
            "#,
            params![job_id, key.kind(), key.value(), model],
            response_from_row,
        )?;

        debug!("Cached response for job {} ({})", job_id, model);
        Ok(response)
    }
}
