//! Deterministic fakes for pipeline tests.

use crate::embedding::Embedder;
use crate::error::{ChatPyeError, Result};
use crate::llm::{AnswerRequest, LlmProvider, TextStream};
use crate::store::{JobStatus, JobUpdate, Stores, TranscriptChunk, TranscriptStatus, VideoJob};
use crate::transcript::{TranscriptSegment, TranscriptSource, VideoMetadata};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const KEYWORDS: &[&str] = &[
    "rust", "ownership", "borrow", "checker", "lifetime", "async", "tokio", "cooking", "pasta",
    "python", "video", "intro", "summary", "memory", "error", "welcome",
];

/// Embeds text as keyword counts over a fixed vocabulary.
///
/// Text containing `FAIL_EMBED` fails to embed.
#[derive(Default)]
pub struct KeywordEmbedder {
    calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Texts embedded, counting each text of a batch.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn vectorize(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; KEYWORDS.len()];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
        {
            if let Some(i) = KEYWORDS.iter().position(|k| *k == word) {
                vector[i] += 1.0;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("FAIL_EMBED") {
            return Err(ChatPyeError::Embedding("scripted failure".to_string()));
        }
        Ok(Self::vectorize(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        KEYWORDS.len()
    }
}

/// LLM provider that returns a fixed answer and records requests.
pub struct ScriptedProvider {
    prefix: String,
    answer: String,
    calls: AtomicUsize,
    fail_after: Mutex<Option<usize>>,
    last_request: Mutex<Option<AnswerRequest>>,
}

impl ScriptedProvider {
    /// Serve models starting with `prefix`, always answering `answer`.
    pub fn new(prefix: &str, answer: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            answer: answer.to_string(),
            calls: AtomicUsize::new(0),
            fail_after: Mutex::new(None),
            last_request: Mutex::new(None),
        }
    }

    /// Number of generation calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<AnswerRequest> {
        self.last_request.lock().unwrap().clone()
    }

    /// Make subsequent streams fail after `n` fragments.
    pub fn fail_streams_after(&self, n: usize) {
        *self.fail_after.lock().unwrap() = Some(n);
    }

    fn record(&self, request: &AnswerRequest) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn handles(&self, model: &str) -> bool {
        model.starts_with(&self.prefix)
    }

    fn accepts_video(&self) -> bool {
        true
    }

    async fn generate(&self, _model: &str, request: &AnswerRequest) -> Result<String> {
        self.record(request);
        Ok(self.answer.clone())
    }

    async fn generate_stream(&self, _model: &str, request: &AnswerRequest) -> Result<TextStream> {
        self.record(request);

        let mut items: Vec<Result<String>> = self
            .answer
            .split_inclusive(' ')
            .map(|s| Ok(s.to_string()))
            .collect();
        if let Some(n) = *self.fail_after.lock().unwrap() {
            items.truncate(n);
            items.push(Err(ChatPyeError::Llm("scripted stream failure".to_string())));
        }

        Ok(futures::stream::iter(items).boxed())
    }
}

/// What the scripted source does for a video.
#[derive(Clone)]
pub enum ScriptedVideo {
    Transcript(Vec<TranscriptSegment>),
    TranscriptError,
    MetadataError,
}

/// Transcript source serving canned videos by id.
#[derive(Default)]
pub struct ScriptedSource {
    videos: Mutex<HashMap<String, ScriptedVideo>>,
    transcript_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(self, video_id: &str, video: ScriptedVideo) -> Self {
        self.videos.lock().unwrap().insert(video_id.to_string(), video);
        self
    }

    pub fn transcript_calls(&self) -> usize {
        self.transcript_calls.load(Ordering::SeqCst)
    }

    fn lookup(&self, video_id: &str) -> Option<ScriptedVideo> {
        self.videos.lock().unwrap().get(video_id).cloned()
    }
}

#[async_trait]
impl TranscriptSource for ScriptedSource {
    async fn fetch_metadata(&self, video_id: &str) -> Result<VideoMetadata> {
        match self.lookup(video_id) {
            None | Some(ScriptedVideo::MetadataError) => Err(ChatPyeError::VideoNotFound(
                format!("Video {} not found", video_id),
            )),
            Some(_) => Ok(VideoMetadata {
                video_id: video_id.to_string(),
                title: format!("Video {}", video_id),
                description: None,
                channel_title: Some("Test Channel".to_string()),
                published_at: None,
                thumbnail_url: None,
                duration_seconds: Some(60),
            }),
        }
    }

    async fn fetch_transcript(&self, video_url: &str) -> Result<Vec<TranscriptSegment>> {
        self.transcript_calls.fetch_add(1, Ordering::SeqCst);
        let video_id = crate::transcript::parse_video_id(video_url)?;
        match self.lookup(&video_id) {
            Some(ScriptedVideo::Transcript(segments)) => Ok(segments),
            _ => Err(ChatPyeError::TranscriptUnavailable(
                "Transcript is disabled on this video".to_string(),
            )),
        }
    }
}

/// Insert a job and drive it to `completed` with the given transcript status.
pub async fn completed_job(
    stores: &Stores,
    owner_id: &str,
    video_id: &str,
    transcript_status: TranscriptStatus,
) -> VideoJob {
    let job = VideoJob::new(&crate::transcript::watch_url(video_id), owner_id);
    stores.jobs.insert_job(&job).await.unwrap();
    stores
        .jobs
        .update_job(
            &job.job_id,
            JobUpdate::new().status(JobStatus::Processing).video_id(video_id),
        )
        .await
        .unwrap();
    stores
        .jobs
        .update_job(
            &job.job_id,
            JobUpdate::new()
                .status(JobStatus::Completed)
                .transcript_status(transcript_status),
        )
        .await
        .unwrap()
}

/// A chunk belonging to `job`, without an embedding.
pub fn stored_chunk(job: &VideoJob, chunk_id: u32, text: &str, start: f64, end: f64) -> TranscriptChunk {
    TranscriptChunk {
        job_id: job.job_id.clone(),
        chunk_id,
        text_content: text.to_string(),
        start_seconds: start,
        end_seconds: end,
        segment_count: 1,
        embedding: Vec::new(),
        owner_id: job.owner_id.clone(),
        video_id: job.video_id.clone().unwrap_or_default(),
        created_at: Utc::now(),
    }
}

/// A free-standing chunk with the given embedding.
pub fn chunk_with_embedding(chunk_id: u32, embedding: Vec<f32>) -> TranscriptChunk {
    TranscriptChunk {
        job_id: "job".to_string(),
        chunk_id,
        text_content: format!("chunk {}", chunk_id),
        start_seconds: chunk_id as f64 * 10.0,
        end_seconds: chunk_id as f64 * 10.0 + 10.0,
        segment_count: 1,
        embedding,
        owner_id: "owner".to_string(),
        video_id: "dQw4w9WgXcQ".to_string(),
        created_at: Utc::now(),
    }
}
