//! Persistent records: video jobs, transcript chunks, cached responses.

use crate::error::{ChatPyeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a video-processing job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Whether a job may move from `self` to `next`.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (*self, next) {
            (Failed, _) => false,
            (a, b) if a == b => true,
            (Pending, Processing) | (Pending, Failed) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            _ => false,
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = ChatPyeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(ChatPyeError::Store(format!("Unknown job status: {}", s))),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability of a job's transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptStatus {
    Processing,
    Found,
    NotFound,
    Failed,
    Error,
}

impl TranscriptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptStatus::Processing => "processing",
            TranscriptStatus::Found => "found",
            TranscriptStatus::NotFound => "not_found",
            TranscriptStatus::Failed => "failed",
            TranscriptStatus::Error => "error",
        }
    }

    /// Statuses a completed job may carry.
    pub fn allows_completion(&self) -> bool {
        matches!(self, TranscriptStatus::Found | TranscriptStatus::NotFound)
    }
}

impl std::str::FromStr for TranscriptStatus {
    type Err = ChatPyeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "processing" => Ok(TranscriptStatus::Processing),
            "found" => Ok(TranscriptStatus::Found),
            "not_found" => Ok(TranscriptStatus::NotFound),
            "failed" => Ok(TranscriptStatus::Failed),
            "error" => Ok(TranscriptStatus::Error),
            _ => Err(ChatPyeError::Store(format!("Unknown transcript status: {}", s))),
        }
    }
}

impl std::fmt::Display for TranscriptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ingestion attempt for a video URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoJob {
    pub job_id: String,
    pub source_url: String,
    /// Canonical external video id, known once the URL has been resolved.
    pub video_id: Option<String>,
    pub owner_id: String,
    pub status: JobStatus,
    pub transcript_status: TranscriptStatus,
    /// Human-readable progress message.
    pub progress: String,
    pub title: Option<String>,
    /// Job whose chunks were cloned into this one, if any.
    pub cloned_from: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoJob {
    /// Create a new pending job with a fresh id.
    pub fn new(source_url: &str, owner_id: &str) -> Self {
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4().to_string(),
            source_url: source_url.to_string(),
            video_id: None,
            owner_id: owner_id.to_string(),
            status: JobStatus::Pending,
            transcript_status: TranscriptStatus::Processing,
            progress: "Starting processing...".to_string(),
            title: None,
            cloned_from: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a partial update, enforcing the job state machine.
    pub fn apply(&mut self, update: JobUpdate) -> Result<()> {
        if self.status == JobStatus::Failed {
            return Err(ChatPyeError::JobState(format!(
                "Job {} has failed and can no longer be updated",
                self.job_id
            )));
        }

        let status = update.status.unwrap_or(self.status);
        let transcript_status = update.transcript_status.unwrap_or(self.transcript_status);

        if !self.status.can_transition_to(status) {
            return Err(ChatPyeError::JobState(format!(
                "Job {} cannot move from {} to {}",
                self.job_id, self.status, status
            )));
        }

        if status == JobStatus::Completed && !transcript_status.allows_completion() {
            return Err(ChatPyeError::JobState(format!(
                "Job {} cannot complete with transcript status {}",
                self.job_id, transcript_status
            )));
        }

        self.status = status;
        self.transcript_status = transcript_status;
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(video_id) = update.video_id {
            self.video_id = Some(video_id);
        }
        if let Some(title) = update.title {
            self.title = Some(title);
        }
        if let Some(cloned_from) = update.cloned_from {
            self.cloned_from = Some(cloned_from);
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Canonical watch URL, once the video id is known.
    pub fn video_url(&self) -> Option<String> {
        self.video_id
            .as_ref()
            .map(|id| format!("https://www.youtube.com/watch?v={}", id))
    }
}

/// Partial update for a [`VideoJob`].
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub transcript_status: Option<TranscriptStatus>,
    pub progress: Option<String>,
    pub video_id: Option<String>,
    pub title: Option<String>,
    pub cloned_from: Option<String>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn transcript_status(mut self, status: TranscriptStatus) -> Self {
        self.transcript_status = Some(status);
        self
    }

    pub fn progress(mut self, progress: impl Into<String>) -> Self {
        self.progress = Some(progress.into());
        self
    }

    pub fn video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn cloned_from(mut self, job_id: impl Into<String>) -> Self {
        self.cloned_from = Some(job_id.into());
        self
    }
}

/// A bounded span of transcript text belonging to one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptChunk {
    pub job_id: String,
    /// Sequential index within the job.
    pub chunk_id: u32,
    pub text_content: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    /// Number of transcript segments folded into this chunk.
    pub segment_count: u32,
    /// Empty until the embedding phase has processed this chunk.
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub owner_id: String,
    pub video_id: String,
    pub created_at: DateTime<Utc>,
}

impl TranscriptChunk {
    pub fn has_embedding(&self) -> bool {
        !self.embedding.is_empty()
    }

    /// Format the start time for display.
    pub fn format_timestamp(&self) -> String {
        format_seconds(self.start_seconds)
    }
}

/// Format seconds as MM:SS or HH:MM:SS.
pub fn format_seconds(seconds: f64) -> String {
    let total_seconds = seconds.max(0.0) as u32;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let secs = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// What a cached response answers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CacheKey {
    /// A user question, already normalized.
    Question(String),
    /// A pre-computed analysis, by analysis type.
    Analysis(String),
}

impl CacheKey {
    /// Stored discriminator for the key kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CacheKey::Question(_) => "user_question",
            CacheKey::Analysis(_) => "proactive_analysis",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            CacheKey::Question(v) | CacheKey::Analysis(v) => v,
        }
    }

    /// Rebuild a key from its stored parts.
    pub fn from_parts(kind: &str, value: &str) -> Result<Self> {
        match kind {
            "user_question" => Ok(CacheKey::Question(value.to_string())),
            "proactive_analysis" => Ok(CacheKey::Analysis(value.to_string())),
            _ => Err(ChatPyeError::Store(format!("Unknown cache kind: {}", kind))),
        }
    }
}

/// A memoized LLM answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedResponse {
    pub job_id: String,
    pub key: CacheKey,
    pub model: String,
    pub response_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = VideoJob::new("https://youtu.be/dQw4w9WgXcQ", "user-1");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.transcript_status, TranscriptStatus::Processing);
        assert!(Uuid::parse_str(&job.job_id).is_ok());
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut job = VideoJob::new("url", "user");
        job.apply(JobUpdate::new().status(JobStatus::Failed).transcript_status(TranscriptStatus::Error))
            .unwrap();

        let err = job.apply(JobUpdate::new().progress("retrying")).unwrap_err();
        assert!(matches!(err, ChatPyeError::JobState(_)));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_completion_requires_known_transcript_status() {
        let mut job = VideoJob::new("url", "user");
        job.apply(JobUpdate::new().status(JobStatus::Processing)).unwrap();

        let err = job.apply(JobUpdate::new().status(JobStatus::Completed)).unwrap_err();
        assert!(matches!(err, ChatPyeError::JobState(_)));

        job.apply(
            JobUpdate::new()
                .status(JobStatus::Completed)
                .transcript_status(TranscriptStatus::NotFound),
        )
        .unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn test_cannot_skip_processing() {
        let mut job = VideoJob::new("url", "user");
        let err = job
            .apply(
                JobUpdate::new()
                    .status(JobStatus::Completed)
                    .transcript_status(TranscriptStatus::Found),
            )
            .unwrap_err();
        assert!(matches!(err, ChatPyeError::JobState(_)));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TranscriptStatus::NotFound.as_str(), "not_found");
        assert_eq!("not_found".parse::<TranscriptStatus>().unwrap(), TranscriptStatus::NotFound);
        assert_eq!("completed".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert!("done".parse::<JobStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&TranscriptStatus::NotFound).unwrap(),
            "\"not_found\""
        );
    }

    #[test]
    fn test_cache_key_parts() {
        let key = CacheKey::Question("what is this?".to_string());
        assert_eq!(key.kind(), "user_question");
        assert_eq!(CacheKey::from_parts(key.kind(), key.value()).unwrap(), key);
        assert!(CacheKey::from_parts("other", "x").is_err());
    }

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_seconds(125.0), "02:05");
        assert_eq!(format_seconds(3725.0), "01:02:05");
    }
}
