//! Video transcript and metadata sources.
//!
//! A source turns a video URL into ordered caption segments and resolves video ids to
//! metadata. The YouTube implementation shells out to `yt-dlp` and optionally uses the
//! YouTube Data API.

mod youtube;

pub use youtube::{parse_json3, YoutubeSource};

use crate::error::{ChatPyeError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// One caption line with its timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub text: String,
    /// Offset from the start of the video, in seconds.
    pub start: f64,
    /// Duration in seconds.
    pub duration: f64,
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>, start: f64, duration: f64) -> Self {
        Self {
            text: text.into(),
            start,
            duration,
        }
    }

    pub fn end_seconds(&self) -> f64 {
        self.start + self.duration.max(0.0)
    }
}

/// Metadata about a video.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub video_id: String,
    pub title: String,
    pub description: Option<String>,
    pub channel_title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub thumbnail_url: Option<String>,
    pub duration_seconds: Option<u32>,
}

/// Source of transcripts and video metadata.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// Fetch metadata for a video. Fails when the video is missing, private, or restricted.
    async fn fetch_metadata(&self, video_id: &str) -> Result<VideoMetadata>;

    /// Fetch the ordered caption segments of a video.
    ///
    /// An empty list or [`ChatPyeError::TranscriptUnavailable`] means no usable captions.
    async fn fetch_transcript(&self, video_url: &str) -> Result<Vec<TranscriptSegment>>;
}

/// Canonical watch URL for a video id.
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}

fn is_video_id(candidate: &str) -> bool {
    candidate.len() == 11
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extract the 11-character video id from a YouTube URL or a bare id.
///
/// Accepts watch, `youtu.be`, embed, `v`, shorts and live URLs, with or without scheme.
pub fn parse_video_id(input: &str) -> Result<String> {
    let input = input.trim();
    if is_video_id(input) {
        return Ok(input.to_string());
    }

    let invalid = || ChatPyeError::InvalidInput(format!("Invalid YouTube URL: {}", input));

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{}", input)
    };
    let url = Url::parse(&with_scheme).map_err(|_| invalid())?;

    let host = url.host_str().ok_or_else(invalid)?;
    let host = host
        .trim_start_matches("www.")
        .trim_start_matches("m.")
        .trim_start_matches("music.");

    let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());

    let candidate = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "youtube-nocookie.com" => match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned()),
            Some("embed") | Some("v") | Some("shorts") | Some("live") => {
                segments.next().map(str::to_string)
            }
            _ => None,
        },
        _ => None,
    };

    candidate.filter(|id| is_video_id(id)).ok_or_else(invalid)
}
