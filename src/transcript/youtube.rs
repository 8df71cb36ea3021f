//! YouTube transcript source.
//!
//! Captions are downloaded with `yt-dlp` in `json3` format. Metadata comes from the
//! YouTube Data API v3 when an API key is configured, otherwise from `yt-dlp --dump-json`.

use super::{watch_url, TranscriptSegment, TranscriptSource, VideoMetadata};
use crate::config::YoutubeSettings;
use crate::error::{ChatPyeError, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

const DATA_API_BASE: &str = "https://www.googleapis.com/youtube/v3";

/// YouTube-backed transcript and metadata source.
pub struct YoutubeSource {
    http: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
    ytdlp_path: String,
    languages: Vec<String>,
    duration_regex: Regex,
}

impl YoutubeSource {
    pub fn new(settings: &YoutubeSettings) -> Result<Self> {
        let duration_regex = Regex::new(r"^P(?:(\d+)D)?T?(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?$")
            .map_err(|e| ChatPyeError::Config(format!("Invalid duration pattern: {}", e)))?;

        Ok(Self {
            http: reqwest::Client::new(),
            api_key: settings.resolved_api_key(),
            api_base: DATA_API_BASE.to_string(),
            ytdlp_path: settings.ytdlp_path.clone(),
            languages: settings.subtitle_languages.clone(),
            duration_regex,
        })
    }

    /// Whether metadata is fetched through the Data API.
    pub fn uses_data_api(&self) -> bool {
        self.api_key.is_some()
    }

    /// Parse an ISO 8601 duration such as `PT1H2M3S`.
    fn parse_iso_duration(&self, value: &str) -> Option<u32> {
        let caps = self.duration_regex.captures(value)?;
        let part = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .unwrap_or(0)
        };
        Some(part(1) * 86_400 + part(2) * 3600 + part(3) * 60 + part(4))
    }

    async fn run_ytdlp(&self, args: &[&str]) -> Result<std::process::Output> {
        Command::new(&self.ytdlp_path)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ChatPyeError::ToolNotFound(self.ytdlp_path.clone())
                } else {
                    ChatPyeError::VideoSource(format!("Failed to run yt-dlp: {}", e))
                }
            })
    }

    #[instrument(skip(self))]
    async fn fetch_metadata_api(&self, video_id: &str, api_key: &str) -> Result<VideoMetadata> {
        let response = self
            .http
            .get(format!("{}/videos", self.api_base))
            .query(&[
                ("part", "snippet,contentDetails"),
                ("id", video_id),
                ("key", api_key),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatPyeError::VideoSource(format!(
                "YouTube Data API returned {}: {}",
                status, body
            )));
        }

        let body: ApiVideoList = response.json().await?;
        let item = body.items.into_iter().next().ok_or_else(|| {
            ChatPyeError::VideoNotFound(format!("Video {} not found or not accessible", video_id))
        })?;

        let snippet = item.snippet;
        let thumbnails = snippet.thumbnails.unwrap_or_default();
        let thumbnail_url = thumbnails
            .high
            .or(thumbnails.default)
            .map(|t| t.url);

        Ok(VideoMetadata {
            video_id: video_id.to_string(),
            title: snippet.title,
            description: snippet.description.filter(|d| !d.is_empty()),
            channel_title: snippet.channel_title,
            published_at: snippet.published_at,
            thumbnail_url,
            duration_seconds: item
                .content_details
                .and_then(|c| c.duration)
                .and_then(|d| self.parse_iso_duration(&d)),
        })
    }

    #[instrument(skip(self))]
    async fn fetch_metadata_ytdlp(&self, video_id: &str) -> Result<VideoMetadata> {
        let url = watch_url(video_id);
        let output = self
            .run_ytdlp(&["--dump-json", "--no-download", "--no-warnings", "--no-playlist", &url])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ChatPyeError::VideoNotFound(format!(
                "Video {} not found or unavailable: {}",
                video_id,
                stderr.trim()
            )));
        }

        let json: serde_json::Value = serde_json::from_slice(&output.stdout).map_err(|e| {
            ChatPyeError::VideoSource(format!("Failed to parse yt-dlp output: {}", e))
        })?;

        let published_at = json["upload_date"]
            .as_str()
            .and_then(|s| NaiveDate::parse_from_str(s, "%Y%m%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|d| d.and_utc());

        Ok(VideoMetadata {
            video_id: video_id.to_string(),
            title: json["title"].as_str().unwrap_or("Unknown Title").to_string(),
            description: json["description"].as_str().map(|s| s.to_string()),
            channel_title: json["channel"]
                .as_str()
                .or_else(|| json["uploader"].as_str())
                .map(|s| s.to_string()),
            published_at,
            thumbnail_url: json["thumbnail"].as_str().map(|s| s.to_string()),
            duration_seconds: json["duration"].as_f64().map(|d| d as u32),
        })
    }

    /// Pick the caption file for the most preferred language.
    fn select_caption_file(&self, dir: &Path) -> Result<Option<PathBuf>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json3"))
            .collect();
        files.sort();

        let lang_of = |p: &PathBuf| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.rsplit('.').next())
                .map(|s| s.to_string())
        };

        for lang in &self.languages {
            if let Some(found) = files.iter().find(|p| lang_of(p).as_deref() == Some(lang.as_str())) {
                return Ok(Some(found.clone()));
            }
        }
        Ok(files.into_iter().next())
    }
}

#[async_trait]
impl TranscriptSource for YoutubeSource {
    async fn fetch_metadata(&self, video_id: &str) -> Result<VideoMetadata> {
        match &self.api_key {
            Some(key) => self.fetch_metadata_api(video_id, key).await,
            None => self.fetch_metadata_ytdlp(video_id).await,
        }
    }

    #[instrument(skip(self))]
    async fn fetch_transcript(&self, video_url: &str) -> Result<Vec<TranscriptSegment>> {
        let dir = tempfile::tempdir()?;
        let template = dir.path().join("%(id)s.%(ext)s");
        let template = template.to_string_lossy();
        let languages = self.languages.join(",");

        info!("Downloading captions for {}", video_url);

        let output = self
            .run_ytdlp(&[
                "--skip-download",
                "--write-subs",
                "--write-auto-subs",
                "--sub-langs",
                &languages,
                "--sub-format",
                "json3",
                "--no-playlist",
                "--no-warnings",
                "--output",
                &template,
                video_url,
            ])
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ChatPyeError::TranscriptUnavailable(format!(
                "yt-dlp could not fetch captions: {}",
                stderr.trim()
            )));
        }

        let Some(path) = self.select_caption_file(dir.path())? else {
            warn!("No captions available for {}", video_url);
            return Err(ChatPyeError::TranscriptUnavailable(
                "No captions available for this video".to_string(),
            ));
        };

        debug!("Parsing captions from {:?}", path);
        let content = tokio::fs::read_to_string(&path).await?;
        let segments = parse_json3(&content)?;

        info!("Fetched {} caption segments", segments.len());
        Ok(segments)
    }
}

#[derive(Debug, Deserialize)]
struct Json3 {
    #[serde(default)]
    events: Vec<Json3Event>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Json3Event {
    #[serde(default)]
    t_start_ms: u64,
    #[serde(default)]
    d_duration_ms: u64,
    #[serde(default)]
    segs: Vec<Json3Seg>,
}

#[derive(Debug, Deserialize)]
struct Json3Seg {
    #[serde(default)]
    utf8: String,
}

/// Parse a `json3` caption file into ordered segments.
///
/// Events without text (window setup, line breaks) are dropped.
pub fn parse_json3(content: &str) -> Result<Vec<TranscriptSegment>> {
    let captions: Json3 = serde_json::from_str(content)?;

    let mut segments: Vec<TranscriptSegment> = captions
        .events
        .into_iter()
        .filter_map(|event| {
            let text: String = event.segs.iter().map(|s| s.utf8.as_str()).collect();
            let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
            if text.is_empty() {
                return None;
            }
            Some(TranscriptSegment::new(
                text,
                event.t_start_ms as f64 / 1000.0,
                event.d_duration_ms as f64 / 1000.0,
            ))
        })
        .collect();

    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(segments)
}

#[derive(Debug, Deserialize)]
struct ApiVideoList {
    #[serde(default)]
    items: Vec<ApiVideo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiVideo {
    snippet: ApiSnippet,
    content_details: Option<ApiContentDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSnippet {
    title: String,
    description: Option<String>,
    channel_title: Option<String>,
    published_at: Option<DateTime<Utc>>,
    thumbnails: Option<ApiThumbnails>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiThumbnails {
    default: Option<ApiThumbnail>,
    high: Option<ApiThumbnail>,
}

#[derive(Debug, Deserialize)]
struct ApiThumbnail {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiContentDetails {
    duration: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_json3() {
        let content = r#"{
            "wireMagic": "pb3",
            "events": [
                {"tStartMs": 0, "dDurationMs": 164080, "id": 1, "wpWinPosId": 1},
                {"tStartMs": 3200, "dDurationMs": 2400, "segs": [{"utf8": "and then"}, {"utf8": " we"}]},
                {"tStartMs": 1000, "dDurationMs": 2200, "segs": [{"utf8": "Hello\nworld"}]},
                {"tStartMs": 5600, "dDurationMs": 100, "aAppend": 1, "segs": [{"utf8": "\n"}]}
            ]
        }"#;

        let segments = parse_json3(content).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], TranscriptSegment::new("Hello world", 1.0, 2.2));
        assert_eq!(segments[1].text, "and then we");
        assert_eq!(segments[1].start, 3.2);
    }

    #[test]
    fn test_parse_json3_rejects_invalid_json() {
        assert!(parse_json3("not json").is_err());
        assert!(parse_json3("{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_iso_duration() {
        let source = YoutubeSource::new(&YoutubeSettings::default()).unwrap();
        assert_eq!(source.parse_iso_duration("PT1H2M3S"), Some(3723));
        assert_eq!(source.parse_iso_duration("PT45S"), Some(45));
        assert_eq!(source.parse_iso_duration("P1DT1M"), Some(86_460));
        assert_eq!(source.parse_iso_duration("garbage"), None);
    }

    #[test]
    fn test_select_caption_file_prefers_configured_language() {
        let mut settings = YoutubeSettings::default();
        settings.api_key = None;
        settings.subtitle_languages = vec!["en".to_string(), "en-GB".to_string()];
        let source = YoutubeSource::new(&settings).unwrap();

        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.en-GB.json3"), "{}").unwrap();
        std::fs::write(dir.path().join("abc.de.json3"), "{}").unwrap();

        let picked = source.select_caption_file(dir.path()).unwrap().unwrap();
        assert!(picked.ends_with("abc.en-GB.json3"));

        let empty = tempfile::tempdir().unwrap();
        assert!(source.select_caption_file(empty.path()).unwrap().is_none());
    }
}
