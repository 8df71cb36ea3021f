//! Configuration settings for ChatPye.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub server: ServerSettings,
    pub store: StoreSettings,
    pub youtube: YoutubeSettings,
    pub embedding: EmbeddingSettings,
    pub chunking: ChunkingSettings,
    pub ingestion: IngestionSettings,
    pub rag: RagSettings,
    pub llm: LlmSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.chatpye".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Storage backend type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreProvider {
    /// SQLite database on disk (default).
    #[default]
    Sqlite,
    /// Process-local maps, lost on exit.
    Memory,
}

impl std::str::FromStr for StoreProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" => Ok(StoreProvider::Sqlite),
            "memory" => Ok(StoreProvider::Memory),
            _ => Err(format!("Unknown store provider: {}", s)),
        }
    }
}

impl std::fmt::Display for StoreProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreProvider::Sqlite => write!(f, "sqlite"),
            StoreProvider::Memory => write!(f, "memory"),
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Store provider (sqlite, memory).
    pub provider: StoreProvider,
    /// Path to SQLite database (for sqlite provider).
    pub sqlite_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            provider: StoreProvider::Sqlite,
            sqlite_path: "~/.chatpye/chatpye.db".to_string(),
        }
    }
}

/// YouTube-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeSettings {
    /// YouTube Data API key (optional; falls back to `YOUTUBE_API_KEY`, then yt-dlp).
    pub api_key: Option<String>,
    /// yt-dlp executable.
    pub ytdlp_path: String,
    /// Caption languages to request, in order of preference.
    pub subtitle_languages: Vec<String>,
}

impl Default for YoutubeSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            ytdlp_path: "yt-dlp".to_string(),
            subtitle_languages: vec!["en".to_string(), "en-US".to_string(), "en-GB".to_string()],
        }
    }
}

impl YoutubeSettings {
    /// The configured Data API key, or the `YOUTUBE_API_KEY` environment variable.
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("YOUTUBE_API_KEY").ok().filter(|k| !k.is_empty()))
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Embedding model to use.
    pub model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        }
    }
}

/// Transcript chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Approximate maximum chunk size in characters.
    pub max_chunk_chars: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            max_chunk_chars: crate::chunking::DEFAULT_MAX_CHUNK_CHARS,
        }
    }
}

/// Ingestion pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestionSettings {
    /// Number of chunks embedded concurrently per batch.
    pub embedding_batch_size: usize,
    /// Maximum number of jobs ingested at the same time.
    pub max_concurrent_jobs: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            embedding_batch_size: crate::ingest::DEFAULT_EMBEDDING_BATCH_SIZE,
            max_concurrent_jobs: crate::ingest::DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

/// RAG (Retrieval-Augmented Generation) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    /// Model used when a request does not name one.
    pub default_model: String,
    /// Number of transcript chunks used as grounding context.
    pub top_k: usize,
    /// Chunks scoring below this similarity are not used as context.
    pub min_score: Option<f32>,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            default_model: "gpt-4o-mini".to_string(),
            top_k: crate::rag::DEFAULT_TOP_K,
            min_score: None,
        }
    }
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Timeout for LLM requests in seconds.
    pub timeout_seconds: u64,
    /// Base URL of the Gemini API.
    pub gemini_base_url: String,
    /// Base URL of the Anthropic API.
    pub anthropic_base_url: String,
    /// Output token limit for Anthropic answers.
    pub anthropic_max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: crate::openai::DEFAULT_TIMEOUT_SECS,
            gemini_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            anthropic_base_url: "https://api.anthropic.com/v1".to_string(),
            anthropic_max_tokens: 1024,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ChatPyeError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("chatpye")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        Self::expand_path(&self.store.sqlite_path)
    }
}
