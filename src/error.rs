//! Error types for ChatPye.

use thiserror::Error;

/// Library-level error type for ChatPye operations.
#[derive(Error, Debug)]
pub enum ChatPyeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job state conflict: {0}")]
    JobState(String),

    #[error("Video source error: {0}")]
    VideoSource(String),

    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error("Transcript unavailable: {0}")]
    TranscriptUnavailable(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("External tool not found: {0}. Please install it and ensure it's in your PATH.")]
    ToolNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl ChatPyeError {
    /// Errors caused by the caller's request rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ChatPyeError::InvalidInput(_) | ChatPyeError::NotFound(_) | ChatPyeError::JobState(_)
        )
    }

    /// Errors raised by an upstream provider (LLM, embeddings, YouTube).
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            ChatPyeError::Llm(_)
                | ChatPyeError::OpenAI(_)
                | ChatPyeError::Embedding(_)
                | ChatPyeError::VideoSource(_)
                | ChatPyeError::Http(_)
        )
    }
}

/// Result type alias for ChatPye operations.
pub type Result<T> = std::result::Result<T, ChatPyeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ChatPyeError::InvalidInput("x".into()).is_client_error());
        assert!(ChatPyeError::JobState("x".into()).is_client_error());
        assert!(!ChatPyeError::Integrity("x".into()).is_client_error());
        assert!(ChatPyeError::Llm("x".into()).is_upstream_error());
        assert!(!ChatPyeError::Store("x".into()).is_upstream_error());
    }
}
