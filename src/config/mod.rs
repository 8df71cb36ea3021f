//! Configuration module for ChatPye.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{AnalysisPrompts, Prompts, RagPrompts};
pub use settings::{
    ChunkingSettings, EmbeddingSettings, GeneralSettings, IngestionSettings, LlmSettings,
    PromptSettings, RagSettings, ServerSettings, Settings, StoreProvider, StoreSettings,
    YoutubeSettings,
};
