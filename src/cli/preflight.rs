//! Pre-flight checks before expensive operations.
//!
//! Validates that required tools and configuration are available
//! before starting operations that would otherwise fail midway.

use crate::config::Settings;
use crate::error::{ChatPyeError, Result};
use std::process::Command;

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Ingestion needs yt-dlp and an embedding key.
    Process,
    /// Answering needs a key for at least one LLM provider.
    Ask,
    /// The server does both.
    Serve,
}

/// Run pre-flight checks for the given operation.
///
/// Returns Ok(()) if all checks pass, or an error describing what's missing.
pub fn check(operation: Operation, settings: &Settings) -> Result<()> {
    match operation {
        Operation::Process => {
            check_env_key("OPENAI_API_KEY")?;
            check_tool(&settings.youtube.ytdlp_path)?;
        }
        Operation::Ask => {
            check_any_llm_key()?;
        }
        Operation::Serve => {
            check_env_key("OPENAI_API_KEY")?;
            check_tool(&settings.youtube.ytdlp_path)?;
        }
    }
    Ok(())
}

/// Check that an API key environment variable is set and non-empty.
fn check_env_key(name: &str) -> Result<()> {
    match std::env::var(name) {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(ChatPyeError::Config(format!(
            "{} is empty. Set it with: export {}='...'",
            name, name
        ))),
        Err(_) => Err(ChatPyeError::Config(format!(
            "{} not set. Set it with: export {}='...'",
            name, name
        ))),
    }
}

const LLM_KEYS: [&str; 3] = ["OPENAI_API_KEY", "GEMINI_API_KEY", "ANTHROPIC_API_KEY"];

fn check_any_llm_key() -> Result<()> {
    if LLM_KEYS.iter().any(|key| check_env_key(key).is_ok()) {
        return Ok(());
    }
    Err(ChatPyeError::Config(format!(
        "None of {} is set",
        LLM_KEYS.join(", ")
    )))
}

/// Check if an external tool is available.
fn check_tool(name: &str) -> Result<()> {
    match Command::new(name).arg("--version").output() {
        Ok(output) if output.status.success() => Ok(()),
        Ok(_) => Err(ChatPyeError::ToolNotFound(format!(
            "{} is installed but not working correctly",
            name
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ChatPyeError::ToolNotFound(name.to_string()))
        }
        Err(e) => Err(ChatPyeError::ToolNotFound(format!("{}: {}", name, e))),
    }
}
