//! Doctor command - verify system requirements and configuration.

use crate::cli::Output;
use crate::config::{Settings, StoreProvider};
use console::style;
use std::path::Path;
use std::process::Command;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
///
/// Returns an error when any check fails so the process exits non-zero.
pub fn run_doctor(settings: &Settings, config_path: Option<&Path>) -> anyhow::Result<()> {
    Output::header("ChatPye Doctor");
    println!();
    println!("Checking system requirements and configuration...\n");

    let mut checks = Vec::new();

    let mut section = |title: &str, results: Vec<CheckResult>| {
        println!("{}", style(title).bold());
        for check in &results {
            check.print();
        }
        println!();
        checks.extend(results);
    };

    section(
        "External Tools",
        vec![check_tool(&settings.youtube.ytdlp_path, install_hint_ytdlp())],
    );

    section(
        "API Configuration",
        vec![
            check_api_key(std::env::var("OPENAI_API_KEY").ok(), "OPENAI_API_KEY", true),
            check_api_key(std::env::var("GEMINI_API_KEY").ok(), "GEMINI_API_KEY", false),
            check_api_key(std::env::var("ANTHROPIC_API_KEY").ok(), "ANTHROPIC_API_KEY", false),
            check_youtube_key(settings),
        ],
    );

    section("Storage", check_storage(settings));

    section("Configuration", vec![check_config_file(config_path)]);

    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before using ChatPye.",
            errors
        ));
        anyhow::bail!("{} doctor check(s) failed", errors);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! ChatPye is ready to use.");
    }

    Ok(())
}

/// Check if an external tool is available.
fn check_tool(name: &str, hint: &str) -> CheckResult {
    match Command::new(name).arg("--version").output() {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout)
                .lines()
                .next()
                .unwrap_or("installed")
                .trim()
                .chars()
                .take(50)
                .collect::<String>();
            CheckResult::ok(name, &version)
        }
        Ok(_) => CheckResult::error(name, "installed but not working", hint),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CheckResult::error(name, "not found", hint),
        Err(e) => CheckResult::error(name, &format!("error: {}", e), hint),
    }
}

/// Check an API key value. Missing required keys are errors, missing optional ones warnings.
fn check_api_key(value: Option<String>, name: &str, required: bool) -> CheckResult {
    let hint = format!("Set with: export {}='...'", name);
    match value {
        Some(key) if key.chars().count() > 12 => {
            let head: String = key.chars().take(4).collect();
            let tail: String = key.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
            CheckResult::ok(name, &format!("configured ({}...{})", head, tail))
        }
        Some(key) if !key.is_empty() => CheckResult::warning(name, "set but looks too short", &hint),
        _ if required => CheckResult::error(name, "not set", &hint),
        _ => CheckResult::warning(name, "not set (models from this provider are unavailable)", &hint),
    }
}

fn check_youtube_key(settings: &Settings) -> CheckResult {
    if settings.youtube.resolved_api_key().is_some() {
        CheckResult::ok("YouTube Data API", "configured")
    } else {
        CheckResult::warning(
            "YouTube Data API",
            "not configured, metadata comes from yt-dlp",
            "Set youtube.api_key or export YOUTUBE_API_KEY='...'",
        )
    }
}

fn check_storage(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok("Data directory", &data_dir.display().to_string()));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    match settings.store.provider {
        StoreProvider::Memory => results.push(CheckResult::warning(
            "Store",
            "in-memory, jobs are lost on exit",
            "Set store.provider = \"sqlite\" to persist jobs",
        )),
        StoreProvider::Sqlite => {
            let db_path = settings.sqlite_path();
            if db_path.exists() {
                let size = std::fs::metadata(&db_path)
                    .map(|m| format_size(m.len()))
                    .unwrap_or_else(|_| "unknown size".to_string());
                results.push(CheckResult::ok(
                    "Database",
                    &format!("{} ({})", db_path.display(), size),
                ));
            } else {
                results.push(CheckResult::warning(
                    "Database",
                    &format!("{} (not created yet)", db_path.display()),
                    "Database will be created on first use",
                ));
            }
        }
    }

    results
}

fn check_config_file(config_path: Option<&Path>) -> CheckResult {
    let default_path = Settings::default_config_path();
    let path = config_path.unwrap_or(&default_path);
    if path.exists() {
        CheckResult::ok("Config file", &path.display().to_string())
    } else {
        CheckResult::warning("Config file", "using defaults", "Create with: chatpye config edit")
    }
}

/// Format file size in human-readable format.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Platform-specific install hint for yt-dlp.
fn install_hint_ytdlp() -> &'static str {
    if cfg!(target_os = "macos") {
        "Install with: brew install yt-dlp"
    } else if cfg!(target_os = "linux") {
        "Install with: pip install yt-dlp (or your package manager)"
    } else {
        "Install from: https://github.com/yt-dlp/yt-dlp"
    }
}
