//! CLI output formatting utilities.

use crate::rag::AnswerMeta;
use crate::store::{format_seconds, VideoJob};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print the state of a job.
    pub fn job(job: &VideoJob) {
        Output::kv("Job", &job.job_id);
        Output::kv("Status", &style(job.status.to_string()).bold().to_string());
        Output::kv("Transcript", &job.transcript_status.to_string());
        if let Some(title) = &job.title {
            Output::kv("Title", title);
        }
        if let Some(video_id) = &job.video_id {
            Output::kv("Video", video_id);
        }
        if let Some(cloned_from) = &job.cloned_from {
            Output::kv("Reused from", cloned_from);
        }
        Output::kv("Progress", &job.progress);
        Output::kv("Updated", &job.updated_at.to_rfc3339());
    }

    /// Print where an answer came from.
    pub fn answer_meta(meta: &AnswerMeta) {
        let mode = format!("{:?}", meta.mode).to_lowercase();
        let cached = if meta.cached { ", cached" } else { "" };
        println!(
            "{}",
            style(format!("[{} via {}{}]", mode, meta.model, cached)).dim()
        );

        if !meta.sources.is_empty() {
            Output::header("Sources");
            for source in &meta.sources {
                println!(
                    "  {} {} {}",
                    style("*").cyan(),
                    style(format!(
                        "[{} - {}]",
                        format_seconds(source.start_seconds),
                        format_seconds(source.end_seconds)
                    ))
                    .cyan(),
                    content_preview(&source.text, 100)
                );
            }
        }
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Truncate content with ellipsis.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    if content.chars().count() <= max_chars {
        content
    } else {
        let truncated: String = content.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}
