//! CLI module for ChatPye.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// ChatPye - chat with YouTube videos
///
/// Ingests video transcripts into a searchable store and answers questions about them,
/// grounded in the transcript when one exists and from the video itself otherwise.
#[derive(Parser, Debug)]
#[command(name = "chatpye")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Host to bind to (defaults to server.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (defaults to server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ingest a video in the foreground and report the final job state
    Process {
        /// YouTube URL or video id
        url: String,

        /// Owner of the job
        #[arg(short, long, default_value = "local")]
        owner: String,
    },

    /// Show the state of a job
    Status {
        /// Job id
        job_id: String,
    },

    /// Ask a question about a processed video
    Ask {
        /// Job id returned by `process`
        job_id: String,

        /// The question to ask
        question: String,

        /// LLM model to use (defaults to rag.default_model)
        #[arg(short, long)]
        model: Option<String>,

        /// Print the answer as it is generated
        #[arg(short, long)]
        stream: bool,
    },

    /// Check system requirements and configuration
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
