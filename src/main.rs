//! ChatPye CLI entry point.

use anyhow::Result;
use chatpye::cli::{commands, Cli, Commands};
use chatpye::config::Settings;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("chatpye={}", log_level)),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_ref().map(PathBuf::from);
    let settings = Settings::load_from(config_path.as_ref())?;

    std::fs::create_dir_all(settings.data_dir())?;

    match &cli.command {
        Commands::Serve { host, port } => {
            commands::run_serve(host.clone(), *port, settings).await?;
        }

        Commands::Process { url, owner } => {
            commands::run_process(url, owner, settings).await?;
        }

        Commands::Status { job_id } => {
            commands::run_status(job_id, settings).await?;
        }

        Commands::Ask {
            job_id,
            question,
            model,
            stream,
        } => {
            commands::run_ask(job_id, question, model.clone(), *stream, settings).await?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings, config_path.as_deref())?;
        }

        Commands::Config { action } => {
            commands::run_config(action, settings, config_path)?;
        }
    }

    Ok(())
}
