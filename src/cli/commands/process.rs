//! Process command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use crate::store::{JobStatus, TranscriptStatus};
use anyhow::Result;
use std::time::Duration;

/// Ingest a video in the foreground, showing job progress as it changes.
pub async fn run_process(url: &str, owner: &str, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Process, &settings) {
        Output::error(&format!("{}", e));
        Output::info("Run 'chatpye doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings)?;
    let pipeline = orchestrator.ingestion();

    let job = pipeline.submit(url, owner).await?;
    Output::info(&format!("Processing {} (job {})", url, job.job_id));

    let spinner = Output::spinner(&job.progress);
    let runner = {
        let pipeline = pipeline.clone();
        let job_id = job.job_id.clone();
        tokio::spawn(async move { pipeline.run(&job_id).await })
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    while !runner.is_finished() {
        ticker.tick().await;
        if let Ok(Some(current)) = orchestrator.stores().jobs.find_job(&job.job_id).await {
            spinner.set_message(current.progress);
        }
    }
    spinner.finish_and_clear();

    let job = runner.await??;
    Output::job(&job);
    println!();

    match (job.status, job.transcript_status) {
        (JobStatus::Completed, TranscriptStatus::Found) => {
            Output::success("Ready. Answers will be grounded in the transcript.");
        }
        (JobStatus::Completed, _) => {
            Output::warning("Ready without a transcript. Answers will come from the video directly.");
        }
        _ => {
            Output::error("Processing failed.");
            anyhow::bail!("job {} failed: {}", job.job_id, job.progress);
        }
    }

    Ok(())
}
