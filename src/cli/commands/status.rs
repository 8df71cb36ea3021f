//! Status command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Show the state of a job.
pub async fn run_status(job_id: &str, settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;

    match orchestrator.stores().jobs.find_job(job_id).await? {
        Some(job) => {
            Output::header("Job");
            Output::job(&job);

            let chunks = orchestrator.stores().chunks.find_chunks(job_id).await?;
            if !chunks.is_empty() {
                let embedded = chunks.iter().filter(|c| c.has_embedding()).count();
                Output::kv("Chunks", &format!("{} ({} embedded)", chunks.len(), embedded));
            }
        }
        None => {
            Output::error(&format!("No job with id {}", job_id));
            anyhow::bail!("job not found: {}", job_id);
        }
    }

    Ok(())
}
