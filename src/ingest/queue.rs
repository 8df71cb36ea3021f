//! Background execution of ingestion jobs.

use super::IngestionPipeline;
use crate::error::{ChatPyeError, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Default number of jobs processed at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 2;

/// Hands job ids to a background worker that runs them with bounded concurrency.
#[derive(Clone)]
pub struct JobQueue {
    sender: mpsc::UnboundedSender<String>,
}

impl JobQueue {
    /// Spawn the worker. It runs until every `JobQueue` handle is dropped.
    pub fn start(pipeline: Arc<IngestionPipeline>, max_concurrent: usize) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel::<String>();
        let max_concurrent = max_concurrent.max(1);

        let worker = tokio::spawn(async move {
            let jobs = futures::stream::unfold(receiver, |mut rx| async move {
                rx.recv().await.map(|job_id| (job_id, rx))
            });

            jobs.for_each_concurrent(max_concurrent, |job_id| {
                let pipeline = pipeline.clone();
                async move {
                    match pipeline.run(&job_id).await {
                        Ok(job) => info!("Job {} finished as {}", job_id, job.status),
                        Err(e) => error!("Job {} aborted: {}", job_id, e),
                    }
                }
            })
            .await;
        });

        (Self { sender }, worker)
    }

    /// Queue a job for processing.
    pub fn enqueue(&self, job_id: &str) -> Result<()> {
        self.sender
            .send(job_id.to_string())
            .map_err(|_| ChatPyeError::Store("Job queue is closed".to_string()))
    }

    /// Re-queue jobs left `pending` or `processing` by a previous run.
    pub async fn recover(&self, pipeline: &IngestionPipeline) -> Result<usize> {
        let unfinished = pipeline.stores().jobs.find_unfinished_jobs().await?;
        for job in &unfinished {
            self.enqueue(&job.job_id)?;
        }
        if !unfinished.is_empty() {
            info!("Re-queued {} unfinished jobs", unfinished.len());
        }
        Ok(unfinished.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JobStatus, Stores, TranscriptStatus, VideoJob};
    use crate::testing::{KeywordEmbedder, ScriptedSource, ScriptedVideo};
    use crate::transcript::TranscriptSegment;
    use std::time::Duration;

    async fn wait_for_completion(stores: &Stores, job_id: &str) -> VideoJob {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = stores.jobs.find_job(job_id).await.unwrap().unwrap();
                if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
                    return job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    fn pipeline() -> Arc<IngestionPipeline> {
        let source = ScriptedSource::new()
            .with_video(
                "dQw4w9WgXcQ",
                ScriptedVideo::Transcript(vec![TranscriptSegment::new("rust ownership", 0.0, 4.0)]),
            )
            .with_video("aaaaaaaaaaa", ScriptedVideo::TranscriptError);
        Arc::new(IngestionPipeline::new(
            Stores::in_memory(),
            Arc::new(source),
            Arc::new(KeywordEmbedder::new()),
        ))
    }

    #[tokio::test]
    async fn test_queued_jobs_complete() {
        let pipeline = pipeline();
        let (queue, _worker) = JobQueue::start(pipeline.clone(), 2);

        let a = pipeline.submit("dQw4w9WgXcQ", "owner").await.unwrap();
        let b = pipeline.submit("https://youtu.be/aaaaaaaaaaa", "owner").await.unwrap();
        tokio_test::assert_ok!(queue.enqueue(&a.job_id));
        tokio_test::assert_ok!(queue.enqueue(&b.job_id));

        let a = wait_for_completion(pipeline.stores(), &a.job_id).await;
        let b = wait_for_completion(pipeline.stores(), &b.job_id).await;
        assert_eq!(a.transcript_status, TranscriptStatus::Found);
        assert_eq!(b.status, JobStatus::Completed);
        assert_eq!(b.transcript_status, TranscriptStatus::NotFound);
    }

    #[tokio::test]
    async fn test_recover_requeues_unfinished_jobs() {
        let pipeline = pipeline();
        let pending = pipeline.submit("dQw4w9WgXcQ", "owner").await.unwrap();

        let (queue, _worker) = JobQueue::start(pipeline.clone(), 1);
        assert_eq!(queue.recover(&pipeline).await.unwrap(), 1);

        let job = wait_for_completion(pipeline.stores(), &pending.job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(queue.recover(&pipeline).await.unwrap(), 0);
    }
}
