//! Question answering over ingested videos.
//!
//! A query is answered from cache when possible, otherwise grounded in the most relevant
//! transcript chunks, or directly from the video when the job has no usable chunks.

use super::cache::{normalize_question, AnswerCache};
use super::ranker::RelevanceRanker;
use crate::chunking::validate_chunk_sequence;
use crate::config::Prompts;
use crate::error::{ChatPyeError, Result};
use crate::llm::{AnswerRequest, GroundingContext, LlmProvider, ModelRegistry, TextStream, VideoReference};
use crate::store::{CacheKey, JobStatus, Stores, TranscriptChunk, VideoJob};
use crate::transcript::{parse_video_id, watch_url};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Analysis type for the summary, key topics, and takeaways of a video.
pub const SUMMARY_ANALYSIS: &str = "proactive_summary_topics_takeaways";

/// How an answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerMode {
    /// From ranked transcript chunks.
    Grounded,
    /// From the video itself.
    Direct,
}

/// A chat question.
#[derive(Debug, Clone, Default)]
pub struct ChatQuery {
    pub job_id: Option<String>,
    /// Video id or URL the caller expects the job to belong to.
    pub video_id: Option<String>,
    pub question: String,
    /// Model id; the configured default when absent.
    pub model: Option<String>,
}

impl ChatQuery {
    pub fn for_job(job_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            job_id: Some(job_id.into()),
            question: question.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_video_id(mut self, video_id: impl Into<String>) -> Self {
        self.video_id = Some(video_id.into());
        self
    }
}

/// Everything about an answer except its text.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerMeta {
    pub job_id: Option<String>,
    pub video_id: String,
    pub model: String,
    pub mode: AnswerMode,
    pub cached: bool,
    pub sources: Vec<GroundingContext>,
}

/// A complete answer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub answer: String,
    #[serde(flatten)]
    pub meta: AnswerMeta,
}

/// An answer being generated.
pub struct AnswerStream {
    pub meta: AnswerMeta,
    /// Text fragments. The full text is cached once the stream ends cleanly.
    pub fragments: TextStream,
}

/// Result of a streaming chat request.
pub enum ChatReply {
    /// Served from cache.
    Cached(Answer),
    Streaming(AnswerStream),
}

/// A request resolved down to a provider call.
struct Plan {
    provider: Arc<dyn LlmProvider>,
    request: AnswerRequest,
    meta: AnswerMeta,
    /// Where to cache the answer; `None` when there is no job to key on.
    cache_key: Option<(String, CacheKey)>,
}

enum Prepared {
    Hit(Answer),
    Generate(Plan),
}

/// Answers questions about ingested videos.
#[derive(Clone)]
pub struct QueryPipeline {
    stores: Stores,
    registry: ModelRegistry,
    ranker: RelevanceRanker,
    cache: AnswerCache,
    prompts: Prompts,
    default_model: String,
}

impl QueryPipeline {
    pub fn new(
        stores: Stores,
        registry: ModelRegistry,
        ranker: RelevanceRanker,
        prompts: Prompts,
        default_model: &str,
    ) -> Self {
        let cache = AnswerCache::new(stores.responses.clone());
        Self {
            stores,
            registry,
            ranker,
            cache,
            prompts,
            default_model: default_model.to_string(),
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Answer a question and return the full text.
    #[instrument(skip(self, query), fields(job_id = ?query.job_id))]
    pub async fn ask(&self, query: &ChatQuery) -> Result<Answer> {
        let plan = match self.prepare(query).await? {
            Prepared::Hit(answer) => return Ok(answer),
            Prepared::Generate(plan) => plan,
        };

        let text = plan.provider.generate(&plan.meta.model, &plan.request).await?;

        if let Some((job_id, key)) = &plan.cache_key {
            self.cache.store(job_id, key, &plan.meta.model, &text).await;
        }

        info!("Answered with {} characters ({:?})", text.len(), plan.meta.mode);
        Ok(Answer {
            answer: text,
            meta: plan.meta,
        })
    }

    /// Answer a question as a stream of fragments, or from cache.
    #[instrument(skip(self, query), fields(job_id = ?query.job_id))]
    pub async fn ask_stream(&self, query: &ChatQuery) -> Result<ChatReply> {
        let plan = match self.prepare(query).await? {
            Prepared::Hit(answer) => return Ok(ChatReply::Cached(answer)),
            Prepared::Generate(plan) => plan,
        };

        let fragments = plan
            .provider
            .generate_stream(&plan.meta.model, &plan.request)
            .await?;

        let fragments = match plan.cache_key {
            Some((job_id, key)) => {
                cache_on_completion(fragments, self.cache.clone(), job_id, key, plan.meta.model.clone())
            }
            None => fragments,
        };

        Ok(ChatReply::Streaming(AnswerStream {
            meta: plan.meta,
            fragments,
        }))
    }

    /// Produce (or fetch) a pre-computed analysis of a job's video.
    #[instrument(skip(self))]
    pub async fn analyze(&self, job_id: &str, model: Option<&str>, analysis_type: &str) -> Result<Answer> {
        if analysis_type != SUMMARY_ANALYSIS {
            return Err(ChatPyeError::InvalidInput(format!(
                "Unknown analysis type: {}",
                analysis_type
            )));
        }

        let model = self.model_or_default(model);
        let provider = self.registry.resolve(&model)?;
        let job = self.load_answerable_job(job_id).await?;
        let video_id = job_video_id(&job)?;
        let key = CacheKey::Analysis(analysis_type.to_string());

        let mut meta = AnswerMeta {
            job_id: Some(job.job_id.clone()),
            video_id: video_id.clone(),
            model: model.clone(),
            mode: AnswerMode::Direct,
            cached: false,
            sources: Vec::new(),
        };

        if let Some(hit) = self.cache.lookup(&job.job_id, &key, &model).await {
            meta.cached = true;
            return Ok(Answer {
                answer: hit.response_text,
                meta,
            });
        }

        let chunks = self.load_chunks(&job).await?;
        let instruction = self.prompts.analysis.summary_topics_takeaways.clone();
        let request = if chunks.is_empty() {
            AnswerRequest::direct(instruction, video_reference(&video_id))
        } else {
            meta.mode = AnswerMode::Grounded;
            AnswerRequest::grounded(instruction, chunks.iter().map(grounding).collect())
        };

        let text = provider.generate(&model, &request).await?;
        self.cache.store(&job.job_id, &key, &model, &text).await;

        Ok(Answer { answer: text, meta })
    }

    fn model_or_default(&self, model: Option<&str>) -> String {
        model
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(self.default_model.as_str())
            .to_string()
    }

    async fn prepare(&self, query: &ChatQuery) -> Result<Prepared> {
        let question = query.question.trim();
        if question.is_empty() {
            return Err(ChatPyeError::InvalidInput("Question is required".to_string()));
        }

        let model = self.model_or_default(query.model.as_deref());
        let provider = self.registry.resolve(&model)?;

        let expected_video = query
            .video_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .map(parse_video_id)
            .transpose()?;

        let job = match (&query.job_id, &expected_video) {
            (Some(job_id), _) => Some(self.load_answerable_job(job_id).await?),
            (None, Some(video_id)) => self.stores.jobs.find_latest_completed_job(video_id).await?,
            (None, None) => {
                return Err(ChatPyeError::InvalidInput(
                    "Either jobId or videoId is required".to_string(),
                ))
            }
        };

        let Some(job) = job else {
            // No job for this video: answer from the video itself, uncached.
            let video_id = expected_video.unwrap_or_default();
            debug!("No completed job for video {}, answering directly", video_id);
            return Ok(Prepared::Generate(Plan {
                provider,
                request: AnswerRequest::direct(question, video_reference(&video_id)),
                meta: AnswerMeta {
                    job_id: None,
                    video_id,
                    model,
                    mode: AnswerMode::Direct,
                    cached: false,
                    sources: Vec::new(),
                },
                cache_key: None,
            }));
        };

        let video_id = job_video_id(&job)?;
        if let Some(expected) = &expected_video {
            if expected != &video_id {
                return Err(ChatPyeError::InvalidInput(format!(
                    "Video ID mismatch: job {} belongs to {}, not {}",
                    job.job_id, video_id, expected
                )));
            }
        }

        let key = CacheKey::Question(normalize_question(question));
        let mut meta = AnswerMeta {
            job_id: Some(job.job_id.clone()),
            video_id: video_id.clone(),
            model: model.clone(),
            mode: AnswerMode::Direct,
            cached: false,
            sources: Vec::new(),
        };

        if let Some(hit) = self.cache.lookup(&job.job_id, &key, &model).await {
            meta.cached = true;
            return Ok(Prepared::Hit(Answer {
                answer: hit.response_text,
                meta,
            }));
        }

        let chunks = self.load_chunks(&job).await?;
        // A failed query embedding degrades to a direct answer, which is not cached.
        let (ranked, cacheable) = match self.ranker.rank(question, &chunks).await {
            Ok(ranked) => (ranked, true),
            Err(e) => {
                warn!("Ranking failed for job {}, answering directly: {}", job.job_id, e);
                (Vec::new(), false)
            }
        };

        let request = if ranked.is_empty() {
            AnswerRequest::direct(question, video_reference(&video_id))
        } else {
            let context: Vec<GroundingContext> = ranked.iter().map(|s| grounding(&s.chunk)).collect();
            meta.mode = AnswerMode::Grounded;
            meta.sources = context.clone();
            AnswerRequest::grounded(question, context)
        };

        if !request.source.is_grounded() && !provider.accepts_video() {
            warn!(
                "Model {} cannot watch videos; answering job {} from the URL only",
                model, job.job_id
            );
        }

        Ok(Prepared::Generate(Plan {
            provider,
            request,
            meta,
            cache_key: cacheable.then(|| (job.job_id, key)),
        }))
    }

    /// Load a job that can be asked about: it must exist and have completed.
    async fn load_answerable_job(&self, job_id: &str) -> Result<VideoJob> {
        let job = self
            .stores
            .jobs
            .find_job(job_id)
            .await?
            .ok_or_else(|| ChatPyeError::NotFound(format!("Job {}", job_id)))?;

        match job.status {
            JobStatus::Completed => Ok(job),
            JobStatus::Failed => Err(ChatPyeError::JobState(format!(
                "Job {} failed: {}",
                job.job_id, job.progress
            ))),
            JobStatus::Pending | JobStatus::Processing => Err(ChatPyeError::JobState(format!(
                "Job {} is still {}",
                job.job_id, job.status
            ))),
        }
    }

    /// Load a job's chunks and check they belong to it.
    async fn load_chunks(&self, job: &VideoJob) -> Result<Vec<TranscriptChunk>> {
        let chunks = self.stores.chunks.find_chunks(&job.job_id).await?;
        let video_id = job.video_id.as_deref().unwrap_or_default();

        if let Some(bad) = chunks
            .iter()
            .find(|c| c.video_id != video_id || c.owner_id != job.owner_id)
        {
            return Err(ChatPyeError::Integrity(format!(
                "Chunk {}/{} belongs to video {} of owner {}, but job is for video {} of owner {}",
                bad.job_id, bad.chunk_id, bad.video_id, bad.owner_id, video_id, job.owner_id
            )));
        }
        validate_chunk_sequence(&chunks)?;

        debug!("Loaded {} chunks for job {}", chunks.len(), job.job_id);
        Ok(chunks)
    }
}

fn job_video_id(job: &VideoJob) -> Result<String> {
    job.video_id.clone().ok_or_else(|| {
        ChatPyeError::Integrity(format!("Completed job {} has no video id", job.job_id))
    })
}

fn video_reference(video_id: &str) -> VideoReference {
    VideoReference {
        video_id: video_id.to_string(),
        url: watch_url(video_id),
    }
}

fn grounding(chunk: &TranscriptChunk) -> GroundingContext {
    GroundingContext {
        text: chunk.text_content.clone(),
        start_seconds: chunk.start_seconds,
        end_seconds: chunk.end_seconds,
    }
}

/// Forward fragments while accumulating them, and cache the full text once the
/// producer ends without error. Dropping the stream early cancels generation and
/// skips the write.
fn cache_on_completion(
    mut fragments: TextStream,
    cache: AnswerCache,
    job_id: String,
    key: CacheKey,
    model: String,
) -> TextStream {
    async_stream::stream! {
        let mut full = String::new();
        while let Some(item) = fragments.next().await {
            match item {
                Ok(text) => {
                    full.push_str(&text);
                    yield Ok(text);
                }
                Err(e) => {
                    warn!("Answer stream failed for job {}: {}", job_id, e);
                    yield Err(e);
                    return;
                }
            }
        }

        if full.trim().is_empty() {
            warn!("Answer stream for job {} produced no text", job_id);
            return;
        }
        cache.store(&job_id, &key, &model, &full).await;
        debug!("Cached streamed answer for job {}", job_id);
    }
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TranscriptStatus;
    use crate::testing::{completed_job, stored_chunk, KeywordEmbedder, ScriptedProvider};
    use futures::TryStreamExt;

    struct Fixture {
        stores: Stores,
        provider: Arc<ScriptedProvider>,
        pipeline: QueryPipeline,
    }

    fn fixture() -> Fixture {
        let stores = Stores::in_memory();
        let provider = Arc::new(ScriptedProvider::new("gpt-", "Ownership means one owner."));
        let registry = ModelRegistry::new().with_provider(provider.clone());
        let ranker = RelevanceRanker::new(Arc::new(KeywordEmbedder::new()));
        let pipeline = QueryPipeline::new(
            stores.clone(),
            registry,
            ranker,
            Prompts::default(),
            "gpt-4o-mini",
        );
        Fixture {
            stores,
            provider,
            pipeline,
        }
    }

    async fn job_with_chunks(stores: &Stores, video_id: &str, texts: &[&str]) -> VideoJob {
        let job = completed_job(stores, "owner", video_id, TranscriptStatus::Found).await;
        let embedder = KeywordEmbedder::new();
        let mut chunks = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let mut chunk = stored_chunk(&job, i as u32, text, i as f64 * 10.0, i as f64 * 10.0 + 10.0);
            chunk.embedding = crate::embedding::Embedder::embed(&embedder, text).await.unwrap();
            chunks.push(chunk);
        }
        stores.chunks.insert_chunks(&chunks).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_grounded_answer_is_cached_by_normalized_question() {
        let f = fixture();
        let job = job_with_chunks(
            &f.stores,
            "dQw4w9WgXcQ",
            &["rust ownership rules", "cooking pasta at home", "the borrow checker"],
        )
        .await;

        let first = f
            .pipeline
            .ask(&ChatQuery::for_job(&job.job_id, "What are the Rust ownership rules?"))
            .await
            .unwrap();
        assert_eq!(first.meta.mode, AnswerMode::Grounded);
        assert!(!first.meta.cached);
        assert_eq!(first.meta.sources[0].text, "rust ownership rules");
        assert!(f.provider.last_request().unwrap().source.is_grounded());

        let second = f
            .pipeline
            .ask(&ChatQuery::for_job(&job.job_id, "  what are the RUST ownership   rules? "))
            .await
            .unwrap();
        assert!(second.meta.cached);
        assert_eq!(second.answer, first.answer);
        assert_eq!(f.provider.calls(), 1);

        // A different model is a different cache entry.
        f.pipeline
            .ask(&ChatQuery::for_job(&job.job_id, "What are the Rust ownership rules?").with_model("gpt-4o"))
            .await
            .unwrap();
        assert_eq!(f.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_query_embedding_failure_answers_directly_uncached() {
        let f = fixture();
        let job = job_with_chunks(&f.stores, "dQw4w9WgXcQ", &["rust ownership rules"]).await;
        let query = ChatQuery::for_job(&job.job_id, "FAIL_EMBED what about ownership?");

        let answer = f.pipeline.ask(&query).await.unwrap();
        assert_eq!(answer.meta.mode, AnswerMode::Direct);
        assert!(answer.meta.sources.is_empty());
        assert!(!f.provider.last_request().unwrap().source.is_grounded());

        let again = f.pipeline.ask(&query).await.unwrap();
        assert!(!again.meta.cached);
        assert_eq!(f.provider.calls(), 2);
    }

    #[tokio::test]
    async fn test_job_without_transcript_uses_direct_mode() {
        let f = fixture();
        let job = completed_job(&f.stores, "owner", "dQw4w9WgXcQ", TranscriptStatus::NotFound).await;

        let answer = f
            .pipeline
            .ask(&ChatQuery::for_job(&job.job_id, "What is this video about?"))
            .await
            .unwrap();
        assert_eq!(answer.meta.mode, AnswerMode::Direct);
        assert!(answer.meta.sources.is_empty());

        let request = f.provider.last_request().unwrap();
        match request.source {
            crate::llm::AnswerSource::Video(video) => {
                assert_eq!(video.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            }
            other => panic!("expected direct mode, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejects_unusable_jobs_and_bad_input() {
        let f = fixture();

        let missing = f.pipeline.ask(&ChatQuery::for_job("nope", "hi")).await.unwrap_err();
        assert!(matches!(missing, ChatPyeError::NotFound(_)));

        let pending = VideoJob::new("https://youtu.be/dQw4w9WgXcQ", "owner");
        f.stores.jobs.insert_job(&pending).await.unwrap();
        let err = f.pipeline.ask(&ChatQuery::for_job(&pending.job_id, "hi")).await.unwrap_err();
        assert!(matches!(err, ChatPyeError::JobState(_)));

        let job = completed_job(&f.stores, "owner", "dQw4w9WgXcQ", TranscriptStatus::NotFound).await;
        let err = f.pipeline.ask(&ChatQuery::for_job(&job.job_id, "   ")).await.unwrap_err();
        assert!(matches!(err, ChatPyeError::InvalidInput(_)));

        let err = f
            .pipeline
            .ask(&ChatQuery::for_job(&job.job_id, "hi").with_model("llama-3"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatPyeError::InvalidInput(_)));

        let err = f
            .pipeline
            .ask(&ChatQuery::for_job(&job.job_id, "hi").with_video_id("aaaaaaaaaaa"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Video ID mismatch"));
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_foreign_chunk_is_integrity_error() {
        let f = fixture();
        let job = job_with_chunks(&f.stores, "dQw4w9WgXcQ", &["rust ownership"]).await;

        let mut foreign = stored_chunk(&job, 5, "rust lifetime", 50.0, 60.0);
        foreign.video_id = "bbbbbbbbbbb".to_string();
        f.stores.chunks.insert_chunks(&[foreign]).await.unwrap();

        let err = f
            .pipeline
            .ask(&ChatQuery::for_job(&job.job_id, "rust ownership?"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatPyeError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_video_id_resolves_latest_job_or_goes_direct() {
        let f = fixture();
        let job = job_with_chunks(&f.stores, "dQw4w9WgXcQ", &["rust ownership rules"]).await;

        let query = ChatQuery {
            video_id: Some("https://youtu.be/dQw4w9WgXcQ".to_string()),
            question: "rust ownership?".to_string(),
            ..Default::default()
        };
        let answer = f.pipeline.ask(&query).await.unwrap();
        assert_eq!(answer.meta.job_id.as_deref(), Some(job.job_id.as_str()));
        assert_eq!(answer.meta.mode, AnswerMode::Grounded);

        let unknown = ChatQuery {
            video_id: Some("ccccccccccc".to_string()),
            question: "rust ownership?".to_string(),
            ..Default::default()
        };
        let answer = f.pipeline.ask(&unknown).await.unwrap();
        assert_eq!(answer.meta.job_id, None);
        assert_eq!(answer.meta.mode, AnswerMode::Direct);

        // Jobless answers are not cached.
        f.pipeline.ask(&unknown).await.unwrap();
        assert_eq!(f.provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_stream_caches_after_clean_completion() {
        let f = fixture();
        let job = completed_job(&f.stores, "owner", "dQw4w9WgXcQ", TranscriptStatus::NotFound).await;
        let query = ChatQuery::for_job(&job.job_id, "Summarize please");

        let ChatReply::Streaming(stream) = f.pipeline.ask_stream(&query).await.unwrap() else {
            panic!("expected a fresh stream");
        };
        let fragments: Vec<String> = stream.fragments.try_collect().await.unwrap();
        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), "Ownership means one owner.");

        match f.pipeline.ask_stream(&query).await.unwrap() {
            ChatReply::Cached(answer) => {
                assert!(answer.meta.cached);
                assert_eq!(answer.answer, "Ownership means one owner.");
            }
            ChatReply::Streaming(_) => panic!("expected a cache hit"),
        }
        assert_eq!(f.provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_stream_not_cached_when_dropped_or_failed() {
        let f = fixture();
        let job = completed_job(&f.stores, "owner", "dQw4w9WgXcQ", TranscriptStatus::NotFound).await;
        let query = ChatQuery::for_job(&job.job_id, "Summarize please");

        let ChatReply::Streaming(mut stream) = f.pipeline.ask_stream(&query).await.unwrap() else {
            panic!("expected a fresh stream");
        };
        let first = stream.fragments.next().await.unwrap().unwrap();
        assert!(!first.is_empty());
        drop(stream);

        f.provider.fail_streams_after(1);
        let ChatReply::Streaming(stream) = f.pipeline.ask_stream(&query).await.unwrap() else {
            panic!("partial answers must not be cached");
        };
        let result: Result<Vec<String>> = stream.fragments.try_collect().await;
        assert!(result.is_err());

        let key = CacheKey::Question(normalize_question("Summarize please"));
        let cached = f
            .stores
            .responses
            .find_cached_response(&job.job_id, &key, "gpt-4o-mini")
            .await
            .unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_analysis_is_cached_separately_from_questions() {
        let f = fixture();
        let job = job_with_chunks(&f.stores, "dQw4w9WgXcQ", &["rust ownership rules"]).await;

        let analysis = f.pipeline.analyze(&job.job_id, None, SUMMARY_ANALYSIS).await.unwrap();
        assert_eq!(analysis.meta.mode, AnswerMode::Grounded);
        let again = f.pipeline.analyze(&job.job_id, None, SUMMARY_ANALYSIS).await.unwrap();
        assert!(again.meta.cached);
        assert_eq!(f.provider.calls(), 1);

        let err = f.pipeline.analyze(&job.job_id, None, "haiku").await.unwrap_err();
        assert!(matches!(err, ChatPyeError::InvalidInput(_)));

        let question = f
            .pipeline
            .ask(&ChatQuery::for_job(&job.job_id, SUMMARY_ANALYSIS))
            .await
            .unwrap();
        assert!(!question.meta.cached);
    }
}
