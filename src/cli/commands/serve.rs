//! HTTP API server.
//!
//! Video processing is queued and polled through `/video/status`; `/chat` answers either
//! as JSON or, with `stream: true`, as server-sent events.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::ChatPyeError;
use crate::ingest::{IngestionPipeline, JobQueue};
use crate::orchestrator::Orchestrator;
use crate::rag::{Answer, ChatQuery, ChatReply, QueryPipeline, SUMMARY_ANALYSIS};
use crate::store::{Stores, VideoJob};
use crate::transcript::{parse_video_id, TranscriptSource, VideoMetadata};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Shared application state.
pub struct AppState {
    stores: Stores,
    source: Arc<dyn TranscriptSource>,
    ingestion: Arc<IngestionPipeline>,
    queue: JobQueue,
    query: QueryPipeline,
}

impl AppState {
    pub fn new(orchestrator: &Orchestrator, queue: JobQueue) -> Self {
        Self {
            stores: orchestrator.stores().clone(),
            source: orchestrator.source(),
            ingestion: orchestrator.ingestion(),
            queue,
            query: orchestrator.query().clone(),
        }
    }
}

/// Run the HTTP API server.
pub async fn run_serve(host: Option<String>, port: Option<u16>, settings: Settings) -> anyhow::Result<()> {
    if let Err(e) = preflight::check(Operation::Serve, &settings) {
        Output::warning(&format!("{}", e));
        Output::info("Run 'chatpye doctor' for detailed diagnostics.");
    }

    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);

    let orchestrator = Orchestrator::new(settings)?;
    let (queue, _worker) = orchestrator.start_queue().await?;
    let state = Arc::new(AppState::new(&orchestrator, queue));

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("ChatPye API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Process video", "POST /video/process");
    Output::kv("Job status", "GET  /video/status/{job_id}");
    Output::kv("Resolve job", "GET  /video/resolve-job");
    Output::kv("Video info", "GET  /video/info");
    Output::kv("Analysis", "POST /video/analysis");
    Output::kv("Chat", "POST /chat");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/video/process", post(process_video))
        .route("/video/status/{job_id}", get(job_status))
        .route("/video/resolve-job", get(resolve_job))
        .route("/video/info", get(video_info))
        .route("/video/analysis", post(video_analysis))
        .route("/chat", post(chat))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// === Request/Response Types ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProcessRequest {
    url: String,
    owner_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProcessResponse {
    job_id: String,
    status: String,
}

/// Identifies a video either by id or by URL.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoParams {
    video_id: Option<String>,
    youtube_url: Option<String>,
}

impl VideoParams {
    fn resolve(&self) -> Result<String, ApiError> {
        let input = self
            .video_id
            .as_deref()
            .or(self.youtube_url.as_deref())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                ChatPyeError::InvalidInput("videoId or youtubeUrl is required".to_string())
            })?;
        Ok(parse_video_id(input)?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    job_id: Option<String>,
    video_id: Option<String>,
    question: String,
    model_id: Option<String>,
    #[serde(default)]
    stream: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisRequest {
    job_id: String,
    model_id: Option<String>,
    analysis_type: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Maps library errors onto HTTP status codes.
struct ApiError(ChatPyeError);

impl From<ChatPyeError> for ApiError {
    fn from(e: ChatPyeError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if self.0.is_client_error() {
            warn!("Request rejected: {}", self.0);
        } else {
            error!("Request failed: {}", self.0);
        }
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

fn status_for(error: &ChatPyeError) -> StatusCode {
    match error {
        ChatPyeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        ChatPyeError::NotFound(_) | ChatPyeError::VideoNotFound(_) => StatusCode::NOT_FOUND,
        ChatPyeError::JobState(_) => StatusCode::CONFLICT,
        e if e.is_upstream_error() => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn process_video(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let job = state.ingestion.submit(&req.url, &req.owner_id).await?;
    state.queue.enqueue(&job.job_id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ProcessResponse {
            job_id: job.job_id,
            status: job.status.to_string(),
        }),
    ))
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Result<Json<VideoJob>, ApiError> {
    let job = state
        .stores
        .jobs
        .find_job(&job_id)
        .await?
        .ok_or_else(|| ChatPyeError::NotFound(format!("Job {}", job_id)))?;
    Ok(Json(job))
}

async fn resolve_job(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VideoParams>,
) -> Result<Json<VideoJob>, ApiError> {
    let video_id = params.resolve()?;
    let job = state
        .stores
        .jobs
        .find_latest_completed_job(&video_id)
        .await?
        .ok_or_else(|| ChatPyeError::NotFound(format!("No completed job for video {}", video_id)))?;
    Ok(Json(job))
}

async fn video_info(
    State(state): State<Arc<AppState>>,
    Query(params): Query<VideoParams>,
) -> Result<Json<VideoMetadata>, ApiError> {
    let video_id = params.resolve()?;
    Ok(Json(state.source.fetch_metadata(&video_id).await?))
}

async fn video_analysis(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnalysisRequest>,
) -> Result<Json<Answer>, ApiError> {
    let analysis_type = req.analysis_type.as_deref().unwrap_or(SUMMARY_ANALYSIS);
    let answer = state
        .query
        .analyze(&req.job_id, req.model_id.as_deref(), analysis_type)
        .await?;
    Ok(Json(answer))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    let query = ChatQuery {
        job_id: req.job_id.filter(|j| !j.trim().is_empty()),
        video_id: req.video_id,
        question: req.question,
        model: req.model_id,
    };

    if !req.stream {
        let answer = state.query.ask(&query).await?;
        return Ok(Json(answer).into_response());
    }

    let stream = match state.query.ask_stream(&query).await? {
        ChatReply::Cached(answer) => return Ok(Json(answer).into_response()),
        ChatReply::Streaming(stream) => stream,
    };

    let meta = stream.meta;
    let mut fragments = stream.fragments;
    let events = async_stream::stream! {
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Ok(text) => {
                    let data = serde_json::json!({ "text": text }).to_string();
                    yield Ok::<_, Infallible>(Event::default().event("token").data(data));
                }
                Err(e) => {
                    error!("Answer stream failed: {}", e);
                    let data = serde_json::json!({ "error": e.to_string() }).to_string();
                    yield Ok(Event::default().event("error").data(data));
                    return;
                }
            }
        }
        let data = serde_json::to_string(&meta).unwrap_or_else(|_| "{}".to_string());
        yield Ok(Event::default().event("done").data(data));
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::default()).into_response())
}
