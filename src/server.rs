//! HTTP adapter over the pipeline.
//!
//! Devices (or test harnesses) push frames and annotations into an
//! in-process store; viewers poll streams and read the rolling window.
//!
//! ```text
//! device ──→ POST /streams/:p/:s/frames ──→ store
//!                                             ↓
//! viewer ←── GET  /streams/:p/:s/poll   ←── aggregator
//! ```

use crate::config::PipelineConfig;
use crate::core::aggregator::{Batch, IngestOutcome, SharedAggregator, StreamAggregator};
use crate::core::cascade::FilteredVector;
use crate::source::{MemoryFrameStore, StreamId};
use crate::telemetry::{PipelineStats, SharedPipelineStats, StatsSnapshot};
use axum::{
    extract::{Path, State},
    http::{HeaderValue, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Filter and presentation parameters
    pub pipeline: PipelineConfig,
    /// Timezone for annotations
    pub timezone: Tz,
}

impl ServerConfig {
    pub fn new(port: u16, pipeline: PipelineConfig, timezone: Tz) -> Self {
        Self {
            port,
            pipeline,
            timezone,
        }
    }
}

/// Shared server state
pub struct ServerState {
    store: Arc<MemoryFrameStore>,
    aggregator: SharedAggregator,
    stats: SharedPipelineStats,
}

impl ServerState {
    pub fn new(config: &ServerConfig) -> Self {
        let store = Arc::new(MemoryFrameStore::new());
        let stats = Arc::new(PipelineStats::new());
        let aggregator = StreamAggregator::new(config.pipeline.settings())
            .with_source(store.clone())
            .with_stats(stats.clone())
            .with_timezone(config.timezone);

        Self {
            store,
            aggregator: Arc::new(aggregator),
            stats,
        }
    }
}

type SharedState = Arc<ServerState>;
type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramesRequest {
    pub frames: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentRequest {
    pub comment: String,
}

/// Response to a push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub status: String,
    /// Length of the stream's list after the push
    pub stored: usize,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub streams: usize,
    #[serde(flatten)]
    pub stats: StatsSnapshot,
}

#[derive(Serialize)]
pub struct WindowResponse {
    pub stream: StreamId,
    pub samples: Vec<FilteredVector>,
}

/// Error response
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

fn error(status: StatusCode, code: &str, message: String) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message,
            code: code.to_string(),
        }),
    )
}

fn unknown_stream(stream: &StreamId) -> ApiError {
    error(
        StatusCode::NOT_FOUND,
        "UNKNOWN_STREAM",
        format!("Stream {stream} has not been polled yet"),
    )
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// GET /stats
async fn stats(State(state): State<SharedState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        streams: state.aggregator.stream_count(),
        stats: state.stats.snapshot(),
    })
}

/// POST /streams/:project/:subject/frames
async fn push_frames(
    State(state): State<SharedState>,
    Path((project, subject)): Path<(String, String)>,
    Json(request): Json<FramesRequest>,
) -> Json<PushResponse> {
    let stream = StreamId::new(project, subject);
    let stored = state.store.push_frames(&stream, request.frames);
    Json(PushResponse {
        status: "ok".to_string(),
        stored,
    })
}

/// POST /streams/:project/:subject/comments
async fn push_comment(
    State(state): State<SharedState>,
    Path((project, subject)): Path<(String, String)>,
    Json(request): Json<CommentRequest>,
) -> Result<Json<PushResponse>, ApiError> {
    if request.comment.trim().is_empty() {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "EMPTY_COMMENT",
            "Comment must not be empty".to_string(),
        ));
    }
    let stream = StreamId::new(project, subject);
    let stored = state.store.push_comment(&stream, request.comment);
    Ok(Json(PushResponse {
        status: "ok".to_string(),
        stored,
    }))
}

/// GET /streams/:project/:subject/poll
///
/// Filtering runs on the blocking pool; it is CPU work proportional to the
/// frames pushed since the last poll.
async fn poll(
    State(state): State<SharedState>,
    Path((project, subject)): Path<(String, String)>,
) -> Result<Json<IngestOutcome>, ApiError> {
    let stream = StreamId::new(project, subject);
    let aggregator = state.aggregator.clone();
    let outcome = tokio::task::spawn_blocking(move || aggregator.poll(&stream))
        .await
        .map_err(|e| {
            tracing::error!("Poll task failed: {}", e);
            error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "POLL_FAILED",
                format!("Poll task failed: {e}"),
            )
        })?;
    Ok(Json(outcome))
}

/// POST /streams/:project/:subject/flush
async fn flush(
    State(state): State<SharedState>,
    Path((project, subject)): Path<(String, String)>,
) -> Result<Json<Batch>, ApiError> {
    let stream = StreamId::new(project, subject);
    state
        .aggregator
        .flush(&stream)
        .map(Json)
        .ok_or_else(|| unknown_stream(&stream))
}

/// GET /streams/:project/:subject/window
async fn window(
    State(state): State<SharedState>,
    Path((project, subject)): Path<(String, String)>,
) -> Result<Json<WindowResponse>, ApiError> {
    let stream = StreamId::new(project, subject);
    let samples = state
        .aggregator
        .window(&stream)
        .ok_or_else(|| unknown_stream(&stream))?;
    Ok(Json(WindowResponse { stream, samples }))
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/streams/:project/:subject/frames", post(push_frames))
        .route("/streams/:project/:subject/comments", post(push_comment))
        .route("/streams/:project/:subject/poll", get(poll))
        .route("/streams/:project/:subject/flush", post(flush))
        .route("/streams/:project/:subject/window", get(window))
        .layer(
            CorsLayer::new()
                .allow_origin([
                    HeaderValue::from_static("http://localhost"),
                    HeaderValue::from_static("http://127.0.0.1"),
                ])
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(config: ServerConfig) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config));
    let app = router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("EEG stream server listening on http://{}", actual_addr);

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    Ok((actual_addr, shutdown_tx))
}
