use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;
use watchpost_common::multipart::CONTENT_TYPE;
use watchpost_pipeline::{LifecycleManager, LifecycleState};

use crate::stream::StreamPublisher;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<LifecycleManager>,
    pub publisher: Arc<StreamPublisher>,
}

#[derive(Debug, Serialize)]
pub struct Status {
    state: LifecycleState,
    camera_id: Option<u64>,
    running_workers: usize,
    viewers: usize,
    raw_dropped: u64,
    results_dropped: u64,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(stream))
        .route("/stream", get(stream))
        .route("/status", get(status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET / and /stream: live MJPEG. Starts the pipeline if it is not running.
async fn stream(State(state): State<AppState>) -> Response {
    if let Err(e) = state.lifecycle.start().await {
        // Viewer still gets the placeholder; the next connect retries.
        warn!(error = %e, "could not start pipeline for viewer");
    }
    let body = Body::from_stream(state.publisher.subscribe());
    (
        [
            (header::CONTENT_TYPE, CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// GET /status
async fn status(State(state): State<AppState>) -> Json<Status> {
    Json(Status {
        state: state.lifecycle.state(),
        camera_id: state.lifecycle.camera_id().await,
        running_workers: state.lifecycle.running_workers().await,
        viewers: state.publisher.viewers(),
        raw_dropped: state.lifecycle.raw().dropped(),
        results_dropped: state.lifecycle.results().dropped(),
    })
}
