use std::{path::PathBuf, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::{
    axum_http::{error_responses::AppError, internal_auth::authorize_bearer},
    recording_engine::{engine::RecordingEngine, finalization::FinalizationOutcome},
};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT_WORKER/internal/v1/recordings/$STREAM_ID/start" \
//     -H "Authorization: Bearer $INTERNAL_API_TOKEN" \
//     -H "Content-Type: application/json" \
//     -d '{"quality":"best"}'
//
//   curl -X POST "http://localhost:$SERVER_PORT_WORKER/internal/v1/recordings/$STREAM_ID/stream-ended" \
//     -H "Authorization: Bearer $INTERNAL_API_TOKEN"

#[derive(Clone)]
pub struct RecordingsRouteState {
    token: Option<Arc<str>>,
    engine: Arc<RecordingEngine>,
}

pub fn routes(token: Option<String>, engine: Arc<RecordingEngine>) -> Router {
    Router::new()
        .route("/", get(active_recordings))
        .route("/:stream_id/start", post(start_recording))
        .route("/:stream_id/stop", post(stop_recording))
        .route("/:stream_id/stream-ended", post(stream_ended))
        .with_state(RecordingsRouteState {
            token: token.map(Arc::from),
            engine,
        })
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRecordingRequest {
    pub quality: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StopRecordingResponse {
    pub recording_id: Uuid,
    pub recording_path: PathBuf,
    pub size_bytes: u64,
    pub skipped_segments: Vec<PathBuf>,
    pub task_ids: Vec<Uuid>,
}

impl From<FinalizationOutcome> for StopRecordingResponse {
    fn from(outcome: FinalizationOutcome) -> Self {
        Self {
            recording_id: outcome.recording_id,
            recording_path: outcome.recording_path,
            size_bytes: outcome.size_bytes,
            skipped_segments: outcome.skipped_segments,
            task_ids: outcome.task_ids,
        }
    }
}

pub async fn active_recordings(
    State(state): State<RecordingsRouteState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    authorize_bearer(&headers, state.token.as_deref())?;
    Ok(Json(state.engine.active_recordings().await).into_response())
}

pub async fn start_recording(
    State(state): State<RecordingsRouteState>,
    headers: HeaderMap,
    Path(stream_id): Path<Uuid>,
    payload: Option<Json<StartRecordingRequest>>,
) -> Result<Response, AppError> {
    authorize_bearer(&headers, state.token.as_deref())?;

    let Json(request) = payload.unwrap_or_default();
    info!(stream_id = %stream_id, "recordings router: start requested");
    let started = state
        .engine
        .start_recording(stream_id, request.quality)
        .await?;

    Ok((StatusCode::CREATED, Json(started)).into_response())
}

pub async fn stop_recording(
    State(state): State<RecordingsRouteState>,
    headers: HeaderMap,
    Path(stream_id): Path<Uuid>,
) -> Result<Response, AppError> {
    authorize_bearer(&headers, state.token.as_deref())?;

    info!(stream_id = %stream_id, "recordings router: stop requested");
    let outcome = state.engine.stop_recording(stream_id).await?;
    Ok(finalized_response(outcome))
}

/// Called by the stream watcher once a stream goes offline.
pub async fn stream_ended(
    State(state): State<RecordingsRouteState>,
    headers: HeaderMap,
    Path(stream_id): Path<Uuid>,
) -> Result<Response, AppError> {
    authorize_bearer(&headers, state.token.as_deref())?;

    info!(stream_id = %stream_id, "recordings router: stream ended");
    let outcome = state.engine.stream_ended(stream_id).await?;
    Ok(finalized_response(outcome))
}

// Ending a recording twice is not an error; the repeat has nothing to report.
fn finalized_response(outcome: Option<FinalizationOutcome>) -> Response {
    match outcome {
        Some(outcome) => Json(StopRecordingResponse::from(outcome)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}
