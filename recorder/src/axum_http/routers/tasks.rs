use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use crates::domain::value_objects::enums::task_types::TaskType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::{
    axum_http::{error_responses::AppError, internal_auth::authorize_bearer},
    task_queue::{queue::BackgroundTaskQueue, tasks::CompletionOutcome},
};

// Run example
//   curl -X POST "http://localhost:$SERVER_PORT_WORKER/internal/v1/tasks/$TASK_ID/complete" \
//     -H "Authorization: Bearer $INTERNAL_API_TOKEN" \
//     -H "Content-Type: application/json" \
//     -d '{"success":false,"error":"thumbnail extractor crashed"}'

#[derive(Clone)]
pub struct TasksRouteState {
    token: Option<Arc<str>>,
    queue: Arc<BackgroundTaskQueue>,
}

pub fn routes(token: Option<String>, queue: Arc<BackgroundTaskQueue>) -> Router {
    Router::new()
        .route("/", get(get_status).post(enqueue))
        .route("/:task_id", get(get_task))
        .route("/:task_id/progress", post(report_progress))
        .route("/:task_id/complete", post(complete_task))
        .with_state(TasksRouteState {
            token: token.map(Arc::from),
            queue,
        })
}

#[derive(Debug, Deserialize)]
pub struct EnqueueTaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub payload: Value,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueTaskResponse {
    pub task_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ProgressRequest {
    pub progress: u8,
}

#[derive(Debug, Deserialize)]
pub struct CompleteTaskRequest {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CompleteTaskResponse {
    pub task_id: Uuid,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_in_ms: Option<u128>,
}

pub async fn get_status(
    State(state): State<TasksRouteState>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    authorize_bearer(&headers, state.token.as_deref())?;
    Ok(Json(state.queue.get_status()).into_response())
}

pub async fn get_task(
    State(state): State<TasksRouteState>,
    headers: HeaderMap,
    Path(task_id): Path<Uuid>,
) -> Result<Response, AppError> {
    authorize_bearer(&headers, state.token.as_deref())?;
    let task = state
        .queue
        .get_task(task_id)
        .ok_or_else(|| AppError::NotFound(format!("task {} not found", task_id)))?;
    Ok(Json(task).into_response())
}

pub async fn enqueue(
    State(state): State<TasksRouteState>,
    headers: HeaderMap,
    Json(payload): Json<EnqueueTaskRequest>,
) -> Result<Response, AppError> {
    authorize_bearer(&headers, state.token.as_deref())?;

    let task_type = payload
        .task_type
        .parse::<TaskType>()
        .map_err(AppError::BadRequest)?;
    let task_id = match payload.max_retries {
        Some(max_retries) => {
            state
                .queue
                .enqueue_with_retries(task_type, payload.payload, max_retries)
        }
        None => state.queue.enqueue(task_type, payload.payload),
    };

    Ok((StatusCode::CREATED, Json(EnqueueTaskResponse { task_id })).into_response())
}

pub async fn report_progress(
    State(state): State<TasksRouteState>,
    headers: HeaderMap,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<ProgressRequest>,
) -> Result<Response, AppError> {
    authorize_bearer(&headers, state.token.as_deref())?;

    if state.queue.report_progress(task_id, payload.progress) {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }
    match state.queue.get_task(task_id) {
        Some(task) => Err(AppError::Conflict(format!(
            "task {} is {}, not running",
            task_id, task.status
        ))),
        None => Err(AppError::NotFound(format!("task {} not found", task_id))),
    }
}

pub async fn complete_task(
    State(state): State<TasksRouteState>,
    headers: HeaderMap,
    Path(task_id): Path<Uuid>,
    Json(payload): Json<CompleteTaskRequest>,
) -> Result<Response, AppError> {
    authorize_bearer(&headers, state.token.as_deref())?;

    let outcome = state
        .queue
        .complete_external_task(task_id, payload.success, payload.error);
    info!(
        task_id = %task_id,
        success = payload.success,
        outcome = outcome.as_str(),
        "tasks router: completion received"
    );

    let (retry_count, retry_in_ms) = match outcome {
        CompletionOutcome::NotFound => {
            return Err(AppError::NotFound(format!("task {} not found", task_id)));
        }
        CompletionOutcome::Retrying {
            retry_count,
            backoff,
        } => (Some(retry_count), Some(backoff.as_millis())),
        _ => (None, None),
    };

    Ok(Json(CompleteTaskResponse {
        task_id,
        outcome: outcome.as_str(),
        retry_count,
        retry_in_ms,
    })
    .into_response())
}
