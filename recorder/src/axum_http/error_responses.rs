use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::recording_engine::error::EngineError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Unavailable(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Upstream(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotReady => AppError::Unavailable(err.to_string()),
            EngineError::NotFound(_) => AppError::NotFound(err.to_string()),
            EngineError::AlreadyRecording { .. } | EngineError::ProcessAlreadyRunning { .. } => {
                AppError::Conflict(err.to_string())
            }
            EngineError::StartFailed { .. } | EngineError::FinalizationFailed { .. } => {
                AppError::Upstream(err.to_string())
            }
            EngineError::MissingDependency(_) => AppError::Internal(anyhow::anyhow!(err)),
            EngineError::Other(inner) => AppError::Internal(inner),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Upstream(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::Internal(err) => {
                error!(error = ?err, "recorder router: internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn engine_errors_map_to_status_codes() {
        let cases = [
            (EngineError::NotReady, StatusCode::SERVICE_UNAVAILABLE),
            (
                EngineError::NotFound("stream x".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                EngineError::AlreadyRecording {
                    stream_id: Uuid::nil(),
                    recording_id: Uuid::nil(),
                },
                StatusCode::CONFLICT,
            ),
            (
                EngineError::StartFailed {
                    process_id: "stream_x".to_string(),
                    message: "no such file".to_string(),
                },
                StatusCode::BAD_GATEWAY,
            ),
            (
                EngineError::Other(anyhow::anyhow!("db down")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
