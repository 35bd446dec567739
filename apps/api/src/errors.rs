use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::analysis::pipeline::AnalysisFailed;
use crate::documents::ExtractionError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("Unprocessable entity: {0}")]
    UnprocessableEntity(String),

    #[error("Analysis already running for resume {0}")]
    AnalysisInProgress(Uuid),

    #[error("Analysis timed out after {0}s")]
    Timeout(u64),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error(transparent)]
    Analysis(#[from] AnalysisFailed),

    #[error("S3 error: {0}")]
    S3(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ExtractionError> for AppError {
    fn from(e: ExtractionError) -> Self {
        match e {
            ExtractionError::UnsupportedFileType(content_type) => {
                AppError::UnsupportedFileType(content_type)
            }
            ExtractionError::ExtractionFailed(_) => AppError::UnprocessableEntity(e.to_string()),
        }
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::UnsupportedFileType(_) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_FILE_TYPE",
                self.to_string(),
            ),
            AppError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                msg.clone(),
            ),
            AppError::AnalysisInProgress(_) => (
                StatusCode::CONFLICT,
                "ANALYSIS_IN_PROGRESS",
                "Analysis for this resume is already running; retry shortly".to_string(),
            ),
            AppError::Timeout(secs) => {
                tracing::error!("Analysis timed out after {secs}s");
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "ANALYSIS_TIMEOUT",
                    "Resume analysis took too long; please try again".to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Cache(e) => {
                tracing::error!("Cache error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CACHE_ERROR",
                    "A cache error occurred".to_string(),
                )
            }
            AppError::Analysis(e) => {
                tracing::error!("{e}: {:?}", e.source);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ANALYSIS_FAILED",
                    "Failed to analyze resume".to_string(),
                )
            }
            AppError::S3(msg) => {
                tracing::error!("S3 error: {msg}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "S3_ERROR",
                    "A storage error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::normalizer::UnparsableResponseError;
    use crate::analysis::pipeline::{Stage, StageError};

    #[test]
    fn test_unsupported_file_type_is_surfaced_verbatim() {
        let err: AppError = ExtractionError::UnsupportedFileType("image/png".to_string()).into();
        let (status, code, message) = err.parts();
        assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(code, "UNSUPPORTED_FILE_TYPE");
        assert_eq!(message, "Unsupported file type: image/png");
    }

    #[test]
    fn test_extraction_failure_is_unprocessable() {
        let err: AppError = ExtractionError::ExtractionFailed("too short".to_string()).into();
        let (status, _, message) = err.parts();
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(message.contains("too short"));
    }

    #[test]
    fn test_analysis_failure_hides_cause() {
        let err: AppError = AnalysisFailed {
            stage: Stage::Scoring,
            source: StageError::Unparsable(UnparsableResponseError {
                raw: "secret model output".to_string(),
            }),
        }
        .into();
        let (status, code, message) = err.parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "ANALYSIS_FAILED");
        assert!(!message.contains("secret"));
    }

    #[test]
    fn test_in_progress_is_conflict() {
        let (status, code, _) = AppError::AnalysisInProgress(Uuid::nil()).parts();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "ANALYSIS_IN_PROGRESS");
    }
}
