//! Maps domain errors onto HTTP status codes with a `{"error": ...}` body.

use crate::db::DbError;
use crate::doc_processor::DocError;
use crate::llm::LlmError;
use crate::rag::RagError;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

#[derive(Debug)]
pub enum AppError {
    Store(DbError),
    Document(DocError),
    Upstream(LlmError),
    Multipart(MultipartError),
    Validation(String),
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        AppError::Store(e)
    }
}

impl From<DocError> for AppError {
    fn from(e: DocError) -> Self {
        AppError::Document(e)
    }
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        AppError::Upstream(e)
    }
}

impl From<MultipartError> for AppError {
    fn from(e: MultipartError) -> Self {
        AppError::Multipart(e)
    }
}

impl From<RagError> for AppError {
    fn from(e: RagError) -> Self {
        match e {
            RagError::Store(e) => AppError::Store(e),
            RagError::Upstream(e) => AppError::Upstream(e),
            RagError::Document(e) => AppError::Document(e),
        }
    }
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Store(DbError::NotFound(_)) => StatusCode::NOT_FOUND,
            AppError::Store(DbError::LengthMismatch { .. }) => StatusCode::BAD_REQUEST,
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Document(DocError::FileTooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Document(DocError::UnsupportedFileType(_) | DocError::Empty) => {
                StatusCode::BAD_REQUEST
            }
            AppError::Document(DocError::Extraction(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Upstream(LlmError::Api { .. }) => StatusCode::BAD_GATEWAY,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Multipart(e) => e.status(),
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Store(e) => e.to_string(),
            AppError::Document(e) => e.to_string(),
            AppError::Upstream(e) => e.to_string(),
            AppError::Multipart(e) => e.body_text(),
            AppError::Validation(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(%status, error = %message, "request failed");
        } else {
            tracing::debug!(%status, error = %message, "request rejected");
        }
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
