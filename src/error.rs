//! Error taxonomy and mapping to OpenAI-compatible error responses.
//!
//! Client errors are detected before any backend work begins; backend
//! errors surface as 500 `api_error`. Every mapped error is counted in the
//! error metric before the response body is produced.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use crate::backend::BackendError;
use crate::metrics;
use crate::openai_types::{ErrorDetail, ErrorPayload};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request body: {0}")]
    MalformedJson(String),
    #[error("Messages field is required")]
    MissingMessages,
    #[error("Messages array cannot be empty")]
    EmptyMessages,
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("Backend request failed: {0}")]
    Backend(#[from] BackendError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Backend(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Backend(_) => "api_error",
            _ => "invalid_request_error",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MalformedJson(_) => "malformed_json",
            ApiError::MissingMessages => "missing_messages",
            ApiError::EmptyMessages => "empty_messages",
            ApiError::InvalidMessage(_) => "invalid_message",
            ApiError::Backend(_) => "backend_error",
        }
    }

    /// Label for the error counter metric.
    pub fn category(&self) -> &'static str {
        match self {
            ApiError::MalformedJson(_) => "parse_error",
            ApiError::MissingMessages | ApiError::EmptyMessages | ApiError::InvalidMessage(_) => {
                "validation_error"
            }
            ApiError::Backend(_) => "backend_error",
        }
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            error: ErrorDetail {
                message: self.to_string(),
                error_type: self.error_type().to_string(),
                code: self.code().to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::record_error(self.category());
        (self.status(), Json(self.payload())).into_response()
    }
}
