// Error responses for the HTTP surface

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use coderun_common::ResolveError;
use serde::Serialize;

use crate::engine::EngineError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unreadable body, blank code, blank or unsupported language
    #[error("{0}")]
    BadRequest(String),
    #[error("error executing code: {0}")]
    Submission(#[from] EngineError),
    #[error("timeout")]
    Timeout,
    #[error("client closed request")]
    ClientClosed,
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::Submission(_) => StatusCode::BAD_REQUEST,
            ApiError::Timeout | ApiError::ClientClosed => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Short label used for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Submission(_) => "submission_failure",
            ApiError::Timeout => "timeout",
            ApiError::ClientClosed => "client_closed",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}
