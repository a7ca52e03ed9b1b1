use std::sync::Arc;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared handler result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// The one body shape every rejection produces.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Error, Clone)]
pub enum ApiError {
    /// Caller-induced; the message is passed through verbatim.
    #[error("{0}")]
    BadRequest(String),
    #[error("no authenticated user")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("resource not found")]
    NotFound,
    /// The cause is logged server-side and never echoed to the client.
    #[error("An internal error occurred.")]
    Internal(Arc<anyhow::Error>),
}

impl ApiError {
    pub fn internal(err: anyhow::Error) -> Self {
        Self::Internal(Arc::new(err))
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        Self::internal(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let external = self.to_string();
        match &self {
            ApiError::Internal(cause) => {
                tracing::warn!(internal_error = %cause, external_error = %external, "request failed");
            }
            ApiError::BadRequest(_) => {
                tracing::debug!(external_error = %external, "rejected request");
            }
            _ => {}
        }
        (self.status(), Json(ErrorBody { error: external })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_errors_are_masked() {
        let err = ApiError::internal(anyhow::anyhow!("connection refused"));
        assert_eq!(err.to_string(), "An internal error occurred.");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn bad_request_passes_message_through() {
        let err = ApiError::BadRequest("could not convert url parameter project_id to uint, got notuint".into());
        assert_eq!(
            err.to_string(),
            "could not convert url parameter project_id to uint, got notuint"
        );
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
