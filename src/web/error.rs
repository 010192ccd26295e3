//! Client-facing errors, rendered as `{"error": "<message>"}`.

use crate::reports::{NormalizeError, SchemaError};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Body is not JSON, or not a JSON object.
    #[error("{0}")]
    MalformedBody(String),
    /// Body is JSON but fails the report schema.
    #[error("{0}")]
    SchemaValidation(String),
    #[error("Invalid Expect-CT report body")]
    InvalidExpectCtReport,
    #[error("Report schema unavailable")]
    SchemaUnavailable,
    #[error("Unable to determine client address")]
    UnknownClient,
    #[error("Too many requests. Retry after {0} seconds.")]
    RateLimited(u64),
    #[error("Not found")]
    NotFound,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedBody(_)
            | ApiError::SchemaValidation(_)
            | ApiError::InvalidExpectCtReport => StatusCode::BAD_REQUEST,
            ApiError::SchemaUnavailable | ApiError::UnknownClient => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();
        if let ApiError::RateLimited(retry_after) = self {
            response
                .headers_mut()
                .insert(axum::http::header::RETRY_AFTER, retry_after.into());
        }
        response
    }
}

impl From<SchemaError> for ApiError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::Invalid(message) => ApiError::SchemaValidation(message),
            SchemaError::Load { .. } => {
                tracing::error!(error = %err, "Report schema could not be loaded");
                ApiError::SchemaUnavailable
            }
        }
    }
}

impl From<NormalizeError> for ApiError {
    fn from(err: NormalizeError) -> Self {
        ApiError::MalformedBody(err.to_string())
    }
}
