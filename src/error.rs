//! HTTP-facing error type.
//!
//! Every error body has the shape `{ "success": false, "error": "..." }`
//! and the status code always agrees with the `success` flag. Internal
//! errors are logged in full and answered with an opaque message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use kbob_core::query::QueryError;
use kbob_core::source::LinkError;

use crate::ingest::IngestionError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// `code` is a stable identifier callers can match on.
    #[error("conflict: {message}")]
    Conflict { code: &'static str, message: String },

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            Self::Conflict { code, message } => (StatusCode::CONFLICT, message, Some(code)),
            Self::Internal(err) => {
                tracing::error!(error = %format!("{:#}", err), "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            success: false,
            error,
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl From<QueryError> for ApiError {
    fn from(err: QueryError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<LinkError> for ApiError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::InvalidLinkFormat(_) => Self::BadRequest(err.to_string()),
        }
    }
}

impl From<IngestionError> for ApiError {
    fn from(err: IngestionError) -> Self {
        Self::Conflict {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_variant() {
        let cases = [
            (ApiError::from(QueryError::InvalidPageRequest("x".into())), 400),
            (
                ApiError::from(LinkError::InvalidLinkFormat("x".into())),
                400,
            ),
            (ApiError::NotFound("material u-1".into()), 404),
            (ApiError::from(IngestionError::InProgress), 409),
            (ApiError::Internal(anyhow::anyhow!("boom")), 500),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status().as_u16(), status);
        }
    }

    #[tokio::test]
    async fn conflict_body_carries_stable_code() {
        let resp = ApiError::from(IngestionError::InProgress).into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], "IngestionInProgress");
        assert!(body["error"].as_str().unwrap().contains("in progress"));

        let resp = ApiError::NotFound("x".into()).into_response();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body.get("code").is_none());
    }
}
