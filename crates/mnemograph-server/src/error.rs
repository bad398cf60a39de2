//! Engine error -> HTTP status mapping
//!
//! Every error response body carries a `detail` field. Not-found and
//! not-owned are the same 404 on purpose: a response must never reveal
//! whether another user's record exists.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use mnemograph_core::{CoreError, GraphError};

/// API-facing error wrapper
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let status = match &err {
            CoreError::Validation(_) => StatusCode::BAD_REQUEST,
            CoreError::NotFound(_) => StatusCode::NOT_FOUND,
            CoreError::Graph(GraphError::CapabilityUnavailable(_)) => StatusCode::GONE,
            CoreError::Graph(GraphError::Connectivity(_)) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Graph(_) => StatusCode::INTERNAL_SERVER_ERROR,
            CoreError::Embedding(_) | CoreError::Chat(_) => StatusCode::SERVICE_UNAVAILABLE,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        let detail = match &err {
            // Internal detail stays in the logs.
            CoreError::Graph(GraphError::Query(_) | GraphError::Decode(_))
            | CoreError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        Self { status, detail }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Handler result alias
pub type ApiResult<T> = std::result::Result<T, ApiError>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        let cases = [
            (CoreError::validation("bad"), StatusCode::BAD_REQUEST),
            (CoreError::not_found("memory m1"), StatusCode::NOT_FOUND),
            (
                CoreError::Graph(GraphError::CapabilityUnavailable("mage".into())),
                StatusCode::GONE,
            ),
            (
                CoreError::Graph(GraphError::Connectivity("refused".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                CoreError::Graph(GraphError::Query("boom".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }

    #[test]
    fn query_errors_do_not_leak_detail() {
        let api: ApiError = CoreError::Graph(GraphError::Query("MATCH (secret)".into())).into();
        assert_eq!(api.detail, "internal error");
    }
}
