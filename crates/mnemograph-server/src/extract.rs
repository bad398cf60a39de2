//! Request extractors
//!
//! Every memory-related endpoint requires a user id, carried either in
//! the `user_id` query parameter or the `X-User-ID` header. Absent or
//! empty values are a 400.

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;

use crate::error::ApiError;

/// Header fallback for the user id
pub const USER_ID_HEADER: &str = "x-user-id";

/// The authenticated-by-declaration user scope of a request
#[derive(Debug, Clone)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
            && let Some(user_id) = params.get("user_id")
            && !user_id.trim().is_empty()
        {
            return Ok(UserId(user_id.trim().to_string()));
        }

        if let Some(header) = parts.headers.get(USER_ID_HEADER)
            && let Ok(value) = header.to_str()
            && !value.trim().is_empty()
        {
            return Ok(UserId(value.trim().to_string()));
        }

        Err(ApiError::bad_request(
            "user_id is required (query parameter or X-User-ID header)",
        ))
    }
}

/// Common pagination query parameters
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Pagination {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_size", alias = "page_size")]
    pub size: usize,
}

fn default_page() -> usize {
    1
}

fn default_size() -> usize {
    50
}

impl Pagination {
    pub fn clamped(&self) -> (usize, usize) {
        (self.page.max(1), self.size.clamp(1, 200))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(uri: &str, header: Option<&str>) -> Result<UserId, ApiError> {
        let mut builder = Request::builder().uri(uri);
        if let Some(value) = header {
            builder = builder.header("X-User-ID", value);
        }
        let request = builder.body(()).unwrap();
        let (mut parts, ()) = request.into_parts();
        UserId::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn query_parameter_wins() {
        let user = extract("/memories?user_id=alice", Some("bob")).await.unwrap();
        assert_eq!(user.0, "alice");
    }

    #[tokio::test]
    async fn header_is_the_fallback() {
        let user = extract("/memories", Some("bob")).await.unwrap();
        assert_eq!(user.0, "bob");
    }

    #[tokio::test]
    async fn empty_values_are_rejected() {
        assert!(extract("/memories?user_id=%20", None).await.is_err());
        assert!(extract("/memories", None).await.is_err());
    }

    #[test]
    fn pagination_clamps() {
        let pagination = Pagination { page: 0, size: 9999 };
        assert_eq!(pagination.clamped(), (1, 200));
    }
}
