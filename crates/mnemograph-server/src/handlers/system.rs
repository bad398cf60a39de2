//! Stats and health endpoints

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use mnemograph_core::{CoreError, UserStats};

use crate::error::ApiResult;
use crate::extract::UserId;
use crate::state::AppState;

/// GET /stats
pub async fn stats(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Json<UserStats>> {
    let stats = state
        .engine
        .graph
        .user_stats(&user_id)
        .await
        .map_err(CoreError::from)?;
    Ok(Json(stats))
}

/// GET /health - no user scope; 503 when a dependency is down
pub async fn health(State(state): State<AppState>) -> Response {
    let report = state.engine.health().await;
    let status = if report.healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}
