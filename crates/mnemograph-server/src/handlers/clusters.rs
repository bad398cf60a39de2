//! Community endpoints

use axum::Json;
use axum::extract::{Path, State};
use serde_json::{Value, json};

use crate::error::ApiResult;
use crate::extract::UserId;
use crate::state::AppState;

/// Cap on memories returned per cluster
const CLUSTER_MEMORY_LIMIT: usize = 100;

/// POST /clusters/rebuild
pub async fn rebuild_clusters(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Json<Value>> {
    let created = state.engine.clusters.rebuild(&user_id).await?;
    Ok(Json(json!({ "ok": true, "clusters": created })))
}

/// GET /clusters
pub async fn list_clusters(
    State(state): State<AppState>,
    UserId(user_id): UserId,
) -> ApiResult<Json<Value>> {
    let clusters = state.engine.clusters.list(&user_id).await?;
    Ok(Json(json!({ "clusters": clusters })))
}

/// GET /clusters/{id}/memories
pub async fn cluster_memories(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let memories = state
        .engine
        .clusters
        .memories(&user_id, &id, CLUSTER_MEMORY_LIMIT)
        .await?;
    Ok(Json(json!({ "memories": memories })))
}
