//! Entity endpoints

use axum::Json;
use axum::extract::{Path, Query, State};
use serde_json::{Value, json};

use mnemograph_core::CoreError;

use crate::error::{ApiError, ApiResult};
use crate::extract::{Pagination, UserId};
use crate::state::AppState;

/// GET /entities
pub async fn list_entities(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let (page, size) = pagination.clamped();
    let result = state.engine.graph.list_entities(&user_id, page, size).await
        .map_err(CoreError::from)?;
    Ok(Json(json!({
        "entities": result.items,
        "total": result.total,
        "page": result.page,
        "size": result.size,
    })))
}

/// GET /entities/{id}
pub async fn get_entity(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let (entity, memory_count) = state
        .engine
        .graph
        .get_entity(&user_id, &id)
        .await
        .map_err(CoreError::from)?
        .ok_or_else(|| ApiError::from(CoreError::not_found(format!("entity {id}"))))?;
    let mut body = serde_json::to_value(&entity)
        .map_err(|e| ApiError::from(CoreError::Internal(e.to_string())))?;
    body["memoryCount"] = json!(memory_count);
    Ok(Json(body))
}

/// GET /entities/{id}/memories
pub async fn entity_memories(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    // Resolve the entity first so unknown ids read as 404, not an empty
    // page.
    if state
        .engine
        .graph
        .get_entity(&user_id, &id)
        .await
        .map_err(CoreError::from)?
        .is_none()
    {
        return Err(ApiError::from(CoreError::not_found(format!("entity {id}"))));
    }
    let (page, size) = pagination.clamped();
    let result = state
        .engine
        .graph
        .entity_memories(&user_id, &id, page, size)
        .await
        .map_err(CoreError::from)?;
    Ok(Json(json!({
        "memories": result.items,
        "total": result.total,
        "page": result.page,
        "size": result.size,
    })))
}
