//! Memory endpoints

use axum::Json;
use axum::extract::{Path, Query, State};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Value, json};

use mnemograph_core::{
    AddMemory, BulkItem, BulkOptions, Memory, MemoryFilter, MemoryState, SearchMode,
    SearchOptions, TemporalMode,
};

use crate::error::{ApiError, ApiResult};
use crate::extract::{Pagination, UserId};
use crate::state::AppState;

// ============================================================================
// ADD
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct AddMemoryBody {
    pub text: String,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// POST /memories
pub async fn add_memory(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<AddMemoryBody>,
) -> ApiResult<Json<Value>> {
    let outcome = state
        .engine
        .memories
        .add_memory(AddMemory {
            text: body.text,
            user_id,
            app_name: body.app_name,
            metadata: body.metadata,
            valid_at: None,
        })
        .await?;
    Ok(Json(json!({ "id": outcome.memory_id })))
}

// ============================================================================
// BULK
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct BulkBody {
    pub items: Vec<BulkItem>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default = "default_true")]
    pub dedup_enabled: bool,
}

fn default_true() -> bool {
    true
}

/// POST /memories/bulk
pub async fn bulk_add(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<BulkBody>,
) -> ApiResult<Json<Value>> {
    let report = state
        .engine
        .bulk
        .ingest(
            &user_id,
            body.items,
            BulkOptions {
                app_name: body.app_name,
                concurrency: body.concurrency,
                dedup_enabled: body.dedup_enabled,
                on_progress: None,
            },
        )
        .await?;
    Ok(Json(serde_json::to_value(&report).map_err(|e| {
        ApiError::from(mnemograph_core::CoreError::Internal(e.to_string()))
    })?))
}

// ============================================================================
// SINGLE MEMORY
// ============================================================================

/// GET /memories/{id}
pub async fn get_memory(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<Memory>> {
    Ok(Json(state.engine.memories.get_memory(&user_id, &id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemoryBody {
    pub text: String,
    #[serde(default)]
    pub app_name: Option<String>,
}

/// PUT /memories/{id} - supersede with new content; the response is the
/// successor.
pub async fn supersede_memory(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    Json(body): Json<UpdateMemoryBody>,
) -> ApiResult<Json<Memory>> {
    let successor = state
        .engine
        .memories
        .supersede_memory(&user_id, &id, &body.text, body.app_name)
        .await?;
    Ok(Json(successor))
}

/// DELETE /memories/{id} - temporal soft delete
pub async fn delete_memory(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.engine.memories.delete_memory(&user_id, &id).await?;
    Ok(Json(json!({ "ok": true })))
}

#[derive(Debug, Deserialize)]
pub struct DeleteAllParams {
    #[serde(default)]
    pub app_name: Option<String>,
}

/// DELETE /memories - hard delete everything (optionally one app's)
pub async fn delete_all_memories(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Query(params): Query<DeleteAllParams>,
) -> ApiResult<Json<Value>> {
    let deleted = state
        .engine
        .memories
        .delete_all_memories(&user_id, params.app_name.as_deref())
        .await?;
    Ok(Json(json!({ "deleted": deleted })))
}

// ============================================================================
// FILTERED LISTING
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FilterBody {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub size: Option<usize>,
    #[serde(default)]
    pub state: Option<MemoryState>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default)]
    pub show_archived: bool,
    #[serde(default)]
    pub include_superseded: bool,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

/// POST /memories/filter
pub async fn filter_memories(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<FilterBody>,
) -> ApiResult<Json<Value>> {
    let temporal = match (body.as_of, body.include_superseded) {
        (Some(ts), _) => TemporalMode::AsOf(ts),
        (None, true) => TemporalMode::IncludeSuperseded,
        (None, false) => TemporalMode::Live,
    };
    let filter = MemoryFilter {
        state: body.state,
        app_name: body.app_name,
        category: body.category,
        search: body.search,
        show_archived: body.show_archived,
        temporal,
    };
    let page = body.page.unwrap_or(1).max(1);
    let size = body.size.unwrap_or(50).clamp(1, 200);
    let result = state
        .engine
        .memories
        .list_memories(&user_id, &filter, page, size)
        .await?;
    Ok(Json(json!({
        "items": result.items,
        "total": result.total,
        "page": result.page,
        "size": result.size,
        "pages": result.pages(),
    })))
}

// ============================================================================
// SEARCH
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SearchBody {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub mode: Option<SearchMode>,
    #[serde(default)]
    pub rerank: bool,
    #[serde(default)]
    pub mmr_lambda: Option<f64>,
    #[serde(default)]
    pub use_graph: bool,
    #[serde(default)]
    pub app_name: Option<String>,
}

/// POST /memories/search
pub async fn search_memories(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<SearchBody>,
) -> ApiResult<Json<Value>> {
    let options = SearchOptions {
        top_k: body.top_k.unwrap_or(10),
        mode: body.mode.unwrap_or_default(),
        rerank: body.rerank,
        mmr_lambda: body
            .mmr_lambda
            .unwrap_or(mnemograph_core::search::DEFAULT_MMR_LAMBDA),
        use_graph: body.use_graph,
        app_name: body.app_name,
    };
    let results = state
        .engine
        .retrieval
        .search(&user_id, &body.query, &options)
        .await?;
    Ok(Json(json!({
        "query": body.query,
        "total": results.len(),
        "results": results,
    })))
}

// ============================================================================
// ACCESS LOG
// ============================================================================

/// GET /memories/{id}/access-log
pub async fn access_log(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Path(id): Path<String>,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Json<Value>> {
    let (page, size) = pagination.clamped();
    let log = state
        .engine
        .memories
        .access_log(&user_id, &id, page, size)
        .await?;
    Ok(Json(json!({
        "total": log.total,
        "page": log.page,
        "page_size": log.size,
        "logs": log.items,
    })))
}

// ============================================================================
// BATCH ACTIONS
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ArchiveBody {
    pub memory_ids: Vec<String>,
}

/// POST /memories/actions/archive
pub async fn archive_memories(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<ArchiveBody>,
) -> ApiResult<Json<Value>> {
    let archived = state
        .engine
        .memories
        .archive_memories(&user_id, &body.memory_ids)
        .await?;
    Ok(Json(json!({ "archived": archived })))
}

#[derive(Debug, Deserialize)]
pub struct PauseBody {
    pub memory_ids: Vec<String>,
    /// false unpauses
    #[serde(default = "default_true")]
    pub pause: bool,
}

/// POST /memories/actions/pause
pub async fn pause_memories(
    State(state): State<AppState>,
    UserId(user_id): UserId,
    Json(body): Json<PauseBody>,
) -> ApiResult<Json<Value>> {
    let changed = state
        .engine
        .memories
        .pause_memories(&user_id, &body.memory_ids, body.pause)
        .await?;
    Ok(Json(json!({ "changed": changed })))
}
