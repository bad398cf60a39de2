//! Route table
//!
//! One route per row of the public API. CORS is permissive; access
//! control is user scoping, not origin policing.

use axum::Router;
use axum::routing::{delete, get, post, put};
use tower_http::cors::CorsLayer;

use crate::handlers::{backup, clusters, entities, memories, system};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        // Memories
        .route("/memories", post(memories::add_memory))
        .route("/memories", delete(memories::delete_all_memories))
        .route("/memories/bulk", post(memories::bulk_add))
        .route("/memories/filter", post(memories::filter_memories))
        .route("/memories/search", post(memories::search_memories))
        .route("/memories/actions/archive", post(memories::archive_memories))
        .route("/memories/actions/pause", post(memories::pause_memories))
        .route("/memories/{id}", get(memories::get_memory))
        .route("/memories/{id}", put(memories::supersede_memory))
        .route("/memories/{id}", delete(memories::delete_memory))
        .route("/memories/{id}/access-log", get(memories::access_log))
        // Entities
        .route("/entities", get(entities::list_entities))
        .route("/entities/{id}", get(entities::get_entity))
        .route("/entities/{id}/memories", get(entities::entity_memories))
        // Communities
        .route("/clusters/rebuild", post(clusters::rebuild_clusters))
        .route("/clusters", get(clusters::list_clusters))
        .route("/clusters/{id}/memories", get(clusters::cluster_memories))
        // Backup
        .route("/backup/export", post(backup::export))
        .route("/backup/import", post(backup::import))
        // System
        .route("/stats", get(system::stats))
        .route("/health", get(system::health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
