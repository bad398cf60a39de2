//! Graph-store adapter
//!
//! The engine consumes one typed repository trait; every Cypher string
//! lives behind it in the Memgraph implementation. All read paths anchor
//! at the `User` node, so a wrong user simply yields empty rows - the
//! engine turns that into not-found without learning whether the record
//! exists for someone else.

mod inmem;
mod memgraph;

pub use inmem::InMemoryGraph;
pub use memgraph::MemgraphStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cluster::Community;
use crate::entity::{Entity, EntityRelation};
use crate::error::GraphError;
use crate::memory::{
    AccessLogEntry, ExtractionStatus, Memory, MemoryFilter, MemoryState, Page,
};

/// Adapter result type
pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ============================================================================
// STATS
// ============================================================================

/// Per-app memory count
#[derive(Debug, Clone, Serialize)]
pub struct AppCount {
    pub name: String,
    pub memory_count: usize,
}

/// Per-user totals for the stats endpoint
#[derive(Debug, Clone, Serialize)]
pub struct UserStats {
    pub total_memories: usize,
    pub total_apps: usize,
    pub apps: Vec<AppCount>,
}

// ============================================================================
// REPOSITORY TRAIT
// ============================================================================

/// Typed surface over the graph store.
///
/// Calls are independent - no transaction spans more than one method, and
/// every method is safe to retry. The only multi-row atomicity the engine
/// relies on is the single UNWIND batch behind [`GraphStore::create_memories`].
#[async_trait]
pub trait GraphStore: Send + Sync {
    // ---- schema / liveness ------------------------------------------------

    /// Create constraints, property indexes, and the vector + text indexes.
    async fn init_schema(&self) -> GraphResult<()>;

    /// Cheap connectivity probe for health checks.
    async fn ping(&self) -> GraphResult<()>;

    // ---- users ------------------------------------------------------------

    /// Idempotently create the `User` node.
    async fn ensure_user(&self, user_id: &str) -> GraphResult<()>;

    // ---- memory writes ----------------------------------------------------

    /// Create one memory node plus its ownership and provenance edges.
    async fn create_memory(&self, memory: &Memory) -> GraphResult<()>;

    /// Create a batch of memories in a single UNWIND write.
    async fn create_memories(&self, memories: &[Memory]) -> GraphResult<()>;

    /// Re-point content and embedding in place. Returns false when the
    /// memory is missing or not owned.
    async fn update_memory_content(
        &self,
        user_id: &str,
        memory_id: &str,
        content: &str,
        embedding: &[f32],
        now: DateTime<Utc>,
    ) -> GraphResult<bool>;

    /// Invalidate `old_id` at `at`, create `successor`, and link
    /// `(successor)-[:SUPERSEDES {at}]->(old)`. Returns false when the old
    /// memory is missing, not owned, or already invalidated.
    async fn supersede_memory(
        &self,
        user_id: &str,
        old_id: &str,
        successor: &Memory,
        at: DateTime<Utc>,
    ) -> GraphResult<bool>;

    /// Temporal soft delete: `state='deleted'`, `invalid_at`, `deleted_at`.
    async fn soft_delete_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        at: DateTime<Utc>,
    ) -> GraphResult<bool>;

    /// Move every listed memory currently in `from` to `to`; returns how
    /// many actually changed.
    async fn transition_states(
        &self,
        user_id: &str,
        memory_ids: &[String],
        from: MemoryState,
        to: MemoryState,
        at: DateTime<Utc>,
    ) -> GraphResult<usize>;

    /// Hard delete (detach-delete) all of a user's memories, optionally
    /// only those created by one app. Returns the number removed.
    async fn delete_all_memories(
        &self,
        user_id: &str,
        app_name: Option<&str>,
    ) -> GraphResult<usize>;

    // ---- memory reads -----------------------------------------------------

    async fn get_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        with_embedding: bool,
    ) -> GraphResult<Option<Memory>>;

    /// Batched hydration lookup; result order follows `memory_ids`.
    async fn memories_by_ids(
        &self,
        user_id: &str,
        memory_ids: &[String],
        with_embeddings: bool,
    ) -> GraphResult<Vec<Memory>>;

    async fn list_memories(
        &self,
        user_id: &str,
        filter: &MemoryFilter,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<Memory>>;

    /// Most recent live memories, newest first. Used for the context window.
    async fn recent_live_memories(&self, user_id: &str, limit: usize)
    -> GraphResult<Vec<Memory>>;

    /// Every memory with embeddings, for backup export.
    async fn export_memories(&self, user_id: &str) -> GraphResult<Vec<Memory>>;

    // ---- access log -------------------------------------------------------

    async fn record_access(
        &self,
        user_id: &str,
        memory_id: &str,
        app_name: &str,
        query_used: Option<&str>,
        at: DateTime<Utc>,
    ) -> GraphResult<()>;

    async fn access_log(
        &self,
        user_id: &str,
        memory_id: &str,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<AccessLogEntry>>;

    // ---- search arms ------------------------------------------------------

    /// Full-text arm over the user's live memories; ids in rank order.
    async fn text_search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> GraphResult<Vec<String>>;

    /// Vector arm. `fetch` is already over-sampled by the engine; the
    /// adapter post-filters to the user's live memories and returns
    /// `(id, cosine similarity)` best-first.
    async fn vector_search(
        &self,
        user_id: &str,
        vector: &[f32],
        fetch: usize,
    ) -> GraphResult<Vec<(String, f64)>>;

    // ---- extraction state machine -----------------------------------------

    /// Transition a memory to `pending`, increment the attempt counter,
    /// and return its content. `None` when the memory vanished.
    async fn claim_extraction(&self, memory_id: &str) -> GraphResult<Option<(String, u32)>>;

    async fn finish_extraction(
        &self,
        memory_id: &str,
        status: ExtractionStatus,
        error: Option<&str>,
    ) -> GraphResult<()>;

    /// Reap memories stuck in `pending` with `attempts >= max_attempts`
    /// back to `failed`. Returns how many were swept.
    async fn sweep_stuck_extractions(&self, max_attempts: u32) -> GraphResult<usize>;

    // ---- entities ---------------------------------------------------------

    /// Exact match on `(user_id, lowercased name)`.
    async fn find_entity_by_name(
        &self,
        user_id: &str,
        name_lower: &str,
    ) -> GraphResult<Option<Entity>>;

    /// PERSON entities whose lowercased name is a prefix of `name_lower`
    /// or vice versa. Word-boundary checks happen in the resolver.
    async fn persons_overlapping_name(
        &self,
        user_id: &str,
        name_lower: &str,
    ) -> GraphResult<Vec<Entity>>;

    async fn create_entity(&self, entity: &Entity) -> GraphResult<()>;

    /// Adopt a longer name form, a more specific type, and/or a longer
    /// description.
    async fn merge_entity_fields(
        &self,
        entity_id: &str,
        name: &str,
        entity_type: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> GraphResult<()>;

    async fn set_entity_description_embedding(
        &self,
        entity_id: &str,
        embedding: &[f32],
    ) -> GraphResult<()>;

    /// Replace the memory's category tags (idempotent MERGE per tag).
    async fn assign_categories(
        &self,
        memory_id: &str,
        categories: &[String],
    ) -> GraphResult<()>;

    /// Idempotent MENTIONS edge from memory to entity.
    async fn upsert_mention(
        &self,
        memory_id: &str,
        entity_id: &str,
        role: Option<&str>,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> GraphResult<()>;

    /// Recompute `rank = live mentions + live related edges`, store and
    /// return it.
    async fn refresh_entity_rank(&self, entity_id: &str) -> GraphResult<i64>;

    async fn live_mention_count(&self, entity_id: &str) -> GraphResult<usize>;

    /// Entity plus its live mention count.
    async fn get_entity(
        &self,
        user_id: &str,
        entity_id: &str,
    ) -> GraphResult<Option<(Entity, usize)>>;

    /// Entities ordered by rank descending.
    async fn list_entities(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<Entity>>;

    /// Live memories that mention the entity, newest first.
    async fn entity_memories(
        &self,
        user_id: &str,
        entity_id: &str,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<Memory>>;

    /// Inputs for summary synthesis: up to `memory_cap` connected memory
    /// contents and `relation_cap` outgoing live relations, newest first.
    async fn entity_summary_inputs(
        &self,
        entity_id: &str,
        memory_cap: usize,
        relation_cap: usize,
    ) -> GraphResult<(Vec<String>, Vec<EntityRelation>)>;

    async fn set_entity_summary(
        &self,
        entity_id: &str,
        summary: &str,
        at: DateTime<Utc>,
    ) -> GraphResult<()>;

    // ---- entity relations -------------------------------------------------

    /// The live `(source, target, type)` edge, if any. At most one exists.
    async fn live_relation(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
    ) -> GraphResult<Option<EntityRelation>>;

    async fn create_relation(&self, relation: &EntityRelation) -> GraphResult<()>;

    /// Bump `confirmed_count` on the live edge; returns the new count.
    async fn confirm_relation(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
        now: DateTime<Utc>,
    ) -> GraphResult<i64>;

    async fn invalidate_relation(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
        at: DateTime<Utc>,
    ) -> GraphResult<()>;

    // ---- graph traversal arm ----------------------------------------------

    /// Entities whose name, description, or live relation descriptions
    /// match any term. Returns `(entity_id, rank)`.
    async fn entity_seeds_for_terms(
        &self,
        user_id: &str,
        terms: &[String],
        limit: usize,
    ) -> GraphResult<Vec<(String, i64)>>;

    /// One-hop neighbors of the seed set over live relations, ordered by
    /// rank descending.
    async fn neighbor_entities(
        &self,
        user_id: &str,
        entity_ids: &[String],
        limit: usize,
    ) -> GraphResult<Vec<(String, i64)>>;

    /// Live memories mentioning any of the entities, by entity rank order.
    async fn memories_mentioning(
        &self,
        user_id: &str,
        entity_ids: &[String],
        limit: usize,
    ) -> GraphResult<Vec<String>>;

    // ---- communities ------------------------------------------------------

    /// Community-detect over the user's live entity-entity edges.
    /// Returns `(entity_id, community_id)` pairs.
    ///
    /// Errors with [`GraphError::CapabilityUnavailable`] when the store
    /// has no community-detection support.
    async fn detect_communities(&self, user_id: &str) -> GraphResult<Vec<(String, i64)>>;

    /// Drop all of the user's community nodes and membership edges.
    async fn clear_communities(&self, user_id: &str) -> GraphResult<()>;

    /// Create a community node, attach it to the user, and link every
    /// memory mentioning a member entity via IN_COMMUNITY.
    async fn create_community(
        &self,
        user_id: &str,
        community: &Community,
        member_entity_ids: &[String],
    ) -> GraphResult<()>;

    /// Communities ordered by member count descending.
    async fn list_communities(&self, user_id: &str) -> GraphResult<Vec<Community>>;

    async fn community_memories(
        &self,
        user_id: &str,
        community_id: &str,
        limit: usize,
    ) -> GraphResult<Vec<Memory>>;

    // ---- stats ------------------------------------------------------------

    async fn user_stats(&self, user_id: &str) -> GraphResult<UserStats>;
}
