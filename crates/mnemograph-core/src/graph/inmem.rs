//! In-memory graph store
//!
//! A [`GraphStore`] backed by plain maps, for tests and prototyping.
//! Search is O(N) and nothing persists. It enforces the same ownership
//! and temporal invariants as the Memgraph adapter, which is what makes
//! it useful: engine tests run against real supersession, rank, and
//! isolation semantics without a live store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::cluster::Community;
use crate::entity::{Entity, EntityRelation};
use crate::memory::{
    AccessLogEntry, ExtractionStatus, Memory, MemoryFilter, MemoryState, Page, TemporalMode,
};

use super::{AppCount, GraphResult, GraphStore, UserStats};

// ============================================================================
// STATE
// ============================================================================

#[derive(Debug, Clone)]
struct Mention {
    memory_id: String,
    entity_id: String,
    role: Option<String>,
    confidence: f64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoredCommunity {
    community: Community,
    user_id: String,
    member_entities: Vec<String>,
    memory_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    users: HashSet<String>,
    memories: HashMap<String, Memory>,
    entities: HashMap<String, Entity>,
    mentions: Vec<Mention>,
    relations: Vec<EntityRelation>,
    supersedes: Vec<(String, String, DateTime<Utc>)>,
    accesses: Vec<(String, AccessLogEntry)>,
    communities: HashMap<String, StoredCommunity>,
}

impl State {
    fn owned_memory(&self, user_id: &str, memory_id: &str) -> Option<&Memory> {
        self.memories
            .get(memory_id)
            .filter(|m| m.user_id == user_id)
    }

    fn memory_is_live(&self, memory_id: &str) -> bool {
        self.memories.get(memory_id).map(Memory::is_live).unwrap_or(false)
    }

    fn entity_rank(&self, entity_id: &str) -> i64 {
        let live_mentions = self
            .mentions
            .iter()
            .filter(|m| m.entity_id == entity_id && self.memory_is_live(&m.memory_id))
            .count() as i64;
        let live_edges = self
            .relations
            .iter()
            .filter(|r| r.is_live() && (r.source_id == entity_id || r.target_id == entity_id))
            .count() as i64;
        live_mentions + live_edges
    }
}

/// Union-find over entity indices for connected-component communities
struct UnionFind {
    parent: Vec<usize>,
    rank: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, x: usize, y: usize) {
        let rx = self.find(x);
        let ry = self.find(y);
        if rx == ry {
            return;
        }
        if self.rank[rx] < self.rank[ry] {
            self.parent[rx] = ry;
        } else if self.rank[rx] > self.rank[ry] {
            self.parent[ry] = rx;
        } else {
            self.parent[ry] = rx;
            self.rank[rx] += 1;
        }
    }
}

// ============================================================================
// STORE
// ============================================================================

/// See module docs.
#[derive(Debug, Default)]
pub struct InMemoryGraph {
    state: Mutex<State>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// SUPERSEDES edges as `(new_id, old_id, at)`, for invariant checks.
    pub fn supersedes_edges(&self) -> Vec<(String, String, DateTime<Utc>)> {
        self.state.lock().supersedes.clone()
    }

    /// Number of MENTIONS edges between a memory and an entity.
    pub fn mention_edge_count(&self, memory_id: &str, entity_id: &str) -> usize {
        self.state
            .lock()
            .mentions
            .iter()
            .filter(|m| m.memory_id == memory_id && m.entity_id == entity_id)
            .count()
    }

    /// Live memories owned by the user.
    pub fn live_memory_count(&self, user_id: &str) -> usize {
        self.state
            .lock()
            .memories
            .values()
            .filter(|m| m.user_id == user_id && m.is_live())
            .count()
    }

    /// Stored rank of one entity, for invariant checks.
    pub fn stored_entity(&self, entity_id: &str) -> Option<Entity> {
        self.state.lock().entities.get(entity_id).cloned()
    }

    /// All live relations between two entities, any type.
    pub fn relations_between(&self, source_id: &str, target_id: &str) -> Vec<EntityRelation> {
        self.state
            .lock()
            .relations
            .iter()
            .filter(|r| r.source_id == source_id && r.target_id == target_id)
            .cloned()
            .collect()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut na = 0.0f64;
    let mut nb = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        dot += f64::from(x) * f64::from(y);
        na += f64::from(x) * f64::from(x);
        nb += f64::from(y) * f64::from(y);
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

fn strip_embedding(mut memory: Memory) -> Memory {
    memory.embedding = None;
    memory
}

fn paginate<T: Clone>(items: &[T], page: usize, size: usize) -> Page<T> {
    let page = page.max(1);
    let total = items.len();
    let start = (page - 1).saturating_mul(size).min(total);
    let end = (start + size).min(total);
    Page {
        items: items[start..end].to_vec(),
        total,
        page,
        size,
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn init_schema(&self) -> GraphResult<()> {
        Ok(())
    }

    async fn ping(&self) -> GraphResult<()> {
        Ok(())
    }

    async fn ensure_user(&self, user_id: &str) -> GraphResult<()> {
        self.state.lock().users.insert(user_id.to_string());
        Ok(())
    }

    async fn create_memory(&self, memory: &Memory) -> GraphResult<()> {
        let mut state = self.state.lock();
        state.users.insert(memory.user_id.clone());
        state.memories.insert(memory.id.clone(), memory.clone());
        Ok(())
    }

    async fn create_memories(&self, memories: &[Memory]) -> GraphResult<()> {
        let mut state = self.state.lock();
        for memory in memories {
            state.users.insert(memory.user_id.clone());
            state.memories.insert(memory.id.clone(), memory.clone());
        }
        Ok(())
    }

    async fn update_memory_content(
        &self,
        user_id: &str,
        memory_id: &str,
        content: &str,
        embedding: &[f32],
        now: DateTime<Utc>,
    ) -> GraphResult<bool> {
        let mut state = self.state.lock();
        match state.memories.get_mut(memory_id) {
            Some(memory) if memory.user_id == user_id => {
                memory.content = content.to_string();
                memory.embedding = Some(embedding.to_vec());
                memory.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn supersede_memory(
        &self,
        user_id: &str,
        old_id: &str,
        successor: &Memory,
        at: DateTime<Utc>,
    ) -> GraphResult<bool> {
        let mut state = self.state.lock();
        let Some(old) = state.memories.get_mut(old_id) else {
            return Ok(false);
        };
        if old.user_id != user_id || old.invalid_at.is_some() {
            return Ok(false);
        }
        old.invalid_at = Some(at);
        old.updated_at = at;
        state.memories.insert(successor.id.clone(), successor.clone());
        state
            .supersedes
            .push((successor.id.clone(), old_id.to_string(), at));
        Ok(true)
    }

    async fn soft_delete_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        at: DateTime<Utc>,
    ) -> GraphResult<bool> {
        let mut state = self.state.lock();
        match state.memories.get_mut(memory_id) {
            Some(memory) if memory.user_id == user_id => {
                memory.state = MemoryState::Deleted;
                // invalid_at is set-once; a superseded memory keeps its
                // original invalidation instant.
                if memory.invalid_at.is_none() {
                    memory.invalid_at = Some(at);
                }
                memory.deleted_at = Some(at);
                memory.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition_states(
        &self,
        user_id: &str,
        memory_ids: &[String],
        from: MemoryState,
        to: MemoryState,
        at: DateTime<Utc>,
    ) -> GraphResult<usize> {
        let mut state = self.state.lock();
        let mut changed = 0;
        for id in memory_ids {
            if let Some(memory) = state.memories.get_mut(id)
                && memory.user_id == user_id
                && memory.state == from
            {
                memory.state = to;
                memory.updated_at = at;
                if to == MemoryState::Archived {
                    memory.archived_at = Some(at);
                }
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn delete_all_memories(
        &self,
        user_id: &str,
        app_name: Option<&str>,
    ) -> GraphResult<usize> {
        let mut state = self.state.lock();
        let doomed: Vec<String> = state
            .memories
            .values()
            .filter(|m| {
                m.user_id == user_id
                    && app_name.map(|a| m.app_name.as_deref() == Some(a)).unwrap_or(true)
            })
            .map(|m| m.id.clone())
            .collect();
        for id in &doomed {
            state.memories.remove(id);
            state.mentions.retain(|m| &m.memory_id != id);
            state.accesses.retain(|(mid, _)| mid != id);
            state
                .supersedes
                .retain(|(new, old, _)| new != id && old != id);
        }
        Ok(doomed.len())
    }

    async fn get_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        with_embedding: bool,
    ) -> GraphResult<Option<Memory>> {
        let state = self.state.lock();
        Ok(state.owned_memory(user_id, memory_id).map(|m| {
            if with_embedding {
                m.clone()
            } else {
                strip_embedding(m.clone())
            }
        }))
    }

    async fn memories_by_ids(
        &self,
        user_id: &str,
        memory_ids: &[String],
        with_embeddings: bool,
    ) -> GraphResult<Vec<Memory>> {
        let state = self.state.lock();
        Ok(memory_ids
            .iter()
            .filter_map(|id| state.owned_memory(user_id, id))
            .map(|m| {
                if with_embeddings {
                    m.clone()
                } else {
                    strip_embedding(m.clone())
                }
            })
            .collect())
    }

    async fn list_memories(
        &self,
        user_id: &str,
        filter: &MemoryFilter,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<Memory>> {
        let state = self.state.lock();
        let mut matches: Vec<Memory> = state
            .memories
            .values()
            .filter(|m| m.user_id == user_id)
            .filter(|m| match filter.temporal {
                TemporalMode::Live => m.invalid_at.is_none(),
                TemporalMode::IncludeSuperseded => true,
                TemporalMode::AsOf(ts) => m.is_valid_at(ts),
            })
            .filter(|m| match filter.state {
                Some(state) => m.state == state,
                None => {
                    m.state != MemoryState::Deleted
                        && (filter.show_archived || m.state != MemoryState::Archived)
                }
            })
            .filter(|m| {
                filter
                    .app_name
                    .as_deref()
                    .map(|a| m.app_name.as_deref() == Some(a))
                    .unwrap_or(true)
            })
            .filter(|m| {
                filter
                    .category
                    .as_deref()
                    .map(|c| m.categories.iter().any(|have| have == c))
                    .unwrap_or(true)
            })
            .filter(|m| {
                filter
                    .search
                    .as_deref()
                    .map(|s| m.content.to_lowercase().contains(&s.to_lowercase()))
                    .unwrap_or(true)
            })
            .map(|m| strip_embedding(m.clone()))
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(&matches, page, size))
    }

    async fn recent_live_memories(
        &self,
        user_id: &str,
        limit: usize,
    ) -> GraphResult<Vec<Memory>> {
        let state = self.state.lock();
        let mut live: Vec<Memory> = state
            .memories
            .values()
            .filter(|m| m.user_id == user_id && m.is_live())
            .map(|m| strip_embedding(m.clone()))
            .collect();
        live.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        live.truncate(limit);
        Ok(live)
    }

    async fn export_memories(&self, user_id: &str) -> GraphResult<Vec<Memory>> {
        let state = self.state.lock();
        let mut all: Vec<Memory> = state
            .memories
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn record_access(
        &self,
        user_id: &str,
        memory_id: &str,
        app_name: &str,
        query_used: Option<&str>,
        at: DateTime<Utc>,
    ) -> GraphResult<()> {
        let mut state = self.state.lock();
        if state.owned_memory(user_id, memory_id).is_none() {
            return Ok(());
        }
        state.accesses.push((
            memory_id.to_string(),
            AccessLogEntry {
                app_name: app_name.to_string(),
                accessed_at: at,
                query_used: query_used.map(str::to_string),
            },
        ));
        Ok(())
    }

    async fn access_log(
        &self,
        user_id: &str,
        memory_id: &str,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<AccessLogEntry>> {
        let state = self.state.lock();
        if state.owned_memory(user_id, memory_id).is_none() {
            return Ok(paginate(&[], page, size));
        }
        let mut entries: Vec<AccessLogEntry> = state
            .accesses
            .iter()
            .filter(|(mid, _)| mid == memory_id)
            .map(|(_, entry)| entry.clone())
            .collect();
        entries.sort_by(|a, b| b.accessed_at.cmp(&a.accessed_at));
        Ok(paginate(&entries, page, size))
    }

    async fn text_search(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> GraphResult<Vec<String>> {
        let state = self.state.lock();
        let terms: Vec<String> = query
            .to_lowercase()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if terms.is_empty() {
            return Ok(vec![]);
        }
        let mut scored: Vec<(String, usize, DateTime<Utc>)> = state
            .memories
            .values()
            .filter(|m| m.user_id == user_id && m.is_live())
            .filter_map(|m| {
                let content = m.content.to_lowercase();
                let hits: usize = terms.iter().map(|t| content.matches(t.as_str()).count()).sum();
                (hits > 0).then(|| (m.id.clone(), hits, m.created_at))
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(b.2.cmp(&a.2)).then(a.0.cmp(&b.0)));
        Ok(scored.into_iter().take(limit).map(|(id, _, _)| id).collect())
    }

    async fn vector_search(
        &self,
        user_id: &str,
        vector: &[f32],
        fetch: usize,
    ) -> GraphResult<Vec<(String, f64)>> {
        let state = self.state.lock();
        let mut scored: Vec<(String, f64)> = state
            .memories
            .values()
            .filter(|m| m.user_id == user_id && m.is_live())
            .filter_map(|m| {
                m.embedding
                    .as_ref()
                    .map(|e| (m.id.clone(), cosine(e, vector)))
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(fetch);
        Ok(scored)
    }

    async fn claim_extraction(&self, memory_id: &str) -> GraphResult<Option<(String, u32)>> {
        let mut state = self.state.lock();
        match state.memories.get_mut(memory_id) {
            Some(memory) => {
                memory.extraction_status = Some(ExtractionStatus::Pending);
                memory.extraction_attempts += 1;
                Ok(Some((memory.content.clone(), memory.extraction_attempts)))
            }
            None => Ok(None),
        }
    }

    async fn finish_extraction(
        &self,
        memory_id: &str,
        status: ExtractionStatus,
        error: Option<&str>,
    ) -> GraphResult<()> {
        let mut state = self.state.lock();
        if let Some(memory) = state.memories.get_mut(memory_id) {
            memory.extraction_status = Some(status);
            memory.extraction_error = error.map(str::to_string);
        }
        Ok(())
    }

    async fn sweep_stuck_extractions(&self, max_attempts: u32) -> GraphResult<usize> {
        let mut state = self.state.lock();
        let mut swept = 0;
        for memory in state.memories.values_mut() {
            if memory.extraction_status == Some(ExtractionStatus::Pending)
                && memory.extraction_attempts >= max_attempts
            {
                memory.extraction_status = Some(ExtractionStatus::Failed);
                memory.extraction_error = Some("extraction attempts exhausted".into());
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn find_entity_by_name(
        &self,
        user_id: &str,
        name_lower: &str,
    ) -> GraphResult<Option<Entity>> {
        let state = self.state.lock();
        Ok(state
            .entities
            .values()
            .find(|e| e.user_id == user_id && e.name.to_lowercase() == name_lower)
            .cloned())
    }

    async fn persons_overlapping_name(
        &self,
        user_id: &str,
        name_lower: &str,
    ) -> GraphResult<Vec<Entity>> {
        let state = self.state.lock();
        Ok(state
            .entities
            .values()
            .filter(|e| e.user_id == user_id && e.entity_type == "PERSON")
            .filter(|e| {
                let have = e.name.to_lowercase();
                have.starts_with(name_lower) || name_lower.starts_with(have.as_str())
            })
            .cloned()
            .collect())
    }

    async fn create_entity(&self, entity: &Entity) -> GraphResult<()> {
        let mut state = self.state.lock();
        state.users.insert(entity.user_id.clone());
        state.entities.insert(entity.id.clone(), entity.clone());
        Ok(())
    }

    async fn merge_entity_fields(
        &self,
        entity_id: &str,
        name: &str,
        entity_type: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> GraphResult<()> {
        let mut state = self.state.lock();
        if let Some(entity) = state.entities.get_mut(entity_id) {
            entity.name = name.to_string();
            entity.entity_type = entity_type.to_string();
            entity.description = description.to_string();
            entity.updated_at = now;
        }
        Ok(())
    }

    async fn set_entity_description_embedding(
        &self,
        entity_id: &str,
        embedding: &[f32],
    ) -> GraphResult<()> {
        let mut state = self.state.lock();
        if let Some(entity) = state.entities.get_mut(entity_id) {
            entity.description_embedding = Some(embedding.to_vec());
        }
        Ok(())
    }

    async fn assign_categories(
        &self,
        memory_id: &str,
        categories: &[String],
    ) -> GraphResult<()> {
        let mut state = self.state.lock();
        if let Some(memory) = state.memories.get_mut(memory_id) {
            for category in categories {
                if !memory.categories.iter().any(|have| have == category) {
                    memory.categories.push(category.clone());
                }
            }
        }
        Ok(())
    }

    async fn upsert_mention(
        &self,
        memory_id: &str,
        entity_id: &str,
        role: Option<&str>,
        confidence: f64,
        at: DateTime<Utc>,
    ) -> GraphResult<()> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .mentions
            .iter_mut()
            .find(|m| m.memory_id == memory_id && m.entity_id == entity_id)
        {
            existing.role = role.map(str::to_string).or_else(|| existing.role.take());
            existing.confidence = confidence;
            return Ok(());
        }
        state.mentions.push(Mention {
            memory_id: memory_id.to_string(),
            entity_id: entity_id.to_string(),
            role: role.map(str::to_string),
            confidence,
            created_at: at,
        });
        Ok(())
    }

    async fn refresh_entity_rank(&self, entity_id: &str) -> GraphResult<i64> {
        let mut state = self.state.lock();
        let rank = state.entity_rank(entity_id);
        if let Some(entity) = state.entities.get_mut(entity_id) {
            entity.rank = rank;
        }
        Ok(rank)
    }

    async fn live_mention_count(&self, entity_id: &str) -> GraphResult<usize> {
        let state = self.state.lock();
        Ok(state
            .mentions
            .iter()
            .filter(|m| m.entity_id == entity_id && state.memory_is_live(&m.memory_id))
            .count())
    }

    async fn get_entity(
        &self,
        user_id: &str,
        entity_id: &str,
    ) -> GraphResult<Option<(Entity, usize)>> {
        let state = self.state.lock();
        let Some(entity) = state
            .entities
            .get(entity_id)
            .filter(|e| e.user_id == user_id)
        else {
            return Ok(None);
        };
        let mentions = state
            .mentions
            .iter()
            .filter(|m| m.entity_id == entity_id && state.memory_is_live(&m.memory_id))
            .count();
        Ok(Some((entity.clone(), mentions)))
    }

    async fn list_entities(
        &self,
        user_id: &str,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<Entity>> {
        let state = self.state.lock();
        let mut entities: Vec<Entity> = state
            .entities
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entities.sort_by(|a, b| b.rank.cmp(&a.rank).then(a.name.cmp(&b.name)));
        Ok(paginate(&entities, page, size))
    }

    async fn entity_memories(
        &self,
        user_id: &str,
        entity_id: &str,
        page: usize,
        size: usize,
    ) -> GraphResult<Page<Memory>> {
        let state = self.state.lock();
        if state
            .entities
            .get(entity_id)
            .filter(|e| e.user_id == user_id)
            .is_none()
        {
            return Ok(paginate(&[], page, size));
        }
        let mut memories: Vec<Memory> = state
            .mentions
            .iter()
            .filter(|m| m.entity_id == entity_id)
            .filter_map(|m| state.memories.get(&m.memory_id))
            .filter(|m| m.is_live())
            .map(|m| strip_embedding(m.clone()))
            .collect();
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(&memories, page, size))
    }

    async fn entity_summary_inputs(
        &self,
        entity_id: &str,
        memory_cap: usize,
        relation_cap: usize,
    ) -> GraphResult<(Vec<String>, Vec<EntityRelation>)> {
        let state = self.state.lock();
        let mut connected: Vec<&Memory> = state
            .mentions
            .iter()
            .filter(|m| m.entity_id == entity_id)
            .filter_map(|m| state.memories.get(&m.memory_id))
            .filter(|m| m.is_live())
            .collect();
        connected.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let contents = connected
            .into_iter()
            .take(memory_cap)
            .map(|m| m.content.clone())
            .collect();

        let mut outgoing: Vec<EntityRelation> = state
            .relations
            .iter()
            .filter(|r| r.is_live() && r.source_id == entity_id)
            .cloned()
            .collect();
        outgoing.sort_by(|a, b| b.valid_at.cmp(&a.valid_at));
        outgoing.truncate(relation_cap);
        Ok((contents, outgoing))
    }

    async fn set_entity_summary(
        &self,
        entity_id: &str,
        summary: &str,
        at: DateTime<Utc>,
    ) -> GraphResult<()> {
        let mut state = self.state.lock();
        if let Some(entity) = state.entities.get_mut(entity_id) {
            entity.summary = Some(summary.to_string());
            entity.summary_updated_at = Some(at);
        }
        Ok(())
    }

    async fn live_relation(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
    ) -> GraphResult<Option<EntityRelation>> {
        let state = self.state.lock();
        Ok(state
            .relations
            .iter()
            .find(|r| {
                r.is_live()
                    && r.source_id == source_id
                    && r.target_id == target_id
                    && r.rel_type == rel_type
            })
            .cloned())
    }

    async fn create_relation(&self, relation: &EntityRelation) -> GraphResult<()> {
        self.state.lock().relations.push(relation.clone());
        Ok(())
    }

    async fn confirm_relation(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
        _now: DateTime<Utc>,
    ) -> GraphResult<i64> {
        let mut state = self.state.lock();
        if let Some(relation) = state.relations.iter_mut().find(|r| {
            r.is_live()
                && r.source_id == source_id
                && r.target_id == target_id
                && r.rel_type == rel_type
        }) {
            relation.confirmed_count += 1;
            return Ok(relation.confirmed_count);
        }
        Ok(0)
    }

    async fn invalidate_relation(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
        at: DateTime<Utc>,
    ) -> GraphResult<()> {
        let mut state = self.state.lock();
        if let Some(relation) = state.relations.iter_mut().find(|r| {
            r.is_live()
                && r.source_id == source_id
                && r.target_id == target_id
                && r.rel_type == rel_type
        }) {
            relation.invalid_at = Some(at);
        }
        Ok(())
    }

    async fn entity_seeds_for_terms(
        &self,
        user_id: &str,
        terms: &[String],
        limit: usize,
    ) -> GraphResult<Vec<(String, i64)>> {
        let state = self.state.lock();
        let terms: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let matches_any = |text: &str| {
            let text = text.to_lowercase();
            terms.iter().any(|t| text.contains(t.as_str()))
        };
        let mut seeds: Vec<(String, i64)> = state
            .entities
            .values()
            .filter(|e| e.user_id == user_id)
            .filter(|e| {
                matches_any(&e.name)
                    || matches_any(&e.description)
                    || e.summary.as_deref().map(matches_any).unwrap_or(false)
                    || state.relations.iter().any(|r| {
                        r.is_live()
                            && (r.source_id == e.id || r.target_id == e.id)
                            && matches_any(&r.description)
                    })
            })
            .map(|e| (e.id.clone(), e.rank))
            .collect();
        seeds.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        seeds.truncate(limit);
        Ok(seeds)
    }

    async fn neighbor_entities(
        &self,
        user_id: &str,
        entity_ids: &[String],
        limit: usize,
    ) -> GraphResult<Vec<(String, i64)>> {
        let state = self.state.lock();
        let seed_set: HashSet<&str> = entity_ids.iter().map(String::as_str).collect();
        let mut neighbors: HashMap<String, i64> = HashMap::new();
        for relation in state.relations.iter().filter(|r| r.is_live()) {
            for (a, b) in [
                (&relation.source_id, &relation.target_id),
                (&relation.target_id, &relation.source_id),
            ] {
                if seed_set.contains(a.as_str()) && !seed_set.contains(b.as_str())
                    && let Some(entity) = state.entities.get(b)
                    && entity.user_id == user_id
                {
                    neighbors.insert(b.clone(), entity.rank);
                }
            }
        }
        let mut out: Vec<(String, i64)> = neighbors.into_iter().collect();
        out.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        out.truncate(limit);
        Ok(out)
    }

    async fn memories_mentioning(
        &self,
        user_id: &str,
        entity_ids: &[String],
        limit: usize,
    ) -> GraphResult<Vec<String>> {
        let state = self.state.lock();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for entity_id in entity_ids {
            for mention in state.mentions.iter().filter(|m| &m.entity_id == entity_id) {
                if let Some(memory) = state.memories.get(&mention.memory_id)
                    && memory.user_id == user_id
                    && memory.is_live()
                    && seen.insert(memory.id.clone())
                {
                    out.push(memory.id.clone());
                    if out.len() >= limit {
                        return Ok(out);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn detect_communities(&self, user_id: &str) -> GraphResult<Vec<(String, i64)>> {
        let state = self.state.lock();
        let entities: Vec<&Entity> = state
            .entities
            .values()
            .filter(|e| e.user_id == user_id)
            .collect();
        let index: HashMap<&str, usize> = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.as_str(), i))
            .collect();

        // Connected components stand in for Louvain here; the contract is
        // identical, the partitioning is just coarser.
        let mut uf = UnionFind::new(entities.len());
        for relation in state.relations.iter().filter(|r| r.is_live()) {
            if let (Some(&a), Some(&b)) = (
                index.get(relation.source_id.as_str()),
                index.get(relation.target_id.as_str()),
            ) {
                uf.union(a, b);
            }
        }
        Ok(entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), uf.find(i) as i64))
            .collect())
    }

    async fn clear_communities(&self, user_id: &str) -> GraphResult<()> {
        self.state
            .lock()
            .communities
            .retain(|_, c| c.user_id != user_id);
        Ok(())
    }

    async fn create_community(
        &self,
        user_id: &str,
        community: &Community,
        member_entity_ids: &[String],
    ) -> GraphResult<()> {
        let mut state = self.state.lock();
        let member_set: HashSet<&str> = member_entity_ids.iter().map(String::as_str).collect();
        let memory_ids: Vec<String> = state
            .mentions
            .iter()
            .filter(|m| member_set.contains(m.entity_id.as_str()))
            .filter(|m| state.memory_is_live(&m.memory_id))
            .map(|m| m.memory_id.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        state.communities.insert(
            community.id.clone(),
            StoredCommunity {
                community: community.clone(),
                user_id: user_id.to_string(),
                member_entities: member_entity_ids.to_vec(),
                memory_ids,
            },
        );
        Ok(())
    }

    async fn list_communities(&self, user_id: &str) -> GraphResult<Vec<Community>> {
        let state = self.state.lock();
        let mut communities: Vec<Community> = state
            .communities
            .values()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.community.clone())
            .collect();
        communities.sort_by(|a, b| b.member_count.cmp(&a.member_count).then(a.id.cmp(&b.id)));
        Ok(communities)
    }

    async fn community_memories(
        &self,
        user_id: &str,
        community_id: &str,
        limit: usize,
    ) -> GraphResult<Vec<Memory>> {
        let state = self.state.lock();
        let Some(stored) = state
            .communities
            .get(community_id)
            .filter(|c| c.user_id == user_id)
        else {
            return Ok(vec![]);
        };
        let mut memories: Vec<Memory> = stored
            .memory_ids
            .iter()
            .filter_map(|id| state.memories.get(id))
            .filter(|m| m.is_live())
            .map(|m| strip_embedding(m.clone()))
            .collect();
        memories.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        memories.truncate(limit);
        Ok(memories)
    }

    async fn user_stats(&self, user_id: &str) -> GraphResult<UserStats> {
        let state = self.state.lock();
        let mut per_app: HashMap<String, usize> = HashMap::new();
        let mut total = 0usize;
        for memory in state
            .memories
            .values()
            .filter(|m| m.user_id == user_id && m.state != MemoryState::Deleted)
        {
            total += 1;
            if let Some(app) = &memory.app_name {
                *per_app.entry(app.clone()).or_default() += 1;
            }
        }
        let mut apps: Vec<AppCount> = per_app
            .into_iter()
            .map(|(name, memory_count)| AppCount { name, memory_count })
            .collect();
        apps.sort_by(|a, b| b.memory_count.cmp(&a.memory_count).then(a.name.cmp(&b.name)));
        Ok(UserStats {
            total_memories: total,
            total_apps: apps.len(),
            apps,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    fn memory(id: &str, user: &str, content: &str) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.into(),
            user_id: user.into(),
            content: content.into(),
            state: MemoryState::Active,
            metadata: None,
            valid_at: now,
            invalid_at: None,
            created_at: now,
            updated_at: now,
            archived_at: None,
            deleted_at: None,
            app_name: Some("cli".into()),
            categories: vec![],
            extraction_status: None,
            extraction_attempts: 0,
            extraction_error: None,
            embedding: Some(vec![1.0, 0.0, 0.0]),
        }
    }

    #[tokio::test]
    async fn ownership_is_enforced_on_reads() {
        let graph = InMemoryGraph::new();
        graph.create_memory(&memory("m1", "alice", "fact")).await.unwrap();

        assert!(graph.get_memory("alice", "m1", false).await.unwrap().is_some());
        assert!(graph.get_memory("bob", "m1", false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn supersede_guards_against_double_invalidation() {
        let graph = InMemoryGraph::new();
        graph.create_memory(&memory("m1", "alice", "old fact")).await.unwrap();

        let at = Utc::now();
        let ok = graph
            .supersede_memory("alice", "m1", &memory("m2", "alice", "new fact"), at)
            .await
            .unwrap();
        assert!(ok);

        // Already invalidated - a second supersession must refuse.
        let again = graph
            .supersede_memory("alice", "m1", &memory("m3", "alice", "newer"), Utc::now())
            .await
            .unwrap();
        assert!(!again);

        let old = graph.get_memory("alice", "m1", false).await.unwrap().unwrap();
        assert_eq!(old.invalid_at, Some(at));
        assert_eq!(graph.supersedes_edges().len(), 1);
    }

    #[tokio::test]
    async fn mention_upsert_is_idempotent() {
        let graph = InMemoryGraph::new();
        graph.create_memory(&memory("m1", "alice", "Alice codes")).await.unwrap();
        let now = Utc::now();
        let entity = Entity {
            id: "e1".into(),
            user_id: "alice".into(),
            name: "Alice".into(),
            entity_type: "PERSON".into(),
            description: String::new(),
            rank: 0,
            summary: None,
            summary_updated_at: None,
            created_at: now,
            updated_at: now,
            description_embedding: None,
        };
        graph.create_entity(&entity).await.unwrap();
        graph.upsert_mention("m1", "e1", Some("subject"), 0.9, now).await.unwrap();
        graph.upsert_mention("m1", "e1", Some("subject"), 0.9, now).await.unwrap();
        assert_eq!(graph.mention_edge_count("m1", "e1"), 1);
        assert_eq!(graph.refresh_entity_rank("e1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn soft_delete_keeps_existing_invalidation_instant() {
        let graph = InMemoryGraph::new();
        graph.create_memory(&memory("m1", "alice", "old")).await.unwrap();
        let superseded_at = Utc::now();
        graph
            .supersede_memory("alice", "m1", &memory("m2", "alice", "new"), superseded_at)
            .await
            .unwrap();

        graph.soft_delete_memory("alice", "m1", Utc::now()).await.unwrap();
        let old = graph.get_memory("alice", "m1", false).await.unwrap().unwrap();
        assert_eq!(old.state, MemoryState::Deleted);
        assert_eq!(old.invalid_at, Some(superseded_at));
    }
}
