//! Ingestion pipeline
//!
//! The write path for single memories: dedup, context-enriched
//! embedding, temporal write, then fire-and-forget extraction. Within
//! one `add_memory` call the order is strict - dedup, embed, write,
//! link - while categorization and entity extraction are unordered
//! relative to the response.

pub mod bulk;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ContextWindowConfig;
use crate::dedup::{DedupDecision, DedupEngine};
use crate::error::{CoreError, Result};
use crate::gateway::Embedder;
use crate::graph::GraphStore;
use crate::memory::{
    AccessLogEntry, AddOutcome, Disposition, Memory, MemoryFilter, MemoryState, Page,
};
use crate::worker::TaskPool;

pub use crate::entity::ExtractionWorker;

// ============================================================================
// INPUT
// ============================================================================

/// Input for `add_memory`
#[derive(Debug, Clone)]
pub struct AddMemory {
    pub text: String,
    pub user_id: String,
    pub app_name: Option<String>,
    pub metadata: Option<Value>,
    /// Backdate the fact's validity (bulk/import); defaults to now
    pub valid_at: Option<DateTime<Utc>>,
}

impl AddMemory {
    pub fn new(text: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: user_id.into(),
            app_name: None,
            metadata: None,
            valid_at: None,
        }
    }
}

// ============================================================================
// SERVICE
// ============================================================================

/// See module docs.
pub struct MemoryService {
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    dedup: Arc<DedupEngine>,
    extraction: Arc<ExtractionWorker>,
    pool: TaskPool,
    context_window: ContextWindowConfig,
}

impl MemoryService {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        dedup: Arc<DedupEngine>,
        extraction: Arc<ExtractionWorker>,
        pool: TaskPool,
        context_window: ContextWindowConfig,
    ) -> Self {
        Self {
            graph,
            embedder,
            dedup,
            extraction,
            pool,
            context_window,
        }
    }

    // ---- add --------------------------------------------------------------

    /// Add one memory: dedup -> embed -> write -> link -> enqueue
    /// extraction. Returns the surviving id (the existing one on a skip).
    pub async fn add_memory(&self, input: AddMemory) -> Result<AddOutcome> {
        let text = input.text.trim();
        if text.is_empty() {
            return Err(CoreError::validation("text must not be empty"));
        }
        if input.user_id.trim().is_empty() {
            return Err(CoreError::validation("user_id must not be empty"));
        }

        match self.dedup.decide(text, &input.user_id).await {
            DedupDecision::Insert => {}
            DedupDecision::Skip { existing_id } => {
                info!(user_id = %input.user_id, existing = %existing_id, "dedup skip");
                return Ok(AddOutcome {
                    memory_id: existing_id.clone(),
                    disposition: Disposition::Skipped { existing_id },
                });
            }
            DedupDecision::Supersede { existing_id } => {
                info!(user_id = %input.user_id, superseding = %existing_id, "dedup supersede");
                match self
                    .supersede_memory(&input.user_id, &existing_id, text, input.app_name.clone())
                    .await
                {
                    Ok(successor) => {
                        return Ok(AddOutcome {
                            memory_id: successor.id,
                            disposition: Disposition::Superseded {
                                previous_id: existing_id,
                            },
                        });
                    }
                    // Lost the race to another writer; a plain insert is
                    // always safe.
                    Err(CoreError::NotFound(_)) => {
                        warn!(user_id = %input.user_id, existing = %existing_id,
                            "supersede target vanished; inserting");
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        let embedding = self.embed_with_context(&input.user_id, text).await?;
        self.graph.ensure_user(&input.user_id).await?;

        let memory = self.build_memory(
            &input.user_id,
            text,
            input.app_name,
            input.metadata,
            input.valid_at,
            embedding,
        );
        self.graph.create_memory(&memory).await?;
        self.enqueue_extraction(&memory.id, &input.user_id);

        Ok(AddOutcome {
            memory_id: memory.id,
            disposition: Disposition::Inserted,
        })
    }

    // ---- supersession -----------------------------------------------------

    /// Invalidate `old_id` and write a successor carrying `new_content`.
    pub async fn supersede_memory(
        &self,
        user_id: &str,
        old_id: &str,
        new_content: &str,
        app_name: Option<String>,
    ) -> Result<Memory> {
        let content = new_content.trim();
        if content.is_empty() {
            return Err(CoreError::validation("content must not be empty"));
        }
        let embedding = self.embed_with_context(user_id, content).await?;
        let now = Utc::now();
        let successor = self.build_memory(user_id, content, app_name, None, Some(now), embedding);

        let done = self
            .graph
            .supersede_memory(user_id, old_id, &successor, now)
            .await?;
        if !done {
            return Err(CoreError::not_found(format!("memory {old_id}")));
        }
        self.enqueue_extraction(&successor.id, user_id);
        Ok(successor)
    }

    // ---- in-place update --------------------------------------------------

    /// Rewrite content in place. `valid_at` is untouched - this corrects
    /// a record, it does not assert a new fact.
    pub async fn update_memory(
        &self,
        user_id: &str,
        memory_id: &str,
        new_content: &str,
    ) -> Result<Memory> {
        let content = new_content.trim();
        if content.is_empty() {
            return Err(CoreError::validation("content must not be empty"));
        }
        let embedding = self
            .embedder
            .embed(content)
            .await
            .map_err(CoreError::Embedding)?;
        let updated = self
            .graph
            .update_memory_content(user_id, memory_id, content, &embedding, Utc::now())
            .await?;
        if !updated {
            return Err(CoreError::not_found(format!("memory {memory_id}")));
        }
        self.get_memory(user_id, memory_id).await
    }

    // ---- state transitions ------------------------------------------------

    /// Batch archive; only `active` memories transition.
    pub async fn archive_memories(&self, user_id: &str, ids: &[String]) -> Result<usize> {
        Ok(self
            .graph
            .transition_states(user_id, ids, MemoryState::Active, MemoryState::Archived, Utc::now())
            .await?)
    }

    /// Batch pause or unpause; pause only from `active`, unpause only
    /// from `paused`.
    pub async fn pause_memories(&self, user_id: &str, ids: &[String], pause: bool) -> Result<usize> {
        let (from, to) = if pause {
            (MemoryState::Active, MemoryState::Paused)
        } else {
            (MemoryState::Paused, MemoryState::Active)
        };
        Ok(self
            .graph
            .transition_states(user_id, ids, from, to, Utc::now())
            .await?)
    }

    // ---- deletion ---------------------------------------------------------

    /// Temporal soft delete: the record stays readable under `as_of`.
    pub async fn delete_memory(&self, user_id: &str, memory_id: &str) -> Result<()> {
        let deleted = self
            .graph
            .soft_delete_memory(user_id, memory_id, Utc::now())
            .await?;
        if !deleted {
            return Err(CoreError::not_found(format!("memory {memory_id}")));
        }
        Ok(())
    }

    /// Hard delete everything (optionally one app's memories). Returns
    /// the number removed.
    pub async fn delete_all_memories(
        &self,
        user_id: &str,
        app_name: Option<&str>,
    ) -> Result<usize> {
        let removed = self.graph.delete_all_memories(user_id, app_name).await?;
        info!(user_id, removed, "hard-deleted memories");
        Ok(removed)
    }

    // ---- reads ------------------------------------------------------------

    pub async fn get_memory(&self, user_id: &str, memory_id: &str) -> Result<Memory> {
        self.graph
            .get_memory(user_id, memory_id, false)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("memory {memory_id}")))
    }

    pub async fn list_memories(
        &self,
        user_id: &str,
        filter: &MemoryFilter,
        page: usize,
        size: usize,
    ) -> Result<Page<Memory>> {
        Ok(self.graph.list_memories(user_id, filter, page, size).await?)
    }

    pub async fn access_log(
        &self,
        user_id: &str,
        memory_id: &str,
        page: usize,
        size: usize,
    ) -> Result<Page<AccessLogEntry>> {
        // Existence first, so an unowned id reads as not-found rather
        // than an empty log.
        self.get_memory(user_id, memory_id).await?;
        Ok(self.graph.access_log(user_id, memory_id, page, size).await?)
    }

    // ---- internals --------------------------------------------------------

    /// Embed `text`, optionally prefixed with the user's recent live
    /// memories. The prefix only ever reaches the embedding input; the
    /// stored content is the caller's text verbatim.
    async fn embed_with_context(&self, user_id: &str, text: &str) -> Result<Vec<f32>> {
        let input = if self.context_window.enabled && self.context_window.size > 0 {
            match self
                .graph
                .recent_live_memories(user_id, self.context_window.size)
                .await
            {
                Ok(recent) if !recent.is_empty() => {
                    debug!(user_id, window = recent.len(), "embedding with context prefix");
                    Some(context_block(&recent, text))
                }
                Ok(_) => None,
                // Context is an enrichment, not a dependency.
                Err(err) => {
                    warn!(user_id, error = %err, "context window read failed");
                    None
                }
            }
        } else {
            None
        };
        self.embedder
            .embed(input.as_deref().unwrap_or(text))
            .await
            .map_err(CoreError::Embedding)
    }

    fn build_memory(
        &self,
        user_id: &str,
        content: &str,
        app_name: Option<String>,
        metadata: Option<Value>,
        valid_at: Option<DateTime<Utc>>,
        embedding: Vec<f32>,
    ) -> Memory {
        let now = Utc::now();
        Memory {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            content: content.to_string(),
            state: MemoryState::Active,
            metadata,
            valid_at: valid_at.unwrap_or(now),
            invalid_at: None,
            created_at: now,
            updated_at: now,
            archived_at: None,
            deleted_at: None,
            app_name,
            categories: vec![],
            extraction_status: None,
            extraction_attempts: 0,
            extraction_error: None,
            embedding: Some(embedding),
        }
    }

    fn enqueue_extraction(&self, memory_id: &str, user_id: &str) {
        let worker = Arc::clone(&self.extraction);
        let memory_id = memory_id.to_string();
        let user_id = user_id.to_string();
        self.pool.spawn(async move {
            worker.run(&memory_id, &user_id).await;
        });
    }
}

/// Format the context window: recent memories oldest-first, then the new
/// text.
fn context_block(recent: &[Memory], text: &str) -> String {
    let mut block = String::from("Recent memories:\n");
    for memory in recent.iter().rev() {
        block.push_str("- ");
        block.push_str(&memory.content);
        block.push('\n');
    }
    block.push_str("\nNew memory:\n");
    block.push_str(text);
    block
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_block_is_chronological() {
        let now = Utc::now();
        let mk = |id: &str, content: &str| Memory {
            id: id.into(),
            user_id: "u".into(),
            content: content.into(),
            state: MemoryState::Active,
            metadata: None,
            valid_at: now,
            invalid_at: None,
            created_at: now,
            updated_at: now,
            archived_at: None,
            deleted_at: None,
            app_name: None,
            categories: vec![],
            extraction_status: None,
            extraction_attempts: 0,
            extraction_error: None,
            embedding: None,
        };
        // Input arrives newest-first, the block reads oldest-first.
        let block = context_block(&[mk("m2", "second"), mk("m1", "first")], "third");
        let first_pos = block.find("first").unwrap();
        let second_pos = block.find("second").unwrap();
        assert!(first_pos < second_pos);
        assert!(block.ends_with("third"));
    }
}
