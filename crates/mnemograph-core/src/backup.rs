//! Backup export and import
//!
//! Versioned JSON snapshots of a user's memories. Import re-runs the
//! full embedding + write path through the bulk ingestor with dedup
//! disabled, so restored stores are indexed exactly like live ones.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{CoreError, Result};
use crate::graph::GraphStore;
use crate::ingest::bulk::{BulkIngestor, BulkItem, BulkOptions};
use crate::memory::MemoryState;

/// Current backup format version
pub const BACKUP_VERSION: &str = "2.0";

// ============================================================================
// FORMAT
// ============================================================================

/// One exported memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupMemory {
    pub id: String,
    pub content: String,
    pub state: MemoryState,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

/// The backup file
#[derive(Debug, Serialize, Deserialize)]
pub struct BackupFile {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub memories: Vec<BackupMemory>,
}

/// Import outcome
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub failed: usize,
    pub total: usize,
}

// ============================================================================
// SERVICE
// ============================================================================

/// See module docs.
pub struct BackupService {
    graph: Arc<dyn GraphStore>,
    bulk: Arc<BulkIngestor>,
}

impl BackupService {
    pub fn new(graph: Arc<dyn GraphStore>, bulk: Arc<BulkIngestor>) -> Self {
        Self { graph, bulk }
    }

    /// Snapshot every memory the user owns, embeddings included.
    pub async fn export(&self, user_id: &str) -> Result<BackupFile> {
        let memories = self.graph.export_memories(user_id).await?;
        let exported: Vec<BackupMemory> = memories
            .into_iter()
            .map(|memory| BackupMemory {
                id: memory.id,
                content: memory.content,
                state: memory.state,
                created_at: memory.created_at,
                user_id: memory.user_id,
                app_name: memory.app_name,
                categories: memory.categories,
                metadata: memory.metadata,
                embedding: memory.embedding.unwrap_or_default(),
            })
            .collect();
        info!(user_id, memories = exported.len(), "backup exported");
        Ok(BackupFile {
            version: BACKUP_VERSION.to_string(),
            exported_at: Utc::now(),
            memories: exported,
        })
    }

    /// Restore a backup into `user_id`. Memories are re-embedded and
    /// rewritten through the bulk path with dedup off; deleted memories
    /// in the snapshot are not restored.
    pub async fn import(&self, user_id: &str, file: BackupFile) -> Result<ImportReport> {
        if file.version != BACKUP_VERSION {
            return Err(CoreError::validation(format!(
                "unsupported backup version '{}', expected '{BACKUP_VERSION}'",
                file.version
            )));
        }
        let total = file.memories.len();

        // The bulk path carries one app label per call, so restore app by
        // app, preserving the snapshot's provenance.
        let mut by_app: BTreeMap<Option<String>, Vec<BulkItem>> = BTreeMap::new();
        let mut skipped_deleted = 0usize;
        for memory in file.memories {
            if memory.state == MemoryState::Deleted {
                skipped_deleted += 1;
                continue;
            }
            by_app.entry(memory.app_name).or_default().push(BulkItem {
                text: memory.content,
                metadata: memory.metadata,
                valid_at: Some(memory.created_at),
            });
        }

        let mut imported = 0usize;
        let mut failed = 0usize;
        for (app_name, items) in by_app {
            for chunk in items.chunks(crate::ingest::bulk::BULK_MAX_ITEMS) {
                let report = self
                    .bulk
                    .ingest(
                        user_id,
                        chunk.to_vec(),
                        BulkOptions {
                            app_name: app_name.clone(),
                            dedup_enabled: false,
                            ..BulkOptions::default()
                        },
                    )
                    .await?;
                imported += report.added;
                failed += report.failed;
            }
        }
        info!(user_id, imported, failed, skipped_deleted, "backup imported");
        Ok(ImportReport {
            imported,
            failed,
            total,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_round_trips_through_json() {
        let file = BackupFile {
            version: BACKUP_VERSION.into(),
            exported_at: Utc::now(),
            memories: vec![BackupMemory {
                id: "m1".into(),
                content: "I prefer dark mode".into(),
                state: MemoryState::Active,
                created_at: Utc::now(),
                user_id: "u".into(),
                app_name: Some("cli".into()),
                categories: vec!["preferences".into()],
                metadata: Some(serde_json::json!({"source": "test"})),
                embedding: vec![0.1, 0.2],
            }],
        };
        let encoded = serde_json::to_string(&file).unwrap();
        let decoded: BackupFile = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.version, BACKUP_VERSION);
        assert_eq!(decoded.memories.len(), 1);
        assert_eq!(decoded.memories[0].content, "I prefer dark mode");
    }

    #[test]
    fn missing_optionals_default() {
        let raw = r#"{
            "version": "2.0",
            "exported_at": "2026-01-01T00:00:00Z",
            "memories": [{
                "id": "m1", "content": "x", "state": "active",
                "created_at": "2026-01-01T00:00:00Z", "user_id": "u"
            }]
        }"#;
        let decoded: BackupFile = serde_json::from_str(raw).unwrap();
        assert!(decoded.memories[0].embedding.is_empty());
        assert!(decoded.memories[0].app_name.is_none());
    }
}
