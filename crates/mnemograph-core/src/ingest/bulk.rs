//! Bulk ingestion
//!
//! Up to 500 texts in one call: exact in-batch dedup, a semaphore-capped
//! fan-out into the cross-store dedup engine, one `embed_batch`, one
//! UNWIND write, then fire-and-forget extraction per new memory. Result
//! order always matches input order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dedup::{DedupDecision, DedupEngine};
use crate::error::{CoreError, Result};
use crate::gateway::Embedder;
use crate::graph::GraphStore;
use crate::memory::{Memory, MemoryState};
use crate::worker::TaskPool;

use super::ExtractionWorker;

/// Hard cap on one bulk request
pub const BULK_MAX_ITEMS: usize = 500;

// ============================================================================
// TYPES
// ============================================================================

/// One bulk input item
#[derive(Debug, Clone, Deserialize)]
pub struct BulkItem {
    pub text: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub valid_at: Option<DateTime<Utc>>,
}

/// Per-item outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkStatus {
    Added,
    SkippedDuplicate,
    Failed,
}

/// One bulk result, index-aligned with the input
#[derive(Debug, Clone, Serialize)]
pub struct BulkItemResult {
    pub text: String,
    pub status: BulkStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate bulk outcome
#[derive(Debug, Serialize)]
pub struct BulkReport {
    pub total: usize,
    pub added: usize,
    pub skipped_duplicate: usize,
    pub failed: usize,
    pub results: Vec<BulkItemResult>,
}

/// Progress callback: `(completed, total)`
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Bulk call options
#[derive(Clone, Default)]
pub struct BulkOptions {
    pub app_name: Option<String>,
    /// Cap on concurrent dedup calls; defaults to the RPM-derived cap
    pub concurrency: Option<usize>,
    /// Disable the cross-store dedup stage entirely (backup import)
    pub dedup_enabled: bool,
    pub on_progress: Option<ProgressFn>,
}

// ============================================================================
// INGESTOR
// ============================================================================

/// See module docs.
pub struct BulkIngestor {
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    dedup: Arc<DedupEngine>,
    extraction: Arc<ExtractionWorker>,
    pool: TaskPool,
    default_concurrency: usize,
}

impl BulkIngestor {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        dedup: Arc<DedupEngine>,
        extraction: Arc<ExtractionWorker>,
        pool: TaskPool,
        default_concurrency: usize,
    ) -> Self {
        Self {
            graph,
            embedder,
            dedup,
            extraction,
            pool,
            default_concurrency: default_concurrency.max(1),
        }
    }

    pub async fn ingest(
        &self,
        user_id: &str,
        items: Vec<BulkItem>,
        options: BulkOptions,
    ) -> Result<BulkReport> {
        if user_id.trim().is_empty() {
            return Err(CoreError::validation("user_id must not be empty"));
        }
        if items.len() > BULK_MAX_ITEMS {
            return Err(CoreError::validation(format!(
                "bulk requests are capped at {BULK_MAX_ITEMS} items, got {}",
                items.len()
            )));
        }
        let total = items.len();
        let mut completed = 0usize;
        let mut report_progress = |done: &mut usize, n: usize| {
            *done += n;
            if let Some(cb) = options.on_progress.as_ref() {
                cb(*done, total);
            }
        };

        let mut results: Vec<BulkItemResult> = items
            .iter()
            .map(|item| BulkItemResult {
                text: item.text.clone(),
                status: BulkStatus::Added,
                memory_id: None,
                error: None,
            })
            .collect();

        // Stage 1: in-batch exact dedup on case-insensitive trimmed text,
        // plus input validation.
        let mut seen: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut survivors: Vec<usize> = Vec::new();
        for (index, item) in items.iter().enumerate() {
            let normalized = item.text.trim().to_lowercase();
            if normalized.is_empty() {
                results[index].status = BulkStatus::Failed;
                results[index].error = Some("text must not be empty".into());
                report_progress(&mut completed, 1);
                continue;
            }
            if seen.contains_key(&normalized) {
                results[index].status = BulkStatus::SkippedDuplicate;
                report_progress(&mut completed, 1);
                continue;
            }
            seen.insert(normalized, index);
            survivors.push(index);
        }

        // Stage 2: cross-store near-dedup, bounded by the semaphore.
        let survivors = if options.dedup_enabled {
            let concurrency = options
                .concurrency
                .unwrap_or(self.default_concurrency)
                .max(1);
            let semaphore = Arc::new(Semaphore::new(concurrency));
            let decisions = join_all(survivors.iter().map(|&index| {
                let semaphore = Arc::clone(&semaphore);
                let dedup = Arc::clone(&self.dedup);
                let text = items[index].text.trim().to_string();
                let user_id = user_id.to_string();
                async move {
                    // A closed semaphore cannot happen here; fail open
                    // regardless.
                    let _permit = semaphore.acquire().await;
                    (index, dedup.decide(&text, &user_id).await)
                }
            }))
            .await;

            let mut kept = Vec::new();
            for (index, decision) in decisions {
                match decision {
                    DedupDecision::Insert => kept.push(index),
                    DedupDecision::Skip { existing_id }
                    | DedupDecision::Supersede { existing_id } => {
                        results[index].status = BulkStatus::SkippedDuplicate;
                        results[index].memory_id = Some(existing_id);
                        report_progress(&mut completed, 1);
                    }
                }
            }
            kept
        } else {
            survivors
        };

        if survivors.is_empty() {
            return Ok(finish_report(results));
        }

        // Stage 3: one batched embedding call for every survivor.
        let texts: Vec<String> = survivors
            .iter()
            .map(|&index| items[index].text.trim().to_string())
            .collect();
        let embeddings = match self.embedder.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(err) => {
                warn!(user_id, error = %err, "bulk embed_batch failed");
                let detail = err.to_string();
                for &index in &survivors {
                    results[index].status = BulkStatus::Failed;
                    results[index].error = Some(detail.clone());
                    report_progress(&mut completed, 1);
                }
                return Ok(finish_report(results));
            }
        };

        // Stage 4: one UNWIND write for every surviving memory.
        self.graph.ensure_user(user_id).await?;
        let now = Utc::now();
        let memories: Vec<Memory> = survivors
            .iter()
            .zip(embeddings)
            .map(|(&index, embedding)| {
                let item = &items[index];
                Memory {
                    id: Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    content: item.text.trim().to_string(),
                    state: MemoryState::Active,
                    metadata: item.metadata.clone(),
                    valid_at: item.valid_at.unwrap_or(now),
                    invalid_at: None,
                    created_at: now,
                    updated_at: now,
                    archived_at: None,
                    deleted_at: None,
                    app_name: options.app_name.clone(),
                    categories: vec![],
                    extraction_status: None,
                    extraction_attempts: 0,
                    extraction_error: None,
                    embedding: Some(embedding),
                }
            })
            .collect();
        self.graph.create_memories(&memories).await?;

        // Stage 5: fire-and-forget extraction, then finalize results.
        for (&index, memory) in survivors.iter().zip(&memories) {
            results[index].memory_id = Some(memory.id.clone());
            let worker = Arc::clone(&self.extraction);
            let memory_id = memory.id.clone();
            let owner = user_id.to_string();
            self.pool.spawn(async move {
                worker.run(&memory_id, &owner).await;
            });
            report_progress(&mut completed, 1);
        }

        let report = finish_report(results);
        info!(
            user_id,
            total = report.total,
            added = report.added,
            skipped = report.skipped_duplicate,
            failed = report.failed,
            "bulk ingest finished"
        );
        Ok(report)
    }
}

fn finish_report(results: Vec<BulkItemResult>) -> BulkReport {
    let added = results.iter().filter(|r| r.status == BulkStatus::Added).count();
    let skipped_duplicate = results
        .iter()
        .filter(|r| r.status == BulkStatus::SkippedDuplicate)
        .count();
    let failed = results.iter().filter(|r| r.status == BulkStatus::Failed).count();
    BulkReport {
        total: results.len(),
        added,
        skipped_duplicate,
        failed,
        results,
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderClass;
    use crate::entity::DEFAULT_SUMMARY_THRESHOLD;
    use crate::error::GatewayError;
    use crate::gateway::{ChatMessage, ChatModel, ChatOptions};
    use crate::graph::InMemoryGraph;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        batch_calls: AtomicUsize,
        last_batch_len: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, GatewayError> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, GatewayError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            self.last_batch_len.store(texts.len(), Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dim(&self) -> usize {
            2
        }

        fn provider(&self) -> ProviderClass {
            ProviderClass::OpenAi
        }

        fn model(&self) -> &str {
            "counting"
        }
    }

    struct NoChat;

    #[async_trait]
    impl ChatModel for NoChat {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> std::result::Result<String, GatewayError> {
            Err(GatewayError::Transport("down".into()))
        }
    }

    fn fixture() -> (Arc<InMemoryGraph>, Arc<CountingEmbedder>, BulkIngestor) {
        let graph = Arc::new(InMemoryGraph::new());
        let embedder = Arc::new(CountingEmbedder {
            batch_calls: AtomicUsize::new(0),
            last_batch_len: AtomicUsize::new(0),
        });
        let llm = Arc::new(NoChat);
        let dedup = Arc::new(DedupEngine::new(
            Arc::clone(&graph) as Arc<dyn GraphStore>,
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            Arc::clone(&llm) as Arc<dyn ChatModel>,
            true,
            Some(0.9),
            5,
        ));
        let extraction = Arc::new(ExtractionWorker::new(
            Arc::clone(&graph) as Arc<dyn GraphStore>,
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            llm,
            DEFAULT_SUMMARY_THRESHOLD,
        ));
        let ingestor = BulkIngestor::new(
            Arc::clone(&graph) as Arc<dyn GraphStore>,
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            dedup,
            extraction,
            TaskPool::new(2),
            3,
        );
        (graph, embedder, ingestor)
    }

    fn item(text: &str) -> BulkItem {
        BulkItem {
            text: text.into(),
            metadata: None,
            valid_at: None,
        }
    }

    #[tokio::test]
    async fn in_batch_duplicate_is_skipped_and_batch_embedded_once() {
        let (graph, embedder, ingestor) = fixture();
        let report = ingestor
            .ingest(
                "u",
                vec![item("same"), item("different"), item("SAME")],
                BulkOptions {
                    dedup_enabled: false,
                    ..BulkOptions::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.added, 2);
        assert_eq!(report.skipped_duplicate, 1);
        assert_eq!(report.results[0].status, BulkStatus::Added);
        assert_eq!(report.results[1].status, BulkStatus::Added);
        assert_eq!(report.results[2].status, BulkStatus::SkippedDuplicate);
        // Results stay index-aligned with the inputs.
        assert_eq!(report.results[2].text, "SAME");

        assert_eq!(embedder.batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(embedder.last_batch_len.load(Ordering::SeqCst), 2);
        assert_eq!(graph.live_memory_count("u"), 2);
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected() {
        let (_, _, ingestor) = fixture();
        let items: Vec<BulkItem> = (0..=BULK_MAX_ITEMS).map(|i| item(&format!("t{i}"))).collect();
        let result = ingestor.ingest("u", items, BulkOptions::default()).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn empty_text_fails_that_item_only() {
        let (_, _, ingestor) = fixture();
        let report = ingestor
            .ingest(
                "u",
                vec![item("  "), item("ok")],
                BulkOptions {
                    dedup_enabled: false,
                    ..BulkOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.added, 1);
        assert_eq!(report.results[0].status, BulkStatus::Failed);
    }

    #[tokio::test]
    async fn progress_reaches_total() {
        let (_, _, ingestor) = fixture();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen_cb = Arc::clone(&seen);
        let report = ingestor
            .ingest(
                "u",
                vec![item("a"), item("b"), item("a")],
                BulkOptions {
                    dedup_enabled: false,
                    on_progress: Some(Arc::new(move |done, total| {
                        seen_cb.lock().push((done, total));
                    })),
                    ..BulkOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(report.total, 3);
        let calls = seen.lock().clone();
        assert_eq!(calls.last().copied(), Some((3, 3)));
    }

    #[tokio::test]
    async fn cross_store_dedup_marks_duplicates() {
        let (graph, _, ingestor) = fixture();
        // First round inserts "same fact".
        ingestor
            .ingest(
                "u",
                vec![item("same fact")],
                BulkOptions {
                    dedup_enabled: false,
                    ..BulkOptions::default()
                },
            )
            .await
            .unwrap();
        // Second round: the dedup engine sees an identical live vector but
        // the verification LLM is down, so it fails open to insert.
        let report = ingestor
            .ingest(
                "u",
                vec![item("same fact")],
                BulkOptions {
                    dedup_enabled: true,
                    ..BulkOptions::default()
                },
            )
            .await
            .unwrap();
        // Fail-open keeps the item.
        assert_eq!(report.added, 1);
        assert_eq!(graph.live_memory_count("u"), 2);
    }
}
