//! Composition root
//!
//! Wires the graph store, gateways, and every engine component together.
//! [`Engine::connect`] builds the production wiring; [`Engine::with_parts`]
//! accepts any [`GraphStore`]/[`Embedder`]/[`ChatModel`] combination,
//! which is how tests run the full stack against in-memory fakes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use crate::backup::BackupService;
use crate::cluster::ClusterBuilder;
use crate::config::Config;
use crate::dedup::DedupEngine;
use crate::entity::{DEFAULT_SUMMARY_THRESHOLD, ExtractionWorker};
use crate::error::Result;
use crate::gateway::{ChatModel, Embedder, EmbeddingHealth, HttpChatModel, HttpEmbedder};
use crate::graph::{GraphStore, MemgraphStore};
use crate::ingest::MemoryService;
use crate::ingest::bulk::BulkIngestor;
use crate::search::RetrievalEngine;
use crate::worker::{TaskPool, spawn_extraction_reaper};

/// How often the reaper sweeps stuck extractions
const REAPER_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// HEALTH
// ============================================================================

/// One dependency's probe result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyHealth {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate liveness report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub memgraph: DependencyHealth,
    pub embeddings: EmbeddingHealth,
}

impl HealthReport {
    pub fn healthy(&self) -> bool {
        self.status == "ok"
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Fully wired memory engine
pub struct Engine {
    pub graph: Arc<dyn GraphStore>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn ChatModel>,
    pub dedup: Arc<DedupEngine>,
    pub memories: Arc<MemoryService>,
    pub bulk: Arc<BulkIngestor>,
    pub retrieval: Arc<RetrievalEngine>,
    pub clusters: Arc<ClusterBuilder>,
    pub backups: Arc<BackupService>,
    pool: TaskPool,
    max_extraction_attempts: u32,
}

impl Engine {
    /// Production wiring: connect to Memgraph, initialize the schema, and
    /// stand up the HTTP gateways.
    pub async fn connect(config: &Config) -> Result<Self> {
        let store = MemgraphStore::connect(&config.graph, config.embedding_dims).await?;
        store.init_schema().await?;
        info!(url = %config.graph.url, dims = config.embedding_dims, "graph schema ready");

        let graph: Arc<dyn GraphStore> = Arc::new(store);
        let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(
            config.embedding.clone(),
            config.embedding_dims,
        ));
        let llm: Arc<dyn ChatModel> = Arc::new(HttpChatModel::new(config.llm.clone()));
        Ok(Self::with_parts(graph, embedder, llm, config))
    }

    /// Wire the engine over arbitrary collaborators.
    pub fn with_parts(
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        config: &Config,
    ) -> Self {
        let pool = TaskPool::new(config.extraction_workers);
        let dedup = Arc::new(DedupEngine::new(
            Arc::clone(&graph),
            Arc::clone(&embedder),
            Arc::clone(&llm),
            config.dedup.enabled,
            config.dedup.threshold,
            config.dedup.max_candidates,
        ));
        let extraction = Arc::new(ExtractionWorker::new(
            Arc::clone(&graph),
            Arc::clone(&embedder),
            Arc::clone(&llm),
            DEFAULT_SUMMARY_THRESHOLD,
        ));
        let memories = Arc::new(MemoryService::new(
            Arc::clone(&graph),
            Arc::clone(&embedder),
            Arc::clone(&dedup),
            Arc::clone(&extraction),
            pool.clone(),
            config.context_window.clone(),
        ));
        let bulk = Arc::new(BulkIngestor::new(
            Arc::clone(&graph),
            Arc::clone(&embedder),
            Arc::clone(&dedup),
            Arc::clone(&extraction),
            pool.clone(),
            config.bulk_concurrency(),
        ));
        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::clone(&graph),
            Arc::clone(&embedder),
            Arc::clone(&llm),
        ));
        let clusters = Arc::new(ClusterBuilder::new(Arc::clone(&graph), Arc::clone(&llm)));
        let backups = Arc::new(BackupService::new(Arc::clone(&graph), Arc::clone(&bulk)));

        Self {
            graph,
            embedder,
            llm,
            dedup,
            memories,
            bulk,
            retrieval,
            clusters,
            backups,
            pool,
            max_extraction_attempts: config.max_extraction_attempts,
        }
    }

    /// Start the background sweep for wedged extraction records.
    pub fn start_reaper(&self) -> JoinHandle<()> {
        spawn_extraction_reaper(
            Arc::clone(&self.graph),
            self.max_extraction_attempts,
            REAPER_INTERVAL,
        )
    }

    /// Stop accepting background work (graceful shutdown).
    pub fn shutdown(&self) {
        self.pool.close();
    }

    /// Probe the graph store and the embedding provider.
    pub async fn health(&self) -> HealthReport {
        let started = Instant::now();
        let graph_result = self.graph.ping().await;
        let memgraph = DependencyHealth {
            ok: graph_result.is_ok(),
            latency_ms: started.elapsed().as_millis() as u64,
            error: graph_result.err().map(|e| e.to_string()),
        };
        let embeddings = self.embedder.health().await;

        let status = if memgraph.ok && embeddings.ok {
            "ok"
        } else {
            "degraded"
        };
        HealthReport {
            status,
            checks: HealthChecks {
                memgraph,
                embeddings,
            },
        }
    }
}
