//! # Mnemograph Core
//!
//! Per-user long-term memory engine for LLM agents. Sits between an HTTP
//! surface and a Memgraph/vector backend and implements:
//!
//! - **Ingestion pipeline**: dedup, context-enriched embedding, temporal
//!   write, asynchronous entity extraction
//! - **Bi-temporal model**: `valid_at`/`invalid_at` plus SUPERSEDES edges;
//!   superseded facts stay readable under as-of queries
//! - **Dedup engine**: vector candidates, LLM verification, negation gate,
//!   fail-open to insert
//! - **Entity layer**: resolve-or-merge with type priority, relationship
//!   contradiction handling, degree-centrality ranks, summary synthesis
//! - **Hybrid retrieval**: lexical + vector arms fused with Reciprocal
//!   Rank Fusion, optional MMR diversification and a graph-traversal arm
//! - **Bulk ingest**: batched embedding, single-transaction write, a
//!   concurrency-capped dedup fan-out
//! - **Clustering**: entity communities with LLM-written names/summaries
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mnemograph_core::{AddMemory, Engine, Config};
//!
//! let config = Config::from_env()?;
//! let engine = Engine::connect(&config).await?;
//!
//! let outcome = engine
//!     .memories
//!     .add_memory(AddMemory::new("I prefer dark mode", "user-1"))
//!     .await?;
//!
//! let hits = engine
//!     .retrieval
//!     .search("user-1", "theme preference", &Default::default())
//!     .await?;
//! ```

// ============================================================================
// MODULES
// ============================================================================

pub mod backup;
pub mod cluster;
pub mod config;
pub mod dedup;
pub mod entity;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod ingest;
pub mod memory;
pub mod search;
pub mod worker;

mod engine;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use backup::{BACKUP_VERSION, BackupFile, BackupMemory, BackupService, ImportReport};
pub use cluster::{ClusterBuilder, Community};
pub use config::{Config, ConfigError, ContextWindowConfig, DedupConfig, GatewayConfig, GraphConfig, ProviderClass};
pub use dedup::{DedupDecision, DedupEngine, Verdict, has_negation, pair_hash};
pub use engine::{DependencyHealth, Engine, HealthChecks, HealthReport};
pub use entity::{
    Entity, EntityRelation, EntityResolver, ExtractedEntity, ExtractionOutcome, ExtractionWorker,
    LinkOutcome, RelationshipLinker, SummarySynthesizer,
};
pub use error::{CoreError, GatewayError, GraphError, Result};
pub use gateway::{
    ChatMessage, ChatModel, ChatOptions, ChatRole, Embedder, EmbeddingHealth, HttpChatModel,
    HttpEmbedder, cosine_similarity, unit_normalize,
};
pub use graph::{AppCount, GraphStore, InMemoryGraph, MemgraphStore, UserStats};
pub use ingest::bulk::{
    BULK_MAX_ITEMS, BulkIngestor, BulkItem, BulkItemResult, BulkOptions, BulkReport, BulkStatus,
};
pub use ingest::{AddMemory, MemoryService};
pub use memory::{
    AccessLogEntry, AddOutcome, Disposition, ExtractionStatus, Memory, MemoryFilter, MemoryState,
    Page, TemporalMode,
};
pub use search::{
    FusedHit, MmrCandidate, RRF_K, RetrievalEngine, SearchHit, SearchMode, SearchOptions,
    mmr_select, reciprocal_rank_fusion,
};
pub use worker::{TaskPool, spawn_extraction_reaper};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AddMemory, ChatModel, Config, CoreError, DedupEngine, Embedder, Engine, GraphStore,
        Memory, MemoryFilter, MemoryService, MemoryState, Result, RetrievalEngine, SearchMode,
        SearchOptions, TemporalMode,
    };
}
