//! Memory - the unit of knowledge
//!
//! A memory is one self-contained natural-language fact owned by exactly
//! one user. Records are bi-temporal: `valid_at`/`invalid_at` bound the
//! fact's validity while `created_at`/`updated_at` track the system row.
//! A memory with `invalid_at = None` and a state other than `deleted`
//! is "live".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================================================
// STATES
// ============================================================================

/// Lifecycle state of a memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryState {
    /// Normal, searchable
    #[default]
    Active,
    /// Temporarily excluded from retrieval
    Paused,
    /// Kept for the record, hidden unless asked for
    Archived,
    /// Soft-deleted; `invalid_at` is always set
    Deleted,
}

impl MemoryState {
    /// String form stored in the graph
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryState::Active => "active",
            MemoryState::Paused => "paused",
            MemoryState::Archived => "archived",
            MemoryState::Deleted => "deleted",
        }
    }

    /// Parse from the stored string; unknown values read as active
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "paused" => MemoryState::Paused,
            "archived" => MemoryState::Archived,
            "deleted" => MemoryState::Deleted,
            _ => MemoryState::Active,
        }
    }
}

impl std::fmt::Display for MemoryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of the asynchronous entity-extraction worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    /// A worker claimed the memory
    Pending,
    /// Extraction finished and links were written
    Done,
    /// Extraction gave up; `extraction_error` says why
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Done => "done",
            ExtractionStatus::Failed => "failed",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(ExtractionStatus::Pending),
            "done" => Some(ExtractionStatus::Done),
            "failed" => Some(ExtractionStatus::Failed),
            _ => None,
        }
    }
}

// ============================================================================
// MEMORY
// ============================================================================

/// A stored memory
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Owning user
    pub user_id: String,
    /// Original text; never rewritten except by an explicit update
    pub content: String,
    /// Lifecycle state
    pub state: MemoryState,
    /// Opaque caller-supplied metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Instant the fact became true
    pub valid_at: DateTime<Utc>,
    /// Instant the fact was superseded or deleted; `None` means live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Source application label (provenance, display only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
    /// Classification tags
    #[serde(default)]
    pub categories: Vec<String>,
    /// Absent until a worker first claims the memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_status: Option<ExtractionStatus>,
    #[serde(default)]
    pub extraction_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_error: Option<String>,
    /// Dense unit-norm vector; only hydrated when a caller asks for it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Memory {
    /// Live means not superseded and not deleted
    pub fn is_live(&self) -> bool {
        self.invalid_at.is_none() && self.state != MemoryState::Deleted
    }

    /// Was this fact valid at `ts`?
    pub fn is_valid_at(&self, ts: DateTime<Utc>) -> bool {
        self.valid_at <= ts && self.invalid_at.map(|end| end > ts).unwrap_or(true)
    }
}

// ============================================================================
// ADD OUTCOMES
// ============================================================================

/// What the ingestion pipeline did with one piece of text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// A new memory was written
    Inserted,
    /// Dedup found an equivalent live memory; nothing was written
    Skipped { existing_id: String },
    /// Dedup found an outdated fact; it was invalidated and replaced
    Superseded { previous_id: String },
}

/// Result of `add_memory`
#[derive(Debug, Clone)]
pub struct AddOutcome {
    /// Id the caller should use from now on (the existing id on skip)
    pub memory_id: String,
    pub disposition: Disposition,
}

// ============================================================================
// LISTING
// ============================================================================

/// Which slice of the timeline a listing sees
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum TemporalMode {
    /// Only memories with `invalid_at = None`
    #[default]
    Live,
    /// No validity filter at all
    IncludeSuperseded,
    /// Memories valid at the given instant
    AsOf(DateTime<Utc>),
}

/// Filters for `list_memories`
#[derive(Debug, Clone, Default)]
pub struct MemoryFilter {
    pub state: Option<MemoryState>,
    pub app_name: Option<String>,
    pub category: Option<String>,
    /// Case-insensitive content substring
    pub search: Option<String>,
    /// Archived memories are hidden unless this is set
    pub show_archived: bool,
    pub temporal: TemporalMode,
}

/// One page of results plus the unpaginated total
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub size: usize,
}

impl<T> Page<T> {
    /// Number of pages at the current size
    pub fn pages(&self) -> usize {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(self.size)
    }
}

/// One row of a memory's access log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessLogEntry {
    pub app_name: String,
    pub accessed_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_used: Option<String>,
}

// ============================================================================
// TESTS
// ============================================================================
