//! Error taxonomy
//!
//! Kinds, not types: validation, not-found/not-owned, dependency
//! unavailable, and internal bugs each get their own variant so the
//! HTTP layer can map them without string matching. Policy fallbacks
//! (unparseable LLM output) never become errors - each caller has a
//! documented safe default.

use thiserror::Error;

// ============================================================================
// GRAPH STORE ERRORS
// ============================================================================

/// Errors surfaced by the graph-store adapter
#[derive(Debug, Error)]
pub enum GraphError {
    /// Authentication or network failure while reaching the store
    #[error("graph connectivity error: {0}")]
    Connectivity(String),
    /// The store rejected or failed a query
    #[error("graph query error: {0}")]
    Query(String),
    /// A required extension (e.g. community detection) is not installed
    #[error("graph capability unavailable: {0}")]
    CapabilityUnavailable(String),
    /// A row came back in a shape the adapter cannot decode
    #[error("graph row decode error: {0}")]
    Decode(String),
}

// ============================================================================
// GATEWAY ERRORS
// ============================================================================

/// Errors surfaced by the embedding and chat gateways
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure (DNS, TLS, timeout)
    #[error("gateway transport error: {0}")]
    Transport(String),
    /// The provider answered with a non-success status
    #[error("provider returned {status}: {detail}")]
    Provider { status: u16, detail: String },
    /// The provider answered 2xx but the body was not the expected shape
    #[error("unexpected provider response: {0}")]
    InvalidResponse(String),
    /// An embedding came back with the wrong number of dimensions
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

// ============================================================================
// CORE ERRORS
// ============================================================================

/// Top-level error for every engine operation
#[derive(Debug, Error)]
pub enum CoreError {
    /// User input failed a contract (empty text, bad range, oversized batch)
    #[error("{0}")]
    Validation(String),
    /// The graph path from the user yielded nothing. Deliberately covers
    /// both "does not exist" and "owned by someone else".
    #[error("not found: {0}")]
    NotFound(String),
    /// Graph store failure
    #[error(transparent)]
    Graph(#[from] GraphError),
    /// Embedding provider failure on a hot path
    #[error("embedding gateway: {0}")]
    Embedding(GatewayError),
    /// LLM provider failure on a hot path
    #[error("llm gateway: {0}")]
    Chat(GatewayError),
    /// Invariant violation - always a bug
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Shorthand for a validation failure
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    /// Shorthand for a not-found (or not-owned) failure
    pub fn not_found(what: impl Into<String>) -> Self {
        CoreError::NotFound(what.into())
    }
}

/// Core result type
pub type Result<T> = std::result::Result<T, CoreError>;

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_converts_into_core_error() {
        let err: CoreError = GraphError::Connectivity("refused".into()).into();
        assert!(matches!(err, CoreError::Graph(GraphError::Connectivity(_))));
    }

    #[test]
    fn display_carries_detail() {
        let err = CoreError::validation("text must not be empty");
        assert_eq!(err.to_string(), "text must not be empty");

        let err = GatewayError::Provider {
            status: 429,
            detail: "rate limited".into(),
        };
        assert!(err.to_string().contains("429"));
    }
}
