//! Hybrid retrieval engine
//!
//! Lexical and vector arms run over the user's live memories and are
//! fused rank-only with RRF; an optional graph-traversal arm joins the
//! fusion for entity-heavy queries, and optional MMR diversifies the
//! final page. A failing arm is dropped, never surfaced - the other
//! arm's ranking stands alone.

mod mmr;
mod rrf;

pub use mmr::{DEFAULT_MMR_LAMBDA, MmrCandidate, mmr_select};
pub use rrf::{FusedHit, RRF_K, reciprocal_rank_fusion};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{CoreError, Result};
use crate::gateway::{ChatMessage, ChatModel, ChatOptions, Embedder};
use crate::graph::GraphStore;
use crate::memory::Memory;

/// Over-sampling factor for index arms, so post-filtering by ownership
/// and liveness still fills a page.
const OVERSAMPLE: usize = 4;

/// Seed/neighbor caps for the graph-traversal arm
const GRAPH_SEED_LIMIT: usize = 8;
const GRAPH_NEIGHBOR_LIMIT: usize = 16;

// ============================================================================
// REQUEST TYPES
// ============================================================================

/// Which arms participate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Text + vector, RRF-fused (best results)
    #[default]
    Hybrid,
    /// Lexical arm only
    Text,
    /// Vector arm only
    Vector,
}

/// Search knobs
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub top_k: usize,
    pub mode: SearchMode,
    /// MMR diversification over the final page
    pub rerank: bool,
    pub mmr_lambda: f64,
    /// Add the graph-traversal arm to the fusion
    pub use_graph: bool,
    /// When set, every returned hit gets an ACCESSED log entry
    pub app_name: Option<String>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            mode: SearchMode::Hybrid,
            rerank: false,
            mmr_lambda: DEFAULT_MMR_LAMBDA,
            use_graph: false,
            app_name: None,
        }
    }
}

/// One search result with fusion provenance
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    #[serde(flatten)]
    pub memory: Memory,
    pub rrf_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// See module docs.
pub struct RetrievalEngine {
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
}

impl RetrievalEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
    ) -> Self {
        Self { graph, embedder, llm }
    }

    pub async fn search(
        &self,
        user_id: &str,
        query: &str,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(CoreError::validation("query must not be empty"));
        }
        let top_k = options.top_k.clamp(1, 100);
        let fetch = top_k * OVERSAMPLE;

        let text_ids = if options.mode != SearchMode::Vector {
            match self.graph.text_search(user_id, query, fetch).await {
                Ok(ids) => ids,
                Err(err) => {
                    warn!(user_id, error = %err, "text arm failed; continuing without it");
                    vec![]
                }
            }
        } else {
            vec![]
        };

        let mut vector_scores: HashMap<String, f64> = HashMap::new();
        let vector_ids = if options.mode != SearchMode::Text {
            match self.vector_arm(user_id, query, fetch).await {
                Ok(hits) => {
                    let ids: Vec<String> = hits.iter().map(|(id, _)| id.clone()).collect();
                    vector_scores = hits.into_iter().collect();
                    ids
                }
                Err(err) => {
                    warn!(user_id, error = %err, "vector arm failed; continuing without it");
                    vec![]
                }
            }
        } else {
            vec![]
        };

        let graph_ids = if options.use_graph && options.mode == SearchMode::Hybrid {
            self.graph_arm(user_id, query, fetch).await
        } else {
            vec![]
        };

        let mut fused = reciprocal_rank_fusion(&text_ids, &vector_ids, &graph_ids, RRF_K);
        fused.truncate(top_k);
        debug!(
            user_id,
            text = text_ids.len(),
            vector = vector_ids.len(),
            graph = graph_ids.len(),
            fused = fused.len(),
            "search arms fused"
        );

        // Single batched hydration; embeddings only travel when MMR
        // needs them.
        let ids: Vec<String> = fused.iter().map(|hit| hit.id.clone()).collect();
        let hydrated = self
            .graph
            .memories_by_ids(user_id, &ids, options.rerank)
            .await?;
        let mut by_id: HashMap<String, Memory> =
            hydrated.into_iter().map(|m| (m.id.clone(), m)).collect();

        let mut hits: Vec<SearchHit> = fused
            .into_iter()
            .filter_map(|fused_hit| {
                by_id.remove(&fused_hit.id).map(|memory| SearchHit {
                    vector_score: vector_scores.get(&fused_hit.id).copied(),
                    memory,
                    rrf_score: fused_hit.rrf_score,
                    text_rank: fused_hit.text_rank,
                    vector_rank: fused_hit.vector_rank,
                    graph_rank: fused_hit.graph_rank,
                })
            })
            .collect();

        if options.rerank && hits.len() > 1 {
            let candidates: Vec<MmrCandidate> = hits
                .iter()
                .map(|hit| MmrCandidate {
                    id: hit.memory.id.clone(),
                    relevance: hit.rrf_score,
                    embedding: hit.memory.embedding.clone(),
                })
                .collect();
            let order = mmr_select(&candidates, options.mmr_lambda, top_k);
            let mut reordered = Vec::with_capacity(order.len());
            let mut slots: Vec<Option<SearchHit>> = hits.into_iter().map(Some).collect();
            for index in order {
                if let Some(hit) = slots[index].take() {
                    reordered.push(hit);
                }
            }
            hits = reordered;
        }

        // Vectors served their purpose; keep response payloads lean.
        for hit in &mut hits {
            hit.memory.embedding = None;
        }

        if let Some(app) = options.app_name.as_deref() {
            let now = Utc::now();
            for hit in &hits {
                if let Err(err) = self
                    .graph
                    .record_access(user_id, &hit.memory.id, app, Some(query), now)
                    .await
                {
                    warn!(user_id, memory_id = %hit.memory.id, error = %err,
                        "access log write failed");
                }
            }
        }

        Ok(hits)
    }

    async fn vector_arm(
        &self,
        user_id: &str,
        query: &str,
        fetch: usize,
    ) -> Result<Vec<(String, f64)>> {
        let vector = self
            .embedder
            .embed(query)
            .await
            .map_err(CoreError::Embedding)?;
        Ok(self.graph.vector_search(user_id, &vector, fetch).await?)
    }

    /// Graph-traversal arm: terms -> seed entities -> one-hop neighbors
    /// -> mentioned memories. Every step fails open to an empty list.
    async fn graph_arm(&self, user_id: &str, query: &str, fetch: usize) -> Vec<String> {
        let terms = self.extract_terms(query).await;
        if terms.is_empty() {
            return vec![];
        }
        let seeds = match self
            .graph
            .entity_seeds_for_terms(user_id, &terms, GRAPH_SEED_LIMIT)
            .await
        {
            Ok(seeds) => seeds,
            Err(err) => {
                warn!(user_id, error = %err, "graph arm seed lookup failed");
                return vec![];
            }
        };
        if seeds.is_empty() {
            return vec![];
        }
        let seed_ids: Vec<String> = seeds.into_iter().map(|(id, _)| id).collect();
        let neighbors = match self
            .graph
            .neighbor_entities(user_id, &seed_ids, GRAPH_NEIGHBOR_LIMIT)
            .await
        {
            Ok(neighbors) => neighbors,
            Err(err) => {
                warn!(user_id, error = %err, "graph arm expansion failed");
                vec![]
            }
        };
        let mut entity_ids = seed_ids;
        entity_ids.extend(neighbors.into_iter().map(|(id, _)| id));

        match self
            .graph
            .memories_mentioning(user_id, &entity_ids, fetch)
            .await
        {
            Ok(ids) => ids,
            Err(err) => {
                warn!(user_id, error = %err, "graph arm memory gather failed");
                vec![]
            }
        }
    }

    /// Search-term extraction: LLM first, regex fallback keeping tokens
    /// of three or more characters.
    async fn extract_terms(&self, query: &str) -> Vec<String> {
        let messages = [
            ChatMessage::system(
                "Extract up to 5 search terms (names, entities, rare words) from the query. \
                 Respond with a JSON object: {\"terms\": [\"...\"]}.",
            ),
            ChatMessage::user(query.to_string()),
        ];
        let options = ChatOptions {
            max_tokens: 64,
            ..ChatOptions::json()
        };
        if let Ok(answer) = self.llm.chat(&messages, &options).await {
            #[derive(Deserialize)]
            struct Terms {
                terms: Vec<String>,
            }
            if let Ok(parsed) = serde_json::from_str::<Terms>(answer.trim()) {
                let terms: Vec<String> = parsed
                    .terms
                    .into_iter()
                    .map(|t| t.trim().to_lowercase())
                    .filter(|t| t.len() >= 3)
                    .collect();
                if !terms.is_empty() {
                    return terms;
                }
            }
        }
        fallback_terms(query)
    }
}

/// Regex fallback for term extraction.
pub fn fallback_terms(query: &str) -> Vec<String> {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| Regex::new(r"[A-Za-z0-9_]{3,}").expect("valid regex"));
    let mut seen = std::collections::HashSet::new();
    token
        .find_iter(query)
        .map(|m| m.as_str().to_lowercase())
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderClass;
    use crate::error::GatewayError;
    use crate::graph::InMemoryGraph;
    use crate::memory::MemoryState;
    use async_trait::async_trait;

    struct KeyedEmbedder {
        vectors: HashMap<String, Vec<f32>>,
        fail: bool,
    }

    #[async_trait]
    impl Embedder for KeyedEmbedder {
        async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, GatewayError> {
            if self.fail {
                return Err(GatewayError::Transport("down".into()));
            }
            Ok(self
                .vectors
                .get(text)
                .cloned()
                .unwrap_or_else(|| vec![1.0, 0.0]))
        }

        async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, GatewayError> {
            let mut out = Vec::new();
            for text in texts {
                out.push(self.embed(text).await?);
            }
            Ok(out)
        }

        fn dim(&self) -> usize {
            2
        }

        fn provider(&self) -> ProviderClass {
            ProviderClass::OpenAi
        }

        fn model(&self) -> &str {
            "keyed"
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

    async fn seed(graph: &InMemoryGraph, id: &str, content: &str, embedding: Vec<f32>) {
        let now = Utc::now();
        graph
            .create_memory(&Memory {
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
                embedding: Some(embedding),
            })
            .await
            .unwrap();
    }

    fn engine(graph: Arc<InMemoryGraph>, fail_embed: bool) -> RetrievalEngine {
        let mut vectors = HashMap::new();
        vectors.insert("coffee habits".to_string(), vec![1.0, 0.0]);
        RetrievalEngine::new(
            graph,
            Arc::new(KeyedEmbedder {
                vectors,
                fail: fail_embed,
            }),
            Arc::new(NoChat),
        )
    }

    #[test]
    fn fallback_terms_keep_long_tokens() {
        assert_eq!(
            fallback_terms("is Rust at Acme ok?"),
            vec!["rust".to_string(), "acme".to_string()]
        );
        // Dedup preserves first appearance.
        assert_eq!(fallback_terms("acme ACME acme"), vec!["acme".to_string()]);
    }

    #[tokio::test]
    async fn empty_query_is_a_validation_error() {
        let graph = Arc::new(InMemoryGraph::new());
        let result = engine(graph, false)
            .search("u", "  ", &SearchOptions::default())
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn hybrid_prefers_documents_in_both_arms() {
        let graph = Arc::new(InMemoryGraph::new());
        // "coffee" matches lexically; embeddings put m2 closest to query.
        seed(&graph, "m1", "I drink coffee daily", vec![0.9, 0.1]).await;
        seed(&graph, "m2", "coffee is my favourite drink", vec![1.0, 0.0]).await;
        seed(&graph, "m3", "tea is fine", vec![0.0, 1.0]).await;

        let hits = engine(Arc::clone(&graph), false)
            .search("u", "coffee habits", &SearchOptions::default())
            .await
            .unwrap();

        assert_eq!(hits.len(), 3);
        // m2 leads both arms; m3 only appears in the vector arm's tail.
        assert_eq!(hits[0].memory.id, "m2");
        assert!(hits[0].text_rank.is_some() && hits[0].vector_rank.is_some());
        let tail = hits.last().unwrap();
        assert_eq!(tail.memory.id, "m3");
        assert!(tail.text_rank.is_none());
        assert!(hits[0].memory.embedding.is_none(), "vectors must not leak");
    }

    #[tokio::test]
    async fn vector_arm_failure_leaves_text_ranking() {
        let graph = Arc::new(InMemoryGraph::new());
        seed(&graph, "m1", "I drink coffee daily", vec![1.0, 0.0]).await;

        let hits = engine(Arc::clone(&graph), true)
            .search("u", "coffee", &SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].vector_rank, None);
        assert_eq!(hits[0].text_rank, Some(1));
    }

    #[tokio::test]
    async fn text_mode_skips_the_vector_arm() {
        let graph = Arc::new(InMemoryGraph::new());
        seed(&graph, "m1", "I drink coffee daily", vec![1.0, 0.0]).await;

        let options = SearchOptions {
            mode: SearchMode::Text,
            ..SearchOptions::default()
        };
        let hits = engine(Arc::clone(&graph), false)
            .search("u", "coffee", &options)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].vector_rank.is_none());
    }

    #[tokio::test]
    async fn access_log_records_search_hits() {
        let graph = Arc::new(InMemoryGraph::new());
        seed(&graph, "m1", "I drink coffee daily", vec![1.0, 0.0]).await;

        let options = SearchOptions {
            app_name: Some("cli".into()),
            ..SearchOptions::default()
        };
        engine(Arc::clone(&graph), false)
            .search("u", "coffee", &options)
            .await
            .unwrap();

        let log = graph.access_log("u", "m1", 1, 10).await.unwrap();
        assert_eq!(log.total, 1);
        assert_eq!(log.items[0].query_used.as_deref(), Some("coffee"));
    }
}
