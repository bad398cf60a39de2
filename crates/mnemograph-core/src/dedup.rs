//! Deduplication decision engine
//!
//! Two stages: vector candidates over the user's live memories, then an
//! LLM verdict on the top candidate, guarded by a negation gate. The
//! whole engine fails open - any internal error yields `Insert`, because
//! a duplicate write is recoverable and a dropped memory is not.

use std::collections::HashSet;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::config::ProviderClass;
use crate::gateway::{ChatMessage, ChatModel, ChatOptions, Embedder};
use crate::graph::GraphStore;

// ============================================================================
// DECISIONS
// ============================================================================

/// Outcome of the dedup pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DedupDecision {
    /// No equivalent memory; write a new one
    Insert,
    /// An equivalent live memory exists; return it instead of writing
    Skip { existing_id: String },
    /// The new text updates an existing fact; invalidate and replace
    Supersede { existing_id: String },
}

/// Raw LLM verdict on a candidate pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Duplicate,
    Supersedes,
    Different,
}

impl Verdict {
    /// Unknown output maps to `Different` - the safe default.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.to_uppercase();
        if upper.contains("SUPERSEDES") {
            Verdict::Supersedes
        } else if upper.contains("DUPLICATE") {
            Verdict::Duplicate
        } else {
            Verdict::Different
        }
    }
}

// ============================================================================
// PAIR HASH
// ============================================================================

/// Order-independent hash of a text pair, used as the verdict cache key.
pub fn pair_hash(a: &str, b: &str) -> u64 {
    let a_norm = a.trim().to_lowercase();
    let b_norm = b.trim().to_lowercase();
    let (first, second) = if a_norm <= b_norm {
        (a_norm, b_norm)
    } else {
        (b_norm, a_norm)
    };
    let mut hasher = DefaultHasher::new();
    first.hash(&mut hasher);
    second.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// NEGATION GATE
// ============================================================================

/// English negation markers. The lexicon is English-only; extend per
/// locale if the corpus warrants it.
const NEGATION_MARKERS: &[&str] = &[
    "not", "no", "never", "none", "nothing", "nobody", "neither", "nor", "without", "cannot",
];

fn tokenize(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// True when the text contains a negation marker or an n't contraction.
pub fn has_negation(text: &str) -> bool {
    tokenize(text)
        .iter()
        .any(|token| NEGATION_MARKERS.contains(&token.as_str()) || token.ends_with("n't"))
}

// ============================================================================
// ENGINE
// ============================================================================

const VERDICT_CACHE_SIZE: usize = 4096;

const VERIFY_SYSTEM: &str = "You compare two personal memory statements. Answer with exactly \
one word: DUPLICATE if they state the same fact, SUPERSEDES if the new statement updates or \
replaces the old fact, DIFFERENT otherwise.";

/// See module docs.
pub struct DedupEngine {
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    enabled: bool,
    base_threshold: f32,
    max_candidates: usize,
    /// Runtime per-provider threshold overrides
    overrides: RwLock<HashMap<ProviderClass, f32>>,
    /// Verdicts keyed by order-independent pair hash. Correctness never
    /// depends on this cache; it only saves LLM calls.
    verdicts: Mutex<LruCache<u64, Verdict>>,
}

impl DedupEngine {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        enabled: bool,
        threshold: Option<f32>,
        max_candidates: usize,
    ) -> Self {
        let base_threshold =
            threshold.unwrap_or_else(|| embedder.provider().default_dedup_threshold());
        Self {
            graph,
            embedder,
            llm,
            enabled,
            base_threshold,
            max_candidates: max_candidates.max(1),
            overrides: RwLock::new(HashMap::new()),
            verdicts: Mutex::new(LruCache::new(
                NonZeroUsize::new(VERDICT_CACHE_SIZE).expect("cache size is nonzero"),
            )),
        }
    }

    /// Override the similarity threshold for one provider class at runtime.
    pub fn set_threshold_override(&self, provider: ProviderClass, threshold: f32) {
        self.overrides
            .write()
            .insert(provider, threshold.clamp(0.0, 1.0));
    }

    /// Threshold in effect for the configured embedding provider.
    pub fn effective_threshold(&self) -> f32 {
        self.overrides
            .read()
            .get(&self.embedder.provider())
            .copied()
            .unwrap_or(self.base_threshold)
    }

    /// Run the full pipeline. Never errors; any failure is `Insert`.
    pub async fn decide(&self, new_text: &str, user_id: &str) -> DedupDecision {
        if !self.enabled {
            return DedupDecision::Insert;
        }

        // Stage 1: vector candidates among the user's live memories.
        let vector = match self.embedder.embed(new_text).await {
            Ok(v) => v,
            Err(err) => {
                warn!(user_id, error = %err, "dedup embed failed; inserting");
                return DedupDecision::Insert;
            }
        };
        let threshold = self.effective_threshold();
        // Over-fetch so post-filtering by threshold still leaves candidates.
        let fetch = self.max_candidates * 4;
        let candidates = match self.graph.vector_search(user_id, &vector, fetch).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!(user_id, error = %err, "dedup candidate search failed; inserting");
                return DedupDecision::Insert;
            }
        };
        let mut candidates: Vec<(String, f64)> = candidates
            .into_iter()
            .filter(|(_, similarity)| *similarity >= f64::from(threshold))
            .collect();
        candidates.truncate(self.max_candidates);
        let Some((top_id, similarity)) = candidates.into_iter().next() else {
            return DedupDecision::Insert;
        };

        // Stage 2: LLM verification on the top candidate.
        let existing = match self.graph.memories_by_ids(user_id, &[top_id.clone()], false).await {
            Ok(mut memories) if !memories.is_empty() => memories.remove(0),
            Ok(_) => return DedupDecision::Insert,
            Err(err) => {
                warn!(user_id, error = %err, "dedup candidate load failed; inserting");
                return DedupDecision::Insert;
            }
        };
        debug!(user_id, candidate = %top_id, similarity, "dedup verifying top candidate");
        let verdict = self.verify(new_text, &existing.content).await;

        // Stage 2b: negation gate, applied to DUPLICATE only. A temporal
        // update may legitimately introduce negation, so SUPERSEDES is
        // exempt.
        let verdict = match verdict {
            Verdict::Duplicate if has_negation(new_text) != has_negation(&existing.content) => {
                debug!(user_id, candidate = %top_id, "negation gate downgraded duplicate");
                Verdict::Different
            }
            v => v,
        };

        match verdict {
            Verdict::Duplicate => DedupDecision::Skip { existing_id: top_id },
            Verdict::Supersedes => DedupDecision::Supersede { existing_id: top_id },
            Verdict::Different => DedupDecision::Insert,
        }
    }

    async fn verify(&self, new_text: &str, existing: &str) -> Verdict {
        let key = pair_hash(new_text, existing);
        if let Some(cached) = self.verdicts.lock().get(&key).copied() {
            return cached;
        }

        let prompt = format!("Existing memory:\n{existing}\n\nNew statement:\n{new_text}");
        let messages = [ChatMessage::system(VERIFY_SYSTEM), ChatMessage::user(prompt)];
        let options = ChatOptions {
            max_tokens: 8,
            ..ChatOptions::default()
        };
        let verdict = match self.llm.chat(&messages, &options).await {
            Ok(answer) => Verdict::parse(&answer),
            Err(err) => {
                warn!(error = %err, "dedup verification failed; treating as different");
                Verdict::Different
            }
        };
        self.verdicts.lock().put(key, verdict);
        verdict
    }
}

// ============================================================================
// TESTS
// ============================================================================
