//! Reciprocal Rank Fusion
//!
//! score(d) = sum over lists of 1/(K + rank(d)), rank 1-based. Documents
//! absent from a list contribute nothing from it. Rank-only fusion
//! normalizes across incomparable scoring scales, and a document present
//! in several lists always beats one at the same rank in a single list.

use std::collections::HashMap;

/// The conventional dampening constant
pub const RRF_K: f64 = 60.0;

/// One fused document with its per-arm provenance
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub rrf_score: f64,
    /// 1-based rank in the text arm, if present there
    pub text_rank: Option<usize>,
    /// 1-based rank in the vector arm, if present there
    pub vector_rank: Option<usize>,
    /// 1-based rank in the graph arm, if present there
    pub graph_rank: Option<usize>,
}

/// Fuse up to three ranked id lists. Ties break by first appearance
/// (text arm first), which keeps the ordering deterministic.
pub fn reciprocal_rank_fusion(
    text: &[String],
    vector: &[String],
    graph: &[String],
    k: f64,
) -> Vec<FusedHit> {
    let mut order: Vec<String> = Vec::new();
    let mut hits: HashMap<String, FusedHit> = HashMap::new();

    let mut absorb = |list: &[String], arm: usize| {
        for (index, id) in list.iter().enumerate() {
            let rank = index + 1;
            let entry = hits.entry(id.clone()).or_insert_with(|| {
                order.push(id.clone());
                FusedHit {
                    id: id.clone(),
                    rrf_score: 0.0,
                    text_rank: None,
                    vector_rank: None,
                    graph_rank: None,
                }
            });
            entry.rrf_score += 1.0 / (k + rank as f64);
            match arm {
                0 => entry.text_rank = Some(rank),
                1 => entry.vector_rank = Some(rank),
                _ => entry.graph_rank = Some(rank),
            }
        }
    };
    absorb(text, 0);
    absorb(vector, 1);
    absorb(graph, 2);

    let mut fused: Vec<FusedHit> = order
        .into_iter()
        .filter_map(|id| hits.remove(&id))
        .collect();
    // Stable sort: equal scores keep insertion order.
    fused.sort_by(|a, b| {
        b.rrf_score
            .partial_cmp(&a.rrf_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    fused
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn both_arms_beat_single_arm_at_same_rank() {
        let fused = reciprocal_rank_fusion(
            &ids(&["a", "b"]),
            &ids(&["a", "c"]),
            &[],
            RRF_K,
        );

        assert_eq!(fused[0].id, "a");
        assert!((fused[0].rrf_score - 2.0 / 61.0).abs() < 1e-12);
        assert_eq!(fused[0].text_rank, Some(1));
        assert_eq!(fused[0].vector_rank, Some(1));

        // b and c tie at 1/62; insertion order (text first) breaks it.
        assert_eq!(fused[1].id, "b");
        assert_eq!(fused[2].id, "c");
        assert!((fused[1].rrf_score - 1.0 / 62.0).abs() < 1e-12);
        assert!((fused[2].rrf_score - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn absent_lists_contribute_nothing() {
        let fused = reciprocal_rank_fusion(&[], &ids(&["x"]), &[], RRF_K);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].text_rank, None);
        assert_eq!(fused[0].vector_rank, Some(1));
    }

    #[test]
    fn three_arms_accumulate() {
        let fused = reciprocal_rank_fusion(
            &ids(&["a"]),
            &ids(&["a"]),
            &ids(&["a"]),
            RRF_K,
        );
        assert!((fused[0].rrf_score - 3.0 / 61.0).abs() < 1e-12);
        assert_eq!(fused[0].graph_rank, Some(1));
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let text = ids(&["a", "b", "c"]);
        let vector = ids(&["c", "d"]);
        let first = reciprocal_rank_fusion(&text, &vector, &[], RRF_K);
        let second = reciprocal_rank_fusion(&text, &vector, &[], RRF_K);
        assert_eq!(first, second);
    }
}
