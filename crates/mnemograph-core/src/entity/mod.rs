//! Entity layer - named things referenced by memories
//!
//! Entities use an open UPPER_SNAKE_CASE type vocabulary. The match key
//! is `(user_id, lowercased name)`; the type is not part of the key, and
//! on merge the more specific type wins while descriptions only grow.

mod extraction;
mod linker;
mod resolver;
mod summary;

pub use extraction::{ExtractionOutcome, ExtractionWorker};
pub use linker::{ContradictionVerdict, LinkOutcome, RelationshipLinker};
pub use extraction::DEFAULT_SUMMARY_THRESHOLD;
pub use resolver::{EntityResolver, ResolvedEntity};
pub use summary::SummarySynthesizer;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// TYPE VOCABULARY
// ============================================================================

/// Sentinel type for anything the extractor could not classify
pub const TYPE_OTHER: &str = "OTHER";

/// Specificity of an entity type; lower wins a merge.
///
/// This table is the only place that enumerates types - everything else
/// treats the vocabulary as open strings.
pub fn type_priority(entity_type: &str) -> u8 {
    match entity_type {
        "PERSON" => 0,
        "ORGANIZATION" => 1,
        "LOCATION" => 2,
        "PRODUCT" => 3,
        "CONCEPT" => 4,
        TYPE_OTHER => 6,
        // Free-form types beat the OTHER sentinel but lose to the named tiers
        _ => 5,
    }
}

/// Pick the more specific of two types.
pub fn more_specific_type<'a>(current: &'a str, incoming: &'a str) -> &'a str {
    if type_priority(incoming) < type_priority(current) {
        incoming
    } else {
        current
    }
}

/// Normalize a free-form type or relationship name to UPPER_SNAKE_CASE.
pub fn normalize_upper_snake(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_sep = true;
    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_uppercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() { TYPE_OTHER.into() } else { out }
}

// ============================================================================
// ENTITY
// ============================================================================

/// A named thing referenced by one or more memories
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique identifier (UUID v4)
    pub id: String,
    pub user_id: String,
    /// Display name; matching happens on the lowercased form
    pub name: String,
    /// Open UPPER_SNAKE_CASE vocabulary
    pub entity_type: String,
    pub description: String,
    /// Degree centrality: live mentions + live related edges
    pub rank: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Embedding of the description, computed asynchronously
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_embedding: Option<Vec<f32>>,
}

/// One entity as returned by the extraction LLM
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub description: String,
    /// Grammatical/semantic role in the source memory
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

// ============================================================================
// RELATIONSHIPS
// ============================================================================

/// A live or invalidated RELATED_TO edge between two entities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRelation {
    pub source_id: String,
    pub target_id: String,
    /// UPPER_SNAKE_CASE relationship type
    pub rel_type: String,
    pub description: String,
    pub valid_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_at: Option<DateTime<Utc>>,
    /// Times this exact fact was re-asserted
    pub confirmed_count: i64,
}

impl EntityRelation {
    pub fn is_live(&self) -> bool {
        self.invalid_at.is_none()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn person_beats_everything() {
        assert_eq!(more_specific_type("OTHER", "PERSON"), "PERSON");
        assert_eq!(more_specific_type("PERSON", "OTHER"), "PERSON");
        assert_eq!(more_specific_type("PERSON", "ORGANIZATION"), "PERSON");
        assert_eq!(more_specific_type("CONCEPT", "LOCATION"), "LOCATION");
    }

    #[test]
    fn free_form_types_beat_only_the_sentinel() {
        assert_eq!(more_specific_type("OTHER", "PROGRAMMING_LANGUAGE"), "PROGRAMMING_LANGUAGE");
        assert_eq!(more_specific_type("PROGRAMMING_LANGUAGE", "CONCEPT"), "CONCEPT");
        // Ties keep the current value
        assert_eq!(more_specific_type("HOBBY", "SPORT"), "HOBBY");
    }

    #[test]
    fn normalization_produces_upper_snake() {
        assert_eq!(normalize_upper_snake("works at"), "WORKS_AT");
        assert_eq!(normalize_upper_snake("  lives-in "), "LIVES_IN");
        assert_eq!(normalize_upper_snake("FOUNDED"), "FOUNDED");
        assert_eq!(normalize_upper_snake("a  b!!c"), "A_B_C");
        assert_eq!(normalize_upper_snake("???"), "OTHER");
    }
}
