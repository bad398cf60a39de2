//! Resolve-or-create
//!
//! Match key is `(user_id, lowercased name)`; type is never part of the
//! key. On a hit, the more specific type and the longer description win.
//! PERSON entities additionally alias across word-boundary name prefixes
//! ("Alice" and "Alice Smith" are one entity, under the longer name).

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::graph::GraphStore;

use super::{Entity, ExtractedEntity, more_specific_type, normalize_upper_snake};

/// Result of resolving one extracted entity
#[derive(Debug, Clone)]
pub struct ResolvedEntity {
    pub entity: Entity,
    pub created: bool,
    /// The description grew; the embedding needs a refresh.
    pub description_changed: bool,
}

/// See module docs.
pub struct EntityResolver {
    graph: Arc<dyn GraphStore>,
}

impl EntityResolver {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    pub async fn resolve_or_create(
        &self,
        user_id: &str,
        extracted: &ExtractedEntity,
    ) -> Result<ResolvedEntity> {
        let name = extracted.name.trim();
        let name_lower = name.to_lowercase();
        let incoming_type = normalize_upper_snake(&extracted.entity_type);
        let incoming_description = extracted.description.trim();

        if let Some(existing) = self.graph.find_entity_by_name(user_id, &name_lower).await? {
            return self
                .merge(existing, name, &incoming_type, incoming_description)
                .await;
        }

        if incoming_type == "PERSON"
            && let Some(alias) = self.person_alias(user_id, &name_lower).await?
        {
            debug!(user_id, name, alias = %alias.name, "person name aliased");
            return self
                .merge(alias, name, &incoming_type, incoming_description)
                .await;
        }

        let now = Utc::now();
        let entity = Entity {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            name: name.to_string(),
            entity_type: incoming_type,
            description: incoming_description.to_string(),
            rank: 0,
            summary: None,
            summary_updated_at: None,
            created_at: now,
            updated_at: now,
            description_embedding: None,
        };
        self.graph.create_entity(&entity).await?;
        Ok(ResolvedEntity {
            description_changed: !entity.description.is_empty(),
            entity,
            created: true,
        })
    }

    async fn merge(
        &self,
        mut existing: Entity,
        incoming_name: &str,
        incoming_type: &str,
        incoming_description: &str,
    ) -> Result<ResolvedEntity> {
        let merged_type =
            more_specific_type(&existing.entity_type, incoming_type).to_string();
        // Longest form wins for both name and description.
        let merged_name = if incoming_name.len() > existing.name.len() {
            incoming_name.to_string()
        } else {
            existing.name.clone()
        };
        let description_changed = incoming_description.len() > existing.description.len();
        let merged_description = if description_changed {
            incoming_description.to_string()
        } else {
            existing.description.clone()
        };

        let changed = merged_type != existing.entity_type
            || merged_name != existing.name
            || description_changed;
        if changed {
            let now = Utc::now();
            self.graph
                .merge_entity_fields(
                    &existing.id,
                    &merged_name,
                    &merged_type,
                    &merged_description,
                    now,
                )
                .await?;
            existing.name = merged_name;
            existing.entity_type = merged_type;
            existing.description = merged_description;
            existing.updated_at = now;
        }
        Ok(ResolvedEntity {
            entity: existing,
            created: false,
            description_changed,
        })
    }

    /// Word-boundary prefix alias among PERSON entities.
    async fn person_alias(&self, user_id: &str, name_lower: &str) -> Result<Option<Entity>> {
        let candidates = self.graph.persons_overlapping_name(user_id, name_lower).await?;
        Ok(candidates
            .into_iter()
            .find(|candidate| word_boundary_overlap(&candidate.name.to_lowercase(), name_lower)))
    }
}

/// True when one name is a word-boundary prefix of the other.
fn word_boundary_overlap(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short == long {
        return true;
    }
    long.starts_with(short) && long[short.len()..].starts_with(char::is_whitespace)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraph;

    fn extracted(name: &str, entity_type: &str, description: &str) -> ExtractedEntity {
        ExtractedEntity {
            name: name.into(),
            entity_type: entity_type.into(),
            description: description.into(),
            role: None,
            confidence: 1.0,
        }
    }

    #[test]
    fn word_boundary_rules() {
        assert!(word_boundary_overlap("alice", "alice smith"));
        assert!(word_boundary_overlap("alice smith", "alice"));
        assert!(word_boundary_overlap("alice", "alice"));
        // "alicia" is not an alias of "alice"
        assert!(!word_boundary_overlap("alice", "alicia"));
    }

    #[tokio::test]
    async fn case_insensitive_merge_keeps_specific_type() {
        let graph = Arc::new(InMemoryGraph::new());
        let resolver = EntityResolver::new(graph);

        let first = resolver
            .resolve_or_create("alice", &extracted("Alice", "PERSON", "a colleague"))
            .await
            .unwrap();
        assert!(first.created);

        let second = resolver
            .resolve_or_create("alice", &extracted("ALICE", "OTHER", "??"))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.entity.id, first.entity.id);
        assert_eq!(second.entity.entity_type, "PERSON");
        // Shorter description never replaces the longer one.
        assert_eq!(second.entity.description, "a colleague");
    }

    #[tokio::test]
    async fn person_prefix_adopts_longer_name() {
        let graph = Arc::new(InMemoryGraph::new());
        let resolver = EntityResolver::new(graph);

        let first = resolver
            .resolve_or_create("u", &extracted("Alice", "PERSON", ""))
            .await
            .unwrap();
        let second = resolver
            .resolve_or_create("u", &extracted("Alice Smith", "PERSON", "works at Acme"))
            .await
            .unwrap();
        assert!(!second.created);
        assert_eq!(second.entity.id, first.entity.id);
        assert_eq!(second.entity.name, "Alice Smith");
    }

    #[tokio::test]
    async fn entities_are_user_scoped() {
        let graph = Arc::new(InMemoryGraph::new());
        let resolver = EntityResolver::new(graph);

        let a = resolver
            .resolve_or_create("user-a", &extracted("Acme", "ORGANIZATION", ""))
            .await
            .unwrap();
        let b = resolver
            .resolve_or_create("user-b", &extracted("Acme", "ORGANIZATION", ""))
            .await
            .unwrap();
        assert_ne!(a.entity.id, b.entity.id);
    }
}
