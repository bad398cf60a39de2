//! Relationship linker
//!
//! At most one live RELATED_TO edge exists per `(source, target, type)`.
//! A repeated assertion either confirms the edge, replaces it, or is
//! classified by the LLM; classifier failures fall open to UPDATE so a
//! broken provider can change history but never block a write.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gateway::{ChatMessage, ChatModel, ChatOptions};
use crate::graph::GraphStore;

use super::{EntityRelation, normalize_upper_snake};

// ============================================================================
// CLASSIFIER
// ============================================================================

/// Verdict on a conflicting relationship description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContradictionVerdict {
    /// Same fact, phrased differently
    Same,
    /// Newer information about the same relationship
    Update,
    /// The two descriptions cannot both be true
    Contradiction,
}

impl ContradictionVerdict {
    /// Unknown output maps to `Update` - the fail-open default.
    pub fn parse(raw: &str) -> Self {
        let upper = raw.to_uppercase();
        if upper.contains("CONTRADICTION") {
            ContradictionVerdict::Contradiction
        } else if upper.contains("SAME") {
            ContradictionVerdict::Same
        } else {
            ContradictionVerdict::Update
        }
    }
}

const CLASSIFY_SYSTEM: &str = "You compare two descriptions of the same relationship between \
two entities. Answer with exactly one word: SAME if they state the same fact, UPDATE if the \
new description refines or refreshes the old one, CONTRADICTION if they cannot both be true.";

// ============================================================================
// LINKER
// ============================================================================

/// What the linker did with one assertion
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// First assertion of this edge
    Created,
    /// Same fact re-asserted; confirmation count bumped
    Confirmed { count: i64 },
    /// Old edge invalidated, a new one created
    Replaced { verdict: ContradictionVerdict },
}

/// See module docs.
pub struct RelationshipLinker {
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn ChatModel>,
}

impl RelationshipLinker {
    pub fn new(graph: Arc<dyn GraphStore>, llm: Arc<dyn ChatModel>) -> Self {
        Self { graph, llm }
    }

    pub async fn link(
        &self,
        source_id: &str,
        target_id: &str,
        rel_type: &str,
        description: &str,
        source_name: Option<&str>,
        target_name: Option<&str>,
    ) -> Result<LinkOutcome> {
        let rel_type = normalize_upper_snake(rel_type);
        let description = description.trim();
        let now = Utc::now();

        let Some(existing) = self
            .graph
            .live_relation(source_id, target_id, &rel_type)
            .await?
        else {
            self.graph
                .create_relation(&EntityRelation {
                    source_id: source_id.to_string(),
                    target_id: target_id.to_string(),
                    rel_type,
                    description: description.to_string(),
                    valid_at: now,
                    invalid_at: None,
                    confirmed_count: 1,
                })
                .await?;
            return Ok(LinkOutcome::Created);
        };

        // Exact description match is a confirmation; one write, no LLM.
        if normalize_description(&existing.description) == normalize_description(description) {
            let count = self
                .graph
                .confirm_relation(source_id, target_id, &rel_type, now)
                .await?;
            return Ok(LinkOutcome::Confirmed { count });
        }

        // An empty edge gaining content is an unconditional upgrade.
        let verdict = if existing.description.trim().is_empty() && !description.is_empty() {
            ContradictionVerdict::Update
        } else {
            self.classify(
                source_name.unwrap_or(source_id),
                target_name.unwrap_or(target_id),
                &rel_type,
                &existing.description,
                description,
            )
            .await
        };

        match verdict {
            ContradictionVerdict::Same => {
                let count = self
                    .graph
                    .confirm_relation(source_id, target_id, &rel_type, now)
                    .await?;
                Ok(LinkOutcome::Confirmed { count })
            }
            ContradictionVerdict::Update | ContradictionVerdict::Contradiction => {
                self.graph
                    .invalidate_relation(source_id, target_id, &rel_type, now)
                    .await?;
                self.graph
                    .create_relation(&EntityRelation {
                        source_id: source_id.to_string(),
                        target_id: target_id.to_string(),
                        rel_type,
                        description: description.to_string(),
                        valid_at: now,
                        invalid_at: None,
                        confirmed_count: existing.confirmed_count + 1,
                    })
                    .await?;
                Ok(LinkOutcome::Replaced { verdict })
            }
        }
    }

    async fn classify(
        &self,
        source_name: &str,
        target_name: &str,
        rel_type: &str,
        old_description: &str,
        new_description: &str,
    ) -> ContradictionVerdict {
        let prompt = format!(
            "Relationship: {source_name} -{rel_type}-> {target_name}\n\
             Old description: {old_description}\n\
             New description: {new_description}"
        );
        let messages = [ChatMessage::system(CLASSIFY_SYSTEM), ChatMessage::user(prompt)];
        let options = ChatOptions {
            max_tokens: 8,
            ..ChatOptions::default()
        };
        match self.llm.chat(&messages, &options).await {
            Ok(answer) => {
                let verdict = ContradictionVerdict::parse(&answer);
                debug!(rel_type, ?verdict, "relationship classified");
                verdict
            }
            Err(err) => {
                warn!(error = %err, "contradiction classifier failed; treating as update");
                ContradictionVerdict::Update
            }
        }
    }
}

fn normalize_description(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::error::GatewayError;
    use crate::graph::InMemoryGraph;
    use async_trait::async_trait;

    struct ScriptedChat {
        answer: Option<String>,
    }

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> std::result::Result<String, GatewayError> {
            match &self.answer {
                Some(answer) => Ok(answer.clone()),
                None => Err(GatewayError::Transport("down".into())),
            }
        }
    }

    async fn fixture(answer: Option<&str>) -> (Arc<InMemoryGraph>, RelationshipLinker) {
        let graph = Arc::new(InMemoryGraph::new());
        let now = Utc::now();
        for (id, name) in [("e1", "Alice"), ("e2", "Acme")] {
            graph
                .create_entity(&Entity {
                    id: id.into(),
                    user_id: "u".into(),
                    name: name.into(),
                    entity_type: "OTHER".into(),
                    description: String::new(),
                    rank: 0,
                    summary: None,
                    summary_updated_at: None,
                    created_at: now,
                    updated_at: now,
                    description_embedding: None,
                })
                .await
                .unwrap();
        }
        let linker = RelationshipLinker::new(
            Arc::clone(&graph) as Arc<dyn GraphStore>,
            Arc::new(ScriptedChat {
                answer: answer.map(str::to_string),
            }),
        );
        (graph, linker)
    }

    #[test]
    fn verdict_parse_fails_open_to_update() {
        assert_eq!(ContradictionVerdict::parse("SAME"), ContradictionVerdict::Same);
        assert_eq!(
            ContradictionVerdict::parse("CONTRADICTION"),
            ContradictionVerdict::Contradiction
        );
        assert_eq!(ContradictionVerdict::parse("??"), ContradictionVerdict::Update);
    }

    #[tokio::test]
    async fn first_assertion_creates() {
        let (graph, linker) = fixture(None).await;
        let outcome = linker
            .link("e1", "e2", "works at", "engineer", None, None)
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::Created);

        let relations = graph.relations_between("e1", "e2");
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].rel_type, "WORKS_AT");
        assert_eq!(relations[0].confirmed_count, 1);
    }

    #[tokio::test]
    async fn identical_description_confirms_without_llm() {
        // No LLM available: an exact match must still confirm.
        let (graph, linker) = fixture(None).await;
        linker
            .link("e1", "e2", "WORKS_AT", "engineer", None, None)
            .await
            .unwrap();
        let outcome = linker
            .link("e1", "e2", "WORKS_AT", "  Engineer ", None, None)
            .await
            .unwrap();
        assert_eq!(outcome, LinkOutcome::Confirmed { count: 2 });
        assert_eq!(graph.relations_between("e1", "e2").len(), 1);
    }

    #[tokio::test]
    async fn contradiction_invalidates_and_replaces() {
        let (graph, linker) = fixture(Some("CONTRADICTION")).await;
        linker
            .link("e1", "e2", "WORKS_AT", "engineer", None, None)
            .await
            .unwrap();
        let outcome = linker
            .link("e1", "e2", "WORKS_AT", "no longer employed", None, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LinkOutcome::Replaced {
                verdict: ContradictionVerdict::Contradiction
            }
        );

        let relations = graph.relations_between("e1", "e2");
        assert_eq!(relations.len(), 2);
        let live: Vec<_> = relations.iter().filter(|r| r.is_live()).collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].description, "no longer employed");
        assert_eq!(live[0].confirmed_count, 2);
    }

    #[tokio::test]
    async fn classifier_failure_falls_open_to_update() {
        let (graph, linker) = fixture(None).await;
        linker
            .link("e1", "e2", "WORKS_AT", "engineer", None, None)
            .await
            .unwrap();
        let outcome = linker
            .link("e1", "e2", "WORKS_AT", "senior engineer", None, None)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LinkOutcome::Replaced {
                verdict: ContradictionVerdict::Update
            }
        );
        let live: Vec<_> = graph
            .relations_between("e1", "e2")
            .into_iter()
            .filter(|r| r.is_live())
            .collect();
        assert_eq!(live.len(), 1);
    }
}
