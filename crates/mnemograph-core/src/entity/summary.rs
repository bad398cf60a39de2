//! Entity summary synthesis
//!
//! Once an entity crosses the mention threshold its summary is rebuilt
//! from connected memories and outgoing relationships. Purely cosmetic -
//! failures are logged and skipped.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gateway::{ChatMessage, ChatModel, ChatOptions};
use crate::graph::GraphStore;

/// Max connected memories fed to the summary prompt
const SUMMARY_MEMORY_CAP: usize = 10;
/// Max outgoing relationships fed to the summary prompt
const SUMMARY_RELATION_CAP: usize = 15;

const SUMMARY_SYSTEM: &str = "You write a compact third-person profile of an entity from \
memory snippets and known relationships. Two or three sentences, facts only, no speculation.";

/// See module docs.
pub struct SummarySynthesizer {
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn ChatModel>,
}

impl SummarySynthesizer {
    pub fn new(graph: Arc<dyn GraphStore>, llm: Arc<dyn ChatModel>) -> Self {
        Self { graph, llm }
    }

    /// Regenerate and store the summary. LLM failures leave the previous
    /// summary in place.
    pub async fn refresh(&self, entity_id: &str, entity_name: &str) -> Result<()> {
        let (memories, relations) = self
            .graph
            .entity_summary_inputs(entity_id, SUMMARY_MEMORY_CAP, SUMMARY_RELATION_CAP)
            .await?;
        if memories.is_empty() && relations.is_empty() {
            return Ok(());
        }

        let mut prompt = format!("Entity: {entity_name}\n\nMemories:\n");
        for memory in &memories {
            prompt.push_str("- ");
            prompt.push_str(memory);
            prompt.push('\n');
        }
        if !relations.is_empty() {
            prompt.push_str("\nRelationships:\n");
            for relation in &relations {
                prompt.push_str(&format!(
                    "- {} -> {} ({})\n",
                    relation.rel_type, relation.target_id, relation.description
                ));
            }
        }

        let messages = [ChatMessage::system(SUMMARY_SYSTEM), ChatMessage::user(prompt)];
        let options = ChatOptions {
            max_tokens: 256,
            ..ChatOptions::default()
        };
        match self.llm.chat(&messages, &options).await {
            Ok(summary) if !summary.trim().is_empty() => {
                self.graph
                    .set_entity_summary(entity_id, summary.trim(), Utc::now())
                    .await?;
                debug!(entity_id, "entity summary refreshed");
            }
            Ok(_) => {}
            Err(err) => warn!(entity_id, error = %err, "entity summary synthesis failed"),
        }
        Ok(())
    }
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
    use crate::memory::{Memory, MemoryState};
    use async_trait::async_trait;

    struct ScriptedChat(&'static str);

    #[async_trait]
    impl ChatModel for ScriptedChat {
        async fn chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> std::result::Result<String, GatewayError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn refresh_stores_summary() {
        let graph = Arc::new(InMemoryGraph::new());
        let now = Utc::now();
        graph
            .create_entity(&Entity {
                id: "e1".into(),
                user_id: "u".into(),
                name: "Alice".into(),
                entity_type: "PERSON".into(),
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
        graph
            .create_memory(&Memory {
                id: "m1".into(),
                user_id: "u".into(),
                content: "Alice likes hiking".into(),
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
                embedding: None,
            })
            .await
            .unwrap();
        graph.upsert_mention("m1", "e1", None, 1.0, now).await.unwrap();

        let synthesizer = SummarySynthesizer::new(
            Arc::clone(&graph) as Arc<dyn GraphStore>,
            Arc::new(ScriptedChat("Alice is an avid hiker.")),
        );
        synthesizer.refresh("e1", "Alice").await.unwrap();

        let entity = graph.stored_entity("e1").unwrap();
        assert_eq!(entity.summary.as_deref(), Some("Alice is an avid hiker."));
        assert!(entity.summary_updated_at.is_some());
    }

    #[tokio::test]
    async fn refresh_without_inputs_is_a_noop() {
        let graph = Arc::new(InMemoryGraph::new());
        let now = Utc::now();
        graph
            .create_entity(&Entity {
                id: "e1".into(),
                user_id: "u".into(),
                name: "Alice".into(),
                entity_type: "PERSON".into(),
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

        let synthesizer = SummarySynthesizer::new(
            Arc::clone(&graph) as Arc<dyn GraphStore>,
            Arc::new(ScriptedChat("unused")),
        );
        synthesizer.refresh("e1", "Alice").await.unwrap();
        assert!(graph.stored_entity("e1").unwrap().summary.is_none());
    }
}
