//! Community clustering
//!
//! Communities are detected over the user's live entity-entity edges by
//! the graph store (Louvain via the store's extension; connected
//! components in the in-memory store). Groups of two or more entities
//! become `Community` nodes named and summarized by the LLM, with a
//! fixed fallback when the LLM is unavailable.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::gateway::{ChatMessage, ChatModel, ChatOptions};
use crate::graph::GraphStore;
use crate::memory::Memory;

/// Member memory snippets fed to the naming prompt
const SNIPPET_CAP: usize = 8;

/// Fallback name when the LLM cannot produce one
const FALLBACK_NAME: &str = "Memory cluster";

const NAME_SYSTEM: &str = "You name a cluster of related personal memories. Respond with a \
JSON object {\"name\": \"two to four words\", \"summary\": \"one or two sentences\"}.";

// ============================================================================
// COMMUNITY
// ============================================================================

/// A detected group of entities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    pub id: String,
    pub name: String,
    pub summary: String,
    /// Number of member entities
    pub member_count: usize,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// BUILDER
// ============================================================================

/// See module docs.
pub struct ClusterBuilder {
    graph: Arc<dyn GraphStore>,
    llm: Arc<dyn ChatModel>,
}

impl ClusterBuilder {
    pub fn new(graph: Arc<dyn GraphStore>, llm: Arc<dyn ChatModel>) -> Self {
        Self { graph, llm }
    }

    /// Re-detect and re-materialize all of the user's communities.
    /// Returns how many were created.
    ///
    /// Propagates [`crate::error::GraphError::CapabilityUnavailable`]
    /// when the store cannot detect communities at all.
    pub async fn rebuild(&self, user_id: &str) -> Result<usize> {
        let assignments = self.graph.detect_communities(user_id).await?;

        let mut groups: HashMap<i64, Vec<String>> = HashMap::new();
        for (entity_id, community_id) in assignments {
            groups.entry(community_id).or_default().push(entity_id);
        }
        let mut groups: Vec<Vec<String>> = groups
            .into_values()
            .filter(|members| members.len() >= 2)
            .collect();
        // Largest first, deterministic within equal sizes.
        for members in &mut groups {
            members.sort();
        }
        groups.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));

        self.graph.clear_communities(user_id).await?;

        let now = Utc::now();
        for members in &groups {
            let (name, summary) = self.describe(user_id, members).await;
            let community = Community {
                id: Uuid::new_v4().to_string(),
                name,
                summary,
                member_count: members.len(),
                created_at: now,
            };
            self.graph
                .create_community(user_id, &community, members)
                .await?;
        }
        info!(user_id, communities = groups.len(), "communities rebuilt");
        Ok(groups.len())
    }

    /// Communities ordered by member count descending.
    pub async fn list(&self, user_id: &str) -> Result<Vec<Community>> {
        Ok(self.graph.list_communities(user_id).await?)
    }

    /// Live memories linked into one community.
    pub async fn memories(
        &self,
        user_id: &str,
        community_id: &str,
        limit: usize,
    ) -> Result<Vec<Memory>> {
        let known = self.graph.list_communities(user_id).await?;
        if !known.iter().any(|c| c.id == community_id) {
            return Err(CoreError::not_found(format!("community {community_id}")));
        }
        Ok(self
            .graph
            .community_memories(user_id, community_id, limit)
            .await?)
    }

    /// Name and summarize one group from member memory snippets.
    /// LLM failures fall back to a fixed name and an empty summary.
    async fn describe(&self, user_id: &str, members: &[String]) -> (String, String) {
        let snippets = match self.snippets(user_id, members).await {
            Ok(snippets) => snippets,
            Err(err) => {
                warn!(user_id, error = %err, "cluster snippet gather failed");
                vec![]
            }
        };
        if snippets.is_empty() {
            return (FALLBACK_NAME.to_string(), String::new());
        }

        let mut prompt = String::from("Member memories:\n");
        for snippet in &snippets {
            prompt.push_str("- ");
            prompt.push_str(snippet);
            prompt.push('\n');
        }
        let messages = [ChatMessage::system(NAME_SYSTEM), ChatMessage::user(prompt)];
        let options = ChatOptions {
            max_tokens: 128,
            ..ChatOptions::json()
        };

        #[derive(Deserialize)]
        struct Described {
            name: String,
            #[serde(default)]
            summary: String,
        }
        match self.llm.chat(&messages, &options).await {
            Ok(answer) => match serde_json::from_str::<Described>(answer.trim()) {
                Ok(described) if !described.name.trim().is_empty() => {
                    (described.name.trim().to_string(), described.summary.trim().to_string())
                }
                _ => (FALLBACK_NAME.to_string(), String::new()),
            },
            Err(err) => {
                warn!(user_id, error = %err, "cluster naming failed; using fallback");
                (FALLBACK_NAME.to_string(), String::new())
            }
        }
    }

    async fn snippets(&self, user_id: &str, members: &[String]) -> Result<Vec<String>> {
        let ids = self
            .graph
            .memories_mentioning(user_id, members, SNIPPET_CAP)
            .await?;
        let memories = self.graph.memories_by_ids(user_id, &ids, false).await?;
        Ok(memories.into_iter().map(|m| m.content).collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, EntityRelation};
    use crate::error::{GatewayError, GraphError};
    use crate::graph::InMemoryGraph;
    use crate::memory::MemoryState;
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

    async fn entity(graph: &InMemoryGraph, id: &str, name: &str) {
        let now = Utc::now();
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

    async fn relate(graph: &InMemoryGraph, source: &str, target: &str) {
        graph
            .create_relation(&EntityRelation {
                source_id: source.into(),
                target_id: target.into(),
                rel_type: "RELATED".into(),
                description: String::new(),
                valid_at: Utc::now(),
                invalid_at: None,
                confirmed_count: 1,
            })
            .await
            .unwrap();
    }

    async fn memory_mentioning(graph: &InMemoryGraph, memory_id: &str, entity_id: &str) {
        let now = Utc::now();
        graph
            .create_memory(&crate::memory::Memory {
                id: memory_id.into(),
                user_id: "u".into(),
                content: format!("about {entity_id}"),
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
        graph
            .upsert_mention(memory_id, entity_id, None, 1.0, now)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rebuild_groups_connected_entities() {
        let graph = Arc::new(InMemoryGraph::new());
        // Two connected pairs and one isolate.
        for (id, name) in [("e1", "a"), ("e2", "b"), ("e3", "c"), ("e4", "d"), ("e5", "x")] {
            entity(&graph, id, name).await;
        }
        relate(&graph, "e1", "e2").await;
        relate(&graph, "e3", "e4").await;
        memory_mentioning(&graph, "m1", "e1").await;
        memory_mentioning(&graph, "m2", "e3").await;

        let builder = ClusterBuilder::new(
            Arc::clone(&graph) as Arc<dyn GraphStore>,
            Arc::new(ScriptedChat {
                answer: Some(r#"{"name": "test group", "summary": "two things"}"#.into()),
            }),
        );
        let created = builder.rebuild("u").await.unwrap();
        assert_eq!(created, 2, "the isolate never forms a community");

        let communities = builder.list("u").await.unwrap();
        assert_eq!(communities.len(), 2);
        assert!(communities.iter().all(|c| c.member_count == 2));
        assert!(communities.iter().all(|c| c.name == "test group"));

        let memories = builder.memories("u", &communities[0].id, 10).await.unwrap();
        assert_eq!(memories.len(), 1);
    }

    #[tokio::test]
    async fn llm_failure_uses_fixed_fallback() {
        let graph = Arc::new(InMemoryGraph::new());
        entity(&graph, "e1", "a").await;
        entity(&graph, "e2", "b").await;
        relate(&graph, "e1", "e2").await;
        memory_mentioning(&graph, "m1", "e1").await;

        let builder = ClusterBuilder::new(
            Arc::clone(&graph) as Arc<dyn GraphStore>,
            Arc::new(ScriptedChat { answer: None }),
        );
        builder.rebuild("u").await.unwrap();

        let communities = builder.list("u").await.unwrap();
        assert_eq!(communities[0].name, FALLBACK_NAME);
        assert!(communities[0].summary.is_empty());
    }

    #[tokio::test]
    async fn unknown_community_is_not_found() {
        let graph = Arc::new(InMemoryGraph::new());
        let builder = ClusterBuilder::new(
            graph as Arc<dyn GraphStore>,
            Arc::new(ScriptedChat { answer: None }),
        );
        let result = builder.memories("u", "nope", 10).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn rebuild_replaces_previous_communities() {
        let graph = Arc::new(InMemoryGraph::new());
        entity(&graph, "e1", "a").await;
        entity(&graph, "e2", "b").await;
        relate(&graph, "e1", "e2").await;

        let builder = ClusterBuilder::new(
            Arc::clone(&graph) as Arc<dyn GraphStore>,
            Arc::new(ScriptedChat { answer: None }),
        );
        builder.rebuild("u").await.unwrap();
        builder.rebuild("u").await.unwrap();
        assert_eq!(builder.list("u").await.unwrap().len(), 1);
    }

    #[test]
    fn capability_error_is_distinct() {
        let err: CoreError = GraphError::CapabilityUnavailable("no mage".into()).into();
        assert!(matches!(
            err,
            CoreError::Graph(GraphError::CapabilityUnavailable(_))
        ));
    }
}
