//! Entity extraction worker
//!
//! Fired per memory, off the request path. The worker claims the memory
//! (`pending`, attempt counter bumped), asks the LLM for entities,
//! relationships, and category tags, then writes the graph links. A
//! provider outage marks the memory `failed`; unparseable LLM output is
//! a policy fallback and reads as an empty extraction.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::gateway::{ChatMessage, ChatModel, ChatOptions, Embedder};
use crate::graph::GraphStore;
use crate::memory::ExtractionStatus;

use super::resolver::ResolvedEntity;
use super::{
    EntityResolver, ExtractedEntity, RelationshipLinker, SummarySynthesizer, TYPE_OTHER,
};

/// Live mentions needed before a summary is synthesized
pub const DEFAULT_SUMMARY_THRESHOLD: usize = 5;

const EXTRACT_SYSTEM: &str = "You extract structured knowledge from one personal memory. \
Respond with a JSON object: {\"entities\": [{\"name\", \"type\", \"description\", \"role\", \
\"confidence\"}], \"relationships\": [{\"source\", \"target\", \"type\", \"description\"}], \
\"categories\": [\"...\"]}. Types are UPPER_SNAKE_CASE; use OTHER when unsure. Categories are \
one or two lowercase words. Extract only what the text states.";

// ============================================================================
// LLM PAYLOAD
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct ExtractionPayload {
    #[serde(default)]
    entities: Vec<ExtractedEntity>,
    #[serde(default)]
    relationships: Vec<ExtractedRelation>,
    #[serde(default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ExtractedRelation {
    source: String,
    target: String,
    #[serde(rename = "type", default)]
    rel_type: String,
    #[serde(default)]
    description: String,
}

/// Strip optional markdown fences before JSON parsing.
fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

// ============================================================================
// WORKER
// ============================================================================

/// What one extraction run produced
#[derive(Debug, Clone)]
pub struct ExtractionOutcome {
    pub status: ExtractionStatus,
    pub entities: usize,
    pub relations: usize,
}

/// See module docs.
pub struct ExtractionWorker {
    graph: Arc<dyn GraphStore>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    resolver: EntityResolver,
    linker: RelationshipLinker,
    summarizer: SummarySynthesizer,
    summary_threshold: usize,
}

impl ExtractionWorker {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        summary_threshold: usize,
    ) -> Self {
        Self {
            resolver: EntityResolver::new(Arc::clone(&graph)),
            linker: RelationshipLinker::new(Arc::clone(&graph), Arc::clone(&llm)),
            summarizer: SummarySynthesizer::new(Arc::clone(&graph), Arc::clone(&llm)),
            graph,
            embedder,
            llm,
            summary_threshold: summary_threshold.max(1),
        }
    }

    /// Run one extraction. Never returns an error and never panics; every
    /// failure path lands in the memory's extraction status.
    pub async fn run(&self, memory_id: &str, user_id: &str) -> ExtractionOutcome {
        let content = match self.graph.claim_extraction(memory_id).await {
            Ok(Some((content, attempt))) => {
                debug!(memory_id, attempt, "extraction claimed");
                content
            }
            Ok(None) => {
                return ExtractionOutcome {
                    status: ExtractionStatus::Failed,
                    entities: 0,
                    relations: 0,
                };
            }
            Err(err) => {
                warn!(memory_id, error = %err, "extraction claim failed");
                return ExtractionOutcome {
                    status: ExtractionStatus::Failed,
                    entities: 0,
                    relations: 0,
                };
            }
        };

        match self.process(memory_id, user_id, &content).await {
            Ok(outcome) => {
                if let Err(err) = self
                    .graph
                    .finish_extraction(memory_id, ExtractionStatus::Done, None)
                    .await
                {
                    warn!(memory_id, error = %err, "failed to mark extraction done");
                }
                outcome
            }
            Err(err) => {
                let detail = err.to_string();
                warn!(memory_id, error = %detail, "extraction failed");
                if let Err(mark_err) = self
                    .graph
                    .finish_extraction(memory_id, ExtractionStatus::Failed, Some(&detail))
                    .await
                {
                    warn!(memory_id, error = %mark_err, "failed to mark extraction failed");
                }
                ExtractionOutcome {
                    status: ExtractionStatus::Failed,
                    entities: 0,
                    relations: 0,
                }
            }
        }
    }

    async fn process(
        &self,
        memory_id: &str,
        user_id: &str,
        content: &str,
    ) -> Result<ExtractionOutcome> {
        let payload = self.extract(content).await?;
        let now = Utc::now();

        let categories: Vec<String> = payload
            .categories
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        if !categories.is_empty() {
            self.graph.assign_categories(memory_id, &categories).await?;
        }

        // Resolve every extracted entity and link the mention.
        let mut resolved: HashMap<String, ResolvedEntity> = HashMap::new();
        for extracted in &payload.entities {
            if extracted.name.trim().is_empty() {
                continue;
            }
            let entry = self.resolver.resolve_or_create(user_id, extracted).await?;
            self.graph
                .upsert_mention(
                    memory_id,
                    &entry.entity.id,
                    extracted.role.as_deref().filter(|r| !r.is_empty()),
                    extracted.confidence.clamp(0.0, 1.0),
                    now,
                )
                .await?;
            if entry.description_changed && !entry.entity.description.is_empty() {
                match self.embedder.embed(&entry.entity.description).await {
                    Ok(vector) => {
                        self.graph
                            .set_entity_description_embedding(&entry.entity.id, &vector)
                            .await?;
                    }
                    Err(err) => {
                        warn!(entity = %entry.entity.id, error = %err,
                            "description embedding failed");
                    }
                }
            }
            resolved.insert(entry.entity.name.to_lowercase(), entry);
        }

        // Relationships may reference entities the extractor did not list;
        // resolve those on the fly with the OTHER sentinel.
        let mut relations = 0usize;
        for relation in &payload.relationships {
            let source = self
                .resolve_endpoint(user_id, &relation.source, &mut resolved)
                .await?;
            let target = self
                .resolve_endpoint(user_id, &relation.target, &mut resolved)
                .await?;
            let (Some(source), Some(target)) = (source, target) else {
                continue;
            };
            if source.0 == target.0 {
                continue;
            }
            self.linker
                .link(
                    &source.0,
                    &target.0,
                    &relation.rel_type,
                    &relation.description,
                    Some(&source.1),
                    Some(&target.1),
                )
                .await?;
            relations += 1;
        }

        // Ranks and summaries after all links are in place.
        for entry in resolved.values() {
            self.graph.refresh_entity_rank(&entry.entity.id).await?;
            let mentions = self.graph.live_mention_count(&entry.entity.id).await?;
            if mentions >= self.summary_threshold {
                self.summarizer
                    .refresh(&entry.entity.id, &entry.entity.name)
                    .await?;
            }
        }

        Ok(ExtractionOutcome {
            status: ExtractionStatus::Done,
            entities: resolved.len(),
            relations,
        })
    }

    async fn resolve_endpoint(
        &self,
        user_id: &str,
        name: &str,
        resolved: &mut HashMap<String, ResolvedEntity>,
    ) -> Result<Option<(String, String)>> {
        let name = name.trim();
        if name.is_empty() {
            return Ok(None);
        }
        let key = name.to_lowercase();
        if let Some(entry) = resolved.get(&key) {
            return Ok(Some((entry.entity.id.clone(), entry.entity.name.clone())));
        }
        let entry = self
            .resolver
            .resolve_or_create(
                user_id,
                &ExtractedEntity {
                    name: name.to_string(),
                    entity_type: TYPE_OTHER.to_string(),
                    description: String::new(),
                    role: None,
                    confidence: 1.0,
                },
            )
            .await?;
        let out = (entry.entity.id.clone(), entry.entity.name.clone());
        resolved.insert(key, entry);
        Ok(Some(out))
    }

    /// LLM extraction. A transport failure is a real error (the memory is
    /// marked failed); unparseable output is an empty extraction.
    async fn extract(&self, content: &str) -> Result<ExtractionPayload> {
        let messages = [
            ChatMessage::system(EXTRACT_SYSTEM),
            ChatMessage::user(content.to_string()),
        ];
        let options = ChatOptions {
            max_tokens: 1024,
            ..ChatOptions::json()
        };
        let answer = self
            .llm
            .chat(&messages, &options)
            .await
            .map_err(crate::error::CoreError::Chat)?;
        match serde_json::from_str(strip_fences(&answer)) {
            Ok(payload) => Ok(payload),
            Err(err) => {
                warn!(error = %err, "unparseable extraction output; treating as empty");
                Ok(ExtractionPayload::default())
            }
        }
    }
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
    use crate::memory::{Memory, MemoryState};
    use async_trait::async_trait;

    struct StaticEmbedder;

    #[async_trait]
    impl Embedder for StaticEmbedder {
        async fn embed(&self, _text: &str) -> std::result::Result<Vec<f32>, GatewayError> {
            Ok(vec![1.0, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, GatewayError> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dim(&self) -> usize {
            2
        }

        fn provider(&self) -> ProviderClass {
            ProviderClass::OpenAi
        }

        fn model(&self) -> &str {
            "static"
        }
    }

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

    async fn seeded_graph() -> Arc<InMemoryGraph> {
        let graph = Arc::new(InMemoryGraph::new());
        let now = Utc::now();
        graph
            .create_memory(&Memory {
                id: "m1".into(),
                user_id: "u".into(),
                content: "Alice works at Acme in Berlin".into(),
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
                embedding: Some(vec![1.0, 0.0]),
            })
            .await
            .unwrap();
        graph
    }

    fn worker(graph: Arc<InMemoryGraph>, answer: Option<&str>) -> ExtractionWorker {
        ExtractionWorker::new(
            graph,
            Arc::new(StaticEmbedder),
            Arc::new(ScriptedChat {
                answer: answer.map(str::to_string),
            }),
            DEFAULT_SUMMARY_THRESHOLD,
        )
    }

    #[test]
    fn fence_stripping() {
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{}\n```"), "{}");
    }

    #[tokio::test]
    async fn successful_extraction_links_entities_and_relations() {
        let graph = seeded_graph().await;
        let answer = r#"{
            "entities": [
                {"name": "Alice", "type": "PERSON", "description": "an engineer", "role": "subject", "confidence": 0.95},
                {"name": "Acme", "type": "ORGANIZATION", "description": "", "role": "object", "confidence": 0.9}
            ],
            "relationships": [
                {"source": "Alice", "target": "Acme", "type": "works at", "description": "engineer"}
            ],
            "categories": ["Work"]
        }"#;
        let outcome = worker(Arc::clone(&graph), Some(answer)).run("m1", "u").await;

        assert_eq!(outcome.status, ExtractionStatus::Done);
        assert_eq!(outcome.entities, 2);
        assert_eq!(outcome.relations, 1);

        let memory = graph.get_memory("u", "m1", false).await.unwrap().unwrap();
        assert_eq!(memory.extraction_status, Some(ExtractionStatus::Done));
        assert_eq!(memory.categories, vec!["work".to_string()]);
        assert_eq!(memory.extraction_attempts, 1);

        // Both entities mentioned once, Alice also carries a live edge.
        let alice = graph
            .find_entity_by_name("u", "alice")
            .await
            .unwrap()
            .expect("alice exists");
        assert_eq!(alice.rank, 2);
    }

    #[tokio::test]
    async fn llm_outage_marks_failed() {
        let graph = seeded_graph().await;
        let outcome = worker(Arc::clone(&graph), None).run("m1", "u").await;
        assert_eq!(outcome.status, ExtractionStatus::Failed);

        let memory = graph.get_memory("u", "m1", false).await.unwrap().unwrap();
        assert_eq!(memory.extraction_status, Some(ExtractionStatus::Failed));
        assert!(memory.extraction_error.is_some());
    }

    #[tokio::test]
    async fn unparseable_output_reads_as_empty_extraction() {
        let graph = seeded_graph().await;
        let outcome = worker(Arc::clone(&graph), Some("not json at all"))
            .run("m1", "u")
            .await;
        assert_eq!(outcome.status, ExtractionStatus::Done);
        assert_eq!(outcome.entities, 0);
    }
}
