//! Shared fixtures: an engine wired over the in-memory graph with
//! scripted gateway fakes. The LLM is always mocked - the contradiction
//! classifier and dedup verifier are nondeterministic in production, so
//! tests only ever assert against scripted verdicts.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mnemograph_core::config::{
    Config, ContextWindowConfig, DedupConfig, GatewayConfig, GraphConfig, ProviderClass,
};
use mnemograph_core::{
    ChatMessage, ChatModel, ChatOptions, Embedder, Engine, GatewayError, GraphStore, InMemoryGraph,
};

/// Embedder that looks up fixed vectors by exact text, with call counters.
pub struct VecEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    default: Vec<f32>,
    pub batch_calls: AtomicUsize,
    pub last_batch_len: AtomicUsize,
}

impl VecEmbedder {
    pub fn new(default: Vec<f32>) -> Self {
        Self {
            vectors: HashMap::new(),
            default,
            batch_calls: AtomicUsize::new(0),
            last_batch_len: AtomicUsize::new(0),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    fn lookup(&self, text: &str) -> Vec<f32> {
        self.vectors
            .get(text)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}

#[async_trait]
impl Embedder for VecEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        Ok(self.lookup(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.last_batch_len.store(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.lookup(t)).collect())
    }

    fn dim(&self) -> usize {
        self.default.len()
    }

    fn provider(&self) -> ProviderClass {
        ProviderClass::OpenAi
    }

    fn model(&self) -> &str {
        "test-embed"
    }
}

/// Chat model that always answers the same string.
pub struct FixedChat(pub String);

#[async_trait]
impl ChatModel for FixedChat {
    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<String, GatewayError> {
        Ok(self.0.clone())
    }
}

pub fn test_config() -> Config {
    Config {
        graph: GraphConfig {
            url: "bolt://127.0.0.1:7687".into(),
            user: String::new(),
            password: String::new(),
        },
        embedding: GatewayConfig {
            provider: ProviderClass::OpenAi,
            base_url: "http://127.0.0.1:0/v1".into(),
            api_key: None,
            model: "test-embed".into(),
        },
        llm: GatewayConfig {
            provider: ProviderClass::OpenAi,
            base_url: "http://127.0.0.1:0/v1".into(),
            api_key: None,
            model: "test-chat".into(),
        },
        embedding_dims: 3,
        dedup: DedupConfig {
            enabled: true,
            threshold: Some(0.85),
            max_candidates: 5,
        },
        context_window: ContextWindowConfig {
            enabled: true,
            size: 10,
        },
        requests_per_minute: 60,
        extraction_workers: 2,
        max_extraction_attempts: 3,
    }
}

/// Engine over the in-memory graph with the given fakes.
pub fn engine_with(
    graph: Arc<InMemoryGraph>,
    embedder: Arc<VecEmbedder>,
    llm_answer: &str,
) -> Engine {
    Engine::with_parts(
        graph as Arc<dyn GraphStore>,
        embedder as Arc<dyn Embedder>,
        Arc::new(FixedChat(llm_answer.to_string())),
        &test_config(),
    )
}
