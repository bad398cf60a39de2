//! Outbound gateways
//!
//! The embedding provider and the chat LLM are remote capabilities. The
//! engine only sees the [`Embedder`] and [`ChatModel`] traits; the HTTP
//! implementations speak the OpenAI-compatible wire shape so hosted and
//! local (Ollama-style) providers share one code path.

mod embedding;
mod llm;

pub use embedding::{
    Embedder, EmbeddingHealth, HttpEmbedder, cosine_similarity, unit_normalize,
};
pub use llm::{ChatMessage, ChatModel, ChatOptions, ChatRole, HttpChatModel};
