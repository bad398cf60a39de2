//! Embedding gateway
//!
//! Vectors are unit-normalized before they leave this module, so cosine
//! similarity downstream is a plain dot product. Swapping the provider
//! changes the dimension, which means a schema rebuild and a full
//! re-embed - the declared dimension is therefore validated on every
//! response, not trusted.

use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{GatewayConfig, ProviderClass};
use crate::error::GatewayError;

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Scale a vector to unit length. Zero vectors stay zero.
pub fn unit_normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for v in &mut vector {
            *v /= norm;
        }
    }
    vector
}

/// Cosine similarity. Mismatched lengths score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

// ============================================================================
// TRAIT
// ============================================================================

/// Health probe result for the embedding dependency
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddingHealth {
    pub ok: bool,
    pub provider: String,
    pub model: String,
    pub dim: usize,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Capability surface of the embedding provider
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text into a unit-norm vector of exactly `dim()` floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError>;

    /// Embed a batch in one provider call; result order matches input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError>;

    /// Declared vector dimension.
    fn dim(&self) -> usize;

    /// Provider class, used for dedup-threshold defaults.
    fn provider(&self) -> ProviderClass;

    /// Model identifier for health reporting.
    fn model(&self) -> &str;

    /// Round-trip probe with latency.
    async fn health(&self) -> EmbeddingHealth {
        let started = Instant::now();
        let result = self.embed("health probe").await;
        let latency_ms = started.elapsed().as_millis() as u64;
        EmbeddingHealth {
            ok: result.is_ok(),
            provider: format!("{:?}", self.provider()).to_lowercase(),
            model: self.model().to_string(),
            dim: self.dim(),
            latency_ms,
            error: result.err().map(|e| e.to_string()),
        }
    }
}

// ============================================================================
// OPENAI-COMPATIBLE HTTP IMPLEMENTATION
// ============================================================================

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Deadline for one embedding round trip
const EMBED_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// `/v1/embeddings` client
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: GatewayConfig,
    dims: usize,
}

impl HttpEmbedder {
    pub fn new(config: GatewayConfig, dims: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(EMBED_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            config,
            dims,
        }
    }

    async fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.config.model,
            input,
        });
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Provider {
                status: status.as_u16(),
                detail: response.text().await.unwrap_or_default(),
            });
        }
        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        if body.data.len() != input.len() {
            return Err(GatewayError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                input.len(),
                body.data.len()
            )));
        }

        // Providers may return out of order; index is authoritative.
        let mut ordered: Vec<Option<Vec<f32>>> = vec![None; input.len()];
        for datum in body.data {
            if datum.embedding.len() != self.dims {
                return Err(GatewayError::DimensionMismatch {
                    expected: self.dims,
                    got: datum.embedding.len(),
                });
            }
            let slot = ordered.get_mut(datum.index).ok_or_else(|| {
                GatewayError::InvalidResponse(format!("embedding index {} out of range", datum.index))
            })?;
            *slot = Some(unit_normalize(datum.embedding));
        }
        ordered
            .into_iter()
            .enumerate()
            .map(|(i, slot)| {
                slot.ok_or_else(|| {
                    GatewayError::InvalidResponse(format!("missing embedding at index {i}"))
                })
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, GatewayError> {
        let mut vectors = self.request(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| GatewayError::InvalidResponse("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, GatewayError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        self.request(texts).await
    }

    fn dim(&self) -> usize {
        self.dims
    }

    fn provider(&self) -> ProviderClass {
        self.config.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_normalize_produces_unit_length() {
        let normalized = unit_normalize(vec![3.0, 4.0]);
        let norm: f32 = normalized.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unit_normalize_leaves_zero_vectors_alone() {
        assert_eq!(unit_normalize(vec![0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn cosine_on_unit_vectors_is_dot_product() {
        let a = unit_normalize(vec![1.0, 2.0, 3.0]);
        let b = unit_normalize(vec![3.0, 2.0, 1.0]);
        let dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
        assert!((cosine_similarity(&a, &b) - dot).abs() < 1e-6);
    }

    #[test]
    fn cosine_rejects_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }
}
