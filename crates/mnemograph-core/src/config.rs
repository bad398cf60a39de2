//! Process configuration
//!
//! Read once from the environment at boot and treated as read-only
//! afterwards. The only runtime-mutable knob is the per-provider dedup
//! threshold override, which lives on the dedup engine itself.

use std::env;

use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

/// Boot-time configuration failures, always naming the offending variable
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is absent or empty
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    /// A variable is present but unparseable
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

// ============================================================================
// PROVIDER SELECTION
// ============================================================================

/// Embedding / LLM provider class
///
/// Open to extension; the class only matters where behaviour differs
/// (dedup threshold defaults, credential variables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderClass {
    /// OpenAI or any API-compatible hosted service
    OpenAi,
    /// Local OpenAI-compatible server (Ollama, llama.cpp, vLLM)
    Local,
}

impl ProviderClass {
    /// Default cosine-similarity threshold for dedup stage 1.
    ///
    /// Hosted embedding models produce tighter clusters than small local
    /// ones, so they get a higher bar before two texts count as candidates.
    pub fn default_dedup_threshold(self) -> f32 {
        match self {
            ProviderClass::OpenAi => 0.90,
            ProviderClass::Local => 0.80,
        }
    }

    fn parse(var: &'static str, raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "openai" => Ok(ProviderClass::OpenAi),
            "local" | "ollama" => Ok(ProviderClass::Local),
            other => Err(ConfigError::Invalid {
                var,
                reason: format!("unknown provider '{other}' (expected openai|local)"),
            }),
        }
    }
}

// ============================================================================
// CONFIG
// ============================================================================

/// Graph store connection settings
#[derive(Debug, Clone)]
pub struct GraphConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

/// One outbound gateway (embeddings or chat)
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub provider: ProviderClass,
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

/// Dedup engine settings
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub enabled: bool,
    /// Explicit threshold; `None` falls back to the provider-class default
    pub threshold: Option<f32>,
    /// Max vector candidates fetched in stage 1
    pub max_candidates: usize,
}

/// Context-window settings for embedding enrichment
#[derive(Debug, Clone)]
pub struct ContextWindowConfig {
    pub enabled: bool,
    /// Number of recent live memories prepended to the embedding input (0-50)
    pub size: usize,
}

/// Full process configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub graph: GraphConfig,
    pub embedding: GatewayConfig,
    pub llm: GatewayConfig,
    /// Declared embedding dimension; must match the provider exactly
    pub embedding_dims: usize,
    pub dedup: DedupConfig,
    pub context_window: ContextWindowConfig,
    /// Provider rate limit used to cap bulk-ingest concurrency
    pub requests_per_minute: usize,
    /// Max concurrent background extraction workers
    pub extraction_workers: usize,
    /// Extraction attempts before the reaper gives up on a memory
    pub max_extraction_attempts: u32,
}

impl Config {
    /// Read the full configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let graph = GraphConfig {
            url: optional("MEMGRAPH_URL").unwrap_or_else(|| "bolt://127.0.0.1:7687".into()),
            user: optional("MEMGRAPH_USER").unwrap_or_default(),
            password: optional("MEMGRAPH_PASSWORD").unwrap_or_default(),
        };

        let embedding_provider = match optional("EMBEDDING_PROVIDER") {
            Some(raw) => ProviderClass::parse("EMBEDDING_PROVIDER", &raw)?,
            None => ProviderClass::OpenAi,
        };
        let embedding = GatewayConfig {
            provider: embedding_provider,
            base_url: optional("EMBEDDING_BASE_URL")
                .unwrap_or_else(|| default_base_url(embedding_provider)),
            api_key: optional("OPENAI_API_KEY"),
            model: optional("EMBEDDING_MODEL").unwrap_or_else(|| "text-embedding-3-small".into()),
        };

        let llm_provider = match optional("LLM_PROVIDER") {
            Some(raw) => ProviderClass::parse("LLM_PROVIDER", &raw)?,
            None => embedding_provider,
        };
        let llm = GatewayConfig {
            provider: llm_provider,
            base_url: optional("LLM_BASE_URL").unwrap_or_else(|| default_base_url(llm_provider)),
            api_key: optional("OPENAI_API_KEY"),
            model: optional("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
        };

        let embedding_dims = parse_num("EMBEDDING_DIMS", 1536)?;
        if embedding_dims == 0 {
            return Err(ConfigError::Invalid {
                var: "EMBEDDING_DIMS",
                reason: "must be greater than zero".into(),
            });
        }

        let dedup = DedupConfig {
            enabled: parse_bool("DEDUP_ENABLED", true)?,
            threshold: match optional("DEDUP_THRESHOLD") {
                Some(raw) => Some(parse_threshold(raw)?),
                None => None,
            },
            max_candidates: parse_num("DEDUP_MAX_CANDIDATES", 5)?,
        };

        let context_window = ContextWindowConfig {
            enabled: parse_bool("CONTEXT_WINDOW_ENABLED", true)?,
            size: parse_num::<usize>("CONTEXT_WINDOW_SIZE", 10)?.min(50),
        };

        Ok(Config {
            graph,
            embedding,
            llm,
            embedding_dims,
            dedup,
            context_window,
            requests_per_minute: parse_num("OPENAI_REQUESTS_PER_MINUTE", 60)?,
            extraction_workers: parse_num("EXTRACTION_WORKERS", 4)?,
            max_extraction_attempts: parse_num("MAX_EXTRACTION_ATTEMPTS", 3)?,
        })
    }

    /// Effective dedup threshold: explicit setting, else provider default.
    pub fn dedup_threshold(&self) -> f32 {
        self.dedup
            .threshold
            .unwrap_or_else(|| self.embedding.provider.default_dedup_threshold())
    }

    /// Bulk-ingest concurrency cap: `min(5, RPM / 20)`, at least 1.
    pub fn bulk_concurrency(&self) -> usize {
        (self.requests_per_minute / 20).clamp(1, 5)
    }
}

fn default_base_url(provider: ProviderClass) -> String {
    match provider {
        ProviderClass::OpenAi => "https://api.openai.com/v1".into(),
        ProviderClass::Local => "http://127.0.0.1:11434/v1".into(),
    }
}

fn optional(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn parse_num<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(var) {
        Some(raw) => raw.trim().parse().map_err(|e| ConfigError::Invalid {
            var,
            reason: format!("{e}"),
        }),
        None => Ok(default),
    }
}

fn parse_bool(var: &'static str, default: bool) -> Result<bool, ConfigError> {
    match optional(var) {
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(ConfigError::Invalid {
                var,
                reason: format!("expected boolean, got '{other}'"),
            }),
        },
        None => Ok(default),
    }
}

fn parse_threshold(raw: String) -> Result<f32, ConfigError> {
    let value: f32 = raw.trim().parse().map_err(|e| ConfigError::Invalid {
        var: "DEDUP_THRESHOLD",
        reason: format!("{e}"),
    })?;
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid {
            var: "DEDUP_THRESHOLD",
            reason: format!("{value} is outside 0.0..=1.0"),
        });
    }
    Ok(value)
}

// ============================================================================
// TESTS
// ============================================================================
