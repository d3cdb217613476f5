//! Configuration structures.
//!
//! Configuration is loaded from environment variables and config files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Global engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Memory subsystem limits.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Fast-KV store connection settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Health monitor and circuit breaker settings.
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Pipeline bounds and cache TTLs.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load defaults, overridden by environment variables where set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("VALET_REDIS_HOST") {
            config.store.host = host;
        }
        if let Ok(port) = std::env::var("VALET_REDIS_PORT") {
            if let Ok(port) = port.parse() {
                config.store.port = port;
            }
        }
        if let Ok(db) = std::env::var("VALET_REDIS_DB") {
            if let Ok(db) = db.parse() {
                config.store.db = db;
            }
        }
        if let Ok(endpoint) = std::env::var("VALET_LLM_ENDPOINT") {
            config.llm.endpoint = endpoint;
        }
        if let Ok(model) = std::env::var("VALET_LLM_MODEL") {
            config.llm.model = model;
        }
        config
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Memory subsystem limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum messages retained in the ephemeral buffer.
    pub max_buffer_messages: usize,

    /// Maximum total tokens retained in the ephemeral buffer.
    pub max_buffer_tokens: usize,

    /// Token count at which rolling summarization triggers.
    pub summary_trigger_tokens: usize,

    /// Number of oldest messages folded into a summary per trigger.
    pub summary_batch_size: usize,

    /// Buffer TTL on idle.
    #[serde(with = "humantime_serde")]
    pub buffer_ttl: Duration,

    /// Summary TTL in the fast store (durable mirror has no TTL).
    #[serde(with = "humantime_serde")]
    pub summary_ttl: Duration,

    /// Summary history length before the oldest three are merged.
    pub max_summaries: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_buffer_messages: 30,
            max_buffer_tokens: 4000,
            summary_trigger_tokens: 3000,
            summary_batch_size: 10,
            buffer_ttl: Duration::from_secs(6 * 3600),
            summary_ttl: Duration::from_secs(24 * 3600),
            max_summaries: 8,
        }
    }
}

/// Fast-KV store connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub db: u32,

    /// Connection pool size.
    pub pool_size: usize,

    /// Per-operation socket timeout.
    #[serde(with = "humantime_serde")]
    pub socket_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            pool_size: 20,
            socket_timeout: Duration::from_secs(5),
        }
    }
}

/// Health monitor and circuit breaker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive errors before a service is marked unavailable.
    pub degradation_error_threshold: u32,

    /// Consecutive failures before a circuit breaker opens.
    pub breaker_failure_threshold: u32,

    /// Time an open breaker waits before allowing a trial call.
    #[serde(with = "humantime_serde")]
    pub breaker_recovery_timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            degradation_error_threshold: 3,
            breaker_failure_threshold: 5,
            breaker_recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// LLM provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Chat-completion endpoint (OpenAI-compatible).
    pub endpoint: String,

    /// Model identifier sent with each request.
    pub model: String,

    /// Environment variable holding the API key.
    pub api_key_env: String,

    /// Per-call deadline.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Retries for transient transport errors (parse failures never retry).
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 1,
        }
    }
}

/// Pipeline bounds and cache TTLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Result limiter bound: above this the search pipeline reports
    /// too_many_results instead of passing items through.
    pub max_search_results: usize,

    /// Preference ranker output size.
    pub top_k: usize,

    /// Product count above which the FSM routes to attribute analysis.
    pub product_threshold: usize,

    /// Attribute analyzer cache TTL.
    #[serde(with = "humantime_serde")]
    pub attribute_cache_ttl: Duration,

    /// Cached pipeline result TTL.
    #[serde(with = "humantime_serde")]
    pub pipeline_cache_ttl: Duration,

    /// In-process enhanced-context cache TTL.
    #[serde(with = "humantime_serde")]
    pub context_cache_ttl: Duration,

    /// Adapter HTTP timeout.
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_search_results: 50,
            top_k: 3,
            product_threshold: 10,
            attribute_cache_ttl: Duration::from_secs(60 * 60),
            pipeline_cache_ttl: Duration::from_secs(30 * 60),
            context_cache_ttl: Duration::from_secs(5 * 60),
            http_timeout: Duration::from_secs(10),
        }
    }
}
