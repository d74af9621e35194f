//! Configuration types for the chatsql service
//!
//! Loaded by `chatsql-infra::config::load` from layered environment
//! variables (prefix `CHATSQL_`). Every sub-config has a `Default` so the
//! service is runnable with nothing but a database url.

use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub agent: AgentConfig,
    pub provider: ProviderConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            agent: AgentConfig::default(),
            provider: ProviderConfig::default(),
        }
    }
}

/// HTTP server bind configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 1000,
        }
    }
}

/// Durable store and artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub database_url: String,
    pub artifact_dir: String,
    /// FIFO bound on the analyzer's rewrite cache (spec §4.1).
    pub rewrite_cache_size: usize,
    /// LRU bound on the prompt composer's cache (spec §4.3).
    pub prompt_cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://chatsql.db".to_string(),
            artifact_dir: "./artifacts".to_string(),
            rewrite_cache_size: 100,
            prompt_cache_size: 200,
        }
    }
}

/// Agent loop and stream orchestrator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Maximum tool-calling iterations per turn (spec §4.4).
    pub max_iterations: u32,
    /// Wall-clock budget per turn, in seconds (spec §4.4).
    pub deadline_seconds: u64,
    /// Bounded event channel capacity (spec §4.5).
    pub event_buffer_size: usize,
    /// Few-shot exemplar cap (spec §4.2).
    pub exemplar_limit: usize,
    /// Background RAG eviction sweep interval, in hours (spec §4.7).
    pub eviction_interval_hours: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 8,
            deadline_seconds: 60,
            event_buffer_size: 256,
            exemplar_limit: 3,
            eviction_interval_hours: 24,
        }
    }
}

/// Opaque collaborator endpoints. Never logged in full (keys redacted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub llm_endpoint: String,
    pub llm_api_key: String,
    pub embedder_endpoint: String,
    pub embedder_api_key: String,
    pub query_executor_endpoint: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            llm_endpoint: "http://localhost:11434/v1/chat/completions".to_string(),
            llm_api_key: String::new(),
            embedder_endpoint: "http://localhost:11434/v1/embeddings".to_string(),
            embedder_api_key: String::new(),
            query_executor_endpoint: "http://localhost:7070/query".to_string(),
        }
    }
}

impl std::fmt::Display for ProviderConfig {
    /// Redacted display: never print API keys, even accidentally via `{}`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ProviderConfig {{ llm_endpoint: {}, embedder_endpoint: {} }}",
            self.llm_endpoint, self.embedder_endpoint
        )
    }
}
