use grist_core::config::{self, ConfigError, ServerConfig};
use grist_security::SecurityConfig;

/// Search service configuration, loaded from the environment.
#[derive(Clone, Debug)]
pub struct SearchServiceConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub kafka_brokers: String,
    pub consumer_group: String,
    pub outbox_sweep_secs: u64,
    pub qdrant_url: String,
    pub qdrant_collection: String,
    pub embedding_dim: usize,
    pub chunk_capacity: usize,
    pub model_base_url: String,
    pub model_api_key: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub security: SecurityConfig,
}

impl SearchServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env("SEARCH", "0.0.0.0:8081")?,
            database_url: config::require("SEARCH_DATABASE_URL")?,
            kafka_brokers: config::or_default("KAFKA_BROKERS", "localhost:9092"),
            consumer_group: config::or_default("SEARCH_CONSUMER_GROUP", "search-service"),
            outbox_sweep_secs: config::parse_or("OUTBOX_SWEEP_INTERVAL_SECS", 10)?,
            qdrant_url: config::or_default("QDRANT_URL", "http://localhost:6333"),
            qdrant_collection: config::or_default("QDRANT_COLLECTION", "grist-chunks"),
            embedding_dim: config::parse_or("EMBEDDING_DIM", 1536)?,
            chunk_capacity: config::parse_or("CHUNK_CAPACITY", 1500)?,
            model_base_url: config::or_default("MODEL_BASE_URL", "https://api.openai.com/v1"),
            model_api_key: config::require("MODEL_API_KEY")?,
            embedding_model: config::or_default("EMBEDDING_MODEL", "text-embedding-3-small"),
            chat_model: config::or_default("CHAT_MODEL", "gpt-4o-mini"),
            security: SecurityConfig::new(
                config::require("OIDC_JWKS_URL")?,
                config::require("OIDC_ISSUER")?,
                config::require("OIDC_AUDIENCE")?,
            ),
        })
    }
}
