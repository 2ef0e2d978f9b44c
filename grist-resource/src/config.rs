use grist_core::config::{self, ConfigError, ServerConfig};
use grist_security::SecurityConfig;

/// Resource service configuration, loaded from the environment.
#[derive(Clone, Debug)]
pub struct ResourceServiceConfig {
    pub server: ServerConfig,
    pub database_url: String,
    pub kafka_brokers: String,
    pub consumer_group: String,
    pub outbox_sweep_secs: u64,
    pub security: SecurityConfig,
}

impl ResourceServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env("RESOURCE", "0.0.0.0:8080")?,
            database_url: config::require("RESOURCE_DATABASE_URL")?,
            kafka_brokers: config::or_default("KAFKA_BROKERS", "localhost:9092"),
            consumer_group: config::or_default("RESOURCE_CONSUMER_GROUP", "resource-service"),
            outbox_sweep_secs: config::parse_or("OUTBOX_SWEEP_INTERVAL_SECS", 10)?,
            security: SecurityConfig::new(
                config::require("OIDC_JWKS_URL")?,
                config::require("OIDC_ISSUER")?,
                config::require("OIDC_AUDIENCE")?,
            ),
        })
    }
}
