//! Environment-backed configuration helpers.
//!
//! Each service assembles its own config struct in `main` from these
//! primitives; `dotenvy::dotenv()` is loaded by the binaries before any
//! lookup so a local `.env` file works the same as real environment
//! variables.

use std::str::FromStr;
use std::time::Duration;

/// Error raised when a required variable is missing or unparsable.
pub enum ConfigError {
    Missing(String),
    Invalid { key: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required environment variable {key}"),
            ConfigError::Invalid { key, message } => {
                write!(f, "invalid value for {key}: {message}")
            }
        }
    }
}

impl std::fmt::Debug for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for ConfigError {}

/// Fetch a required variable.
pub fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key.to_string()))
}

/// Fetch an optional variable; empty values count as absent.
pub fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Fetch a variable with a fallback default.
pub fn or_default(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

/// Fetch and parse a variable, falling back to `default` when absent.
pub fn parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key: key.to_string(),
            message: e.to_string(),
        }),
    }
}

/// HTTP server settings shared by both service binaries.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Bind address, e.g. `0.0.0.0:8080`.
    pub bind_addr: String,
    /// Grace period for draining in-flight requests on shutdown.
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    /// Load from `{PREFIX}_BIND_ADDR` / `{PREFIX}_SHUTDOWN_TIMEOUT_SECS`.
    pub fn from_env(prefix: &str, default_addr: &str) -> Result<Self, ConfigError> {
        let bind_addr = or_default(&format!("{prefix}_BIND_ADDR"), default_addr);
        let shutdown_secs: u64 = parse_or(&format!("{prefix}_SHUTDOWN_TIMEOUT_SECS"), 10)?;
        Ok(Self {
            bind_addr,
            shutdown_timeout: Duration::from_secs(shutdown_secs),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn require_reports_missing_key() {
        std::env::remove_var("GRIST_TEST_REQUIRED");
        let err = require("GRIST_TEST_REQUIRED").unwrap_err();
        assert!(err.to_string().contains("GRIST_TEST_REQUIRED"));
    }

    #[test]
    #[serial]
    fn empty_value_counts_as_absent() {
        std::env::set_var("GRIST_TEST_EMPTY", "");
        assert_eq!(optional("GRIST_TEST_EMPTY"), None);
        assert_eq!(or_default("GRIST_TEST_EMPTY", "fallback"), "fallback");
        std::env::remove_var("GRIST_TEST_EMPTY");
    }

    #[test]
    #[serial]
    fn parse_or_uses_default_and_parses_values() {
        std::env::remove_var("GRIST_TEST_NUM");
        assert_eq!(parse_or("GRIST_TEST_NUM", 42u64).unwrap(), 42);

        std::env::set_var("GRIST_TEST_NUM", "7");
        assert_eq!(parse_or("GRIST_TEST_NUM", 42u64).unwrap(), 7);

        std::env::set_var("GRIST_TEST_NUM", "not-a-number");
        assert!(parse_or("GRIST_TEST_NUM", 42u64).is_err());
        std::env::remove_var("GRIST_TEST_NUM");
    }

    #[test]
    #[serial]
    fn server_config_defaults() {
        std::env::remove_var("GRIST_TEST_BIND_ADDR");
        std::env::remove_var("GRIST_TEST_SHUTDOWN_TIMEOUT_SECS");
        let cfg = ServerConfig::from_env("GRIST_TEST", "127.0.0.1:9999").unwrap();
        assert_eq!(cfg.bind_addr, "127.0.0.1:9999");
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(10));
    }
}
