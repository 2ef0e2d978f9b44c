use std::sync::Arc;

use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use tracing::{debug, warn};

use crate::config::SecurityConfig;
use crate::error::SecurityError;
use crate::keys::KeyCache;

/// Source of decoding keys: the provider's JWKS, or a static key for tests.
enum KeySource {
    Jwks(Arc<KeyCache>),
    Static(DecodingKey),
}

/// Validates Bearer tokens and returns their raw claims.
///
/// Performs header decoding, algorithm allow-listing, key retrieval,
/// signature verification, and standard claim validation (`iss`, `aud`,
/// `exp`, `nbf`). Identity construction from the claims is the caller's
/// concern; see [`Owner`](crate::Owner).
pub struct TokenValidator {
    key_source: KeySource,
    config: SecurityConfig,
}

impl TokenValidator {
    /// Validator backed by the JWKS endpoint in `config`.
    pub fn new(config: SecurityConfig) -> Self {
        let cache = Arc::new(KeyCache::new(&config));
        Self {
            key_source: KeySource::Jwks(cache),
            config,
        }
    }

    /// Validator with a static decoding key (tests, local development).
    pub fn with_static_key(key: DecodingKey, config: SecurityConfig) -> Self {
        Self {
            key_source: KeySource::Static(key),
            config,
        }
    }

    pub fn config(&self) -> &SecurityConfig {
        &self.config
    }

    /// Validate `token` and return its claims.
    pub async fn validate(&self, token: &str) -> Result<serde_json::Value, SecurityError> {
        let header = decode_header(token)
            .map_err(|e| SecurityError::InvalidToken(format!("failed to decode header: {e}")))?;

        let algorithm = header.alg;
        if !self.config.allowed_algorithms.contains(&algorithm) {
            return Err(SecurityError::ValidationFailed(format!(
                "disallowed JWT algorithm: {algorithm:?}"
            )));
        }

        let decoding_key = match &self.key_source {
            KeySource::Static(key) => key.clone(),
            KeySource::Jwks(cache) => {
                let kid = header.kid.as_deref().ok_or_else(|| {
                    SecurityError::InvalidToken("JWT header missing 'kid' field".into())
                })?;
                cache.get_key(kid).await?
            }
        };

        let mut validation = Validation::new(algorithm);
        validation.algorithms = self.config.allowed_algorithms.clone();
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.validate_exp = true;
        validation.validate_nbf = true;

        let token_data =
            decode::<serde_json::Value>(token, &decoding_key, &validation).map_err(|e| {
                let err = match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => SecurityError::TokenExpired,
                    jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
                        SecurityError::ValidationFailed("invalid issuer".into())
                    }
                    jsonwebtoken::errors::ErrorKind::InvalidAudience => {
                        SecurityError::ValidationFailed("invalid audience".into())
                    }
                    _ => SecurityError::InvalidToken(e.to_string()),
                };
                warn!(error = %err, "JWT validation failed");
                err
            })?;

        debug!(
            sub = token_data.claims.get("sub").and_then(|v| v.as_str()).unwrap_or("unknown"),
            "JWT validated"
        );
        Ok(token_data.claims)
    }
}
