use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::config::SecurityConfig;
use crate::error::SecurityError;

/// Raw JWK as returned by the provider; only the RSA components we need.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    kid: Option<String>,
    kty: String,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JwksResponse {
    keys: Vec<Jwk>,
}

impl Jwk {
    /// `DecodingKey` is not `Clone`, so the raw components are cached and the
    /// key is reconstructed per lookup.
    fn to_decoding_key(&self) -> Result<DecodingKey, SecurityError> {
        match self.kty.as_str() {
            "RSA" => {
                let n = self.n.as_deref().ok_or_else(|| {
                    SecurityError::ValidationFailed("RSA key missing 'n' component".into())
                })?;
                let e = self.e.as_deref().ok_or_else(|| {
                    SecurityError::ValidationFailed("RSA key missing 'e' component".into())
                })?;
                DecodingKey::from_rsa_components(n, e).map_err(|err| {
                    SecurityError::ValidationFailed(format!("invalid RSA components: {err}"))
                })
            }
            other => Err(SecurityError::ValidationFailed(format!(
                "unsupported key type: {other}"
            ))),
        }
    }
}

struct CacheState {
    keys: HashMap<String, Jwk>,
    last_refresh: Option<Instant>,
    last_attempt: Option<Instant>,
}

/// Cache of JWKS signing keys indexed by `kid`.
///
/// Lookups refresh lazily: the first request, a stale cache, or an unknown
/// `kid` each trigger a fetch, rate-limited by the configured minimum
/// refresh interval so a flood of bad tokens cannot hammer the provider.
pub struct KeyCache {
    state: RwLock<CacheState>,
    jwks_url: String,
    ttl: Duration,
    min_refresh_interval: Duration,
    client: reqwest::Client,
    refresh_gate: Mutex<()>,
}

impl KeyCache {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            state: RwLock::new(CacheState {
                keys: HashMap::new(),
                last_refresh: None,
                last_attempt: None,
            }),
            jwks_url: config.jwks_url.clone(),
            ttl: Duration::from_secs(config.jwks_cache_ttl_secs),
            min_refresh_interval: Duration::from_secs(config.jwks_min_refresh_interval_secs),
            client: reqwest::Client::new(),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Retrieve the decoding key for `kid`, refreshing from the JWKS
    /// endpoint when the cache is cold, stale, or does not know the id.
    pub async fn get_key(&self, kid: &str) -> Result<DecodingKey, SecurityError> {
        {
            let state = self.state.read().await;
            if !is_stale(state.last_refresh, self.ttl) {
                if let Some(jwk) = state.keys.get(kid) {
                    return jwk.to_decoding_key();
                }
            }
        }

        self.refresh().await?;

        let state = self.state.read().await;
        state
            .keys
            .get(kid)
            .ok_or_else(|| SecurityError::UnknownKeyId(kid.to_string()))?
            .to_decoding_key()
    }

    async fn refresh(&self) -> Result<(), SecurityError> {
        let _gate = self.refresh_gate.lock().await;

        // A concurrent caller may have refreshed while we waited on the gate,
        // and repeated misses within the rate-limit window are served from
        // whatever the cache currently holds.
        {
            let mut state = self.state.write().await;
            if !can_attempt(state.last_attempt, self.min_refresh_interval) {
                return Ok(());
            }
            state.last_attempt = Some(Instant::now());
        }

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| SecurityError::JwksFetchError(e.to_string()))?
            .error_for_status()
            .map_err(|e| SecurityError::JwksFetchError(e.to_string()))?;

        let jwks: JwksResponse = response
            .json()
            .await
            .map_err(|e| SecurityError::JwksFetchError(format!("failed to parse JWKS: {e}")))?;

        let keys = jwks
            .keys
            .into_iter()
            .filter_map(|jwk| jwk.kid.clone().map(|kid| (kid, jwk)))
            .collect();

        let mut state = self.state.write().await;
        state.keys = keys;
        state.last_refresh = Some(Instant::now());
        tracing::debug!(url = %self.jwks_url, keys = state.keys.len(), "JWKS refreshed");
        Ok(())
    }
}

fn is_stale(last_refresh: Option<Instant>, ttl: Duration) -> bool {
    match last_refresh {
        None => true,
        Some(ts) => ts.elapsed() >= ttl,
    }
}

fn can_attempt(last_attempt: Option<Instant>, min_interval: Duration) -> bool {
    match last_attempt {
        None => true,
        Some(ts) => ts.elapsed() >= min_interval,
    }
}

#[cfg(test)]
mod tests {
    use super::{can_attempt, is_stale};
    use std::time::{Duration, Instant};

    #[test]
    fn stale_when_never_refreshed() {
        assert!(is_stale(None, Duration::from_secs(60)));
    }

    #[test]
    fn stale_after_ttl() {
        let ts = Instant::now() - Duration::from_secs(61);
        assert!(is_stale(Some(ts), Duration::from_secs(60)));
    }

    #[test]
    fn fresh_before_ttl() {
        let ts = Instant::now() - Duration::from_secs(10);
        assert!(!is_stale(Some(ts), Duration::from_secs(60)));
    }

    #[test]
    fn attempt_allowed_after_interval() {
        assert!(can_attempt(None, Duration::from_secs(10)));
        let ts = Instant::now() - Duration::from_secs(11);
        assert!(can_attempt(Some(ts), Duration::from_secs(10)));
    }

    #[test]
    fn attempt_throttled_within_interval() {
        let ts = Instant::now() - Duration::from_secs(3);
        assert!(!can_attempt(Some(ts), Duration::from_secs(10)));
    }
}
