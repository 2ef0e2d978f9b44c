use jsonwebtoken::Algorithm;

/// Security configuration for token validation and the JWKS cache.
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// URL of the provider's JWKS endpoint.
    pub jwks_url: String,

    /// Expected `iss` claim.
    pub issuer: String,

    /// Expected `aud` claim.
    pub audience: String,

    /// How long fetched JWKS keys stay fresh (default: 3600s).
    pub jwks_cache_ttl_secs: u64,

    /// Minimum interval between JWKS refresh attempts (default: 10s).
    pub jwks_min_refresh_interval_secs: u64,

    /// Allowed JWT algorithms; tokens using anything else are rejected.
    /// Default: RS256 only.
    pub allowed_algorithms: Vec<Algorithm>,
}

impl SecurityConfig {
    pub fn new(
        jwks_url: impl Into<String>,
        issuer: impl Into<String>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            jwks_url: jwks_url.into(),
            issuer: issuer.into(),
            audience: audience.into(),
            jwks_cache_ttl_secs: 3600,
            jwks_min_refresh_interval_secs: 10,
            allowed_algorithms: vec![Algorithm::RS256],
        }
    }

    /// Restrict validation to a single algorithm.
    pub fn with_allowed_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.allowed_algorithms = vec![algorithm];
        self
    }

    /// Set the JWKS cache TTL in seconds.
    pub fn with_cache_ttl(mut self, ttl_secs: u64) -> Self {
        self.jwks_cache_ttl_secs = ttl_secs;
        self
    }
}
