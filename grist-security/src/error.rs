use grist_core::AppError;

/// Errors raised while authenticating a request.
#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    /// Neither an `Authorization: Bearer` header nor an `auth_token`
    /// query parameter was present.
    #[error("missing credentials")]
    MissingCredentials,

    /// The authorization scheme is not `Bearer`.
    #[error("invalid authorization scheme")]
    InvalidAuthScheme,

    /// The token is malformed or its signature does not verify.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token has expired.
    #[error("token expired")]
    TokenExpired,

    /// The `kid` from the token header is not present in the JWKS.
    #[error("unknown signing key: {0}")]
    UnknownKeyId(String),

    /// The JWKS endpoint could not be fetched or parsed.
    #[error("JWKS fetch error: {0}")]
    JwksFetchError(String),

    /// Issuer, audience, or another claim did not match.
    #[error("token validation failed: {0}")]
    ValidationFailed(String),
}

impl SecurityError {
    /// What the client sees. Validation detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        "Unauthorized"
    }
}

impl From<SecurityError> for AppError {
    fn from(err: SecurityError) -> Self {
        AppError::Unauthorized(err.public_message().to_string())
    }
}
