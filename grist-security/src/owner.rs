use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use grist_core::AppError;

use crate::error::SecurityError;
use crate::token::TokenValidator;

/// The authenticated tenant.
///
/// `id` is the OIDC subject claim; every query in both services is scoped
/// by it. Nothing else from the token matters to the core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Owner {
    pub id: String,
    pub email: Option<String>,
}

impl Owner {
    /// Build an `Owner` from validated claims. A missing or empty `sub`
    /// is a validation failure, not an anonymous owner.
    pub fn from_claims(claims: &serde_json::Value) -> Result<Self, SecurityError> {
        let id = claims
            .get("sub")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SecurityError::ValidationFailed("token has no subject claim".into()))?
            .to_string();
        let email = claims
            .get("email")
            .and_then(|v| v.as_str())
            .map(String::from);
        Ok(Self { id, email })
    }
}

/// Extract the Bearer token from a `Authorization` header value.
fn bearer_token(header_value: &str) -> Result<&str, SecurityError> {
    let mut parts = header_value.splitn(2, ' ');
    let scheme = parts.next().unwrap_or_default();
    let token = parts.next().ok_or(SecurityError::InvalidAuthScheme)?;
    if !scheme.eq_ignore_ascii_case("Bearer") {
        return Err(SecurityError::InvalidAuthScheme);
    }
    Ok(token)
}

/// Locate the request's credential.
///
/// Lookup order: `Authorization: Bearer …` header, then the `auth_token`
/// query parameter (browsers opening an `EventSource` cannot set headers).
pub fn token_from_parts(parts: &Parts) -> Result<String, SecurityError> {
    if let Some(header) = parts.headers.get(AUTHORIZATION) {
        let value = header
            .to_str()
            .map_err(|_| SecurityError::InvalidAuthScheme)?;
        return bearer_token(value).map(str::to_string);
    }

    if let Some(query) = parts.uri.query() {
        if let Some((_, token)) = form_urlencoded::parse(query.as_bytes())
            .find(|(key, value)| key == "auth_token" && !value.is_empty())
        {
            return Ok(token.into_owned());
        }
    }

    warn!(uri = %parts.uri, "request carried no credentials");
    Err(SecurityError::MissingCredentials)
}

/// Axum extractor: validate the request's token and produce the [`Owner`].
///
/// The application state must expose `Arc<TokenValidator>` via `FromRef`.
impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
    Arc<TokenValidator>: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts)?;
        let validator: Arc<TokenValidator> = Arc::from_ref(state);

        let claims = validator.validate(&token).await.map_err(|e| {
            warn!(uri = %parts.uri, error = %e, "request authentication failed");
            AppError::from(e)
        })?;

        let owner = Owner::from_claims(&claims)?;
        debug!(uri = %parts.uri, owner = %owner.id, "authenticated request");
        Ok(owner)
    }
}
