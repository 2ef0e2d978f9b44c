//! JWT/OIDC security for the grist services.
//!
//! Every API endpoint is scoped to an [`Owner`]: the subject claim of a
//! validated Bearer token issued by an external identity provider. Tokens
//! are looked up in the `Authorization` header first, then in the
//! `auth_token` query parameter (SSE clients cannot always set headers).
//!
//! Signing keys come from the provider's JWKS endpoint via [`KeyCache`];
//! tests use a static HS256 key instead.

mod config;
mod error;
mod keys;
mod owner;
mod token;

pub use config::SecurityConfig;
pub use error::SecurityError;
pub use keys::KeyCache;
pub use owner::{token_from_parts, Owner};
pub use token::TokenValidator;
