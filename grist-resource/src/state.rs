use std::sync::Arc;

use axum::extract::FromRef;
use grist_security::TokenValidator;

use crate::services::ResourceService;

/// Shared application state for the resource service router.
pub struct AppState<S, O, P> {
    pub resources: ResourceService<S, O, P>,
    pub validator: Arc<TokenValidator>,
}

impl<S, O, P> Clone for AppState<S, O, P> {
    fn clone(&self) -> Self {
        Self {
            resources: self.resources.clone(),
            validator: self.validator.clone(),
        }
    }
}

impl<S, O, P> FromRef<AppState<S, O, P>> for Arc<TokenValidator> {
    fn from_ref(state: &AppState<S, O, P>) -> Self {
        state.validator.clone()
    }
}
