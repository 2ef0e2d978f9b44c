use std::sync::Arc;

use axum::extract::FromRef;
use grist_security::TokenValidator;

use crate::services::AnswerService;

/// Shared application state for the search service router.
pub struct AppState<V, E, G> {
    pub answers: AnswerService<V, E, G>,
    pub validator: Arc<TokenValidator>,
}

impl<V, E, G> Clone for AppState<V, E, G> {
    fn clone(&self) -> Self {
        Self {
            answers: self.answers.clone(),
            validator: self.validator.clone(),
        }
    }
}

impl<V, E, G> FromRef<AppState<V, E, G>> for Arc<TokenValidator> {
    fn from_ref(state: &AppState<V, E, G>) -> Self {
        state.validator.clone()
    }
}
