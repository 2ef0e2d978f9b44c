use grist_core::AppError;
use grist_extract::ExtractError;
use grist_outbox::OutboxError;

use crate::store::StoreError;

/// Errors surfaced by the resource service's operations.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("resource not found")]
    NotFound,
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => AppError::BadRequest(msg),
            ServiceError::NotFound => AppError::NotFound("resource not found".into()),
            ServiceError::Extract(e) => AppError::BadRequest(e.to_string()),
            ServiceError::Store(e) => {
                tracing::error!(error = %e, "storage failure");
                AppError::Internal("storage failure".into())
            }
            ServiceError::Outbox(e) => {
                tracing::error!(error = %e, "outbox failure");
                AppError::Internal("storage failure".into())
            }
        }
    }
}
