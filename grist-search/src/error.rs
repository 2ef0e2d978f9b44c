use grist_core::AppError;
use grist_model::ModelError;
use grist_vector::VectorError;

/// Errors raised while indexing a resource.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Vector(#[from] VectorError),
}

/// Errors raised by the answer pipeline.
#[derive(Debug, thiserror::Error)]
pub enum AnswerError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Vector(#[from] VectorError),
}

impl From<AnswerError> for AppError {
    fn from(err: AnswerError) -> Self {
        match err {
            AnswerError::Validation(msg) => AppError::BadRequest(msg),
            AnswerError::Model(ModelError::Cancelled) => {
                AppError::BadRequest("generation cancelled".into())
            }
            AnswerError::Model(e) => {
                tracing::error!(error = %e, "model failure");
                AppError::Internal("answer generation failed".into())
            }
            AnswerError::Vector(e) => {
                tracing::error!(error = %e, "vector store failure");
                AppError::Internal("search failed".into())
            }
        }
    }
}
