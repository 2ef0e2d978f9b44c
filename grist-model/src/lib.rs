//! Model contracts.
//!
//! The QA pipeline consumes two capabilities: turning text into embedding
//! vectors and streaming generated answer tokens. Model hosting stays
//! external; [`openai`] talks to any OpenAI-compatible HTTP endpoint and
//! [`fake`] provides deterministic in-process stand-ins for tests and local
//! runs.

use std::future::Future;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub mod fake;
pub mod openai;

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model endpoint returned status {status}: {message}")]
    Upstream { status: u16, message: String },
    #[error("model response could not be decoded: {0}")]
    Codec(String),
    #[error("generation cancelled")]
    Cancelled,
}

/// Batched text embedding.
pub trait Embedder: Send + Sync + 'static {
    /// Embed `texts`, preserving order. Implementations batch in one call
    /// where the backend allows it.
    fn embed(
        &self,
        texts: &[String],
    ) -> impl Future<Output = Result<Vec<Vec<f32>>, ModelError>> + Send;
}

/// Streaming answer generation.
pub trait Generator: Send + Sync + 'static {
    /// Generate an answer for `prompt`, forwarding each token fragment into
    /// `tokens` as it arrives, and return the full accumulated answer.
    ///
    /// Generation stops with [`ModelError::Cancelled`] when `cancel` fires
    /// or the token receiver is dropped; both mean nobody is listening.
    fn generate(
        &self,
        prompt: &str,
        tokens: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<String, ModelError>> + Send;
}
