//! Deterministic in-process model backends for tests and local runs.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{Embedder, Generator, ModelError};

/// Bag-of-words hashing embedder.
///
/// Same text always maps to the same vector, and texts sharing words get a
/// positive cosine similarity: enough structure for retrieval tests without
/// a model in the loop.
pub struct FakeEmbedder {
    dim: usize,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self { dim: 256 }
    }

    pub fn with_dim(dim: usize) -> Self {
        Self { dim }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dim];
        for word in text.to_lowercase().split_whitespace() {
            let mut hasher = DefaultHasher::new();
            word.hash(&mut hasher);
            vector[(hasher.finish() % self.dim as u64) as usize] += 1.0;
        }
        vector
    }
}

impl Default for FakeEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for FakeEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ModelError> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Generator that streams a scripted answer token by token.
pub struct FakeGenerator {
    tokens: Vec<String>,
    token_delay: Duration,
}

impl FakeGenerator {
    /// Stream `answer` one word at a time.
    pub fn from_answer(answer: &str) -> Self {
        let tokens = answer
            .split_whitespace()
            .enumerate()
            .map(|(i, word)| {
                if i == 0 {
                    word.to_string()
                } else {
                    format!(" {word}")
                }
            })
            .collect();
        Self {
            tokens,
            token_delay: Duration::ZERO,
        }
    }

    /// Pause between tokens, so tests can cancel mid-stream.
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }
}

impl Generator for FakeGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        tokens: mpsc::Sender<String>,
        cancel: CancellationToken,
    ) -> Result<String, ModelError> {
        let mut answer = String::new();
        for token in &self.tokens {
            if !self.token_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ModelError::Cancelled),
                    _ = tokio::time::sleep(self.token_delay) => {}
                }
            } else if cancel.is_cancelled() {
                return Err(ModelError::Cancelled);
            }
            answer.push_str(token);
            if tokens.send(token.clone()).await.is_err() {
                return Err(ModelError::Cancelled);
            }
        }
        Ok(answer)
    }
}
