//! Streaming QA pipeline.
//!
//! Each answer stream gets a fresh process id and a cancellation handle in
//! the process-wide registry. Internally the pipeline produces three
//! logically distinct outputs (the retrieved reference list, generator
//! token chunks, and the final composed result) merged here into a single
//! ordered event sequence; the HTTP layer never sees the internal channels.
//!
//! Ordering guarantees observable downstream: `References` at most once and
//! always before `Complete`; exactly one terminal event (`Complete`,
//! `Error`, or `Cancelled`) ends the stream.

use std::sync::Arc;

use grist_core::registry::CancelRegistry;
use grist_model::{Embedder, Generator, ModelError};
use grist_vector::{ScoredChunk, VectorStore};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AnswerError;

use super::build_prompt;

/// Similarity floor for retrieval.
const SCORE_THRESHOLD: f32 = 0.5;
/// Default `top-k` when the caller does not ask for a specific count.
const DEFAULT_NUM_REFERENCES: usize = 10;

/// A retrieved chunk as shown to the client.
#[derive(Clone, Debug, Serialize)]
pub struct Reference {
    pub resource_id: Uuid,
    pub content: String,
    pub score: f32,
}

impl From<ScoredChunk> for Reference {
    fn from(chunk: ScoredChunk) -> Self {
        Self {
            resource_id: chunk.resource_id,
            content: chunk.text,
            score: chunk.score,
        }
    }
}

/// Events of one answer stream, in emit order.
#[derive(Clone, Debug)]
pub enum AnswerEvent {
    References {
        process_id: Uuid,
        references: Vec<Reference>,
    },
    Chunk {
        process_id: Uuid,
        content: String,
    },
    Complete {
        process_id: Uuid,
        answer: String,
        references: Vec<Reference>,
    },
    Error {
        process_id: Uuid,
        error: String,
    },
    Cancelled {
        process_id: Uuid,
    },
}

/// Removes the registry entry on every exit path, panics included.
struct RegistryGuard {
    registry: Arc<CancelRegistry<Uuid>>,
    process_id: Uuid,
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.process_id);
    }
}

pub struct AnswerService<V, E, G> {
    vector: Arc<V>,
    embedder: Arc<E>,
    generator: Arc<G>,
    cancels: Arc<CancelRegistry<Uuid>>,
}

impl<V, E, G> Clone for AnswerService<V, E, G> {
    fn clone(&self) -> Self {
        Self {
            vector: self.vector.clone(),
            embedder: self.embedder.clone(),
            generator: self.generator.clone(),
            cancels: self.cancels.clone(),
        }
    }
}

impl<V, E, G> AnswerService<V, E, G>
where
    V: VectorStore,
    E: Embedder,
    G: Generator,
{
    pub fn new(
        vector: Arc<V>,
        embedder: Arc<E>,
        generator: Arc<G>,
        cancels: Arc<CancelRegistry<Uuid>>,
    ) -> Self {
        Self {
            vector,
            embedder,
            generator,
            cancels,
        }
    }

    /// Retrieval only: the owner's best-matching chunks for `question`.
    pub async fn search(
        &self,
        owner_id: &str,
        question: &str,
        max_results: usize,
    ) -> Result<Vec<Reference>, AnswerError> {
        if question.trim().is_empty() {
            return Err(AnswerError::Validation("question must not be empty".into()));
        }
        let embeddings = self.embedder.embed(&[question.to_string()]).await?;
        let hits = self
            .vector
            .search(owner_id, &embeddings[0], max_results, SCORE_THRESHOLD)
            .await?;
        Ok(hits.into_iter().map(Reference::from).collect())
    }

    /// Non-streaming composition of the same pipeline.
    pub async fn ask(
        &self,
        owner_id: &str,
        question: &str,
    ) -> Result<(String, Vec<Reference>), AnswerError> {
        let references = self
            .search(owner_id, question, DEFAULT_NUM_REFERENCES)
            .await?;
        let prompt = build_prompt(question, &references);

        // Token fragments are produced either way; drain them unobserved.
        let (tokens, mut sink) = mpsc::channel(64);
        let drain = tokio::spawn(async move { while sink.recv().await.is_some() {} });
        let answer = self
            .generator
            .generate(&prompt, tokens, CancellationToken::new())
            .await?;
        let _ = drain.await;
        Ok((answer, references))
    }

    /// Launch a cancellable answer stream.
    pub fn answer_stream(
        &self,
        owner_id: String,
        question: String,
        num_references: Option<usize>,
    ) -> (Uuid, mpsc::Receiver<AnswerEvent>) {
        let process_id = Uuid::new_v4();
        let cancel = self.cancels.register(process_id);
        let top_k = num_references.unwrap_or(DEFAULT_NUM_REFERENCES);
        let (out, rx) = mpsc::channel(64);

        let service = self.clone();
        tokio::spawn(async move {
            service
                .run_stream(process_id, owner_id, question, top_k, out, cancel)
                .await;
        });
        (process_id, rx)
    }

    async fn run_stream(
        &self,
        process_id: Uuid,
        owner_id: String,
        question: String,
        top_k: usize,
        out: mpsc::Sender<AnswerEvent>,
        cancel: CancellationToken,
    ) {
        let _guard = RegistryGuard {
            registry: self.cancels.clone(),
            process_id,
        };

        let references = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = out.send(AnswerEvent::Cancelled { process_id }).await;
                return;
            }
            result = self.search(&owner_id, &question, top_k) => match result {
                Ok(references) => references,
                Err(err) => {
                    tracing::warn!(process_id = %process_id, error = %err, "retrieval failed");
                    let _ = out
                        .send(AnswerEvent::Error {
                            process_id,
                            error: err.to_string(),
                        })
                        .await;
                    return;
                }
            },
        };

        // The reference list goes out exactly once, before any chance of
        // `Complete`.
        if out
            .send(AnswerEvent::References {
                process_id,
                references: references.clone(),
            })
            .await
            .is_err()
        {
            return;
        }

        let prompt = build_prompt(&question, &references);
        let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
        let generator = self.generator.clone();
        let generator_cancel = cancel.clone();
        let generation = tokio::spawn(async move {
            generator
                .generate(&prompt, token_tx, generator_cancel)
                .await
        });

        // Single-writer merge: forward token chunks until the generator
        // drops its sender, then emit the one terminal event.
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    generation.abort();
                    let _ = out.send(AnswerEvent::Cancelled { process_id }).await;
                    tracing::info!(process_id = %process_id, "answer stream cancelled");
                    return;
                }
                token = token_rx.recv() => match token {
                    Some(content) => {
                        if out
                            .send(AnswerEvent::Chunk { process_id, content })
                            .await
                            .is_err()
                        {
                            // Client gone: stop generating, nothing to emit.
                            cancel.cancel();
                            generation.abort();
                            return;
                        }
                    }
                    None => break,
                },
            }
        }

        match generation.await {
            Ok(Ok(answer)) => {
                let _ = out
                    .send(AnswerEvent::Complete {
                        process_id,
                        answer,
                        references,
                    })
                    .await;
            }
            Ok(Err(ModelError::Cancelled)) => {
                let _ = out.send(AnswerEvent::Cancelled { process_id }).await;
            }
            Ok(Err(err)) => {
                tracing::error!(process_id = %process_id, error = %err, "generation failed");
                let _ = out
                    .send(AnswerEvent::Error {
                        process_id,
                        error: err.to_string(),
                    })
                    .await;
            }
            Err(join_err) => {
                tracing::error!(process_id = %process_id, error = %join_err, "generation task failed");
                let _ = out
                    .send(AnswerEvent::Error {
                        process_id,
                        error: "answer generation failed".into(),
                    })
                    .await;
            }
        }
    }

    /// Cancel a running stream. Returns `false` for unknown process ids.
    pub fn cancel(&self, process_id: &Uuid) -> bool {
        self.cancels.cancel(process_id)
    }

    /// Whether a stream is still registered (used by tests and cancel 404s).
    pub fn has_process(&self, process_id: &Uuid) -> bool {
        self.cancels.contains(process_id)
    }
}
