//! Vector store contract.
//!
//! Chunks live in an external similarity index; this crate only defines the
//! contract the core consumes and two backends: [`qdrant::QdrantStore`] over
//! Qdrant's HTTP API and [`memory::MemoryVectorStore`] for tests and
//! single-process runs.
//!
//! Tenant isolation is a hard invariant of the contract itself: every chunk
//! carries `{owner_id, resource_id}` metadata, and every read filters on the
//! caller's owner id. A backend that returns another owner's chunks is
//! broken, full stop.

use uuid::Uuid;

pub mod memory;
pub mod qdrant;

/// A chunk as stored in the index.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub chunk_id: Uuid,
    pub embedding: Vec<f32>,
    pub text: String,
    pub owner_id: String,
    pub resource_id: Uuid,
}

/// A retrieval hit.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: Uuid,
    pub resource_id: Uuid,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum VectorError {
    #[error("vector store request failed: {0}")]
    Request(String),
    #[error("vector store returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("vector store codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Storage contract for embedded chunks.
pub trait VectorStore: Send + Sync + 'static {
    /// Replace every chunk of `resource_id` with `chunks` and return the
    /// stored chunk ids.
    ///
    /// Replace semantics make redelivery of the same `resource.created`
    /// idempotent: indexing twice leaves the same set of chunks behind.
    fn replace(
        &self,
        owner_id: &str,
        resource_id: Uuid,
        chunks: Vec<ChunkRecord>,
    ) -> impl std::future::Future<Output = Result<Vec<Uuid>, VectorError>> + Send;

    /// Similarity search over the calling owner's chunks only.
    fn search(
        &self,
        owner_id: &str,
        embedding: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> impl std::future::Future<Output = Result<Vec<ScoredChunk>, VectorError>> + Send;

    /// Drop every chunk of `resource_id` owned by `owner_id`.
    fn delete_resource(
        &self,
        owner_id: &str,
        resource_id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), VectorError>> + Send;
}
