//! In-memory vector store with exact cosine similarity.

use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{ChunkRecord, ScoredChunk, VectorError, VectorStore};

#[derive(Clone, Default)]
pub struct MemoryVectorStore {
    chunks: Arc<RwLock<Vec<ChunkRecord>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored chunks for a resource, for test assertions.
    pub async fn chunk_count(&self, resource_id: Uuid) -> usize {
        self.chunks
            .read()
            .await
            .iter()
            .filter(|c| c.resource_id == resource_id)
            .count()
    }

    /// Snapshot of every stored chunk.
    pub async fn all(&self) -> Vec<ChunkRecord> {
        self.chunks.read().await.clone()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

impl VectorStore for MemoryVectorStore {
    async fn replace(
        &self,
        owner_id: &str,
        resource_id: Uuid,
        chunks: Vec<ChunkRecord>,
    ) -> Result<Vec<Uuid>, VectorError> {
        let mut store = self.chunks.write().await;
        store.retain(|c| !(c.resource_id == resource_id && c.owner_id == owner_id));
        let ids = chunks.iter().map(|c| c.chunk_id).collect();
        store.extend(chunks);
        Ok(ids)
    }

    async fn search(
        &self,
        owner_id: &str,
        embedding: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredChunk>, VectorError> {
        let store = self.chunks.read().await;
        let mut hits: Vec<ScoredChunk> = store
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| ScoredChunk {
                chunk_id: c.chunk_id,
                resource_id: c.resource_id,
                text: c.text.clone(),
                score: cosine(&c.embedding, embedding),
            })
            .filter(|hit| hit.score >= score_threshold)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_resource(
        &self,
        owner_id: &str,
        resource_id: Uuid,
    ) -> Result<(), VectorError> {
        let mut store = self.chunks.write().await;
        store.retain(|c| !(c.resource_id == resource_id && c.owner_id == owner_id));
        Ok(())
    }
}
