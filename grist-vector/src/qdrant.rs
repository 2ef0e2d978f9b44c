//! Qdrant backend over its HTTP API.
//!
//! Points are stored with `{owner_id, resource_id, text}` payloads; every
//! search carries a `must`-filter on `owner_id` so isolation is enforced
//! inside the index, not just in application code.

use serde::Deserialize;
use uuid::Uuid;

use crate::{ChunkRecord, ScoredChunk, VectorError, VectorStore};

pub struct QdrantStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: Uuid,
    score: f32,
    #[serde(default)]
    payload: Payload,
}

#[derive(Debug, Default, Deserialize)]
struct Payload {
    #[serde(default)]
    resource_id: Option<Uuid>,
    #[serde(default)]
    text: Option<String>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            collection: collection.into(),
        }
    }

    /// Create the collection when missing. Safe to call on every startup;
    /// an already-existing collection is not an error.
    pub async fn ensure_collection(&self, vector_size: usize) -> Result<(), VectorError> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let body = serde_json::json!({
            "vectors": { "size": vector_size, "distance": "Cosine" }
        });
        let response = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Request(e.to_string()))?;
        // 409 means another instance created it first.
        if response.status().is_success() || response.status().as_u16() == 409 {
            Ok(())
        } else {
            Err(status_error(response).await)
        }
    }

    async fn delete_points(&self, owner_id: &str, resource_id: Uuid) -> Result<(), VectorError> {
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url, self.collection
        );
        let body = serde_json::json!({
            "filter": {
                "must": [
                    { "key": "owner_id", "match": { "value": owner_id } },
                    { "key": "resource_id", "match": { "value": resource_id } },
                ]
            }
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }
}

async fn status_error(response: reqwest::Response) -> VectorError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    VectorError::Status { status, message }
}

impl VectorStore for QdrantStore {
    async fn replace(
        &self,
        owner_id: &str,
        resource_id: Uuid,
        chunks: Vec<ChunkRecord>,
    ) -> Result<Vec<Uuid>, VectorError> {
        self.delete_points(owner_id, resource_id).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let points: Vec<serde_json::Value> = chunks
            .iter()
            .map(|chunk| {
                serde_json::json!({
                    "id": chunk.chunk_id,
                    "vector": chunk.embedding,
                    "payload": {
                        "owner_id": chunk.owner_id,
                        "resource_id": chunk.resource_id,
                        "text": chunk.text,
                    }
                })
            })
            .collect();

        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection
        );
        let response = self
            .client
            .put(&url)
            .json(&serde_json::json!({ "points": points }))
            .send()
            .await
            .map_err(|e| VectorError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        tracing::debug!(
            resource_id = %resource_id,
            chunks = chunks.len(),
            "chunks upserted"
        );
        Ok(chunks.iter().map(|c| c.chunk_id).collect())
    }

    async fn search(
        &self,
        owner_id: &str,
        embedding: &[f32],
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<ScoredChunk>, VectorError> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let body = serde_json::json!({
            "vector": embedding,
            "limit": top_k,
            "score_threshold": score_threshold,
            "with_payload": true,
            "filter": {
                "must": [
                    { "key": "owner_id", "match": { "value": owner_id } },
                ]
            }
        });
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Request(e.to_string()))?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| VectorError::Request(e.to_string()))?;

        Ok(parsed
            .result
            .into_iter()
            .filter_map(|hit| {
                let resource_id = hit.payload.resource_id?;
                Some(ScoredChunk {
                    chunk_id: hit.id,
                    resource_id,
                    text: hit.payload.text.unwrap_or_default(),
                    score: hit.score,
                })
            })
            .collect())
    }

    async fn delete_resource(&self, owner_id: &str, resource_id: Uuid) -> Result<(), VectorError> {
        self.delete_points(owner_id, resource_id).await
    }
}
