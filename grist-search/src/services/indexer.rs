//! Indexation consumer.
//!
//! Consumes the `resource` topic. `resource.created` is chunked, embedded,
//! and written to the vector store with `{owner_id, resource_id}` metadata;
//! the outcome, success or not, goes back out as `indexation_complete`
//! through this service's own outbox. `resource.deleted` drops the chunks.

use std::sync::Arc;

use grist_bus::{BusEvent, EventConsumer, EventProducer, HandlerError};
use grist_core::events::{
    IndexationComplete, ResourceCreated, ResourceDeleted, EVENT_INDEXATION_COMPLETE,
    EVENT_RESOURCE_CREATED, EVENT_RESOURCE_DELETED, TOPIC_INDEXATION_COMPLETE, TOPIC_RESOURCE,
};
use grist_extract::strip_image_links;
use grist_model::Embedder;
use grist_outbox::{Outbox, OutboxEvent, OutboxStore};
use grist_vector::{ChunkRecord, VectorStore};
use text_splitter::MarkdownSplitter;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::IndexError;

pub struct IndexerService<V, E, O, P> {
    vector: Arc<V>,
    embedder: Arc<E>,
    outbox: Outbox<O, P>,
    chunk_capacity: usize,
}

impl<V, E, O, P> Clone for IndexerService<V, E, O, P> {
    fn clone(&self) -> Self {
        Self {
            vector: self.vector.clone(),
            embedder: self.embedder.clone(),
            outbox: self.outbox.clone(),
            chunk_capacity: self.chunk_capacity,
        }
    }
}

impl<V, E, O, P> IndexerService<V, E, O, P>
where
    V: VectorStore,
    E: Embedder,
    O: OutboxStore,
    P: EventProducer,
{
    pub fn new(vector: Arc<V>, embedder: Arc<E>, outbox: Outbox<O, P>, chunk_capacity: usize) -> Self {
        Self {
            vector,
            embedder,
            outbox,
            chunk_capacity,
        }
    }

    /// Subscribe this consumer on the bus.
    pub async fn install<C: EventConsumer>(
        self,
        consumer: &C,
        cancel: CancellationToken,
    ) -> Result<(), grist_bus::BusError> {
        consumer
            .subscribe(
                &[TOPIC_RESOURCE.to_string()],
                grist_bus::handler(move |event| {
                    let this = self.clone();
                    async move { this.handle(event).await }
                }),
                cancel,
            )
            .await
    }

    /// Dispatch one event from the `resource` topic.
    pub async fn handle(&self, event: BusEvent) -> Result<(), HandlerError> {
        match event.name.as_str() {
            EVENT_RESOURCE_CREATED => self.handle_created(event).await,
            EVENT_RESOURCE_DELETED => self.handle_deleted(event).await,
            other => {
                tracing::debug!(event = other, "ignoring event");
                Ok(())
            }
        }
    }

    /// Index one resource and report the outcome.
    ///
    /// On failure the `indexation_complete{success:false}` still goes out
    /// first, then the handler error produces the operator log; the
    /// message itself is considered handled either way (advance-on-error).
    pub async fn handle_created(&self, event: BusEvent) -> Result<(), HandlerError> {
        let payload: ResourceCreated = event.decode()?;
        match self.index(&payload).await {
            Ok(chunk_ids) => {
                tracing::info!(
                    resource_id = %payload.resource_id,
                    owner = %payload.owner_id,
                    chunks = chunk_ids.len(),
                    "resource indexed"
                );
                self.publish_completion(payload.resource_id, true, None, chunk_ids)
                    .await;
                Ok(())
            }
            Err(err) => {
                self.publish_completion(
                    payload.resource_id,
                    false,
                    Some(err.to_string()),
                    Vec::new(),
                )
                .await;
                Err(err.into())
            }
        }
    }

    async fn index(&self, payload: &ResourceCreated) -> Result<Vec<Uuid>, IndexError> {
        let text = strip_image_links(&payload.extracted_content);
        let splitter = MarkdownSplitter::new(self.chunk_capacity);
        let chunks: Vec<String> = splitter.chunks(&text).map(str::to_string).collect();
        if chunks.is_empty() {
            return self
                .vector
                .replace(&payload.owner_id, payload.resource_id, Vec::new())
                .await
                .map_err(IndexError::from);
        }

        let embeddings = self.embedder.embed(&chunks).await?;
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(text, embedding)| ChunkRecord {
                chunk_id: Uuid::new_v4(),
                embedding,
                text,
                owner_id: payload.owner_id.clone(),
                resource_id: payload.resource_id,
            })
            .collect();

        Ok(self
            .vector
            .replace(&payload.owner_id, payload.resource_id, records)
            .await?)
    }

    pub async fn handle_deleted(&self, event: BusEvent) -> Result<(), HandlerError> {
        let payload: ResourceDeleted = event.decode()?;
        self.vector
            .delete_resource(&payload.owner_id, payload.resource_id)
            .await
            .map_err(IndexError::from)?;
        tracing::info!(resource_id = %payload.resource_id, "chunks deleted");
        Ok(())
    }

    async fn publish_completion(
        &self,
        resource_id: Uuid,
        success: bool,
        message: Option<String>,
        chunk_ids: Vec<Uuid>,
    ) {
        let payload = IndexationComplete {
            resource_id,
            success,
            message,
            chunk_ids,
        };
        let event = match OutboxEvent::json(
            TOPIC_INDEXATION_COMPLETE,
            EVENT_INDEXATION_COMPLETE,
            resource_id.to_string(),
            &payload,
        ) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(resource_id = %resource_id, error = %err, "failed to encode indexation_complete");
                return;
            }
        };
        if let Err(err) = self.outbox.publish(event).await {
            // The completion is lost only if the insert itself failed; the
            // resource service will keep showing `processing` and the client
            // falls back to polling.
            tracing::error!(resource_id = %resource_id, error = %err, "failed to persist indexation_complete");
        }
    }
}
