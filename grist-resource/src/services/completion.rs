//! Indexation-completion consumer.
//!
//! Consumes `indexation_complete` from the search service, transitions the
//! resource to its terminal status, and signals the per-request status
//! channel of the SSE request that is still waiting, if one is.

use std::sync::Arc;

use grist_bus::{BusEvent, EventConsumer, HandlerError};
use grist_core::events::{IndexationComplete, TOPIC_INDEXATION_COMPLETE};
use grist_core::registry::ChannelRegistry;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{ResourceStatus, ResourceStatusUpdate};
use crate::store::ResourceStore;

pub struct CompletionConsumer<S> {
    store: Arc<S>,
    status_channels: Arc<ChannelRegistry<Uuid, ResourceStatusUpdate>>,
}

impl<S> Clone for CompletionConsumer<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            status_channels: self.status_channels.clone(),
        }
    }
}

impl<S: ResourceStore> CompletionConsumer<S> {
    pub fn new(
        store: Arc<S>,
        status_channels: Arc<ChannelRegistry<Uuid, ResourceStatusUpdate>>,
    ) -> Self {
        Self {
            store,
            status_channels,
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
                &[TOPIC_INDEXATION_COMPLETE.to_string()],
                grist_bus::handler(move |event| {
                    let this = self.clone();
                    async move { this.handle(event).await }
                }),
                cancel,
            )
            .await
    }

    /// Handle one `indexation_complete` event.
    ///
    /// The durable transition comes first; the channel notification is
    /// non-blocking and best-effort. A missing channel (fast path, replay,
    /// client gone) is a no-op; the client polls the row instead.
    pub async fn handle(&self, event: BusEvent) -> Result<(), HandlerError> {
        let payload: IndexationComplete = event.decode()?;
        let status = if payload.success {
            ResourceStatus::Completed
        } else {
            ResourceStatus::Failed
        };

        let stored = self
            .store
            .transition_status(payload.resource_id, status)
            .await?;
        if stored.is_none() {
            tracing::warn!(
                resource_id = %payload.resource_id,
                "indexation_complete for unknown resource"
            );
        } else {
            tracing::info!(
                resource_id = %payload.resource_id,
                status = status.as_str(),
                chunks = payload.chunk_ids.len(),
                "resource indexation finished"
            );
        }

        let update = ResourceStatusUpdate {
            resource_id: payload.resource_id,
            status,
            error: if payload.success {
                None
            } else {
                Some(
                    payload
                        .message
                        .unwrap_or_else(|| "indexation failed".to_string()),
                )
            },
        };
        if !self.status_channels.notify(&payload.resource_id, update) {
            tracing::debug!(
                resource_id = %payload.resource_id,
                "no live status channel for completion"
            );
        }
        self.status_channels.close(&payload.resource_id);
        Ok(())
    }
}
