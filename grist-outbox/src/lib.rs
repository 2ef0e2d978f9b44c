//! Transactional outbox.
//!
//! An event row is inserted in the same local transaction as the business
//! write that caused it; publishing happens afterwards, best-effort first
//! and then from a background sweep. Returning success to the caller only
//! requires the insert; a broker outage never fails an upload.
//!
//! Once a row is marked `sent` it is never modified again; rows are kept
//! for audit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use grist_bus::{BusEvent, EventProducer};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub mod memory;
pub mod pg;

/// A persisted event row.
///
/// `key` is the aggregate id (the resource id for every event in this
/// system); it becomes the bus partition key so downstream consumers see a
/// total order per aggregate.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub name: String,
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub sent: bool,
    pub event_time: DateTime<Utc>,
}

impl OutboxEvent {
    /// Build an unsent event with a JSON-serialized payload.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
        payload: &T,
    ) -> Result<Self, OutboxError> {
        Ok(Self {
            id: Uuid::new_v4(),
            name: name.into(),
            topic: topic.into(),
            key: key.into(),
            payload: serde_json::to_vec(payload)?,
            sent: false,
            event_time: Utc::now(),
        })
    }

    /// The wire shape of this row.
    pub fn to_bus_event(&self) -> BusEvent {
        BusEvent {
            id: self.id,
            name: self.name.clone(),
            topic: self.topic.clone(),
            key: self.key.clone(),
            payload: self.payload.clone(),
            event_time: self.event_time,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("outbox storage error: {0}")]
    Storage(String),
    #[error("outbox codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl From<sqlx::Error> for OutboxError {
    fn from(err: sqlx::Error) -> Self {
        OutboxError::Storage(err.to_string())
    }
}

/// Storage contract for event rows.
///
/// The transactional insert lives beside the business store (see
/// [`pg::insert_in_tx`] and the resource store); this contract covers the
/// standalone insert and the sweep side.
pub trait OutboxStore: Send + Sync + 'static {
    fn insert(
        &self,
        event: &OutboxEvent,
    ) -> impl std::future::Future<Output = Result<(), OutboxError>> + Send;

    /// Unsent rows ordered by `event_time` ascending.
    fn fetch_unsent(
        &self,
        limit: i64,
        offset: i64,
    ) -> impl std::future::Future<Output = Result<Vec<OutboxEvent>, OutboxError>> + Send;

    fn mark_sent(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<(), OutboxError>> + Send;
}

/// Writer + dispatcher over a store and a producer.
pub struct Outbox<S, P> {
    store: Arc<S>,
    producer: Arc<P>,
}

impl<S, P> Clone for Outbox<S, P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            producer: self.producer.clone(),
        }
    }
}

impl<S: OutboxStore, P: EventProducer> Outbox<S, P> {
    pub fn new(store: Arc<S>, producer: Arc<P>) -> Self {
        Self { store, producer }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Persist `event` and attempt an immediate publish.
    ///
    /// The returned `Ok` only certifies the insert; a failed publish is
    /// swallowed and retried by the sweep.
    pub async fn publish(&self, event: OutboxEvent) -> Result<(), OutboxError> {
        self.store.insert(&event).await?;
        self.dispatch(&event).await;
        Ok(())
    }

    /// Best-effort immediate publish of an already-persisted event.
    ///
    /// Call this after the surrounding transaction has committed. Publish
    /// failures are logged and swallowed; the row stays unsent for the sweep.
    pub async fn dispatch(&self, event: &OutboxEvent) {
        match self.producer.publish(&event.to_bus_event()).await {
            Ok(()) => {
                if let Err(err) = self.store.mark_sent(event.id).await {
                    // The sweep will publish again; consumers are idempotent.
                    tracing::warn!(event_id = %event.id, error = %err, "failed to mark event sent");
                }
            }
            Err(err) => {
                tracing::warn!(
                    event_id = %event.id,
                    topic = %event.topic,
                    event = %event.name,
                    error = %err,
                    "immediate publish failed; leaving event for sweep"
                );
            }
        }
    }
}

/// Background sweep that publishes unsent rows until cancelled.
pub struct OutboxProcessor<S, P> {
    outbox: Outbox<S, P>,
    interval: Duration,
    batch_size: i64,
}

impl<S: OutboxStore, P: EventProducer> OutboxProcessor<S, P> {
    pub fn new(outbox: Outbox<S, P>, interval: Duration, batch_size: i64) -> Self {
        Self {
            outbox,
            interval,
            batch_size,
        }
    }

    /// Run the sweep loop until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs_f64(), "outbox processor started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("outbox processor stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    /// Publish every unsent row in `event_time` order.
    ///
    /// Stops early when the broker rejects a publish: the remaining rows
    /// would fail the same way and the next tick retries from the front.
    /// Returns the number of events published.
    pub async fn sweep(&self) -> usize {
        let mut published = 0;
        loop {
            let batch = match self.outbox.store.fetch_unsent(self.batch_size, 0).await {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::warn!(error = %err, "outbox sweep fetch failed");
                    return published;
                }
            };
            if batch.is_empty() {
                return published;
            }
            let batch_len = batch.len();
            for event in batch {
                match self.outbox.producer.publish(&event.to_bus_event()).await {
                    Ok(()) => {
                        if let Err(err) = self.outbox.store.mark_sent(event.id).await {
                            tracing::warn!(event_id = %event.id, error = %err, "failed to mark event sent");
                        }
                        published += 1;
                    }
                    Err(err) => {
                        tracing::warn!(
                            event_id = %event.id,
                            topic = %event.topic,
                            error = %err,
                            "outbox sweep publish failed; will retry"
                        );
                        return published;
                    }
                }
            }
            if (batch_len as i64) < self.batch_size {
                return published;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryOutboxStore;
    use grist_bus::local::LocalBroker;
    use grist_bus::EventConsumer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn outbox(broker: &LocalBroker) -> Outbox<MemoryOutboxStore, LocalBroker> {
        Outbox::new(Arc::new(MemoryOutboxStore::new()), Arc::new(broker.clone()))
    }

    fn event(name: &str) -> OutboxEvent {
        OutboxEvent::json("resource", name, "r-1", &serde_json::json!({ "n": name })).unwrap()
    }

    #[tokio::test]
    async fn publish_inserts_and_marks_sent_on_success() {
        let broker = LocalBroker::new();
        let outbox = outbox(&broker);

        outbox.publish(event("resource.created")).await.unwrap();

        let rows = outbox.store().all().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].sent);
    }

    #[tokio::test]
    async fn publish_survives_broker_outage() {
        let broker = LocalBroker::new();
        broker.set_available(false).await;
        let outbox = outbox(&broker);

        // The caller still gets Ok: only the insert is required.
        outbox.publish(event("resource.created")).await.unwrap();

        let rows = outbox.store().all().await;
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].sent);
        // Liveness: the unsent row stays visible to the sweep.
        let unsent = outbox.store().fetch_unsent(10, 0).await.unwrap();
        assert_eq!(unsent.len(), 1);
    }

    #[tokio::test]
    async fn sweep_publishes_pending_rows_after_recovery() {
        let broker = LocalBroker::new();
        broker.set_available(false).await;
        let outbox = outbox(&broker);

        for name in ["a", "b", "c"] {
            outbox.publish(event(name)).await.unwrap();
        }

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = delivered.clone();
        let cancel = CancellationToken::new();
        broker
            .subscribe(
                &["resource".to_string()],
                grist_bus::handler(move |_e| {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
                cancel.clone(),
            )
            .await
            .unwrap();

        let processor = OutboxProcessor::new(outbox.clone(), Duration::from_millis(10), 2);

        // Broker still down: nothing moves.
        assert_eq!(processor.sweep().await, 0);

        broker.set_available(true).await;
        assert_eq!(processor.sweep().await, 3);
        assert!(outbox.store().all().await.iter().all(|e| e.sent));

        for _ in 0..100 {
            if delivered.load(Ordering::SeqCst) == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(delivered.load(Ordering::SeqCst), 3);
        cancel.cancel();
    }

    #[tokio::test]
    async fn sweep_preserves_event_time_order() {
        let broker = LocalBroker::new();
        broker.set_available(false).await;
        let outbox = outbox(&broker);

        let mut first = event("first");
        first.event_time = Utc::now() - chrono::Duration::seconds(10);
        let mut second = event("second");
        second.event_time = Utc::now() - chrono::Duration::seconds(5);
        // Insert newest first to prove ordering comes from event_time.
        outbox.publish(second).await.unwrap();
        outbox.publish(first).await.unwrap();

        let unsent = outbox.store().fetch_unsent(10, 0).await.unwrap();
        assert_eq!(unsent[0].name, "first");
        assert_eq!(unsent[1].name, "second");
    }

    #[tokio::test]
    async fn processor_run_stops_on_cancel() {
        let broker = LocalBroker::new();
        let processor = OutboxProcessor::new(outbox(&broker), Duration::from_millis(5), 10);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(processor.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("processor should stop promptly")
            .unwrap();
    }
}
