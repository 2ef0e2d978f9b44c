//! Message bus abstraction.
//!
//! Events travel between the two services over a partitioned, at-least-once
//! log. [`EventProducer`] and [`EventConsumer`] are the only contracts the
//! rest of the workspace sees; [`kafka`] provides the production backend and
//! [`local`] an in-process broker with the same delivery semantics for tests
//! and single-process runs.
//!
//! Delivery policy: a message counts as processed once the handler returns.
//! On handler error the consumer logs and advances anyway, so a poison pill
//! cannot block the group. Operators must treat `event handler failed` logs
//! as potential data loss and replay from the outbox when needed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod local;

/// Wire-level event: what a producer hands to the log.
///
/// `key` carries the aggregate id (the resource id for both topics), which
/// doubles as the partition key so consumers observe a total order per
/// aggregate. Name, id, and timestamp ride in message headers; the payload
/// stays opaque bytes (JSON in practice).
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub id: Uuid,
    pub name: String,
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub event_time: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(
        topic: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            topic: topic.into(),
            key: key.into(),
            payload,
            event_time: Utc::now(),
        }
    }

    /// Build an event with a JSON-serialized payload.
    pub fn json<T: Serialize>(
        topic: impl Into<String>,
        name: impl Into<String>,
        key: impl Into<String>,
        payload: &T,
    ) -> Result<Self, BusError> {
        Ok(Self::new(topic, name, key, serde_json::to_vec(payload)?))
    }

    /// Deserialize the payload.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, BusError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus configuration error: {0}")]
    Config(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("broker unavailable")]
    Unavailable,
    #[error("event codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Error type handlers may return; the consumer logs it and advances.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Type-erased async event handler shared by all consumer backends.
pub type EventHandler =
    Arc<dyn Fn(BusEvent) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>> + Send + Sync>;

/// Wrap an async closure into an [`EventHandler`].
///
/// # Example
///
/// ```ignore
/// let handler = grist_bus::handler(move |event: BusEvent| {
///     let service = service.clone();
///     async move { service.on_event(event).await }
/// });
/// ```
pub fn handler<F, Fut>(f: F) -> EventHandler
where
    F: Fn(BusEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Publishing half of the bus.
pub trait EventProducer: Send + Sync + 'static {
    /// Publish `event` to `event.topic`, keyed by `event.key`, with
    /// `event_name` / `event_id` / `event_time` headers.
    fn publish(&self, event: &BusEvent) -> impl Future<Output = Result<(), BusError>> + Send;
}

/// Consuming half of the bus.
pub trait EventConsumer: Send + Sync + 'static {
    /// Install `handler` for `topics` and deliver messages in the background
    /// until `cancel` fires. Resolves once the subscription is installed.
    fn subscribe(
        &self,
        topics: &[String],
        handler: EventHandler,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<(), BusError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
    struct Payload {
        resource_id: String,
    }

    #[test]
    fn json_event_round_trips_payload() {
        let event = BusEvent::json(
            "resource",
            "resource.created",
            "r-1",
            &Payload {
                resource_id: "r-1".into(),
            },
        )
        .unwrap();
        assert_eq!(event.topic, "resource");
        assert_eq!(event.name, "resource.created");
        assert_eq!(event.key, "r-1");
        let decoded: Payload = event.decode().unwrap();
        assert_eq!(decoded.resource_id, "r-1");
    }

    #[test]
    fn decode_rejects_malformed_payload() {
        let event = BusEvent::new("t", "n", "k", b"not json".to_vec());
        assert!(event.decode::<Payload>().is_err());
    }
}
