//! In-process broker with the same delivery semantics as the Kafka backend.
//!
//! Used by tests and single-process runs. Each subscription owns a bounded
//! queue drained by one worker task, so every subscriber observes events for
//! a topic in publish order (the per-aggregate ordering the production
//! backend gets from partition keys). Handler errors are logged and the
//! queue advances, matching the at-least-once / advance-on-error policy.
//!
//! The broker can be taken offline with [`set_available`](LocalBroker::set_available)
//! to exercise outbox retry paths.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{BusError, BusEvent, EventConsumer, EventHandler, EventProducer};

const SUBSCRIPTION_QUEUE_DEPTH: usize = 64;

struct BrokerInner {
    available: bool,
    subscriptions: HashMap<String, Vec<mpsc::Sender<BusEvent>>>,
}

/// In-process topic broker. `Clone` shares the underlying state.
#[derive(Clone)]
pub struct LocalBroker {
    inner: Arc<RwLock<BrokerInner>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(BrokerInner {
                available: true,
                subscriptions: HashMap::new(),
            })),
        }
    }

    /// Simulate a broker outage (`false`) or recovery (`true`).
    ///
    /// While unavailable every publish fails with [`BusError::Unavailable`];
    /// subscriptions stay installed.
    pub async fn set_available(&self, available: bool) {
        self.inner.write().await.available = available;
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl EventProducer for LocalBroker {
    fn publish(
        &self,
        event: &BusEvent,
    ) -> impl std::future::Future<Output = Result<(), BusError>> + Send {
        let inner = self.inner.clone();
        let event = event.clone();
        async move {
            let guard = inner.read().await;
            if !guard.available {
                return Err(BusError::Unavailable);
            }
            if let Some(queues) = guard.subscriptions.get(&event.topic) {
                for queue in queues {
                    // Bounded send: a full subscriber queue throttles the
                    // publisher instead of growing without limit.
                    if queue.send(event.clone()).await.is_err() {
                        tracing::debug!(topic = %event.topic, "subscriber queue closed");
                    }
                }
            }
            Ok(())
        }
    }
}

impl EventConsumer for LocalBroker {
    fn subscribe(
        &self,
        topics: &[String],
        handler: EventHandler,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Result<(), BusError>> + Send {
        let inner = self.inner.clone();
        let topics = topics.to_vec();
        async move {
            let (tx, mut rx) = mpsc::channel::<BusEvent>(SUBSCRIPTION_QUEUE_DEPTH);
            {
                let mut guard = inner.write().await;
                for topic in &topics {
                    guard
                        .subscriptions
                        .entry(topic.clone())
                        .or_default()
                        .push(tx.clone());
                }
            }

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = rx.recv() => match event {
                            Some(event) => {
                                let name = event.name.clone();
                                let topic = event.topic.clone();
                                if let Err(err) = (handler)(event).await {
                                    tracing::error!(
                                        topic = %topic,
                                        event = %name,
                                        error = %err,
                                        "event handler failed; advancing"
                                    );
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn event(topic: &str, key: &str, n: u32) -> BusEvent {
        BusEvent::new(topic, "test.event", key, n.to_be_bytes().to_vec())
    }

    async fn eventually(check: impl Fn() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn delivers_to_matching_topic_only() {
        let broker = LocalBroker::new();
        let cancel = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        broker
            .subscribe(
                &["resource".to_string()],
                crate::handler(move |_event| {
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

        broker.publish(&event("resource", "a", 1)).await.unwrap();
        broker.publish(&event("other", "a", 2)).await.unwrap();

        eventually(|| hits.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn preserves_publish_order_per_subscriber() {
        let broker = LocalBroker::new();
        let cancel = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        broker
            .subscribe(
                &["resource".to_string()],
                crate::handler(move |event: BusEvent| {
                    let sink = sink.clone();
                    async move {
                        sink.lock().await.push(event.payload.clone());
                        Ok(())
                    }
                }),
                cancel.clone(),
            )
            .await
            .unwrap();

        for n in 0..10u32 {
            broker.publish(&event("resource", "r-1", n)).await.unwrap();
        }

        let expected: Vec<Vec<u8>> = (0..10u32).map(|n| n.to_be_bytes().to_vec()).collect();
        for _ in 0..100 {
            if seen.lock().await.len() == 10 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(*seen.lock().await, expected);
        cancel.cancel();
    }

    #[tokio::test]
    async fn handler_error_does_not_stop_delivery() {
        let broker = LocalBroker::new();
        let cancel = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        broker
            .subscribe(
                &["resource".to_string()],
                crate::handler(move |_event| {
                    let counter = counter.clone();
                    async move {
                        let n = counter.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            Err("poison pill".into())
                        } else {
                            Ok(())
                        }
                    }
                }),
                cancel.clone(),
            )
            .await
            .unwrap();

        broker.publish(&event("resource", "a", 1)).await.unwrap();
        broker.publish(&event("resource", "a", 2)).await.unwrap();

        eventually(|| hits.load(Ordering::SeqCst) == 2).await;
        cancel.cancel();
    }

    #[tokio::test]
    async fn unavailable_broker_rejects_publish() {
        let broker = LocalBroker::new();
        broker.set_available(false).await;
        let err = broker.publish(&event("resource", "a", 1)).await.unwrap_err();
        assert!(matches!(err, BusError::Unavailable));

        broker.set_available(true).await;
        broker.publish(&event("resource", "a", 1)).await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_consuming() {
        let broker = LocalBroker::new();
        let cancel = CancellationToken::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        broker
            .subscribe(
                &["resource".to_string()],
                crate::handler(move |_event| {
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

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publish(&event("resource", "a", 1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
