//! Kafka backend over `rdkafka`.
//!
//! Producer: `acks=all`, bounded retries, lz4 compression; the aggregate id
//! rides as the partition key so per-resource order holds across the two
//! topics' consumers. Consumer: one `StreamConsumer` per subscription with
//! manual commits after the handler ran, successful or not (advance-on-error).

use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{BusError, BusEvent, EventConsumer, EventHandler, EventProducer};

const HEADER_EVENT_NAME: &str = "event_name";
const HEADER_EVENT_ID: &str = "event_id";
const HEADER_EVENT_TIME: &str = "event_time";

/// Initial offset for a consumer group without committed offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffsetReset {
    Earliest,
    Latest,
}

impl OffsetReset {
    fn as_str(self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

pub struct KafkaProducer {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("message.send.max.retries", "3")
            .set("compression.type", "lz4")
            .set("message.timeout.ms", "30000")
            .create()
            .map_err(|e| BusError::Config(e.to_string()))?;
        Ok(Self {
            producer,
            send_timeout: Duration::from_secs(5),
        })
    }
}

impl EventProducer for KafkaProducer {
    fn publish(
        &self,
        event: &BusEvent,
    ) -> impl std::future::Future<Output = Result<(), BusError>> + Send {
        let event = event.clone();
        let producer = self.producer.clone();
        let send_timeout = self.send_timeout;
        async move {
            let event_id = event.id.to_string();
            let event_time = event.event_time.to_rfc3339();
            let headers = OwnedHeaders::new()
                .insert(Header {
                    key: HEADER_EVENT_NAME,
                    value: Some(event.name.as_str()),
                })
                .insert(Header {
                    key: HEADER_EVENT_ID,
                    value: Some(event_id.as_str()),
                })
                .insert(Header {
                    key: HEADER_EVENT_TIME,
                    value: Some(event_time.as_str()),
                });
            let record = FutureRecord::to(&event.topic)
                .key(&event.key)
                .payload(&event.payload)
                .headers(headers);

            match producer.send(record, Timeout::After(send_timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %event.topic,
                        event = %event.name,
                        partition,
                        offset,
                        "event published"
                    );
                    Ok(())
                }
                Err((err, _message)) => Err(BusError::Publish(err.to_string())),
            }
        }
    }
}

pub struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
    group_id: String,
}

impl KafkaConsumer {
    pub fn new(brokers: &str, group_id: &str, offset_reset: OffsetReset) -> Result<Self, BusError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", offset_reset.as_str())
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(|e| BusError::Config(e.to_string()))?;
        Ok(Self {
            consumer: Arc::new(consumer),
            group_id: group_id.to_string(),
        })
    }
}

impl EventConsumer for KafkaConsumer {
    fn subscribe(
        &self,
        topics: &[String],
        handler: EventHandler,
        cancel: CancellationToken,
    ) -> impl std::future::Future<Output = Result<(), BusError>> + Send {
        let consumer = self.consumer.clone();
        let group_id = self.group_id.clone();
        let topics = topics.to_vec();
        async move {
            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BusError::Subscribe(e.to_string()))?;
            tracing::info!(group = %group_id, topics = ?topics, "kafka subscription installed");

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            tracing::info!(group = %group_id, "kafka consumer stopping");
                            break;
                        }
                        received = consumer.recv() => match received {
                            Ok(message) => {
                                let event = bus_event_from(&message);
                                if let Err(err) = (handler)(event).await {
                                    tracing::error!(
                                        group = %group_id,
                                        topic = message.topic(),
                                        partition = message.partition(),
                                        offset = message.offset(),
                                        error = %err,
                                        "event handler failed; advancing offset"
                                    );
                                }
                                if let Err(err) =
                                    consumer.commit_message(&message, CommitMode::Async)
                                {
                                    tracing::warn!(group = %group_id, error = %err, "commit failed");
                                }
                            }
                            Err(err) => {
                                tracing::warn!(group = %group_id, error = %err, "kafka receive error");
                            }
                        },
                    }
                }
            });
            Ok(())
        }
    }
}

fn header_str(value: Option<&[u8]>) -> Option<&str> {
    value.and_then(|bytes| std::str::from_utf8(bytes).ok())
}

fn bus_event_from(message: &BorrowedMessage<'_>) -> BusEvent {
    let mut name = String::new();
    let mut id = Uuid::nil();
    let mut event_time = chrono::Utc::now();

    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            match header.key {
                HEADER_EVENT_NAME => {
                    if let Some(v) = header_str(header.value) {
                        name = v.to_string();
                    }
                }
                HEADER_EVENT_ID => {
                    if let Some(v) = header_str(header.value).and_then(|v| Uuid::parse_str(v).ok())
                    {
                        id = v;
                    }
                }
                HEADER_EVENT_TIME => {
                    if let Some(v) = header_str(header.value) {
                        if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(v) {
                            event_time = parsed.with_timezone(&chrono::Utc);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    BusEvent {
        id,
        name,
        topic: message.topic().to_string(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default(),
        payload: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
        event_time,
    }
}
