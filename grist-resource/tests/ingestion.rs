//! Ingestion pipeline scenarios over in-memory backends.
//!
//! A stub search side subscribes to the `resource` topic and answers each
//! `resource.created` with an `indexation_complete`, so the full loop of
//! upload, outbox, bus, completion consumer, and SSE frames runs in one
//! process.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use grist_bus::local::LocalBroker;
use grist_bus::{BusEvent, EventConsumer};
use grist_core::events::{
    IndexationComplete, ResourceCreated, EVENT_INDEXATION_COMPLETE, EVENT_RESOURCE_CREATED,
    EVENT_RESOURCE_DELETED, TOPIC_INDEXATION_COMPLETE, TOPIC_RESOURCE,
};
use grist_core::registry::ChannelRegistry;
use grist_extract::Extractor;
use grist_outbox::memory::MemoryOutboxStore;
use grist_outbox::{Outbox, OutboxEvent, OutboxProcessor};
use grist_resource::models::{ResourceStatus, ResourceStatusUpdate};
use grist_resource::services::{
    CompletionConsumer, IngestFrame, ResourceService, SaveResourceRequest, UpdateResourceRequest,
};
use grist_resource::store::memory::MemoryResourceStore;
use grist_resource::store::ResourceStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type TestService = ResourceService<MemoryResourceStore, MemoryOutboxStore, LocalBroker>;

struct Fixture {
    broker: LocalBroker,
    store: MemoryResourceStore,
    outbox_store: MemoryOutboxStore,
    search_outbox_store: MemoryOutboxStore,
    service: TestService,
    status_channels: Arc<ChannelRegistry<Uuid, ResourceStatusUpdate>>,
    outbox: Outbox<MemoryOutboxStore, LocalBroker>,
    cancel: CancellationToken,
}

impl Fixture {
    /// Wire the resource side; optionally attach the stub indexer.
    async fn new(indexer: Option<bool>) -> Self {
        let broker = LocalBroker::new();
        let outbox_store = MemoryOutboxStore::new();
        let store = MemoryResourceStore::new(outbox_store.clone());
        let outbox = Outbox::new(Arc::new(outbox_store.clone()), Arc::new(broker.clone()));
        let status_channels = Arc::new(ChannelRegistry::new());
        let cancel = CancellationToken::new();

        let service = ResourceService::new(
            Arc::new(store.clone()),
            outbox.clone(),
            Arc::new(Extractor::new()),
            status_channels.clone(),
        );

        let search_outbox_store = MemoryOutboxStore::new();
        if let Some(succeed) = indexer {
            let search_outbox = Outbox::new(
                Arc::new(search_outbox_store.clone()),
                Arc::new(broker.clone()),
            );
            broker
                .subscribe(
                    &[TOPIC_RESOURCE.to_string()],
                    grist_bus::handler(move |event: BusEvent| {
                        let search_outbox = search_outbox.clone();
                        async move {
                            if event.name != EVENT_RESOURCE_CREATED {
                                return Ok(());
                            }
                            let payload: ResourceCreated = event.decode()?;
                            let completion = IndexationComplete {
                                resource_id: payload.resource_id,
                                success: succeed,
                                message: (!succeed).then(|| "indexation failed".to_string()),
                                chunk_ids: vec![Uuid::new_v4()],
                            };
                            let event = OutboxEvent::json(
                                TOPIC_INDEXATION_COMPLETE,
                                EVENT_INDEXATION_COMPLETE,
                                payload.resource_id.to_string(),
                                &completion,
                            )?;
                            search_outbox.publish(event).await?;
                            Ok(())
                        }
                    }),
                    cancel.clone(),
                )
                .await
                .unwrap();
        }

        CompletionConsumer::new(Arc::new(store.clone()), status_channels.clone())
            .install(&broker, cancel.clone())
            .await
            .unwrap();

        Self {
            broker,
            store,
            outbox_store,
            search_outbox_store,
            service,
            status_channels,
            outbox,
            cancel,
        }
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn text_request(content: &str) -> SaveResourceRequest {
    SaveResourceRequest {
        name: None,
        kind: "text".into(),
        content: Some(BASE64.encode(content)),
        url: None,
    }
}

async fn next_frame(rx: &mut mpsc::Receiver<IngestFrame>) -> IngestFrame {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("stream ended unexpectedly")
}

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time: {what}");
}

#[tokio::test]
async fn text_ingest_happy_path() {
    let fx = Fixture::new(Some(true)).await;

    let mut rx = fx
        .service
        .save(
            "owner-a".into(),
            text_request("hello world foo bar baz qux quux"),
        )
        .unwrap();

    let resource = match next_frame(&mut rx).await {
        IngestFrame::Resource(resource) => resource,
        other => panic!("expected resource frame, got {other:?}"),
    };
    assert_eq!(resource.name, "hello world foo bar baz qux");
    assert_eq!(resource.status, ResourceStatus::Processing);

    match next_frame(&mut rx).await {
        IngestFrame::Status(update) => {
            assert_eq!(update.status, ResourceStatus::Processing);
        }
        other => panic!("expected processing status, got {other:?}"),
    }
    match next_frame(&mut rx).await {
        IngestFrame::Status(update) => {
            assert_eq!(update.status, ResourceStatus::Completed);
        }
        other => panic!("expected completed status, got {other:?}"),
    }
    match next_frame(&mut rx).await {
        IngestFrame::Completed { resource_id } => assert_eq!(resource_id, resource.id),
        other => panic!("expected completed frame, got {other:?}"),
    }
    // Exactly one terminal frame: the stream ends afterwards.
    assert!(rx.recv().await.is_none());

    // Durable state: resource completed, resource.created sent, and the
    // search side's indexation_complete sent too.
    let stored = fx.store.get_any(resource.id).await.unwrap().unwrap();
    assert_eq!(stored.status, ResourceStatus::Completed);

    let created = fx.outbox_store.by_name(EVENT_RESOURCE_CREATED).await;
    assert_eq!(created.len(), 1);
    assert!(created[0].sent);

    let completions = fx
        .search_outbox_store
        .by_name(EVENT_INDEXATION_COMPLETE)
        .await;
    assert_eq!(completions.len(), 1);
    assert!(completions[0].sent);

    // Registry fully drained.
    assert!(fx.status_channels.is_empty());
}

#[tokio::test]
async fn pdf_ingest_failure_persists_nothing() {
    let fx = Fixture::new(Some(true)).await;

    let mut rx = fx
        .service
        .save(
            "owner-a".into(),
            SaveResourceRequest {
                name: None,
                kind: "pdf".into(),
                content: Some(BASE64.encode("not a pdf")),
                url: None,
            },
        )
        .unwrap();

    match next_frame(&mut rx).await {
        IngestFrame::Error { error } => {
            assert!(
                error.contains("failed to extract PDF content"),
                "unexpected error: {error}"
            );
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    assert!(rx.recv().await.is_none());

    assert_eq!(fx.store.count().await, 0);
    assert!(fx.outbox_store.all().await.is_empty());
    assert!(fx.status_channels.is_empty());
}

#[tokio::test]
async fn invalid_type_is_rejected_before_streaming() {
    let fx = Fixture::new(Some(true)).await;
    let err = fx
        .service
        .save(
            "owner-a".into(),
            SaveResourceRequest {
                name: None,
                kind: "image".into(),
                content: None,
                url: None,
            },
        )
        .err()
        .expect("validation should fail");
    assert!(err.to_string().contains("unsupported resource type"));
}

#[tokio::test]
async fn failed_indexation_surfaces_as_error_frame() {
    let fx = Fixture::new(Some(false)).await;

    let mut rx = fx
        .service
        .save("owner-a".into(), text_request("some text to index"))
        .unwrap();

    let resource_id = match next_frame(&mut rx).await {
        IngestFrame::Resource(resource) => resource.id,
        other => panic!("expected resource frame, got {other:?}"),
    };
    // processing, then failed, then the terminal error frame.
    let _ = next_frame(&mut rx).await;
    match next_frame(&mut rx).await {
        IngestFrame::Status(update) => assert_eq!(update.status, ResourceStatus::Failed),
        other => panic!("expected failed status, got {other:?}"),
    }
    match next_frame(&mut rx).await {
        IngestFrame::Error { error } => assert_eq!(error, "indexation failed"),
        other => panic!("expected error frame, got {other:?}"),
    }
    assert!(rx.recv().await.is_none());

    let stored = fx.store.get_any(resource_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ResourceStatus::Failed);
}

#[tokio::test]
async fn client_disconnect_leaves_row_processing_and_frees_channel() {
    // No indexer: nothing will ever complete this resource.
    let fx = Fixture::new(None).await;

    let mut rx = fx
        .service
        .save("owner-a".into(), text_request("content that never indexes"))
        .unwrap();

    let resource_id = match next_frame(&mut rx).await {
        IngestFrame::Resource(resource) => resource.id,
        other => panic!("expected resource frame, got {other:?}"),
    };
    let _ = next_frame(&mut rx).await;

    // Client walks away mid-stream.
    drop(rx);

    let channels = fx.status_channels.clone();
    eventually("status channel released", move || channels.is_empty()).await;

    let stored = fx.store.get_any(resource_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ResourceStatus::Processing);
}

#[tokio::test]
async fn broker_outage_recovers_through_the_sweep() {
    let fx = Fixture::new(Some(true)).await;
    fx.broker.set_available(false).await;

    let mut rx = fx
        .service
        .save("owner-a".into(), text_request("resource during outage"))
        .unwrap();

    // SaveResource still succeeds: resource + processing frames arrive.
    let resource_id = match next_frame(&mut rx).await {
        IngestFrame::Resource(resource) => resource.id,
        other => panic!("expected resource frame, got {other:?}"),
    };
    let _ = next_frame(&mut rx).await;

    // The event row survived unsent.
    let created = fx.outbox_store.by_name(EVENT_RESOURCE_CREATED).await;
    assert_eq!(created.len(), 1);
    assert!(!created[0].sent);

    // Broker comes back; one sweep delivers the backlog.
    fx.broker.set_available(true).await;
    let processor = OutboxProcessor::new(fx.outbox.clone(), Duration::from_millis(10), 50);
    assert_eq!(processor.sweep().await, 1);

    // The still-open SSE stream sees the terminal frames.
    match next_frame(&mut rx).await {
        IngestFrame::Status(update) => assert_eq!(update.status, ResourceStatus::Completed),
        other => panic!("expected completed status, got {other:?}"),
    }
    match next_frame(&mut rx).await {
        IngestFrame::Completed { resource_id: id } => assert_eq!(id, resource_id),
        other => panic!("expected completed frame, got {other:?}"),
    }

    let created = fx.outbox_store.by_name(EVENT_RESOURCE_CREATED).await;
    assert!(created[0].sent);
    let stored = fx.store.get_any(resource_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ResourceStatus::Completed);
}

#[tokio::test]
async fn update_with_content_reindexes_through_the_same_loop() {
    let fx = Fixture::new(Some(true)).await;

    let mut rx = fx
        .service
        .save("owner-a".into(), text_request("original content here"))
        .unwrap();
    let resource_id = match next_frame(&mut rx).await {
        IngestFrame::Resource(resource) => resource.id,
        other => panic!("expected resource frame, got {other:?}"),
    };
    // Drain to terminal.
    while rx.recv().await.is_some() {}

    let updated = fx
        .service
        .update(
            "owner-a",
            resource_id,
            UpdateResourceRequest {
                name: Some("renamed".into()),
                content: Some(BASE64.encode("replacement content body")),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "renamed");
    assert_eq!(updated.extracted_content, "replacement content body");
    assert_eq!(updated.status, ResourceStatus::Processing);

    // A second resource.created went out, and the completion loop ran again.
    let created = fx.outbox_store.by_name(EVENT_RESOURCE_CREATED).await;
    assert_eq!(created.len(), 2);

    let store = fx.store.clone();
    let completed = move || {
        let store = store.clone();
        async move {
            store.get_any(resource_id).await.unwrap().unwrap().status
                == ResourceStatus::Completed
        }
    };
    for _ in 0..200 {
        if completed().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("updated resource never completed");
}

#[tokio::test]
async fn delete_emits_resource_deleted_event() {
    let fx = Fixture::new(Some(true)).await;

    let mut rx = fx
        .service
        .save("owner-a".into(), text_request("short lived content"))
        .unwrap();
    let resource_id = match next_frame(&mut rx).await {
        IngestFrame::Resource(resource) => resource.id,
        other => panic!("expected resource frame, got {other:?}"),
    };
    while rx.recv().await.is_some() {}

    // Another owner cannot delete it.
    assert!(fx.service.delete("owner-b", resource_id).await.is_err());

    fx.service.delete("owner-a", resource_id).await.unwrap();
    assert!(fx.store.get_any(resource_id).await.unwrap().is_none());

    let deleted = fx.outbox_store.by_name(EVENT_RESOURCE_DELETED).await;
    assert_eq!(deleted.len(), 1);
    assert!(deleted[0].sent);
}
