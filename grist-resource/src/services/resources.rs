//! Resource lifecycle service: the ingestion pipeline and owner-scoped CRUD.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use grist_bus::EventProducer;
use grist_core::events::{
    ResourceCreated, ResourceDeleted, EVENT_RESOURCE_CREATED, EVENT_RESOURCE_DELETED,
    TOPIC_RESOURCE,
};
use grist_core::registry::ChannelRegistry;
use grist_extract::Extractor;
use grist_outbox::{Outbox, OutboxEvent, OutboxStore};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ServiceError;
use crate::models::{Resource, ResourceKind, ResourceStatus, ResourceStatusUpdate};
use crate::store::ResourceStore;

/// Body of `POST /resources`.
#[derive(Debug, Deserialize)]
pub struct SaveResourceRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    /// Base64-encoded raw content; required for text and pdf.
    pub content: Option<String>,
    /// Required for url resources.
    pub url: Option<String>,
}

/// Body of `PUT /resources/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateResourceRequest {
    pub name: Option<String>,
    /// Base64-encoded replacement content; triggers re-extraction and
    /// re-indexing.
    pub content: Option<String>,
}

/// Frames of the ingestion SSE stream, in emit order.
#[derive(Debug)]
pub enum IngestFrame {
    Resource(Resource),
    Status(ResourceStatusUpdate),
    Completed { resource_id: Uuid },
    Error { error: String },
}

#[derive(Debug)]
struct ValidatedSave {
    name: Option<String>,
    kind: ResourceKind,
    raw: Vec<u8>,
    url: Option<String>,
}

fn validate(request: SaveResourceRequest) -> Result<ValidatedSave, ServiceError> {
    let kind = ResourceKind::parse(&request.kind).ok_or_else(|| {
        ServiceError::Validation(format!("unsupported resource type '{}'", request.kind))
    })?;

    match kind {
        ResourceKind::Text | ResourceKind::Pdf => {
            let content = request
                .content
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    ServiceError::Validation(
                        "content is required for text and pdf resources".into(),
                    )
                })?;
            let raw = BASE64
                .decode(content)
                .map_err(|_| ServiceError::Validation("content must be valid base64".into()))?;
            if raw.is_empty() {
                return Err(ServiceError::Validation("content must not be empty".into()));
            }
            Ok(ValidatedSave {
                name: request.name,
                kind,
                raw,
                url: None,
            })
        }
        ResourceKind::Url => {
            let url = request
                .url
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    ServiceError::Validation("url is required for url resources".into())
                })?;
            url::Url::parse(&url)
                .map_err(|_| ServiceError::Validation("url must be a valid absolute URL".into()))?;
            Ok(ValidatedSave {
                name: request.name,
                kind,
                raw: Vec::new(),
                url: Some(url),
            })
        }
    }
}

/// Drives resources from upload to terminal status.
pub struct ResourceService<S, O, P> {
    store: Arc<S>,
    outbox: Outbox<O, P>,
    extractor: Arc<Extractor>,
    status_channels: Arc<ChannelRegistry<Uuid, ResourceStatusUpdate>>,
}

impl<S, O, P> Clone for ResourceService<S, O, P> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            outbox: self.outbox.clone(),
            extractor: self.extractor.clone(),
            status_channels: self.status_channels.clone(),
        }
    }
}

impl<S, O, P> ResourceService<S, O, P>
where
    S: ResourceStore,
    O: OutboxStore,
    P: EventProducer,
{
    pub fn new(
        store: Arc<S>,
        outbox: Outbox<O, P>,
        extractor: Arc<Extractor>,
        status_channels: Arc<ChannelRegistry<Uuid, ResourceStatusUpdate>>,
    ) -> Self {
        Self {
            store,
            outbox,
            extractor,
            status_channels,
        }
    }

    /// Validate and launch the ingestion pipeline.
    ///
    /// Validation failures reject the request up front (HTTP 400); anything
    /// after that, extraction included, arrives as frames on the returned
    /// channel, ending with exactly one terminal frame.
    pub fn save(
        &self,
        owner_id: String,
        request: SaveResourceRequest,
    ) -> Result<mpsc::Receiver<IngestFrame>, ServiceError> {
        let validated = validate(request)?;
        let (tx, rx) = mpsc::channel(16);
        let service = self.clone();
        tokio::spawn(async move {
            service.run_ingestion(owner_id, validated, tx).await;
        });
        Ok(rx)
    }

    async fn run_ingestion(
        &self,
        owner_id: String,
        save: ValidatedSave,
        tx: mpsc::Sender<IngestFrame>,
    ) {
        // Extraction failures surface as an SSE error before anything is
        // persisted: there is no row and no event to clean up.
        let extracted = match self
            .extractor
            .extract(save.kind.into(), &save.raw, save.url.as_deref())
            .await
        {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(owner = %owner_id, kind = save.kind.as_str(), error = %err, "extraction failed");
                let _ = tx
                    .send(IngestFrame::Error {
                        error: err.to_string(),
                    })
                    .await;
                return;
            }
        };

        let resource = Resource::new(
            owner_id.clone(),
            save.name,
            save.kind,
            save.url,
            save.raw,
            extracted,
        );
        let payload = ResourceCreated {
            resource_id: resource.id,
            owner_id: owner_id.clone(),
            extracted_content: resource.extracted_content.clone(),
        };
        let event = match OutboxEvent::json(
            TOPIC_RESOURCE,
            EVENT_RESOURCE_CREATED,
            resource.id.to_string(),
            &payload,
        ) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = %err, "failed to encode resource.created");
                let _ = tx
                    .send(IngestFrame::Error {
                        error: "failed to save resource".into(),
                    })
                    .await;
                return;
            }
        };

        // Register the status channel before the row becomes visible so the
        // completion event cannot race past an unregistered channel.
        let mut status_rx = self.status_channels.register(resource.id);

        if let Err(err) = self.store.create(&resource, &event).await {
            self.status_channels.close(&resource.id);
            tracing::error!(resource_id = %resource.id, error = %err, "failed to persist resource");
            let _ = tx
                .send(IngestFrame::Error {
                    error: "failed to save resource".into(),
                })
                .await;
            return;
        }

        tracing::info!(
            resource_id = %resource.id,
            owner = %owner_id,
            kind = resource.kind.as_str(),
            "resource persisted"
        );
        self.outbox.dispatch(&event).await;

        let _ = tx.send(IngestFrame::Resource(resource.clone())).await;
        let _ = tx
            .send(IngestFrame::Status(ResourceStatusUpdate {
                resource_id: resource.id,
                status: ResourceStatus::Processing,
                error: None,
            }))
            .await;

        loop {
            tokio::select! {
                // Client gone: the resource stays `processing` (the terminal
                // status still lands durably); only the live channel dies.
                _ = tx.closed() => {
                    self.status_channels.close(&resource.id);
                    tracing::debug!(resource_id = %resource.id, "ingestion stream client disconnected");
                    return;
                }
                update = status_rx.recv() => match update {
                    Some(update) => {
                        let status = update.status;
                        let error = update.error.clone();
                        let _ = tx.send(IngestFrame::Status(update)).await;
                        if status == ResourceStatus::Completed {
                            let _ = tx
                                .send(IngestFrame::Completed { resource_id: resource.id })
                                .await;
                            return;
                        }
                        if status == ResourceStatus::Failed {
                            let _ = tx
                                .send(IngestFrame::Error {
                                    error: error.unwrap_or_else(|| "indexation failed".into()),
                                })
                                .await;
                            return;
                        }
                    }
                    // Channel closed without a terminal update (shutdown).
                    None => return,
                },
            }
        }
    }

    pub async fn list(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Resource>, ServiceError> {
        Ok(self.store.list(owner_id, limit, offset).await?)
    }

    pub async fn get(&self, owner_id: &str, id: Uuid) -> Result<Resource, ServiceError> {
        self.store
            .get(owner_id, id)
            .await?
            .ok_or(ServiceError::NotFound)
    }

    /// Patch name and/or content. A content change re-extracts, resets the
    /// status to `processing`, and emits a fresh `resource.created` in the
    /// same transaction, so the update rides the normal indexing loop.
    pub async fn update(
        &self,
        owner_id: &str,
        id: Uuid,
        patch: UpdateResourceRequest,
    ) -> Result<Resource, ServiceError> {
        let mut resource = self.get(owner_id, id).await?;

        if let Some(name) = patch.name {
            if name.trim().is_empty() {
                return Err(ServiceError::Validation("name must not be empty".into()));
            }
            resource.name = name;
        }

        let mut event = None;
        if let Some(content) = patch.content {
            if resource.kind == ResourceKind::Url {
                return Err(ServiceError::Validation(
                    "content cannot be updated on url resources".into(),
                ));
            }
            let raw = BASE64
                .decode(content)
                .map_err(|_| ServiceError::Validation("content must be valid base64".into()))?;
            if raw.is_empty() {
                return Err(ServiceError::Validation("content must not be empty".into()));
            }
            let extracted = self
                .extractor
                .extract(resource.kind.into(), &raw, None)
                .await?;

            resource.raw_content = raw;
            resource.extracted_content = extracted;
            resource.status = ResourceStatus::Processing;

            let payload = ResourceCreated {
                resource_id: resource.id,
                owner_id: resource.owner_id.clone(),
                extracted_content: resource.extracted_content.clone(),
            };
            event = Some(OutboxEvent::json(
                TOPIC_RESOURCE,
                EVENT_RESOURCE_CREATED,
                resource.id.to_string(),
                &payload,
            )?);
        }

        resource.updated_at = chrono::Utc::now();
        self.store.update(&resource, event.as_ref()).await?;
        if let Some(event) = event {
            self.outbox.dispatch(&event).await;
        }
        Ok(resource)
    }

    /// Delete the owner's resource and tell the search service to drop its
    /// chunks.
    pub async fn delete(&self, owner_id: &str, id: Uuid) -> Result<(), ServiceError> {
        let payload = ResourceDeleted {
            resource_id: id,
            owner_id: owner_id.to_string(),
        };
        let event = OutboxEvent::json(
            TOPIC_RESOURCE,
            EVENT_RESOURCE_DELETED,
            id.to_string(),
            &payload,
        )?;
        if !self.store.delete(owner_id, id, &event).await? {
            return Err(ServiceError::NotFound);
        }
        self.outbox.dispatch(&event).await;
        tracing::info!(resource_id = %id, owner = %owner_id, "resource deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: &str, content: Option<&str>, url: Option<&str>) -> SaveResourceRequest {
        SaveResourceRequest {
            name: None,
            kind: kind.into(),
            content: content.map(String::from),
            url: url.map(String::from),
        }
    }

    #[test]
    fn validate_accepts_text_with_base64_content() {
        let encoded = BASE64.encode("hello world");
        let v = validate(request("text", Some(&encoded), None)).unwrap();
        assert_eq!(v.kind, ResourceKind::Text);
        assert_eq!(v.raw, b"hello world");
    }

    #[test]
    fn validate_rejects_unknown_type() {
        let err = validate(request("image", None, None)).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn validate_requires_content_for_text_and_pdf() {
        for kind in ["text", "pdf"] {
            let err = validate(request(kind, None, None)).unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)), "kind {kind}");
        }
    }

    #[test]
    fn validate_rejects_bad_base64() {
        let err = validate(request("text", Some("@@not-base64@@"), None)).unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[test]
    fn validate_requires_well_formed_url() {
        assert!(validate(request("url", None, None)).is_err());
        assert!(validate(request("url", None, Some("not a url"))).is_err());
        let v = validate(request("url", None, Some("https://example.com/doc"))).unwrap();
        assert_eq!(v.url.as_deref(), Some("https://example.com/doc"));
    }
}
