//! In-memory resource store for tests and single-process runs.
//!
//! Shares a [`MemoryOutboxStore`] so the atomic create/update/delete
//! contract can be asserted without a database.

use std::collections::HashMap;
use std::sync::Arc;

use grist_outbox::memory::MemoryOutboxStore;
use grist_outbox::{OutboxEvent, OutboxStore};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{Resource, ResourceStatus};
use crate::store::{ResourceStore, StoreError};

#[derive(Clone)]
pub struct MemoryResourceStore {
    resources: Arc<Mutex<HashMap<Uuid, Resource>>>,
    outbox: MemoryOutboxStore,
}

impl MemoryResourceStore {
    pub fn new(outbox: MemoryOutboxStore) -> Self {
        Self {
            resources: Arc::new(Mutex::new(HashMap::new())),
            outbox,
        }
    }

    pub fn outbox(&self) -> &MemoryOutboxStore {
        &self.outbox
    }

    pub async fn count(&self) -> usize {
        self.resources.lock().await.len()
    }
}

impl ResourceStore for MemoryResourceStore {
    async fn create(&self, resource: &Resource, event: &OutboxEvent) -> Result<(), StoreError> {
        let mut resources = self.resources.lock().await;
        resources.insert(resource.id, resource.clone());
        self.outbox.insert(event).await?;
        Ok(())
    }

    async fn get(&self, owner_id: &str, id: Uuid) -> Result<Option<Resource>, StoreError> {
        Ok(self
            .resources
            .lock()
            .await
            .get(&id)
            .filter(|r| r.owner_id == owner_id)
            .cloned())
    }

    async fn get_any(&self, id: Uuid) -> Result<Option<Resource>, StoreError> {
        Ok(self.resources.lock().await.get(&id).cloned())
    }

    async fn list(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Resource>, StoreError> {
        let resources = self.resources.lock().await;
        let mut owned: Vec<Resource> = resources
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update(
        &self,
        resource: &Resource,
        event: Option<&OutboxEvent>,
    ) -> Result<(), StoreError> {
        let mut resources = self.resources.lock().await;
        resources.insert(resource.id, resource.clone());
        if let Some(event) = event {
            self.outbox.insert(event).await?;
        }
        Ok(())
    }

    async fn delete(
        &self,
        owner_id: &str,
        id: Uuid,
        event: &OutboxEvent,
    ) -> Result<bool, StoreError> {
        let mut resources = self.resources.lock().await;
        let existed = matches!(resources.get(&id), Some(r) if r.owner_id == owner_id);
        if !existed {
            return Ok(false);
        }
        resources.remove(&id);
        self.outbox.insert(event).await?;
        Ok(true)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        status: ResourceStatus,
    ) -> Result<Option<Resource>, StoreError> {
        let mut resources = self.resources.lock().await;
        let Some(resource) = resources.get_mut(&id) else {
            return Ok(None);
        };
        if resource.status.can_transition_to(status) {
            resource.status = status;
            resource.updated_at = chrono::Utc::now();
        } else {
            tracing::warn!(
                resource_id = %id,
                from = resource.status.as_str(),
                to = status.as_str(),
                "ignoring disallowed status transition"
            );
        }
        Ok(Some(resource.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKind;

    fn resource(owner: &str) -> Resource {
        Resource::new(
            owner,
            None,
            ResourceKind::Text,
            None,
            b"raw".to_vec(),
            "some extracted content".into(),
        )
    }

    fn event(resource: &Resource) -> OutboxEvent {
        OutboxEvent::json(
            "resource",
            "resource.created",
            resource.id.to_string(),
            &serde_json::json!({ "resource_id": resource.id }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_writes_resource_and_event_together() {
        let store = MemoryResourceStore::new(MemoryOutboxStore::new());
        let r = resource("owner-a");
        store.create(&r, &event(&r)).await.unwrap();

        assert!(store.get("owner-a", r.id).await.unwrap().is_some());
        assert_eq!(store.outbox().all().await.len(), 1);
    }

    #[tokio::test]
    async fn get_is_owner_scoped() {
        let store = MemoryResourceStore::new(MemoryOutboxStore::new());
        let r = resource("owner-a");
        store.create(&r, &event(&r)).await.unwrap();

        assert!(store.get("owner-b", r.id).await.unwrap().is_none());
        assert!(store.get_any(r.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_is_newest_first_and_paginated() {
        let store = MemoryResourceStore::new(MemoryOutboxStore::new());
        let mut ids = Vec::new();
        for n in 0..3 {
            let mut r = resource("owner-a");
            r.created_at = chrono::Utc::now() + chrono::Duration::seconds(n);
            ids.push(r.id);
            store.create(&r, &event(&r)).await.unwrap();
        }

        let page = store.list("owner-a", 2, 0).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[2]);

        let rest = store.list("owner-a", 10, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, ids[0]);
    }

    #[tokio::test]
    async fn delete_requires_matching_owner() {
        let store = MemoryResourceStore::new(MemoryOutboxStore::new());
        let r = resource("owner-a");
        store.create(&r, &event(&r)).await.unwrap();

        assert!(!store.delete("owner-b", r.id, &event(&r)).await.unwrap());
        assert!(store.delete("owner-a", r.id, &event(&r)).await.unwrap());
        assert!(store.get_any(r.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn terminal_status_is_sticky() {
        let store = MemoryResourceStore::new(MemoryOutboxStore::new());
        let r = resource("owner-a");
        store.create(&r, &event(&r)).await.unwrap();

        let updated = store
            .transition_status(r.id, ResourceStatus::Completed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, ResourceStatus::Completed);

        let unchanged = store
            .transition_status(r.id, ResourceStatus::Failed)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchanged.status, ResourceStatus::Completed);
    }

    #[tokio::test]
    async fn transition_on_unknown_resource_is_none() {
        let store = MemoryResourceStore::new(MemoryOutboxStore::new());
        let missing = store
            .transition_status(Uuid::new_v4(), ResourceStatus::Completed)
            .await
            .unwrap();
        assert!(missing.is_none());
    }
}
