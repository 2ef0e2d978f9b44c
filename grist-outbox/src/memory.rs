//! In-memory outbox store for tests and single-process runs.

use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{OutboxError, OutboxEvent, OutboxStore};

#[derive(Clone, Default)]
pub struct MemoryOutboxStore {
    rows: Arc<Mutex<Vec<OutboxEvent>>>,
}

impl MemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every row, insertion order.
    pub async fn all(&self) -> Vec<OutboxEvent> {
        self.rows.lock().await.clone()
    }

    /// Rows matching an event name, for test assertions.
    pub async fn by_name(&self, name: &str) -> Vec<OutboxEvent> {
        self.rows
            .lock()
            .await
            .iter()
            .filter(|e| e.name == name)
            .cloned()
            .collect()
    }
}

impl OutboxStore for MemoryOutboxStore {
    async fn insert(&self, event: &OutboxEvent) -> Result<(), OutboxError> {
        self.rows.lock().await.push(event.clone());
        Ok(())
    }

    async fn fetch_unsent(&self, limit: i64, offset: i64) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows = self.rows.lock().await;
        let mut unsent: Vec<OutboxEvent> = rows.iter().filter(|e| !e.sent).cloned().collect();
        unsent.sort_by_key(|e| e.event_time);
        Ok(unsent
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn mark_sent(&self, id: Uuid) -> Result<(), OutboxError> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.iter_mut().find(|e| e.id == id) {
            row.sent = true;
        }
        Ok(())
    }
}
