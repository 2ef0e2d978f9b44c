//! Resource persistence contract.
//!
//! The outbox invariant lives here: `create`, `update`, and `delete` write
//! the resource row and its event row in one local transaction. A resource
//! row without its `resource.created` event (or the other way round) can
//! never be observed.

use grist_outbox::{OutboxError, OutboxEvent};
use uuid::Uuid;

use crate::models::{Resource, ResourceStatus};

pub mod memory;
pub mod pg;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Database(String),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

pub trait ResourceStore: Send + Sync + 'static {
    /// Insert the resource and its outbox event atomically.
    fn create(
        &self,
        resource: &Resource,
        event: &OutboxEvent,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Owner-scoped lookup.
    fn get(
        &self,
        owner_id: &str,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Resource>, StoreError>> + Send;

    /// Unscoped lookup, for consumers that only know the resource id.
    fn get_any(
        &self,
        id: Uuid,
    ) -> impl std::future::Future<Output = Result<Option<Resource>, StoreError>> + Send;

    /// Owner's resources, newest first.
    fn list(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> impl std::future::Future<Output = Result<Vec<Resource>, StoreError>> + Send;

    /// Persist the given resource row; when `event` is present it is
    /// inserted in the same transaction (content changes re-emit
    /// `resource.created`).
    fn update(
        &self,
        resource: &Resource,
        event: Option<&OutboxEvent>,
    ) -> impl std::future::Future<Output = Result<(), StoreError>> + Send;

    /// Delete the owner's resource and insert `event` atomically.
    /// Returns `false` when the resource does not exist (no event is
    /// written).
    fn delete(
        &self,
        owner_id: &str,
        id: Uuid,
        event: &OutboxEvent,
    ) -> impl std::future::Future<Output = Result<bool, StoreError>> + Send;

    /// Apply a status transition when the lattice allows it; a disallowed
    /// transition leaves the row untouched (terminal states are sticky).
    /// Returns the stored resource afterwards, or `None` for an unknown id.
    fn transition_status(
        &self,
        id: Uuid,
        status: ResourceStatus,
    ) -> impl std::future::Future<Output = Result<Option<Resource>, StoreError>> + Send;
}
