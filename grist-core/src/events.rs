//! Cross-service event contracts.
//!
//! The resource service and the search service only ever meet on the bus;
//! these payloads and topic/name constants are that contract. Both events
//! are keyed on the resource id so the partition order of
//! `resource.created → indexation_complete` is preserved per resource.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic carrying resource lifecycle events.
pub const TOPIC_RESOURCE: &str = "resource";
/// Topic carrying indexation results from the search service.
pub const TOPIC_INDEXATION_COMPLETE: &str = "indexation_complete";

pub const EVENT_RESOURCE_CREATED: &str = "resource.created";
pub const EVENT_RESOURCE_DELETED: &str = "resource.deleted";
pub const EVENT_INDEXATION_COMPLETE: &str = "indexation_complete";

/// Emitted by the resource service when a resource row has been persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceCreated {
    pub resource_id: Uuid,
    pub owner_id: String,
    pub extracted_content: String,
}

/// Emitted by the resource service when the owner deletes a resource, so
/// the search service can drop the corresponding chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDeleted {
    pub resource_id: Uuid,
    pub owner_id: String,
}

/// Emitted by the search service once indexation has finished (either way).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexationComplete {
    pub resource_id: Uuid,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub chunk_ids: Vec<Uuid>,
}
