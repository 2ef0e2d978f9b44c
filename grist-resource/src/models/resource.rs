use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of upload a resource came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Text,
    Pdf,
    Url,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Text => "text",
            ResourceKind::Pdf => "pdf",
            ResourceKind::Url => "url",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(ResourceKind::Text),
            "pdf" => Some(ResourceKind::Pdf),
            "url" => Some(ResourceKind::Url),
            _ => None,
        }
    }
}

impl From<ResourceKind> for grist_extract::ContentKind {
    fn from(kind: ResourceKind) -> Self {
        match kind {
            ResourceKind::Text => grist_extract::ContentKind::Text,
            ResourceKind::Pdf => grist_extract::ContentKind::Pdf,
            ResourceKind::Url => grist_extract::ContentKind::Url,
        }
    }
}

/// Lifecycle status.
///
/// The lattice is `pending → processing → {completed, failed}`; both
/// terminal states are sticky. The persisted terminal token is always
/// `completed`; nothing ever writes `processed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ResourceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceStatus::Pending => "pending",
            ResourceStatus::Processing => "processing",
            ResourceStatus::Completed => "completed",
            ResourceStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ResourceStatus::Pending),
            "processing" => Some(ResourceStatus::Processing),
            "completed" => Some(ResourceStatus::Completed),
            "failed" => Some(ResourceStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ResourceStatus::Completed | ResourceStatus::Failed)
    }

    /// Whether moving to `next` is allowed by the lattice.
    pub fn can_transition_to(self, next: ResourceStatus) -> bool {
        matches!(
            (self, next),
            (ResourceStatus::Pending, ResourceStatus::Processing)
                | (ResourceStatus::Processing, ResourceStatus::Completed)
                | (ResourceStatus::Processing, ResourceStatus::Failed)
        )
    }
}

/// An uploaded document and its extracted text.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resource {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Original upload bytes; kept for re-extraction, not exposed over HTTP.
    #[serde(skip)]
    pub raw_content: Vec<u8>,
    pub extracted_content: String,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    /// Build a fresh resource in `processing` state.
    ///
    /// An absent or empty `name` defaults to the first six whitespace
    /// tokens of the extracted content.
    pub fn new(
        owner_id: impl Into<String>,
        name: Option<String>,
        kind: ResourceKind,
        url: Option<String>,
        raw_content: Vec<u8>,
        extracted_content: String,
    ) -> Self {
        let name = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| default_name(&extracted_content));
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            name,
            kind,
            url,
            raw_content,
            extracted_content,
            status: ResourceStatus::Processing,
            created_at: now,
            updated_at: now,
        }
    }
}

/// First six whitespace-separated tokens of `content`.
pub fn default_name(content: &str) -> String {
    content
        .split_whitespace()
        .take(6)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Status notification pushed onto the per-request channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceStatusUpdate {
    pub resource_id: Uuid,
    pub status: ResourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
