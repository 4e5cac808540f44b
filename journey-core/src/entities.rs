//! Persisted journey entities

use crate::{
    AttachmentId, AttachmentStatus, DocumentVersionId, EventId, InstanceId, Multiplicity,
    NodeEventKind, NodeState, PlaybookVersionId, SlotId, TenantId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// JOURNEY STATE
// ============================================================================

/// Flat `(user, tenant, node) -> state` mirror used for fast reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct JourneyStateEntry {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub node_id: String,
    pub state: NodeState,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

/// A `(user, node)` pair whose journey state is `done`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DoneNode {
    pub user_id: UserId,
    pub node_id: String,
}

// ============================================================================
// NODE INSTANCE
// ============================================================================

/// Per-user materialization of a playbook node.
///
/// At most one instance exists per `(user, node)`. `current_rev` only ever
/// moves forward by one per stored form revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NodeInstance {
    pub instance_id: InstanceId,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub playbook_version_id: PlaybookVersionId,
    pub node_id: String,
    pub state: NodeState,
    pub current_rev: u32,
    pub locale: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub opened_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
}

/// Insert payload for a node instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNodeInstance {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub playbook_version_id: PlaybookVersionId,
    pub node_id: String,
    pub state: NodeState,
    pub locale: Option<String>,
}

/// Append-only snapshot of submitted form data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormRevision {
    pub instance_id: InstanceId,
    pub rev: u32,
    pub payload: Vec<u8>,
    pub edited_by: UserId,
    pub created_at: Timestamp,
}

// ============================================================================
// SLOTS & ATTACHMENTS
// ============================================================================

/// Named upload requirement on an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RequirementSlot {
    pub slot_id: SlotId,
    pub instance_id: InstanceId,
    pub tenant_id: TenantId,
    pub slot_key: String,
    pub required: bool,
    pub multiplicity: Multiplicity,
    /// Allowed content types; empty means any.
    pub mime: Vec<String>,
}

impl RequirementSlot {
    /// Whether a content type is acceptable for this slot.
    pub fn accepts_mime(&self, content_type: &str) -> bool {
        self.mime.is_empty() || self.mime.iter().any(|m| m == content_type)
    }
}

/// Insert payload for a requirement slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSlot {
    pub instance_id: InstanceId,
    pub tenant_id: TenantId,
    pub slot_key: String,
    pub required: bool,
    pub multiplicity: Multiplicity,
    pub mime: Vec<String>,
}

/// Binding of a stored object to a slot. Superseded attachments are kept
/// with `is_active = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SlotAttachment {
    pub attachment_id: AttachmentId,
    pub slot_id: SlotId,
    pub document_version_id: DocumentVersionId,
    pub object_key: String,
    pub is_active: bool,
    pub status: AttachmentStatus,
    pub filename: String,
    pub size_bytes: u64,
    pub attached_by: UserId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub attached_at: Timestamp,
}

/// Insert payload for a slot attachment. New attachments are always active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub slot_id: SlotId,
    pub document_version_id: DocumentVersionId,
    pub object_key: String,
    pub status: AttachmentStatus,
    pub filename: String,
    pub attached_by: UserId,
    pub size_bytes: u64,
}

/// A slot together with all of its attachments, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FullSlot {
    #[serde(flatten)]
    pub slot: RequirementSlot,
    pub attachments: Vec<SlotAttachment>,
}

impl FullSlot {
    pub fn has_active_attachment(&self) -> bool {
        self.attachments.iter().any(|a| a.is_active)
    }

    pub fn active_attachments(&self) -> impl Iterator<Item = &SlotAttachment> {
        self.attachments.iter().filter(|a| a.is_active)
    }
}

// ============================================================================
// EVENTS & OUTCOMES
// ============================================================================

/// Append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NodeEvent {
    pub event_id: EventId,
    pub instance_id: InstanceId,
    pub kind: NodeEventKind,
    pub actor_id: UserId,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub payload: serde_json::Value,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

/// Reviewer decision recorded against an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct NodeOutcome {
    pub value: String,
    pub decided_by: UserId,
    pub note: String,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
}

// ============================================================================
// USERS
// ============================================================================

/// Display fields of a user as needed by the scoreboard and notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: Option<String>,
}

impl UserSummary {
    /// A summary carrying only the id, used when the user record is missing.
    pub fn unknown(user_id: UserId) -> Self {
        Self {
            user_id,
            email: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            avatar_url: None,
        }
    }

    /// `"first last"` trimmed, else the email, else `"Student"`.
    pub fn display_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if !full.is_empty() {
            full.to_string()
        } else if !self.email.is_empty() {
            self.email.clone()
        } else {
            "Student".to_string()
        }
    }

    pub fn avatar(&self) -> String {
        self.avatar_url.clone().unwrap_or_default()
    }
}

/// Profile columns projected from a profile form onto the user record.
pub type ProfileFields = serde_json::Map<String, serde_json::Value>;
