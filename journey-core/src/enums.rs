//! Enum types for journey entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// NODE STATE
// ============================================================================

/// State of a node instance (and of its journey-state mirror).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Placeholder awaiting prerequisites
    Locked,
    /// Open for work by the student
    Active,
    /// Handed in for review
    Submitted,
    /// Waiting on an external party
    Waiting,
    /// Returned to the student for corrections
    NeedsFixes,
    /// Completed (terminal)
    Done,
}

impl NodeState {
    /// Every known state, in lifecycle order.
    pub const ALL: [NodeState; 6] = [
        NodeState::Locked,
        NodeState::Active,
        NodeState::Submitted,
        NodeState::Waiting,
        NodeState::NeedsFixes,
        NodeState::Done,
    ];

    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            NodeState::Locked => "locked",
            NodeState::Active => "active",
            NodeState::Submitted => "submitted",
            NodeState::Waiting => "waiting",
            NodeState::NeedsFixes => "needs_fixes",
            NodeState::Done => "done",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, NodeStateParseError> {
        match s.trim().to_lowercase().as_str() {
            "locked" => Ok(NodeState::Locked),
            "active" => Ok(NodeState::Active),
            "submitted" => Ok(NodeState::Submitted),
            "waiting" => Ok(NodeState::Waiting),
            "needs_fixes" => Ok(NodeState::NeedsFixes),
            "done" => Ok(NodeState::Done),
            _ => Err(NodeStateParseError(s.to_string())),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeState::Done)
    }

    /// Transitions into these states are gated on required uploads.
    pub fn requires_uploads(&self) -> bool {
        matches!(self, NodeState::Submitted | NodeState::Done)
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for NodeState {
    type Err = NodeStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid node state string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStateParseError(pub String);

impl fmt::Display for NodeStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid node state: {}", self.0)
    }
}

impl std::error::Error for NodeStateParseError {}

// ============================================================================
// SLOT MULTIPLICITY
// ============================================================================

/// How many attachments of a slot may be active at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    /// A new attachment supersedes the previous one
    #[default]
    Single,
    /// Attachments accumulate
    Multi,
}

impl Multiplicity {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Multiplicity::Single => "single",
            Multiplicity::Multi => "multi",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "single" => Some(Multiplicity::Single),
            "multi" | "multiple" => Some(Multiplicity::Multi),
            _ => None,
        }
    }
}

impl fmt::Display for Multiplicity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// ATTACHMENT STATUS
// ============================================================================

/// Review status of a slot attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum AttachmentStatus {
    #[default]
    Submitted,
    Approved,
    Rejected,
}

impl AttachmentStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            AttachmentStatus::Submitted => "submitted",
            AttachmentStatus::Approved => "approved",
            AttachmentStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AttachmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// NODE EVENT KIND
// ============================================================================

/// Kind of an audit record in the node event log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum NodeEventKind {
    /// Instance materialized by the user
    Opened,
    /// Successful state transition `{from, to}`
    StateChanged,
    /// Successor created because its prerequisites were met
    NodeActivated,
    /// Object bound to a slot
    FileAttached,
}

impl NodeEventKind {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            NodeEventKind::Opened => "opened",
            NodeEventKind::StateChanged => "state_changed",
            NodeEventKind::NodeActivated => "node_activated",
            NodeEventKind::FileAttached => "file_attached",
        }
    }
}

impl fmt::Display for NodeEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// Entity type discriminator used in storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum EntityType {
    JourneyState,
    NodeInstance,
    FormRevision,
    Slot,
    Attachment,
    NodeEvent,
    Outcome,
    User,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_db_roundtrip() {
        for state in NodeState::ALL {
            assert_eq!(NodeState::from_db_str(state.as_db_str()), Ok(state));
        }
    }

    #[test]
    fn test_node_state_rejects_unknown() {
        let err = "finished".parse::<NodeState>().unwrap_err();
        assert_eq!(err.to_string(), "Invalid node state: finished");
    }

    #[test]
    fn test_node_state_serde_is_snake_case() {
        let json = serde_json::to_string(&NodeState::NeedsFixes).unwrap();
        assert_eq!(json, "\"needs_fixes\"");
    }

    #[test]
    fn test_upload_gating_states() {
        assert!(NodeState::Submitted.requires_uploads());
        assert!(NodeState::Done.requires_uploads());
        assert!(!NodeState::Waiting.requires_uploads());
        assert!(NodeState::Done.is_terminal());
    }

    #[test]
    fn test_multiplicity_default_is_single() {
        assert_eq!(Multiplicity::default(), Multiplicity::Single);
        assert_eq!(Multiplicity::from_db_str("multi"), Some(Multiplicity::Multi));
        assert_eq!(Multiplicity::from_db_str("many"), None);
    }
}
