//! Error types for journey operations

use crate::{EntityType, NodeState};
use std::fmt;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} {key}")]
    NotFound { entity_type: EntityType, key: String },

    #[error("{entity_type:?} {key} already exists")]
    AlreadyExists { entity_type: EntityType, key: String },

    /// Compare-and-swap precondition did not hold.
    #[error("Conflict on {entity_type:?} {key}: {reason}")]
    Conflict {
        entity_type: EntityType,
        key: String,
        reason: String,
    },

    #[error("Backend failure: {reason}")]
    Backend { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Input validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unknown node: {node_id}")]
    UnknownNode { node_id: String },

    #[error("slot missing: {slot_key} on node {node_id}")]
    SlotMissing { node_id: String, slot_key: String },

    #[error("mime not allowed: {content_type} for slot {slot_key}")]
    MimeNotAllowed {
        slot_key: String,
        content_type: String,
    },

    #[error("file too large: {size_bytes} bytes (max {max_bytes})")]
    FileTooLarge { size_bytes: u64, max_bytes: u64 },

    #[error("invalid state: {value}")]
    InvalidState { value: String },

    #[error("invalid payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("requirement missing: {slot_key}")]
    RequirementMissing { slot_key: String },

    #[error("tenant {tenant_id} is reserved and cannot be modified")]
    ReservedTenant { tenant_id: String },

    #[error("invalid playbook: {reason}")]
    InvalidPlaybook { reason: String },
}

/// State machine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("role not permitted: {role} cannot transition from {from} to {to}")]
    RoleNotPermitted {
        role: String,
        from: NodeState,
        to: NodeState,
    },

    #[error("requirements not met: {reason}")]
    RequirementsNotMet { reason: String },

    #[error("state changed by another process (expected {expected})")]
    CasConflict { expected: NodeState },
}

/// Failures of the external blob, document and notification capabilities.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("storage unavailable: no blob store configured")]
    StorageUnavailable,

    #[error("document service unavailable")]
    DocumentsUnavailable,

    #[error("{capability} transport error: {reason}")]
    Transport { capability: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all journey errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JourneyError {
    #[error("store error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("{0}")]
    Capability(#[from] CapabilityError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("operation cancelled: {operation}")]
    Cancelled { operation: String },
}

/// Result type alias for journey operations.
pub type JourneyResult<T> = Result<T, JourneyError>;

/// Flat classification of errors for outer layers (HTTP status mapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnknownNode,
    SlotMissing,
    MimeNotAllowed,
    FileTooLarge,
    RequirementsNotMet,
    RoleNotPermitted,
    CasConflict,
    StorageUnavailable,
    StoreError,
    InvalidInput,
    Capability,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::UnknownNode => "unknown node",
            ErrorKind::SlotMissing => "slot missing",
            ErrorKind::MimeNotAllowed => "mime not allowed",
            ErrorKind::FileTooLarge => "file too large",
            ErrorKind::RequirementsNotMet => "requirements not met",
            ErrorKind::RoleNotPermitted => "role not permitted",
            ErrorKind::CasConflict => "cas conflict",
            ErrorKind::StorageUnavailable => "storage unavailable",
            ErrorKind::StoreError => "store error",
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::Capability => "capability error",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JourneyError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            JourneyError::Storage(_) => ErrorKind::StoreError,
            JourneyError::Validation(v) => match v {
                ValidationError::UnknownNode { .. } => ErrorKind::UnknownNode,
                ValidationError::SlotMissing { .. } => ErrorKind::SlotMissing,
                ValidationError::MimeNotAllowed { .. } => ErrorKind::MimeNotAllowed,
                ValidationError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
                ValidationError::RequirementMissing { .. } => ErrorKind::RequirementsNotMet,
                ValidationError::InvalidState { .. }
                | ValidationError::InvalidPayload { .. }
                | ValidationError::ReservedTenant { .. }
                | ValidationError::InvalidPlaybook { .. } => ErrorKind::InvalidInput,
            },
            JourneyError::Transition(t) => match t {
                TransitionError::RoleNotPermitted { .. } => ErrorKind::RoleNotPermitted,
                TransitionError::RequirementsNotMet { .. } => ErrorKind::RequirementsNotMet,
                TransitionError::CasConflict { .. } => ErrorKind::CasConflict,
            },
            JourneyError::Capability(CapabilityError::StorageUnavailable) => {
                ErrorKind::StorageUnavailable
            }
            JourneyError::Capability(_) => ErrorKind::Capability,
            JourneyError::Config(_) => ErrorKind::InvalidInput,
            JourneyError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    /// Shorthand for an unknown node id.
    pub fn unknown_node(node_id: impl Into<String>) -> Self {
        JourneyError::Validation(ValidationError::UnknownNode {
            node_id: node_id.into(),
        })
    }

    /// Shorthand for a backend failure with its message intact.
    pub fn backend(reason: impl Into<String>) -> Self {
        JourneyError::Storage(StorageError::Backend {
            reason: reason.into(),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
