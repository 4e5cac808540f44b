//! Identity types for journey entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// SHA-256 content hash for playbook integrity verification.
pub type ContentHash = [u8; 32];

/// Compute SHA-256 hash of content.
pub fn compute_content_hash(content: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Common behaviour of the strongly-typed UUID identifiers.
pub trait EntityIdType:
    Copy + Eq + std::hash::Hash + Ord + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Wrap an existing UUID.
    fn new(uuid: Uuid) -> Self;

    /// Borrow the wrapped UUID.
    fn as_uuid(&self) -> Uuid;

    /// Generate a new timestamp-sortable (UUIDv7) identifier.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// The all-zeros identifier.
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }

    fn is_nil(&self) -> bool {
        self.as_uuid().is_nil()
    }
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_entity_id!(
    /// Tenant (institution) owning users and their journeys.
    TenantId
);
define_entity_id!(
    /// A portal user (student, advisor, admin...).
    UserId
);
define_entity_id!(
    /// Per-user materialization of a playbook node.
    InstanceId
);
define_entity_id!(
    /// Upload requirement slot on a node instance.
    SlotId
);
define_entity_id!(
    /// Binding of a stored object to a slot.
    AttachmentId
);
define_entity_id!(
    /// Document metadata record owned by the document capability.
    DocumentId
);
define_entity_id!(
    /// Immutable version of a document.
    DocumentVersionId
);
define_entity_id!(
    /// Node event log entry.
    EventId
);
define_entity_id!(
    /// Loaded playbook version, derived from the content checksum.
    PlaybookVersionId
);

impl PlaybookVersionId {
    /// Derive the version id from a playbook checksum (UUIDv5, OID namespace).
    /// Identical content always maps to the same version id.
    pub fn from_checksum(checksum_hex: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, checksum_hex.as_bytes()))
    }
}

/// The reserved platform tenant. Immutable; administrative mutation paths
/// must reject it.
pub const PLATFORM_TENANT_ID: TenantId = TenantId(Uuid::nil());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = compute_content_hash(b"playbook");
        let b = compute_content_hash(b"playbook");
        assert_eq!(a, b);
        assert_ne!(a, compute_content_hash(b"playbook2"));
    }

    #[test]
    fn test_version_id_from_checksum_is_deterministic() {
        let hex = hex::encode(compute_content_hash(b"{}"));
        assert_eq!(
            PlaybookVersionId::from_checksum(&hex),
            PlaybookVersionId::from_checksum(&hex)
        );
        assert_ne!(
            PlaybookVersionId::from_checksum(&hex),
            PlaybookVersionId::from_checksum("other")
        );
    }

    #[test]
    fn test_platform_tenant_is_nil() {
        assert!(PLATFORM_TENANT_ID.is_nil());
        assert!(!TenantId::now_v7().is_nil());
    }

    #[test]
    fn test_id_roundtrips_through_string() {
        let id = UserId::now_v7();
        let parsed: UserId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
