//! External capabilities consumed by the engine
//!
//! The blob store, document metadata service and mail delivery live outside
//! the journey engine. They are reached only through these traits so hosts
//! can plug in real clients and tests can plug in recording mocks.

use crate::{DocumentId, DocumentVersionId, JourneyResult, TenantId, UserId};
use async_trait::async_trait;
use std::time::Duration;

/// Object storage reached through presigned URLs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Presigned URL for a single PUT of `key` with the given content type.
    async fn presign_put(&self, key: &str, content_type: &str, ttl: Duration) -> JourneyResult<String>;

    /// Presigned URL for reading `key`.
    async fn presign_get(&self, key: &str, ttl: Duration) -> JourneyResult<String>;

    async fn object_exists(&self, key: &str) -> JourneyResult<bool>;

    fn bucket(&self) -> String;
}

/// Outbound mail.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_notification_email(&self, to: &str, subject: &str, body: &str) -> JourneyResult<()>;
}

/// Metadata for a new document record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocument {
    pub title: String,
    pub kind: String,
    pub tenant_id: TenantId,
    pub user_id: UserId,
}

/// Storage location of a new document version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDocumentVersion {
    pub storage_path: String,
    pub mime: String,
    pub size_bytes: u64,
}

/// Document metadata persistence.
#[async_trait]
pub trait DocumentService: Send + Sync {
    async fn create_document_metadata(&self, doc: NewDocument) -> JourneyResult<DocumentId>;

    async fn create_document_version(
        &self,
        document_id: DocumentId,
        tenant_id: TenantId,
        user_id: UserId,
        version: NewDocumentVersion,
    ) -> JourneyResult<DocumentVersionId>;
}
