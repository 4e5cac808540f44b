//! Presigned uploads and slot attachment.
//!
//! Clients upload straight to the blob store with a presigned URL and then
//! call attach with the object key they were given.

use crate::coordinator::SubmissionCoordinator;
use crate::slots::SlotEngine;
use journey_core::{
    AttachmentId, AttachmentStatus, BlobStore, CapabilityError, DocumentService, EntityType,
    JourneyConfig, JourneyError, JourneyResult, NewAttachment, NewDocument, NewDocumentVersion,
    NodeEventKind, PlaybookManager, StorageError, TenantId, UserId, ValidationError,
};
use journey_storage::JourneyStore;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Document kind recorded for slot uploads.
pub const SLOT_DOCUMENT_KIND: &str = "node_slot";

const ATTACHED_MIME: &str = "application/octet-stream";

/// Result of a presign request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PresignedUpload {
    pub url: String,
    pub object_key: String,
}

/// Arguments of [`UploadService::attach_upload`].
#[derive(Debug, Clone)]
pub struct AttachRequest {
    pub slot_key: String,
    pub object_key: String,
    pub filename: String,
    pub size_bytes: u64,
}

/// Key prefix every object of a node slot lives under.
pub fn upload_key_prefix(node_id: &str, slot_key: &str) -> String {
    format!("node_uploads/{}/{}/", node_id, slot_key)
}

/// Object key for a new upload: `node_uploads/{node}/{slot}/{uuid}/{filename}`.
///
/// Path separators in the filename are replaced so the key keeps its shape.
pub fn upload_object_key(node_id: &str, slot_key: &str, filename: &str) -> String {
    let safe_name = filename.replace(['/', '\\'], "_");
    format!(
        "{}{}/{}",
        upload_key_prefix(node_id, slot_key),
        Uuid::now_v7(),
        safe_name
    )
}

#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn JourneyStore>,
    playbook: Arc<PlaybookManager>,
    slots: SlotEngine,
    coordinator: SubmissionCoordinator,
    blob: Option<Arc<dyn BlobStore>>,
    documents: Option<Arc<dyn DocumentService>>,
    config: JourneyConfig,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn JourneyStore>,
        playbook: Arc<PlaybookManager>,
        slots: SlotEngine,
        coordinator: SubmissionCoordinator,
        blob: Option<Arc<dyn BlobStore>>,
        documents: Option<Arc<dyn DocumentService>>,
        config: JourneyConfig,
    ) -> Self {
        Self {
            store,
            playbook,
            slots,
            coordinator,
            blob,
            documents,
            config,
        }
    }

    fn blob(&self) -> JourneyResult<&Arc<dyn BlobStore>> {
        self.blob
            .as_ref()
            .ok_or(JourneyError::Capability(CapabilityError::StorageUnavailable))
    }

    /// Validate an upload against the playbook and issue a presigned PUT.
    pub async fn presign_upload(
        &self,
        user_id: UserId,
        node_id: &str,
        slot_key: &str,
        filename: &str,
        content_type: &str,
        size_bytes: u64,
    ) -> JourneyResult<PresignedUpload> {
        self.playbook.require_node(node_id)?;
        let requirement = self
            .playbook
            .upload_requirement(node_id, slot_key)
            .ok_or_else(|| ValidationError::SlotMissing {
                node_id: node_id.to_string(),
                slot_key: slot_key.to_string(),
            })?;

        if !requirement.mime.is_empty() && !requirement.mime.iter().any(|m| m == content_type) {
            return Err(ValidationError::MimeNotAllowed {
                slot_key: slot_key.to_string(),
                content_type: content_type.to_string(),
            }
            .into());
        }

        let max_bytes = self.config.max_upload_bytes();
        if size_bytes > max_bytes {
            return Err(ValidationError::FileTooLarge {
                size_bytes,
                max_bytes,
            }
            .into());
        }

        let blob = self.blob()?;
        let object_key = upload_object_key(node_id, slot_key, filename);
        let url = blob
            .presign_put(&object_key, content_type, self.config.presign_ttl)
            .await?;

        tracing::info!(%user_id, node_id, slot_key, object_key = %object_key, size_bytes, "upload presigned");
        Ok(PresignedUpload { url, object_key })
    }

    /// Presigned GET for an attachment of the caller's slot.
    pub async fn presign_download(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
        slot_key: &str,
        attachment_id: AttachmentId,
    ) -> JourneyResult<String> {
        self.playbook.require_node(node_id)?;
        let slot_missing = || ValidationError::SlotMissing {
            node_id: node_id.to_string(),
            slot_key: slot_key.to_string(),
        };

        let instance = self
            .store
            .get_instance(user_id, node_id)
            .await?
            .filter(|i| i.tenant_id == tenant_id)
            .ok_or_else(slot_missing)?;
        let slot = self
            .store
            .get_slot(instance.instance_id, slot_key)
            .await?
            .ok_or_else(slot_missing)?;
        let attachment = self
            .store
            .get_attachment(attachment_id)
            .await?
            .filter(|a| a.slot_id == slot.slot_id)
            .ok_or_else(|| StorageError::NotFound {
                entity_type: EntityType::Attachment,
                key: attachment_id.to_string(),
            })?;

        let blob = self.blob()?;
        blob.presign_get(&attachment.object_key, self.config.presign_ttl)
            .await
    }

    /// Bind an uploaded object to a slot of the `(user, node)` instance.
    ///
    /// A document version is minted first so a failing document service
    /// leaves the slot's current attachment in place.
    pub async fn attach_upload(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
        request: AttachRequest,
    ) -> JourneyResult<AttachmentId> {
        let instance = self
            .coordinator
            .ensure_node_instance(tenant_id, user_id, node_id, None)
            .await?;
        let slot = self
            .store
            .get_slot(instance.instance_id, &request.slot_key)
            .await?
            .ok_or_else(|| ValidationError::SlotMissing {
                node_id: node_id.to_string(),
                slot_key: request.slot_key.clone(),
            })?;

        let prefix = upload_key_prefix(node_id, &request.slot_key);
        if !request.object_key.starts_with(&prefix) || request.object_key.len() == prefix.len() {
            return Err(ValidationError::InvalidPayload {
                reason: format!("object key {} is outside {}", request.object_key, prefix),
            }
            .into());
        }

        let documents = self
            .documents
            .as_ref()
            .ok_or(JourneyError::Capability(CapabilityError::DocumentsUnavailable))?;

        if let Some(blob) = &self.blob {
            if !blob.object_exists(&request.object_key).await? {
                return Err(ValidationError::InvalidPayload {
                    reason: format!("object not found: {}", request.object_key),
                }
                .into());
            }
        }

        let document_id = documents
            .create_document_metadata(NewDocument {
                title: request.filename.clone(),
                kind: SLOT_DOCUMENT_KIND.to_string(),
                tenant_id,
                user_id,
            })
            .await?;
        let version_id = documents
            .create_document_version(
                document_id,
                tenant_id,
                user_id,
                NewDocumentVersion {
                    storage_path: request.object_key.clone(),
                    mime: ATTACHED_MIME.to_string(),
                    size_bytes: request.size_bytes,
                },
            )
            .await?;

        let attachment_id = self
            .slots
            .attach(
                &slot,
                NewAttachment {
                    slot_id: slot.slot_id,
                    document_version_id: version_id,
                    object_key: request.object_key.clone(),
                    status: AttachmentStatus::Submitted,
                    filename: request.filename,
                    attached_by: user_id,
                    size_bytes: request.size_bytes,
                },
            )
            .await?;

        if let Err(e) = self
            .store
            .log_event(
                instance.instance_id,
                NodeEventKind::FileAttached,
                user_id,
                serde_json::json!({
                    "slot_key": request.slot_key,
                    "version_id": version_id,
                    "object_key": request.object_key,
                }),
            )
            .await
        {
            tracing::warn!(error = %e, instance_id = %instance.instance_id, "file_attached event failed");
        }

        tracing::info!(
            %user_id,
            node_id,
            slot_key = %request.slot_key,
            %attachment_id,
            "upload attached"
        );
        Ok(attachment_id)
    }
}
