//! Requirement slot engine
//!
//! Keeps an instance's upload slots in sync with the playbook, applies the
//! multiplicity rule on attach and answers whether every required slot is
//! satisfied.

use journey_core::{
    AttachmentId, EntityType, InstanceId, JourneyError, JourneyResult, Multiplicity,
    NewAttachment, PlaybookManager, RequirementSlot, StorageError, TenantId, ValidationError,
};
use journey_storage::JourneyStore;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct SlotEngine {
    store: Arc<dyn JourneyStore>,
    playbook: Arc<PlaybookManager>,
}

impl SlotEngine {
    pub fn new(store: Arc<dyn JourneyStore>, playbook: Arc<PlaybookManager>) -> Self {
        Self { store, playbook }
    }

    /// Create a slot for every playbook upload the instance does not have yet.
    ///
    /// Existing slots are never modified or removed, so repeated calls are
    /// idempotent.
    pub async fn ensure_slots(
        &self,
        instance_id: InstanceId,
        tenant_id: TenantId,
        node_id: &str,
    ) -> JourneyResult<()> {
        let def = self.playbook.require_node(node_id)?;
        if def.uploads().is_empty() {
            return Ok(());
        }

        let present: HashSet<String> = self
            .store
            .get_slots(instance_id)
            .await?
            .into_iter()
            .map(|s| s.slot_key)
            .collect();

        for upload in def.uploads().iter().filter(|u| !present.contains(&u.key)) {
            let created = self
                .store
                .create_slot(
                    instance_id,
                    &upload.key,
                    tenant_id,
                    upload.required,
                    Multiplicity::Single,
                    upload.mime.clone(),
                )
                .await;
            match created {
                Ok(slot_id) => {
                    tracing::debug!(%instance_id, %slot_id, slot_key = %upload.key, "slot created");
                }
                // A concurrent ensure got there first.
                Err(JourneyError::Storage(StorageError::AlreadyExists {
                    entity_type: EntityType::Slot,
                    ..
                })) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Succeeds iff every required slot has an active attachment.
    ///
    /// Fails with `requirement missing: <slot_key>` naming the first
    /// unsatisfied slot in key order.
    pub async fn verify_requirements(&self, instance_id: InstanceId) -> JourneyResult<()> {
        let slots = self.store.get_full_slots(instance_id).await?;
        match slots
            .iter()
            .find(|s| s.slot.required && !s.has_active_attachment())
        {
            Some(missing) => Err(ValidationError::RequirementMissing {
                slot_key: missing.slot.slot_key.clone(),
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Bind a new active attachment to `slot`. On a single slot every prior
    /// attachment is deactivated in the same store operation.
    pub async fn attach(
        &self,
        slot: &RequirementSlot,
        attachment: NewAttachment,
    ) -> JourneyResult<AttachmentId> {
        match slot.multiplicity {
            Multiplicity::Single => self.store.replace_active_attachment(attachment).await,
            Multiplicity::Multi => self.store.create_attachment(attachment).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_core::{
        AttachmentStatus, DocumentVersionId, EntityIdType, NewNodeInstance, NodeState, UserId,
    };
    use journey_storage::InMemoryJourneyStore;

    const PLAYBOOK: &str = r#"{"worlds":[{"id":"W1","nodes":[
        {"id":"N1","requirements":{"uploads":[
            {"key":"pdf","mime":["application/pdf"],"required":true},
            {"key":"extra","required":false}
        ]}},
        {"id":"N2"}
    ]}]}"#;

    async fn setup() -> (SlotEngine, Arc<InMemoryJourneyStore>, InstanceId, TenantId, UserId) {
        let store = Arc::new(InMemoryJourneyStore::new());
        let playbook = Arc::new(PlaybookManager::from_bytes(PLAYBOOK.as_bytes()).unwrap());
        let (tenant, user) = (TenantId::now_v7(), UserId::now_v7());
        let instance = store
            .create_instance(NewNodeInstance {
                tenant_id: tenant,
                user_id: user,
                playbook_version_id: playbook.version_id(),
                node_id: "N1".to_string(),
                state: NodeState::Active,
                locale: None,
            })
            .await
            .unwrap();
        let engine = SlotEngine::new(store.clone(), playbook);
        (engine, store, instance, tenant, user)
    }

    fn attachment(slot: &RequirementSlot, user: UserId, key: &str) -> NewAttachment {
        NewAttachment {
            slot_id: slot.slot_id,
            document_version_id: DocumentVersionId::now_v7(),
            object_key: key.to_string(),
            status: AttachmentStatus::Submitted,
            filename: "a.pdf".to_string(),
            attached_by: user,
            size_bytes: 10,
        }
    }

    #[tokio::test]
    async fn test_ensure_slots_is_idempotent() {
        let (engine, store, instance, tenant, _) = setup().await;
        engine.ensure_slots(instance, tenant, "N1").await.unwrap();
        engine.ensure_slots(instance, tenant, "N1").await.unwrap();

        let slots = store.get_slots(instance).await.unwrap();
        let keys: Vec<&str> = slots.iter().map(|s| s.slot_key.as_str()).collect();
        assert_eq!(keys, vec!["extra", "pdf"]);
        assert!(slots.iter().all(|s| s.multiplicity == Multiplicity::Single));
        assert_eq!(slots[1].mime, vec!["application/pdf"]);
    }

    #[tokio::test]
    async fn test_ensure_slots_leaves_extra_slots_alone() {
        let (engine, store, instance, tenant, _) = setup().await;
        store
            .create_slot(instance, "legacy", tenant, true, Multiplicity::Multi, vec![])
            .await
            .unwrap();
        engine.ensure_slots(instance, tenant, "N1").await.unwrap();
        let legacy = store.get_slot(instance, "legacy").await.unwrap().unwrap();
        assert_eq!(legacy.multiplicity, Multiplicity::Multi);
        assert_eq!(store.get_slots(instance).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_ensure_slots_unknown_node() {
        let (engine, _, instance, tenant, _) = setup().await;
        let err = engine.ensure_slots(instance, tenant, "NX").await.unwrap_err();
        assert_eq!(err.to_string(), "unknown node: NX");
    }

    #[tokio::test]
    async fn test_verify_requirements_names_missing_slot() {
        let (engine, store, instance, tenant, user) = setup().await;
        engine.ensure_slots(instance, tenant, "N1").await.unwrap();

        let err = engine.verify_requirements(instance).await.unwrap_err();
        assert_eq!(err.to_string(), "requirement missing: pdf");

        let pdf = store.get_slot(instance, "pdf").await.unwrap().unwrap();
        engine.attach(&pdf, attachment(&pdf, user, "k1")).await.unwrap();
        engine.verify_requirements(instance).await.unwrap();
    }

    #[tokio::test]
    async fn test_single_attach_supersedes_previous() {
        let (engine, store, instance, tenant, user) = setup().await;
        engine.ensure_slots(instance, tenant, "N1").await.unwrap();
        let pdf = store.get_slot(instance, "pdf").await.unwrap().unwrap();

        engine.attach(&pdf, attachment(&pdf, user, "k1/a.pdf")).await.unwrap();
        let second = engine.attach(&pdf, attachment(&pdf, user, "k2/b.pdf")).await.unwrap();

        let full = store.get_full_slots(instance).await.unwrap();
        let pdf_full = full.iter().find(|s| s.slot.slot_key == "pdf").unwrap();
        let active: Vec<_> = pdf_full.active_attachments().collect();
        assert_eq!(pdf_full.attachments.len(), 2);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].attachment_id, second);
        assert_eq!(active[0].object_key, "k2/b.pdf");
    }

    #[tokio::test]
    async fn test_multi_attach_accumulates() {
        let (engine, store, instance, tenant, user) = setup().await;
        let slot_id = store
            .create_slot(instance, "photos", tenant, false, Multiplicity::Multi, vec![])
            .await
            .unwrap();
        let slot = store.get_slot(instance, "photos").await.unwrap().unwrap();
        assert_eq!(slot.slot_id, slot_id);

        engine.attach(&slot, attachment(&slot, user, "p1")).await.unwrap();
        engine.attach(&slot, attachment(&slot, user, "p2")).await.unwrap();

        let full = store.get_full_slots(instance).await.unwrap();
        let photos = full.iter().find(|s| s.slot.slot_key == "photos").unwrap();
        assert_eq!(photos.active_attachments().count(), 2);
    }
}
