//! In-memory journey store.
//!
//! All tables live behind one `RwLock` so that each operation observes and
//! commits a consistent snapshot, which is what makes the CAS and the
//! uniqueness checks atomic.

use crate::store::{CasOutcome, JourneyStore};
use async_trait::async_trait;
use chrono::Utc;
use journey_core::{
    AttachmentId, DoneNode, EntityIdType, EntityType, EventId, FormRevision, FullSlot,
    InstanceId, JourneyError, JourneyResult, Multiplicity, NewAttachment, NewNodeInstance,
    NodeEvent, NodeEventKind, NodeInstance, NodeOutcome, NodeState, ProfileFields,
    RequirementSlot, SlotAttachment, SlotId, StorageError, TenantId, UserId, UserSummary,
    PROFILE_NODE_ID,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
struct UserRecord {
    tenant_id: TenantId,
    summary: UserSummary,
    profile: ProfileFields,
}

#[derive(Debug, Clone)]
struct JourneyStateRow {
    state: NodeState,
}

#[derive(Debug, Default)]
struct MemoryState {
    journey: HashMap<(UserId, TenantId, String), JourneyStateRow>,
    instances: HashMap<InstanceId, NodeInstance>,
    instance_index: HashMap<(UserId, String), InstanceId>,
    revisions: BTreeMap<(InstanceId, u32), FormRevision>,
    slots: HashMap<SlotId, RequirementSlot>,
    attachments: Vec<SlotAttachment>,
    events: Vec<NodeEvent>,
    outcomes: Vec<(InstanceId, NodeOutcome)>,
    transitions: HashMap<(NodeState, NodeState), Vec<String>>,
    users: HashMap<UserId, UserRecord>,
}

impl MemoryState {
    fn push_attachment(&mut self, new: NewAttachment) -> JourneyResult<AttachmentId> {
        if !self.slots.contains_key(&new.slot_id) {
            return Err(not_found(EntityType::Slot, new.slot_id));
        }
        let attachment = SlotAttachment {
            attachment_id: AttachmentId::now_v7(),
            slot_id: new.slot_id,
            document_version_id: new.document_version_id,
            object_key: new.object_key,
            is_active: true,
            status: new.status,
            filename: new.filename,
            size_bytes: new.size_bytes,
            attached_by: new.attached_by,
            attached_at: Utc::now(),
        };
        let id = attachment.attachment_id;
        self.attachments.push(attachment);
        Ok(id)
    }

    fn remove_instance(&mut self, instance_id: InstanceId) {
        if let Some(inst) = self.instances.remove(&instance_id) {
            self.instance_index.remove(&(inst.user_id, inst.node_id));
        }
        self.revisions.retain(|(id, _), _| *id != instance_id);
        let slot_ids: HashSet<SlotId> = self
            .slots
            .values()
            .filter(|s| s.instance_id == instance_id)
            .map(|s| s.slot_id)
            .collect();
        self.slots.retain(|id, _| !slot_ids.contains(id));
        self.attachments.retain(|a| !slot_ids.contains(&a.slot_id));
        self.events.retain(|e| e.instance_id != instance_id);
        self.outcomes.retain(|(id, _)| *id != instance_id);
    }
}

/// In-memory [`JourneyStore`] for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct InMemoryJourneyStore {
    inner: Arc<RwLock<MemoryState>>,
}

impl InMemoryJourneyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> JourneyResult<RwLockReadGuard<'_, MemoryState>> {
        self.inner
            .read()
            .map_err(|_| JourneyError::Storage(StorageError::LockPoisoned))
    }

    fn write(&self) -> JourneyResult<RwLockWriteGuard<'_, MemoryState>> {
        self.inner
            .write()
            .map_err(|_| JourneyError::Storage(StorageError::LockPoisoned))
    }

    /// Configure the roles allowed for one `(from, to)` pair.
    pub fn set_transition_roles(
        &self,
        from: NodeState,
        to: NodeState,
        roles: &[&str],
    ) -> JourneyResult<()> {
        let mut state = self.write()?;
        state
            .transitions
            .insert((from, to), roles.iter().map(|r| r.to_string()).collect());
        Ok(())
    }

    /// Register a user so the scoreboard and profile sync can find them.
    pub fn insert_user(&self, tenant_id: TenantId, summary: UserSummary) -> JourneyResult<()> {
        let mut state = self.write()?;
        state.users.insert(
            summary.user_id,
            UserRecord {
                tenant_id,
                summary,
                profile: ProfileFields::new(),
            },
        );
        Ok(())
    }

    /// Profile columns last written by [`JourneyStore::sync_profile_to_users`].
    pub fn profile_fields(&self, user_id: UserId) -> JourneyResult<Option<ProfileFields>> {
        let state = self.read()?;
        Ok(state.users.get(&user_id).map(|u| u.profile.clone()))
    }

    /// Number of stored node instances.
    pub fn instance_count(&self) -> usize {
        self.inner.read().map(|s| s.instances.len()).unwrap_or(0)
    }
}

fn not_found(entity_type: EntityType, key: impl ToString) -> JourneyError {
    JourneyError::Storage(StorageError::NotFound {
        entity_type,
        key: key.to_string(),
    })
}

fn already_exists(entity_type: EntityType, key: String) -> JourneyError {
    JourneyError::Storage(StorageError::AlreadyExists { entity_type, key })
}

#[async_trait]
impl JourneyStore for InMemoryJourneyStore {
    // === Journey State ===

    async fn get_journey_state(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> JourneyResult<HashMap<String, NodeState>> {
        let state = self.read()?;
        Ok(state
            .journey
            .iter()
            .filter(|((u, t, _), _)| *u == user_id && *t == tenant_id)
            .map(|((_, _, node), row)| (node.clone(), row.state))
            .collect())
    }

    async fn upsert_journey_state(
        &self,
        user_id: UserId,
        node_id: &str,
        node_state: NodeState,
        tenant_id: TenantId,
    ) -> JourneyResult<()> {
        let mut state = self.write()?;
        state.journey.insert(
            (user_id, tenant_id, node_id.to_string()),
            JourneyStateRow { state: node_state },
        );
        Ok(())
    }

    async fn reset_journey(&self, user_id: UserId, tenant_id: TenantId) -> JourneyResult<()> {
        let mut state = self.write()?;
        state
            .journey
            .retain(|(u, t, node), _| !(*u == user_id && *t == tenant_id && node != PROFILE_NODE_ID));
        let doomed: Vec<InstanceId> = state
            .instances
            .values()
            .filter(|i| i.user_id == user_id && i.tenant_id == tenant_id && i.node_id != PROFILE_NODE_ID)
            .map(|i| i.instance_id)
            .collect();
        for id in doomed {
            state.remove_instance(id);
        }
        Ok(())
    }

    // === Node Instances ===

    async fn get_instance(&self, user_id: UserId, node_id: &str) -> JourneyResult<Option<NodeInstance>> {
        let state = self.read()?;
        Ok(state
            .instance_index
            .get(&(user_id, node_id.to_string()))
            .and_then(|id| state.instances.get(id))
            .cloned())
    }

    async fn get_instance_by_id(&self, instance_id: InstanceId) -> JourneyResult<Option<NodeInstance>> {
        let state = self.read()?;
        Ok(state.instances.get(&instance_id).cloned())
    }

    async fn create_instance(&self, new: NewNodeInstance) -> JourneyResult<InstanceId> {
        let mut state = self.write()?;
        let key = (new.user_id, new.node_id.clone());
        if state.instance_index.contains_key(&key) {
            return Err(already_exists(
                EntityType::NodeInstance,
                format!("{}/{}", new.user_id, new.node_id),
            ));
        }
        let now = Utc::now();
        let instance = NodeInstance {
            instance_id: InstanceId::now_v7(),
            tenant_id: new.tenant_id,
            user_id: new.user_id,
            playbook_version_id: new.playbook_version_id,
            node_id: new.node_id,
            state: new.state,
            current_rev: 0,
            locale: new.locale,
            opened_at: now,
            updated_at: now,
        };
        let id = instance.instance_id;
        state.instance_index.insert(key, id);
        state.instances.insert(id, instance);
        Ok(id)
    }

    async fn update_instance_state_cas(
        &self,
        instance_id: InstanceId,
        expected_from: NodeState,
        to: NodeState,
    ) -> JourneyResult<CasOutcome> {
        let mut state = self.write()?;
        match state.instances.get_mut(&instance_id) {
            Some(inst) if inst.state == expected_from => {
                inst.state = to;
                inst.updated_at = Utc::now();
                Ok(CasOutcome::Applied)
            }
            _ => Ok(CasOutcome::Conflict),
        }
    }

    // === Form Revisions ===

    async fn insert_form_revision(
        &self,
        instance_id: InstanceId,
        rev: u32,
        payload: Vec<u8>,
        edited_by: UserId,
    ) -> JourneyResult<()> {
        let mut state = self.write()?;
        if !state.instances.contains_key(&instance_id) {
            return Err(not_found(EntityType::NodeInstance, instance_id));
        }
        if state.revisions.contains_key(&(instance_id, rev)) {
            return Err(already_exists(
                EntityType::FormRevision,
                format!("{}#{}", instance_id, rev),
            ));
        }
        state.revisions.insert(
            (instance_id, rev),
            FormRevision {
                instance_id,
                rev,
                payload,
                edited_by,
                created_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get_form_revision(
        &self,
        instance_id: InstanceId,
        rev: u32,
    ) -> JourneyResult<Option<FormRevision>> {
        let state = self.read()?;
        Ok(state.revisions.get(&(instance_id, rev)).cloned())
    }

    async fn upsert_submission(
        &self,
        instance_id: InstanceId,
        rev: u32,
        locale: Option<String>,
    ) -> JourneyResult<()> {
        let mut state = self.write()?;
        let inst = state
            .instances
            .get_mut(&instance_id)
            .ok_or_else(|| not_found(EntityType::NodeInstance, instance_id))?;
        if rev != inst.current_rev + 1 {
            return Err(JourneyError::Storage(StorageError::Conflict {
                entity_type: EntityType::NodeInstance,
                key: instance_id.to_string(),
                reason: format!("revision {} does not follow {}", rev, inst.current_rev),
            }));
        }
        inst.current_rev = rev;
        inst.locale = locale;
        inst.updated_at = Utc::now();
        Ok(())
    }

    async fn commit_form_revision(
        &self,
        instance_id: InstanceId,
        payload: Vec<u8>,
        edited_by: UserId,
        locale: Option<String>,
    ) -> JourneyResult<u32> {
        let mut state = self.write()?;
        let current_rev = state
            .instances
            .get(&instance_id)
            .map(|inst| inst.current_rev)
            .ok_or_else(|| not_found(EntityType::NodeInstance, instance_id))?;
        let last_stored = state
            .revisions
            .range((instance_id, 0)..=(instance_id, u32::MAX))
            .next_back()
            .map(|((_, rev), _)| *rev)
            .unwrap_or(0);
        let rev = current_rev.max(last_stored) + 1;

        let now = Utc::now();
        state.revisions.insert(
            (instance_id, rev),
            FormRevision {
                instance_id,
                rev,
                payload,
                edited_by,
                created_at: now,
            },
        );
        if let Some(inst) = state.instances.get_mut(&instance_id) {
            inst.current_rev = rev;
            inst.locale = locale;
            inst.updated_at = now;
        }
        Ok(rev)
    }

    // === Slots & Attachments ===

    async fn create_slot(
        &self,
        instance_id: InstanceId,
        slot_key: &str,
        tenant_id: TenantId,
        required: bool,
        multiplicity: Multiplicity,
        mime: Vec<String>,
    ) -> JourneyResult<SlotId> {
        let mut state = self.write()?;
        if state
            .slots
            .values()
            .any(|s| s.instance_id == instance_id && s.slot_key == slot_key)
        {
            return Err(already_exists(
                EntityType::Slot,
                format!("{}/{}", instance_id, slot_key),
            ));
        }
        let slot = RequirementSlot {
            slot_id: SlotId::now_v7(),
            instance_id,
            tenant_id,
            slot_key: slot_key.to_string(),
            required,
            multiplicity,
            mime,
        };
        let id = slot.slot_id;
        state.slots.insert(id, slot);
        Ok(id)
    }

    async fn get_slot(&self, instance_id: InstanceId, slot_key: &str) -> JourneyResult<Option<RequirementSlot>> {
        let state = self.read()?;
        Ok(state
            .slots
            .values()
            .find(|s| s.instance_id == instance_id && s.slot_key == slot_key)
            .cloned())
    }

    async fn get_slots(&self, instance_id: InstanceId) -> JourneyResult<Vec<RequirementSlot>> {
        let state = self.read()?;
        let mut slots: Vec<RequirementSlot> = state
            .slots
            .values()
            .filter(|s| s.instance_id == instance_id)
            .cloned()
            .collect();
        slots.sort_by(|a, b| a.slot_key.cmp(&b.slot_key));
        Ok(slots)
    }

    async fn get_full_slots(&self, instance_id: InstanceId) -> JourneyResult<Vec<FullSlot>> {
        let slots = self.get_slots(instance_id).await?;
        let state = self.read()?;
        Ok(slots
            .into_iter()
            .map(|slot| {
                // Newest first; attachments are stored in insertion order.
                let attachments = state
                    .attachments
                    .iter()
                    .rev()
                    .filter(|a| a.slot_id == slot.slot_id)
                    .cloned()
                    .collect();
                FullSlot { slot, attachments }
            })
            .collect())
    }

    async fn deactivate_slot_attachments(&self, slot_id: SlotId) -> JourneyResult<()> {
        let mut state = self.write()?;
        for attachment in state.attachments.iter_mut().filter(|a| a.slot_id == slot_id) {
            attachment.is_active = false;
        }
        Ok(())
    }

    async fn create_attachment(&self, new: NewAttachment) -> JourneyResult<AttachmentId> {
        let mut state = self.write()?;
        state.push_attachment(new)
    }

    async fn replace_active_attachment(&self, new: NewAttachment) -> JourneyResult<AttachmentId> {
        let mut state = self.write()?;
        if !state.slots.contains_key(&new.slot_id) {
            return Err(not_found(EntityType::Slot, new.slot_id));
        }
        for attachment in state.attachments.iter_mut().filter(|a| a.slot_id == new.slot_id) {
            attachment.is_active = false;
        }
        state.push_attachment(new)
    }

    async fn get_attachment(&self, attachment_id: AttachmentId) -> JourneyResult<Option<SlotAttachment>> {
        let state = self.read()?;
        Ok(state
            .attachments
            .iter()
            .find(|a| a.attachment_id == attachment_id)
            .cloned())
    }

    // === Transition Policy ===

    async fn get_allowed_transition_roles(
        &self,
        from: NodeState,
        to: NodeState,
    ) -> JourneyResult<Vec<String>> {
        let state = self.read()?;
        Ok(state.transitions.get(&(from, to)).cloned().unwrap_or_default())
    }

    // === Events & Outcomes ===

    async fn log_event(
        &self,
        instance_id: InstanceId,
        kind: NodeEventKind,
        actor_id: UserId,
        payload: serde_json::Value,
    ) -> JourneyResult<EventId> {
        let mut state = self.write()?;
        let event = NodeEvent {
            event_id: EventId::now_v7(),
            instance_id,
            kind,
            actor_id,
            payload,
            created_at: Utc::now(),
        };
        let id = event.event_id;
        state.events.push(event);
        Ok(id)
    }

    async fn list_events(&self, instance_id: InstanceId) -> JourneyResult<Vec<NodeEvent>> {
        let state = self.read()?;
        Ok(state
            .events
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn insert_outcome(
        &self,
        instance_id: InstanceId,
        value: &str,
        decided_by: UserId,
        note: &str,
    ) -> JourneyResult<()> {
        let mut state = self.write()?;
        if !state.instances.contains_key(&instance_id) {
            return Err(not_found(EntityType::NodeInstance, instance_id));
        }
        state.outcomes.push((
            instance_id,
            NodeOutcome {
                value: value.to_string(),
                decided_by,
                note: note.to_string(),
                created_at: Utc::now(),
            },
        ));
        Ok(())
    }

    async fn get_outcomes(&self, instance_id: InstanceId) -> JourneyResult<Vec<NodeOutcome>> {
        let state = self.read()?;
        Ok(state
            .outcomes
            .iter()
            .rev()
            .filter(|(id, _)| *id == instance_id)
            .map(|(_, o)| o.clone())
            .collect())
    }

    // === Aggregates & Users ===

    async fn get_done_nodes(&self, tenant_id: TenantId) -> JourneyResult<Vec<DoneNode>> {
        let state = self.read()?;
        let mut done: Vec<DoneNode> = state
            .journey
            .iter()
            .filter(|((_, t, _), row)| *t == tenant_id && row.state == NodeState::Done)
            .map(|((u, _, node), _)| DoneNode {
                user_id: *u,
                node_id: node.clone(),
            })
            .collect();
        done.sort_by(|a, b| a.user_id.cmp(&b.user_id).then_with(|| a.node_id.cmp(&b.node_id)));
        Ok(done)
    }

    async fn get_users_by_ids(&self, ids: &[UserId]) -> JourneyResult<Vec<UserSummary>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.users.get(id))
            .map(|u| u.summary.clone())
            .collect())
    }

    async fn sync_profile_to_users(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        fields: ProfileFields,
    ) -> JourneyResult<()> {
        let mut state = self.write()?;
        let record = state
            .users
            .get_mut(&user_id)
            .filter(|u| u.tenant_id == tenant_id)
            .ok_or_else(|| not_found(EntityType::User, user_id))?;
        record.profile.extend(fields);
        Ok(())
    }
}
