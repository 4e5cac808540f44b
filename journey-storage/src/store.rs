//! Async persistence contract for the journey engine.
//!
//! Implementations must keep the `(user, node)` instance uniqueness and the
//! `(instance, rev)` revision uniqueness, and must apply
//! [`JourneyStore::update_instance_state_cas`] atomically.

use async_trait::async_trait;
use journey_core::{
    AttachmentId, DoneNode, EventId, FormRevision, FullSlot, InstanceId, JourneyResult,
    Multiplicity, NewAttachment, NewNodeInstance, NodeEvent, NodeEventKind, NodeInstance,
    NodeOutcome, NodeState, ProfileFields, RequirementSlot, SlotAttachment, SlotId, TenantId,
    UserId, UserSummary,
};
use std::collections::HashMap;

/// Result of a compare-and-swap on an instance's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The expected state matched and the new state was written.
    Applied,
    /// The instance is missing or its state was no longer the expected one.
    Conflict,
}

impl CasOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, CasOutcome::Applied)
    }
}

/// Async storage trait for journey persistence.
#[async_trait]
pub trait JourneyStore: Send + Sync {
    // ========================================================================
    // JOURNEY STATE
    // ========================================================================

    /// Map of node id to state for one user in one tenant.
    async fn get_journey_state(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> JourneyResult<HashMap<String, NodeState>>;

    /// Last-write-wins mirror of an instance state.
    async fn upsert_journey_state(
        &self,
        user_id: UserId,
        node_id: &str,
        state: NodeState,
        tenant_id: TenantId,
    ) -> JourneyResult<()>;

    /// Remove all instances and journey state of the pair except the
    /// profile node, atomically.
    async fn reset_journey(&self, user_id: UserId, tenant_id: TenantId) -> JourneyResult<()>;

    // ========================================================================
    // NODE INSTANCES
    // ========================================================================

    async fn get_instance(&self, user_id: UserId, node_id: &str) -> JourneyResult<Option<NodeInstance>>;

    async fn get_instance_by_id(&self, instance_id: InstanceId) -> JourneyResult<Option<NodeInstance>>;

    /// Fails with `AlreadyExists` when the `(user, node)` pair already has an instance.
    async fn create_instance(&self, new: NewNodeInstance) -> JourneyResult<InstanceId>;

    /// Set `state = to` only if it currently equals `expected_from`.
    async fn update_instance_state_cas(
        &self,
        instance_id: InstanceId,
        expected_from: NodeState,
        to: NodeState,
    ) -> JourneyResult<CasOutcome>;

    // ========================================================================
    // FORM REVISIONS
    // ========================================================================

    /// Unique on `(instance, rev)`.
    async fn insert_form_revision(
        &self,
        instance_id: InstanceId,
        rev: u32,
        payload: Vec<u8>,
        edited_by: UserId,
    ) -> JourneyResult<()>;

    async fn get_form_revision(
        &self,
        instance_id: InstanceId,
        rev: u32,
    ) -> JourneyResult<Option<FormRevision>>;

    /// Advance `current_rev` to `rev` and set the locale.
    async fn upsert_submission(
        &self,
        instance_id: InstanceId,
        rev: u32,
        locale: Option<String>,
    ) -> JourneyResult<()>;

    /// Store `payload` as the next revision and advance `current_rev` to it
    /// in one atomic step. Returns the new revision number.
    ///
    /// The number follows both `current_rev` and the highest revision already
    /// stored, so a revision orphaned by an interrupted two-step write never
    /// blocks later submissions.
    async fn commit_form_revision(
        &self,
        instance_id: InstanceId,
        payload: Vec<u8>,
        edited_by: UserId,
        locale: Option<String>,
    ) -> JourneyResult<u32>;

    // ========================================================================
    // SLOTS & ATTACHMENTS
    // ========================================================================

    /// Fails with `AlreadyExists` when the slot key is already present.
    async fn create_slot(
        &self,
        instance_id: InstanceId,
        slot_key: &str,
        tenant_id: TenantId,
        required: bool,
        multiplicity: Multiplicity,
        mime: Vec<String>,
    ) -> JourneyResult<SlotId>;

    async fn get_slot(&self, instance_id: InstanceId, slot_key: &str) -> JourneyResult<Option<RequirementSlot>>;

    /// Slots of an instance ordered by key.
    async fn get_slots(&self, instance_id: InstanceId) -> JourneyResult<Vec<RequirementSlot>>;

    /// Slots ordered by key, each with its attachments newest first.
    async fn get_full_slots(&self, instance_id: InstanceId) -> JourneyResult<Vec<FullSlot>>;

    /// Clear `is_active` on every attachment of a slot.
    async fn deactivate_slot_attachments(&self, slot_id: SlotId) -> JourneyResult<()>;

    /// Insert a new active attachment.
    async fn create_attachment(&self, new: NewAttachment) -> JourneyResult<AttachmentId>;

    /// Deactivate every attachment of the slot and insert `new` as its only
    /// active attachment, atomically.
    async fn replace_active_attachment(&self, new: NewAttachment) -> JourneyResult<AttachmentId>;

    async fn get_attachment(&self, attachment_id: AttachmentId) -> JourneyResult<Option<SlotAttachment>>;

    // ========================================================================
    // TRANSITION POLICY
    // ========================================================================

    /// Roles allowed to move from `from` to `to`; empty when no policy row exists.
    async fn get_allowed_transition_roles(
        &self,
        from: NodeState,
        to: NodeState,
    ) -> JourneyResult<Vec<String>>;

    // ========================================================================
    // EVENTS & OUTCOMES
    // ========================================================================

    async fn log_event(
        &self,
        instance_id: InstanceId,
        kind: NodeEventKind,
        actor_id: UserId,
        payload: serde_json::Value,
    ) -> JourneyResult<EventId>;

    /// Events of an instance in append order.
    async fn list_events(&self, instance_id: InstanceId) -> JourneyResult<Vec<NodeEvent>>;

    async fn insert_outcome(
        &self,
        instance_id: InstanceId,
        value: &str,
        decided_by: UserId,
        note: &str,
    ) -> JourneyResult<()>;

    /// Outcomes of an instance, newest first.
    async fn get_outcomes(&self, instance_id: InstanceId) -> JourneyResult<Vec<NodeOutcome>>;

    // ========================================================================
    // AGGREGATES & USERS
    // ========================================================================

    /// Every `(user, node)` in the tenant whose journey state is `done`.
    async fn get_done_nodes(&self, tenant_id: TenantId) -> JourneyResult<Vec<DoneNode>>;

    /// Users found among `ids`; missing ids are skipped.
    async fn get_users_by_ids(&self, ids: &[UserId]) -> JourneyResult<Vec<UserSummary>>;

    /// Write profile columns onto the user record.
    async fn sync_profile_to_users(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
        fields: ProfileFields,
    ) -> JourneyResult<()>;
}
