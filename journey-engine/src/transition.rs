//! Node instance state machine
//!
//! A transition is authorized by role (policy table or the student
//! completion override), gated on required uploads for `submitted`/`done`,
//! and committed with a compare-and-swap on the instance state. The journey
//! mirror, the `state_changed` event and the notification follow a
//! successful CAS; their failures are logged and do not undo the transition.

use crate::notify::{NotificationDispatcher, StateChangeNotice};
use crate::slots::SlotEngine;
use journey_core::{
    JourneyError, JourneyResult, NodeEventKind, NodeInstance, NodeState, TransitionError,
    UserId, ValidationError,
};
use journey_storage::{CasOutcome, JourneyStore};
use std::sync::Arc;

/// Role allowed to complete its own active or submitted nodes directly.
pub const STUDENT_ROLE: &str = "student";

/// Whether the student completion override applies.
pub fn student_may_complete(role: &str, from: NodeState, to: NodeState) -> bool {
    role == STUDENT_ROLE
        && to == NodeState::Done
        && matches!(from, NodeState::Active | NodeState::Submitted)
}

#[derive(Clone)]
pub struct StateMachine {
    store: Arc<dyn JourneyStore>,
    slots: SlotEngine,
    notifications: NotificationDispatcher,
}

impl StateMachine {
    pub fn new(
        store: Arc<dyn JourneyStore>,
        slots: SlotEngine,
        notifications: NotificationDispatcher,
    ) -> Self {
        Self {
            store,
            slots,
            notifications,
        }
    }

    /// Check the role against the override and the policy table.
    pub async fn authorize(&self, role: &str, from: NodeState, to: NodeState) -> JourneyResult<()> {
        if student_may_complete(role, from, to) {
            return Ok(());
        }
        let allowed = self.store.get_allowed_transition_roles(from, to).await?;
        if allowed.iter().any(|r| r == role) {
            Ok(())
        } else {
            Err(TransitionError::RoleNotPermitted {
                role: role.to_string(),
                from,
                to,
            }
            .into())
        }
    }

    /// Move `instance` from its current state to `to`.
    ///
    /// Returns the state the instance is in afterwards. `to == instance.state`
    /// is a no-op.
    pub async fn transition(
        &self,
        instance: &NodeInstance,
        actor_id: UserId,
        role: &str,
        to: NodeState,
    ) -> JourneyResult<NodeState> {
        let from = instance.state;
        if from == to {
            return Ok(from);
        }

        self.authorize(role, from, to).await?;

        if to.requires_uploads() {
            match self.slots.verify_requirements(instance.instance_id).await {
                Ok(()) => {}
                Err(JourneyError::Validation(ValidationError::RequirementMissing { slot_key })) => {
                    return Err(TransitionError::RequirementsNotMet { reason: slot_key }.into());
                }
                Err(e) => return Err(e),
            }
        }

        match self
            .store
            .update_instance_state_cas(instance.instance_id, from, to)
            .await?
        {
            CasOutcome::Applied => {}
            CasOutcome::Conflict => {
                tracing::info!(
                    instance_id = %instance.instance_id,
                    expected = %from,
                    "state transition lost CAS race"
                );
                return Err(TransitionError::CasConflict { expected: from }.into());
            }
        }

        tracing::info!(
            instance_id = %instance.instance_id,
            node_id = %instance.node_id,
            user_id = %instance.user_id,
            %from,
            %to,
            "node state changed"
        );

        if let Err(e) = self
            .store
            .upsert_journey_state(instance.user_id, &instance.node_id, to, instance.tenant_id)
            .await
        {
            tracing::error!(error = %e, node_id = %instance.node_id, "journey state mirror failed");
        }

        let payload = serde_json::json!({ "from": from, "to": to });
        if let Err(e) = self
            .store
            .log_event(instance.instance_id, NodeEventKind::StateChanged, actor_id, payload)
            .await
        {
            tracing::error!(error = %e, instance_id = %instance.instance_id, "state_changed event failed");
        }

        self.notifications.notify(StateChangeNotice {
            user_id: instance.user_id,
            node_id: instance.node_id.clone(),
            from,
            to,
        });

        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_override_covers_completion_only() {
        assert!(student_may_complete("student", NodeState::Active, NodeState::Done));
        assert!(student_may_complete("student", NodeState::Submitted, NodeState::Done));
        assert!(!student_may_complete("student", NodeState::Waiting, NodeState::Done));
        assert!(!student_may_complete("student", NodeState::Active, NodeState::Submitted));
        assert!(!student_may_complete("advisor", NodeState::Active, NodeState::Done));
    }
}
