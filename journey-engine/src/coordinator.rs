//! Submission coordinator
//!
//! Orchestrates one user action on a node: ensure the instance, append a
//! form revision, run the node strategy, transition, then activate
//! successors when the node ends up `done`.

use crate::activation::ActivationEngine;
use crate::slots::SlotEngine;
use crate::strategies::{StrategyRegistry, SubmitContext};
use crate::transition::StateMachine;
use journey_core::{
    EntityType, FullSlot, JourneyError, JourneyResult, NewNodeInstance, NodeEventKind,
    NodeInstance, NodeOutcome, NodeState, PlaybookManager, PlaybookVersionId, StorageError,
    TenantId, UserId,
};
use journey_storage::JourneyStore;
use serde::Serialize;
use std::sync::Arc;

/// Latest stored form of an instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct FormView {
    pub rev: u32,
    #[cfg_attr(feature = "openapi", schema(value_type = Object))]
    pub data: serde_json::Value,
}

/// Read model returned by `get_submission`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SubmissionView {
    pub node_id: String,
    pub playbook_version_id: PlaybookVersionId,
    pub state: NodeState,
    /// Instance locale, empty when never set.
    pub locale: String,
    pub slots: Vec<FullSlot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form: Option<FormView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outcomes: Vec<NodeOutcome>,
}

/// A submission request for one node.
#[derive(Debug, Clone, Default)]
pub struct SubmissionRequest {
    pub role: String,
    pub locale: Option<String>,
    /// Target state; `None` keeps the current one.
    pub state: Option<NodeState>,
    /// Form bytes; empty means no new revision.
    pub form: Vec<u8>,
}

#[derive(Clone)]
pub struct SubmissionCoordinator {
    store: Arc<dyn JourneyStore>,
    playbook: Arc<PlaybookManager>,
    slots: SlotEngine,
    machine: StateMachine,
    activation: ActivationEngine,
    strategies: Arc<StrategyRegistry>,
}

impl SubmissionCoordinator {
    pub fn new(
        store: Arc<dyn JourneyStore>,
        playbook: Arc<PlaybookManager>,
        slots: SlotEngine,
        machine: StateMachine,
        activation: ActivationEngine,
        strategies: Arc<StrategyRegistry>,
    ) -> Self {
        Self {
            store,
            playbook,
            slots,
            machine,
            activation,
            strategies,
        }
    }

    /// Load the `(user, node)` instance, creating it in `active` on first touch.
    ///
    /// Slots are synchronized with the playbook on every call.
    pub async fn ensure_node_instance(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
        locale: Option<&str>,
    ) -> JourneyResult<NodeInstance> {
        let def = self.playbook.require_node(node_id)?;

        if let Some(existing) = self.store.get_instance(user_id, node_id).await? {
            self.slots
                .ensure_slots(existing.instance_id, existing.tenant_id, node_id)
                .await?;
            return Ok(existing);
        }

        let created = self
            .store
            .create_instance(NewNodeInstance {
                tenant_id,
                user_id,
                playbook_version_id: self.playbook.version_id(),
                node_id: def.id.clone(),
                state: NodeState::Active,
                locale: locale.map(str::to_string),
            })
            .await;

        let instance_id = match created {
            Ok(id) => id,
            Err(JourneyError::Storage(StorageError::AlreadyExists {
                entity_type: EntityType::NodeInstance,
                ..
            })) => {
                // Lost a creation race; the winner logged `opened`.
                let existing = self
                    .store
                    .get_instance(user_id, node_id)
                    .await?
                    .ok_or_else(|| JourneyError::backend(format!("instance for {} vanished", node_id)))?;
                self.slots
                    .ensure_slots(existing.instance_id, existing.tenant_id, node_id)
                    .await?;
                return Ok(existing);
            }
            Err(e) => return Err(e),
        };

        tracing::info!(%user_id, node_id, %instance_id, "node instance opened");

        if let Err(e) = self
            .store
            .log_event(
                instance_id,
                NodeEventKind::Opened,
                user_id,
                serde_json::json!({ "locale": locale }),
            )
            .await
        {
            tracing::warn!(error = %e, %instance_id, "opened event failed");
        }
        if let Err(e) = self
            .store
            .upsert_journey_state(user_id, node_id, NodeState::Active, tenant_id)
            .await
        {
            tracing::warn!(error = %e, %user_id, node_id, "journey state mirror failed");
        }

        self.slots.ensure_slots(instance_id, tenant_id, node_id).await?;

        self.store
            .get_instance_by_id(instance_id)
            .await?
            .ok_or_else(|| JourneyError::backend(format!("instance {} vanished", instance_id)))
    }

    /// Store a form revision and optionally transition the node.
    ///
    /// Returns the instance as it is after the submission.
    pub async fn put_submission(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
        request: SubmissionRequest,
    ) -> JourneyResult<NodeInstance> {
        self.playbook.require_node(node_id)?;
        let strategy = self.strategies.get(node_id).cloned();

        let payload = match (&strategy, request.form.is_empty()) {
            (Some(strategy), false) => strategy.prepare_payload(request.form)?,
            _ => request.form,
        };

        let instance = self
            .ensure_node_instance(tenant_id, user_id, node_id, request.locale.as_deref())
            .await?;

        if !payload.is_empty() {
            let rev = self
                .store
                .commit_form_revision(
                    instance.instance_id,
                    payload.clone(),
                    user_id,
                    request.locale.clone(),
                )
                .await?;
            tracing::debug!(instance_id = %instance.instance_id, rev, "form revision stored");

            if let Some(strategy) = &strategy {
                let ctx = SubmitContext {
                    store: self.store.as_ref(),
                    tenant_id,
                    user_id,
                    payload: &payload,
                };
                if let Err(e) = strategy.after_submit(&ctx).await {
                    tracing::warn!(error = %e, %user_id, node_id, "post-submit side effect failed");
                }
            }
        }

        self.apply_state(tenant_id, user_id, &request.role, instance, request.state)
            .await
    }

    /// Transition a node without touching its form.
    pub async fn patch_state(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        role: &str,
        node_id: &str,
        state: Option<NodeState>,
    ) -> JourneyResult<NodeInstance> {
        let instance = self
            .ensure_node_instance(tenant_id, user_id, node_id, None)
            .await?;
        self.apply_state(tenant_id, user_id, role, instance, state).await
    }

    async fn apply_state(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        role: &str,
        instance: NodeInstance,
        requested: Option<NodeState>,
    ) -> JourneyResult<NodeInstance> {
        if let Some(to) = requested.filter(|to| *to != instance.state) {
            self.machine.transition(&instance, user_id, role, to).await?;
        }

        let current = self
            .store
            .get_instance_by_id(instance.instance_id)
            .await?
            .ok_or_else(|| JourneyError::backend(format!("instance {} vanished", instance.instance_id)))?;

        if requested.is_some() && current.state == NodeState::Done {
            let activated = self
                .activation
                .activate_next(current.user_id, &current.node_id, tenant_id)
                .await;
            if !activated.is_empty() {
                tracing::debug!(node_id = %current.node_id, count = activated.len(), "successors activated");
            }
        }
        Ok(current)
    }

    /// Read model of a node, materializing the instance if needed.
    pub async fn get_submission(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
        locale: Option<&str>,
    ) -> JourneyResult<SubmissionView> {
        let instance = self
            .ensure_node_instance(tenant_id, user_id, node_id, locale)
            .await?;

        let slots = self.store.get_full_slots(instance.instance_id).await?;
        let outcomes = self.store.get_outcomes(instance.instance_id).await?;

        let form = if instance.current_rev > 0 {
            match self
                .store
                .get_form_revision(instance.instance_id, instance.current_rev)
                .await
            {
                Ok(Some(revision)) => Some(FormView {
                    rev: instance.current_rev,
                    data: self.project_form(node_id, &revision.payload),
                }),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, instance_id = %instance.instance_id, "form revision read failed");
                    None
                }
            }
        } else {
            None
        };

        Ok(SubmissionView {
            node_id: instance.node_id,
            playbook_version_id: instance.playbook_version_id,
            state: instance.state,
            locale: instance.locale.unwrap_or_default(),
            slots,
            form,
            outcomes,
        })
    }

    fn project_form(&self, node_id: &str, payload: &[u8]) -> serde_json::Value {
        if let Some(view) = self
            .strategies
            .get(node_id)
            .and_then(|s| s.project_form(payload))
        {
            return view;
        }
        serde_json::from_slice(payload)
            .unwrap_or_else(|_| serde_json::Value::String(String::from_utf8_lossy(payload).into_owned()))
    }
}
