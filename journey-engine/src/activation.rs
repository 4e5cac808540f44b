//! Forward activation of successor nodes.
//!
//! After a node reaches `done`, each of its `next` nodes whose prerequisites
//! are all `done` is materialized as `active` (or promoted from a `locked`
//! placeholder). Activation goes one hop per completion and is best-effort:
//! a failure on one successor is logged and the others still proceed.

use crate::slots::SlotEngine;
use journey_core::{
    EntityType, JourneyError, JourneyResult, NewNodeInstance, NodeEventKind, NodeState,
    PlaybookManager, StorageError, TenantId, UserId,
};
use journey_storage::{CasOutcome, JourneyStore};
use std::sync::Arc;

/// What happened to one successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// A new instance was created in `active`.
    Created,
    /// A `locked` placeholder was promoted to `active`.
    Promoted,
}

#[derive(Clone)]
pub struct ActivationEngine {
    store: Arc<dyn JourneyStore>,
    playbook: Arc<PlaybookManager>,
    slots: SlotEngine,
}

impl ActivationEngine {
    pub fn new(store: Arc<dyn JourneyStore>, playbook: Arc<PlaybookManager>, slots: SlotEngine) -> Self {
        Self {
            store,
            playbook,
            slots,
        }
    }

    /// True iff every prerequisite of `node_id` has an instance in `done`.
    pub async fn can_activate(&self, user_id: UserId, node_id: &str) -> JourneyResult<bool> {
        let def = self.playbook.require_node(node_id)?;
        for prerequisite in &def.prerequisites {
            match self.store.get_instance(user_id, prerequisite).await? {
                Some(inst) if inst.state == NodeState::Done => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Activate the successors of `completed_node_id`.
    ///
    /// Returns the successors that changed, in playbook order.
    pub async fn activate_next(
        &self,
        user_id: UserId,
        completed_node_id: &str,
        tenant_id: TenantId,
    ) -> Vec<(String, Activation)> {
        let Some(def) = self.playbook.node_definition(completed_node_id) else {
            return Vec::new();
        };

        let mut activated = Vec::new();
        for successor in &def.next {
            match self
                .activate_one(user_id, successor, completed_node_id, tenant_id)
                .await
            {
                Ok(Some(kind)) => activated.push((successor.clone(), kind)),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        user_id = %user_id,
                        node_id = %successor,
                        source = %completed_node_id,
                        "successor activation failed"
                    );
                }
            }
        }
        activated
    }

    async fn activate_one(
        &self,
        user_id: UserId,
        node_id: &str,
        source: &str,
        tenant_id: TenantId,
    ) -> JourneyResult<Option<Activation>> {
        if !self.can_activate(user_id, node_id).await? {
            tracing::debug!(%user_id, node_id, "prerequisites not yet met");
            return Ok(None);
        }

        match self.store.get_instance(user_id, node_id).await? {
            Some(inst) if inst.state == NodeState::Locked => {
                let outcome = self
                    .store
                    .update_instance_state_cas(inst.instance_id, NodeState::Locked, NodeState::Active)
                    .await?;
                if outcome == CasOutcome::Conflict {
                    return Ok(None);
                }
                self.store
                    .upsert_journey_state(user_id, node_id, NodeState::Active, tenant_id)
                    .await?;
                tracing::info!(%user_id, node_id, "locked node promoted");
                Ok(Some(Activation::Promoted))
            }
            Some(_) => Ok(None),
            None => {
                let created = self
                    .store
                    .create_instance(NewNodeInstance {
                        tenant_id,
                        user_id,
                        playbook_version_id: self.playbook.version_id(),
                        node_id: node_id.to_string(),
                        state: NodeState::Active,
                        locale: None,
                    })
                    .await;
                let instance_id = match created {
                    Ok(id) => id,
                    // Materialized concurrently by the user or another completion.
                    Err(JourneyError::Storage(StorageError::AlreadyExists {
                        entity_type: EntityType::NodeInstance,
                        ..
                    })) => return Ok(None),
                    Err(e) => return Err(e),
                };

                self.store
                    .upsert_journey_state(user_id, node_id, NodeState::Active, tenant_id)
                    .await?;
                self.store
                    .log_event(
                        instance_id,
                        NodeEventKind::NodeActivated,
                        user_id,
                        serde_json::json!({ "reason": "prerequisites_met", "source": source }),
                    )
                    .await?;
                self.slots.ensure_slots(instance_id, tenant_id, node_id).await?;

                tracing::info!(%user_id, node_id, %instance_id, source, "node activated");
                Ok(Some(Activation::Created))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_core::EntityIdType;
    use journey_storage::InMemoryJourneyStore;

    const PLAYBOOK: &str = r#"{"worlds":[{"id":"W1","nodes":[
        {"id":"A","next":["C"]},
        {"id":"B","next":["C"]},
        {"id":"C","prerequisites":["A","B"],"next":["D"],
         "requirements":{"uploads":[{"key":"pdf","required":true}]}},
        {"id":"D","prerequisites":["C"]}
    ]}]}"#;

    fn engine() -> (ActivationEngine, Arc<InMemoryJourneyStore>, Arc<PlaybookManager>) {
        let store = Arc::new(InMemoryJourneyStore::new());
        let playbook = Arc::new(PlaybookManager::from_bytes(PLAYBOOK.as_bytes()).unwrap());
        let slots = SlotEngine::new(store.clone(), playbook.clone());
        (
            ActivationEngine::new(store.clone(), playbook.clone(), slots),
            store,
            playbook,
        )
    }

    async fn done(store: &InMemoryJourneyStore, pb: &PlaybookManager, t: TenantId, u: UserId, node: &str) {
        store
            .create_instance(NewNodeInstance {
                tenant_id: t,
                user_id: u,
                playbook_version_id: pb.version_id(),
                node_id: node.to_string(),
                state: NodeState::Done,
                locale: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_waits_for_every_prerequisite() {
        let (engine, store, pb) = engine();
        let (tenant, user) = (TenantId::now_v7(), UserId::now_v7());

        done(&store, &pb, tenant, user, "A").await;
        assert!(engine.activate_next(user, "A", tenant).await.is_empty());
        assert!(store.get_instance(user, "C").await.unwrap().is_none());

        done(&store, &pb, tenant, user, "B").await;
        let activated = engine.activate_next(user, "B", tenant).await;
        assert_eq!(activated, vec![("C".to_string(), Activation::Created)]);

        let c = store.get_instance(user, "C").await.unwrap().unwrap();
        assert_eq!(c.state, NodeState::Active);
        assert!(store.get_slot(c.instance_id, "pdf").await.unwrap().is_some());
        let events = store.list_events(c.instance_id).await.unwrap();
        assert_eq!(events[0].kind, NodeEventKind::NodeActivated);
        assert_eq!(events[0].payload["source"], "B");
        let mirror = store.get_journey_state(user, tenant).await.unwrap();
        assert_eq!(mirror.get("C"), Some(&NodeState::Active));

        // One hop only: D is not touched.
        assert!(store.get_instance(user, "D").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_promotes_locked_placeholder() {
        let (engine, store, pb) = engine();
        let (tenant, user) = (TenantId::now_v7(), UserId::now_v7());
        done(&store, &pb, tenant, user, "C").await;
        store
            .create_instance(NewNodeInstance {
                tenant_id: tenant,
                user_id: user,
                playbook_version_id: pb.version_id(),
                node_id: "D".to_string(),
                state: NodeState::Locked,
                locale: None,
            })
            .await
            .unwrap();

        let activated = engine.activate_next(user, "C", tenant).await;
        assert_eq!(activated, vec![("D".to_string(), Activation::Promoted)]);
        let d = store.get_instance(user, "D").await.unwrap().unwrap();
        assert_eq!(d.state, NodeState::Active);
    }

    #[tokio::test]
    async fn test_leaves_progressed_successor_untouched() {
        let (engine, store, pb) = engine();
        let (tenant, user) = (TenantId::now_v7(), UserId::now_v7());
        done(&store, &pb, tenant, user, "C").await;
        done(&store, &pb, tenant, user, "D").await;

        assert!(engine.activate_next(user, "C", tenant).await.is_empty());
        let d = store.get_instance(user, "D").await.unwrap().unwrap();
        assert_eq!(d.state, NodeState::Done);
    }

    #[tokio::test]
    async fn test_unknown_node_cannot_activate() {
        let (engine, _, _) = engine();
        assert!(engine.can_activate(UserId::now_v7(), "Z").await.is_err());
        assert!(engine
            .activate_next(UserId::now_v7(), "Z", TenantId::now_v7())
            .await
            .is_empty());
    }
}
