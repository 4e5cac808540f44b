//! Journey service facade
//!
//! [`JourneyService`] is the surface an outer layer (HTTP handlers, jobs)
//! talks to. It wires the engine components together over one store and
//! one playbook, parses string states, guards the platform tenant and runs
//! every operation under the configured deadline.

use crate::activation::ActivationEngine;
use crate::coordinator::{SubmissionCoordinator, SubmissionRequest, SubmissionView};
use crate::notify::{NotificationDispatcher, NotificationSnapshot};
use crate::scoreboard::{self, Scoreboard};
use crate::slots::SlotEngine;
use crate::strategies::{NodeStrategy, StrategyRegistry};
use crate::transition::StateMachine;
use crate::uploads::{AttachRequest, PresignedUpload, UploadService};
use journey_core::{
    AttachmentId, BlobStore, ConfigError, DocumentService, JourneyConfig, JourneyError,
    JourneyResult, NodeEvent, NodeInstance, NodeState, Notifier, PlaybookManager, TenantId,
    UserId, ValidationError, PLATFORM_TENANT_ID,
};
use journey_storage::JourneyStore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Parse a client-supplied state. An empty string means "no change".
pub fn parse_requested_state(value: &str) -> JourneyResult<Option<NodeState>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<NodeState>()
        .map(Some)
        .map_err(|_| {
            ValidationError::InvalidState {
                value: value.to_string(),
            }
            .into()
        })
}

fn guard_tenant(tenant_id: TenantId) -> JourneyResult<()> {
    if tenant_id == PLATFORM_TENANT_ID {
        return Err(ValidationError::ReservedTenant {
            tenant_id: tenant_id.to_string(),
        }
        .into());
    }
    Ok(())
}

// ============================================================================
// BUILDER
// ============================================================================

/// Builder for [`JourneyService`].
pub struct JourneyServiceBuilder {
    store: Arc<dyn JourneyStore>,
    playbook: Arc<PlaybookManager>,
    config: JourneyConfig,
    blob: Option<Arc<dyn BlobStore>>,
    documents: Option<Arc<dyn DocumentService>>,
    notifier: Option<Arc<dyn Notifier>>,
    strategies: StrategyRegistry,
}

impl JourneyServiceBuilder {
    pub fn config(mut self, config: JourneyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn blob_store(mut self, blob: Arc<dyn BlobStore>) -> Self {
        self.blob = Some(blob);
        self
    }

    pub fn document_service(mut self, documents: Arc<dyn DocumentService>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Register an extra node strategy on top of the built-in ones.
    pub fn strategy(mut self, strategy: Arc<dyn NodeStrategy>) -> Self {
        self.strategies.register(strategy);
        self
    }

    /// Validate the configuration and wire the components.
    ///
    /// With a notifier configured this spawns the notification worker, so
    /// it must run inside a tokio runtime.
    pub fn build(self) -> JourneyResult<JourneyService> {
        self.config.validate()?;

        let notifications = match self.notifier {
            Some(notifier) => {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(ConfigError::InvalidValue {
                        field: "notifier".to_string(),
                        value: "set".to_string(),
                        reason: "notification worker requires a tokio runtime".to_string(),
                    }
                    .into());
                }
                let (dispatcher, _worker) = NotificationDispatcher::spawn(
                    notifier,
                    self.store.clone(),
                    self.config.notification_queue_capacity,
                    self.config.notification_recipient.clone(),
                );
                dispatcher
            }
            None => NotificationDispatcher::disabled(),
        };

        let slots = SlotEngine::new(self.store.clone(), self.playbook.clone());
        let machine = StateMachine::new(self.store.clone(), slots.clone(), notifications.clone());
        let activation = ActivationEngine::new(self.store.clone(), self.playbook.clone(), slots.clone());
        let coordinator = SubmissionCoordinator::new(
            self.store.clone(),
            self.playbook.clone(),
            slots.clone(),
            machine,
            activation,
            Arc::new(self.strategies),
        );
        let uploads = UploadService::new(
            self.store.clone(),
            self.playbook.clone(),
            slots,
            coordinator.clone(),
            self.blob,
            self.documents,
            self.config.clone(),
        );

        tracing::info!(
            playbook_version = %self.playbook.version_id(),
            notifications = notifications.is_enabled(),
            "journey service ready"
        );

        Ok(JourneyService {
            store: self.store,
            playbook: self.playbook,
            config: self.config,
            coordinator,
            uploads,
            notifications,
        })
    }
}

// ============================================================================
// SERVICE
// ============================================================================

#[derive(Clone)]
pub struct JourneyService {
    store: Arc<dyn JourneyStore>,
    playbook: Arc<PlaybookManager>,
    config: JourneyConfig,
    coordinator: SubmissionCoordinator,
    uploads: UploadService,
    notifications: NotificationDispatcher,
}

impl JourneyService {
    /// Start building a service with the default config, the built-in node
    /// strategies and no external capabilities.
    pub fn builder(store: Arc<dyn JourneyStore>, playbook: Arc<PlaybookManager>) -> JourneyServiceBuilder {
        JourneyServiceBuilder {
            store,
            playbook,
            config: JourneyConfig::default(),
            blob: None,
            documents: None,
            notifier: None,
            strategies: StrategyRegistry::with_defaults(),
        }
    }

    pub fn playbook(&self) -> &PlaybookManager {
        &self.playbook
    }

    pub fn config(&self) -> &JourneyConfig {
        &self.config
    }

    pub fn notification_metrics(&self) -> NotificationSnapshot {
        self.notifications.metrics()
    }

    async fn with_deadline<T, F>(&self, operation: &str, fut: F) -> JourneyResult<T>
    where
        F: Future<Output = JourneyResult<T>>,
    {
        match tokio::time::timeout(self.config.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout = ?self.config.operation_timeout, "operation deadline exceeded");
                Err(JourneyError::Cancelled {
                    operation: operation.to_string(),
                })
            }
        }
    }

    /// Node states of a user in a tenant.
    #[tracing::instrument(skip(self))]
    pub async fn get_state(
        &self,
        user_id: UserId,
        tenant_id: TenantId,
    ) -> JourneyResult<HashMap<String, NodeState>> {
        self.with_deadline("get_state", self.store.get_journey_state(user_id, tenant_id))
            .await
    }

    /// Raw journey state write for administration. No gating, no events.
    #[tracing::instrument(skip(self))]
    pub async fn set_state(
        &self,
        user_id: UserId,
        node_id: &str,
        state: &str,
        tenant_id: TenantId,
    ) -> JourneyResult<()> {
        guard_tenant(tenant_id)?;
        let state = parse_requested_state(state)?.ok_or_else(|| ValidationError::InvalidState {
            value: state.to_string(),
        })?;
        self.with_deadline(
            "set_state",
            self.store.upsert_journey_state(user_id, node_id, state, tenant_id),
        )
        .await
    }

    /// Clear a user's journey in a tenant, keeping the profile node.
    #[tracing::instrument(skip(self))]
    pub async fn reset(&self, user_id: UserId, tenant_id: TenantId) -> JourneyResult<()> {
        guard_tenant(tenant_id)?;
        self.with_deadline("reset", self.store.reset_journey(user_id, tenant_id))
            .await?;
        tracing::info!(%user_id, %tenant_id, "journey reset");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_submission(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
        locale: Option<&str>,
    ) -> JourneyResult<SubmissionView> {
        self.with_deadline(
            "get_submission",
            self.coordinator.get_submission(tenant_id, user_id, node_id, locale),
        )
        .await
    }

    /// Store a form revision and move the node to `state` (empty keeps it).
    #[tracing::instrument(skip(self, form), fields(form_len = form.len()))]
    #[allow(clippy::too_many_arguments)]
    pub async fn put_submission(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        role: &str,
        node_id: &str,
        locale: Option<&str>,
        state: &str,
        form: Vec<u8>,
    ) -> JourneyResult<NodeInstance> {
        let request = SubmissionRequest {
            role: role.to_string(),
            locale: locale.map(str::to_string),
            state: parse_requested_state(state)?,
            form,
        };
        self.with_deadline(
            "put_submission",
            self.coordinator.put_submission(tenant_id, user_id, node_id, request),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn patch_state(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        role: &str,
        node_id: &str,
        state: &str,
    ) -> JourneyResult<NodeInstance> {
        let state = parse_requested_state(state)?;
        self.with_deadline(
            "patch_state",
            self.coordinator.patch_state(tenant_id, user_id, role, node_id, state),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn presign_upload(
        &self,
        user_id: UserId,
        node_id: &str,
        slot_key: &str,
        filename: &str,
        content_type: &str,
        size_bytes: u64,
    ) -> JourneyResult<PresignedUpload> {
        self.with_deadline(
            "presign_upload",
            self.uploads
                .presign_upload(user_id, node_id, slot_key, filename, content_type, size_bytes),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn presign_download(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
        slot_key: &str,
        attachment_id: AttachmentId,
    ) -> JourneyResult<String> {
        self.with_deadline(
            "presign_download",
            self.uploads
                .presign_download(tenant_id, user_id, node_id, slot_key, attachment_id),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    #[allow(clippy::too_many_arguments)]
    pub async fn attach_upload(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
        slot_key: &str,
        object_key: &str,
        filename: &str,
        size_bytes: u64,
    ) -> JourneyResult<AttachmentId> {
        let request = AttachRequest {
            slot_key: slot_key.to_string(),
            object_key: object_key.to_string(),
            filename: filename.to_string(),
            size_bytes,
        };
        self.with_deadline(
            "attach_upload",
            self.uploads.attach_upload(tenant_id, user_id, node_id, request),
        )
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn get_scoreboard(
        &self,
        tenant_id: TenantId,
        current_user: UserId,
    ) -> JourneyResult<Scoreboard> {
        self.with_deadline(
            "get_scoreboard",
            scoreboard::build_scoreboard(self.store.as_ref(), &self.playbook, tenant_id, current_user),
        )
        .await
    }

    /// Reviewer decision on a node. The instance must already exist.
    #[tracing::instrument(skip(self, note))]
    pub async fn record_outcome(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
        value: &str,
        decided_by: UserId,
        note: &str,
    ) -> JourneyResult<()> {
        self.with_deadline("record_outcome", async {
            let instance = self.existing_instance(tenant_id, user_id, node_id).await?;
            self.store
                .insert_outcome(instance.instance_id, value, decided_by, note)
                .await
        })
        .await
    }

    /// Audit trail of a node, oldest first. Empty when the node was never opened.
    #[tracing::instrument(skip(self))]
    pub async fn list_events(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
    ) -> JourneyResult<Vec<NodeEvent>> {
        self.with_deadline("list_events", async {
            self.playbook.require_node(node_id)?;
            match self.store.get_instance(user_id, node_id).await? {
                Some(instance) if instance.tenant_id == tenant_id => {
                    self.store.list_events(instance.instance_id).await
                }
                _ => Ok(Vec::new()),
            }
        })
        .await
    }

    async fn existing_instance(
        &self,
        tenant_id: TenantId,
        user_id: UserId,
        node_id: &str,
    ) -> JourneyResult<NodeInstance> {
        self.playbook.require_node(node_id)?;
        self.store
            .get_instance(user_id, node_id)
            .await?
            .filter(|i| i.tenant_id == tenant_id)
            .ok_or_else(|| {
                journey_core::StorageError::NotFound {
                    entity_type: journey_core::EntityType::NodeInstance,
                    key: format!("{}/{}", user_id, node_id),
                }
                .into()
            })
    }
}
