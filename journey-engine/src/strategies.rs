//! Per-node submission strategies
//!
//! A few nodes carry behaviour beyond storing form bytes. Each of those is a
//! [`NodeStrategy`] registered under its node id; nodes without a strategy
//! go through the coordinator unchanged.

use crate::publications::{self, PublicationsForm};
use async_trait::async_trait;
use journey_core::{
    JourneyResult, ProfileFields, TenantId, UserId, PROFILE_NODE_ID, PUBLICATIONS_NODE_ID,
};
use journey_storage::JourneyStore;
use std::collections::HashMap;
use std::sync::Arc;

/// Profile form fields mirrored onto the user record.
pub const PROFILE_SYNC_FIELDS: [&str; 4] = ["program", "specialty", "department", "cohort"];

/// Context handed to [`NodeStrategy::after_submit`].
pub struct SubmitContext<'a> {
    pub store: &'a dyn JourneyStore,
    pub tenant_id: TenantId,
    pub user_id: UserId,
    /// Payload as stored, after `prepare_payload`.
    pub payload: &'a [u8],
}

/// Node-specific hooks around submission and read-back.
#[async_trait]
pub trait NodeStrategy: Send + Sync {
    fn node_id(&self) -> &str;

    /// Rewrite or reject a payload before anything is written.
    fn prepare_payload(&self, payload: Vec<u8>) -> JourneyResult<Vec<u8>> {
        Ok(payload)
    }

    /// Client-visible form data for a stored payload. `None` keeps the
    /// default projection.
    fn project_form(&self, _payload: &[u8]) -> Option<serde_json::Value> {
        None
    }

    /// Side effect after the revision is stored. Errors are logged by the
    /// caller and do not fail the submission.
    async fn after_submit(&self, _ctx: &SubmitContext<'_>) -> JourneyResult<()> {
        Ok(())
    }
}

// ============================================================================
// PUBLICATIONS
// ============================================================================

/// Normalizes and validates the publications list, and reshapes it on read.
#[derive(Debug, Default)]
pub struct PublicationsStrategy;

#[async_trait]
impl NodeStrategy for PublicationsStrategy {
    fn node_id(&self) -> &str {
        PUBLICATIONS_NODE_ID
    }

    fn prepare_payload(&self, payload: Vec<u8>) -> JourneyResult<Vec<u8>> {
        publications::normalize_payload(&payload)
    }

    fn project_form(&self, payload: &[u8]) -> Option<serde_json::Value> {
        match PublicationsForm::parse(payload) {
            Ok(form) => Some(form.client_view()),
            Err(e) => {
                tracing::debug!(error = %e, "stored publications form not parseable, returning raw");
                None
            }
        }
    }
}

// ============================================================================
// PROFILE SYNC
// ============================================================================

/// Copies selected profile form fields onto the user record.
#[derive(Debug, Default)]
pub struct ProfileSyncStrategy;

impl ProfileSyncStrategy {
    /// Pick the synced fields out of a profile payload. Non-object or
    /// non-JSON payloads yield nothing.
    pub fn extract_fields(payload: &[u8]) -> ProfileFields {
        let Ok(serde_json::Value::Object(form)) = serde_json::from_slice(payload) else {
            return ProfileFields::new();
        };
        PROFILE_SYNC_FIELDS
            .iter()
            .filter_map(|&key| form.get(key).map(|v| (key.to_string(), v.clone())))
            .collect()
    }
}

#[async_trait]
impl NodeStrategy for ProfileSyncStrategy {
    fn node_id(&self) -> &str {
        PROFILE_NODE_ID
    }

    async fn after_submit(&self, ctx: &SubmitContext<'_>) -> JourneyResult<()> {
        let fields = Self::extract_fields(ctx.payload);
        if fields.is_empty() {
            return Ok(());
        }
        ctx.store
            .sync_profile_to_users(ctx.user_id, ctx.tenant_id, fields)
            .await
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Strategies keyed by node id.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn NodeStrategy>>,
}

impl StrategyRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the publications and profile strategies.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PublicationsStrategy));
        registry.register(Arc::new(ProfileSyncStrategy));
        registry
    }

    /// Add a strategy, replacing any previous one for the same node.
    pub fn register(&mut self, strategy: Arc<dyn NodeStrategy>) {
        self.strategies
            .insert(strategy.node_id().to_string(), strategy);
    }

    pub fn get(&self, node_id: &str) -> Option<&Arc<dyn NodeStrategy>> {
        self.strategies.get(node_id)
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut nodes: Vec<&str> = self.strategies.keys().map(String::as_str).collect();
        nodes.sort_unstable();
        f.debug_struct("StrategyRegistry").field("nodes", &nodes).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use journey_core::{EntityIdType, UserSummary};
    use journey_storage::InMemoryJourneyStore;

    #[test]
    fn test_defaults_cover_both_special_nodes() {
        let registry = StrategyRegistry::with_defaults();
        assert_eq!(registry.len(), 2);
        assert!(registry.get(PUBLICATIONS_NODE_ID).is_some());
        assert!(registry.get(PROFILE_NODE_ID).is_some());
        assert!(registry.get("N1").is_none());
    }

    #[test]
    fn test_extract_profile_fields() {
        let fields = ProfileSyncStrategy::extract_fields(
            br#"{"program":"PhD CS","cohort":"2024","phone":"123"}"#,
        );
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["program"], "PhD CS");
        assert!(fields.get("phone").is_none());

        assert!(ProfileSyncStrategy::extract_fields(b"[]").is_empty());
        assert!(ProfileSyncStrategy::extract_fields(b"plain text").is_empty());
    }

    #[test]
    fn test_publications_projection_falls_back_on_garbage() {
        let strategy = PublicationsStrategy;
        assert!(strategy.project_form(b"not json").is_none());
        let view = strategy.project_form(br#"{"ip":[{"title":"P"}]}"#).unwrap();
        assert_eq!(view["summary"]["ip"], 1);
    }

    #[tokio::test]
    async fn test_profile_sync_writes_user_record() {
        let store = InMemoryJourneyStore::new();
        let (tenant, user) = (TenantId::now_v7(), UserId::now_v7());
        store.insert_user(tenant, UserSummary::unknown(user)).unwrap();

        let payload = br#"{"department":"Physics","name":"ignored"}"#;
        ProfileSyncStrategy
            .after_submit(&SubmitContext {
                store: &store,
                tenant_id: tenant,
                user_id: user,
                payload,
            })
            .await
            .unwrap();

        let fields = store.profile_fields(user).unwrap().unwrap();
        assert_eq!(fields["department"], "Physics");
        assert!(fields.get("name").is_none());
    }

    #[tokio::test]
    async fn test_profile_sync_skips_empty_projection() {
        let store = InMemoryJourneyStore::new();
        // No user record: a write would fail with NotFound.
        ProfileSyncStrategy
            .after_submit(&SubmitContext {
                store: &store,
                tenant_id: TenantId::now_v7(),
                user_id: UserId::now_v7(),
                payload: br#"{"phone":"1"}"#,
            })
            .await
            .unwrap();
    }
}
