//! Journey Test Utilities
//!
//! Shared test infrastructure for the journey workspace:
//! - Mock blob store, document service and notifier
//! - Proptest generators
//! - Playbook fixtures for common scenarios
//! - Assertions on error kinds

pub use journey_storage::InMemoryJourneyStore;

pub use journey_core::{
    AttachmentId, BlobStore, CapabilityError, DocumentId, DocumentService, DocumentVersionId,
    EntityIdType, ErrorKind, JourneyError, JourneyResult, NewDocument, NewDocumentVersion,
    NodeState, Notifier, PlaybookManager, TenantId, UserId, UserSummary,
};

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn transport(capability: &str) -> JourneyError {
    JourneyError::Capability(CapabilityError::Transport {
        capability: capability.to_string(),
        reason: "mock failure".to_string(),
    })
}

// ============================================================================
// MOCK BLOB STORE
// ============================================================================

/// One presign call seen by [`MockBlobStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignCall {
    pub key: String,
    pub content_type: Option<String>,
    pub ttl: Duration,
}

/// In-memory blob store. A presigned PUT counts as an upload, so the key
/// exists afterwards.
#[derive(Debug, Clone, Default)]
pub struct MockBlobStore {
    objects: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<PresignCall>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_object(&self, key: impl Into<String>) {
        lock(&self.objects).insert(key.into());
    }

    pub fn remove_object(&self, key: &str) {
        lock(&self.objects).remove(key);
    }

    /// Make every call fail with a transport error.
    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn presign_calls(&self) -> Vec<PresignCall> {
        lock(&self.calls).clone()
    }

    fn check(&self) -> JourneyResult<()> {
        if *lock(&self.failing) {
            Err(transport("blob"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BlobStore for MockBlobStore {
    async fn presign_put(&self, key: &str, content_type: &str, ttl: Duration) -> JourneyResult<String> {
        self.check()?;
        lock(&self.calls).push(PresignCall {
            key: key.to_string(),
            content_type: Some(content_type.to_string()),
            ttl,
        });
        lock(&self.objects).insert(key.to_string());
        Ok(format!("https://{}.blob.test/{}?op=put&ttl={}", self.bucket(), key, ttl.as_secs()))
    }

    async fn presign_get(&self, key: &str, ttl: Duration) -> JourneyResult<String> {
        self.check()?;
        lock(&self.calls).push(PresignCall {
            key: key.to_string(),
            content_type: None,
            ttl,
        });
        Ok(format!("https://{}.blob.test/{}?op=get&ttl={}", self.bucket(), key, ttl.as_secs()))
    }

    async fn object_exists(&self, key: &str) -> JourneyResult<bool> {
        self.check()?;
        Ok(lock(&self.objects).contains(key))
    }

    fn bucket(&self) -> String {
        "journey-test".to_string()
    }
}

// ============================================================================
// MOCK DOCUMENT SERVICE
// ============================================================================

/// Document version minted by [`MockDocumentService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedVersion {
    pub document_id: DocumentId,
    pub version_id: DocumentVersionId,
    pub storage_path: String,
    pub mime: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MockDocumentService {
    documents: Arc<Mutex<Vec<(DocumentId, NewDocument)>>>,
    versions: Arc<Mutex<Vec<RecordedVersion>>>,
    failing: Arc<Mutex<bool>>,
}

impl MockDocumentService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        *lock(&self.failing) = failing;
    }

    pub fn documents(&self) -> Vec<NewDocument> {
        lock(&self.documents).iter().map(|(_, d)| d.clone()).collect()
    }

    pub fn versions(&self) -> Vec<RecordedVersion> {
        lock(&self.versions).clone()
    }
}

#[async_trait]
impl DocumentService for MockDocumentService {
    async fn create_document_metadata(&self, doc: NewDocument) -> JourneyResult<DocumentId> {
        if *lock(&self.failing) {
            return Err(transport("documents"));
        }
        let id = DocumentId::now_v7();
        lock(&self.documents).push((id, doc));
        Ok(id)
    }

    async fn create_document_version(
        &self,
        document_id: DocumentId,
        _tenant_id: TenantId,
        _user_id: UserId,
        version: NewDocumentVersion,
    ) -> JourneyResult<DocumentVersionId> {
        if *lock(&self.failing) {
            return Err(transport("documents"));
        }
        let version_id = DocumentVersionId::now_v7();
        lock(&self.versions).push(RecordedVersion {
            document_id,
            version_id,
            storage_path: version.storage_path,
            mime: version.mime,
            size_bytes: version.size_bytes,
        });
        Ok(version_id)
    }
}

// ============================================================================
// RECORDING NOTIFIER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Notifier that records every email. Optionally fails every send.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentEmail>>>,
    attempts: Arc<Mutex<usize>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let notifier = Self::default();
        *lock(&notifier.failing) = true;
        notifier
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        lock(&self.sent).clone()
    }

    pub fn attempts(&self) -> usize {
        *lock(&self.attempts)
    }

    /// Poll until at least `count` send attempts happened or `timeout` elapses.
    pub async fn wait_for_attempts(&self, count: usize, timeout: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let seen = self.attempts();
            if seen >= count || tokio::time::Instant::now() >= deadline {
                return seen;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_notification_email(&self, to: &str, subject: &str, body: &str) -> JourneyResult<()> {
        *lock(&self.attempts) += 1;
        if *lock(&self.failing) {
            return Err(transport("mail"));
        }
        lock(&self.sent).push(SentEmail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for journey types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<u128>().prop_map(Uuid::from_u128)
    }

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        arb_uuid().prop_map(UserId::new)
    }

    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        // Never the reserved platform tenant.
        (1u128..).prop_map(|n| TenantId::new(Uuid::from_u128(n)))
    }

    pub fn arb_node_state() -> impl Strategy<Value = NodeState> {
        prop::sample::select(NodeState::ALL.to_vec())
    }

    /// Playbook JSON of a linear chain `N0 -> N1 -> ...` in one world.
    pub fn arb_linear_playbook(max_len: usize) -> impl Strategy<Value = String> {
        (1..=max_len.max(1)).prop_map(|len| fixtures::linear_playbook_json(len, "W1"))
    }

    /// Upload slot keys, unique and sorted.
    pub fn arb_slot_keys() -> impl Strategy<Value = Vec<String>> {
        prop::collection::btree_set("[a-z]{1,8}", 1..6).prop_map(|keys| keys.into_iter().collect())
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built playbooks, users and policies.

    use super::*;

    /// `N1 -> N2`, N1 requiring a PDF upload under `pdf`.
    pub const HAPPY_PATH_PLAYBOOK: &str = r#"{
        "playbook_id": "test",
        "version": "1",
        "locale_default": "ru",
        "worlds": [{"id": "W1", "nodes": [
            {"id": "N1", "title": {"en": "First"}, "type": "form", "next": ["N2"],
             "requirements": {"uploads": [
                {"key": "pdf", "mime": ["application/pdf"], "required": true}
             ]}},
            {"id": "N2", "prerequisites": ["N1"]}
        ]}]
    }"#;

    /// One node in each of W1, W2 and the zero-score W3.
    pub const SCORING_PLAYBOOK: &str = r#"{"worlds": [
        {"id": "W1", "nodes": [{"id": "N1"}]},
        {"id": "W2", "nodes": [{"id": "N2"}]},
        {"id": "W3", "nodes": [{"id": "N3"}]}
    ]}"#;

    pub fn playbook(json: &str) -> Arc<PlaybookManager> {
        Arc::new(PlaybookManager::from_bytes(json.as_bytes()).expect("fixture playbook is valid"))
    }

    pub fn linear_playbook_json(len: usize, world: &str) -> String {
        let nodes: Vec<serde_json::Value> = (0..len)
            .map(|i| {
                let next: Vec<String> = if i + 1 < len { vec![format!("N{}", i + 1)] } else { vec![] };
                let prerequisites: Vec<String> = if i > 0 { vec![format!("N{}", i - 1)] } else { vec![] };
                serde_json::json!({"id": format!("N{}", i), "next": next, "prerequisites": prerequisites})
            })
            .collect();
        serde_json::json!({"worlds": [{"id": world, "nodes": nodes}]}).to_string()
    }

    pub fn user(first: &str, last: &str, email: &str) -> UserSummary {
        UserSummary {
            user_id: UserId::now_v7(),
            email: email.to_string(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            avatar_url: None,
        }
    }

    /// Policy rows used across the seed scenarios: advisors move nodes
    /// into `waiting` and `needs_fixes`, students submit.
    pub fn seed_policy(store: &InMemoryJourneyStore) {
        let rows: [(NodeState, NodeState, &[&str]); 4] = [
            (NodeState::Active, NodeState::Waiting, &["advisor"]),
            (NodeState::Active, NodeState::Submitted, &["student"]),
            (NodeState::Submitted, NodeState::NeedsFixes, &["advisor"]),
            (NodeState::NeedsFixes, NodeState::Active, &["student", "advisor"]),
        ];
        for (from, to, roles) in rows {
            store
                .set_transition_roles(from, to, roles)
                .expect("fresh store lock is healthy");
        }
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on journey results.

    use super::*;

    /// Assert that a result failed with the given error kind.
    pub fn assert_kind<T: std::fmt::Debug>(result: &JourneyResult<T>, kind: ErrorKind) {
        match result {
            Err(e) => assert_eq!(e.kind(), kind, "unexpected error: {}", e),
            Ok(v) => panic!("Expected {} error, got Ok({:?})", kind, v),
        }
    }

    /// Assert that a result failed with exactly this message.
    pub fn assert_message<T: std::fmt::Debug>(result: &JourneyResult<T>, message: &str) {
        match result {
            Err(e) => assert_eq!(e.to_string(), message),
            Ok(v) => panic!("Expected error '{}', got Ok({:?})", message, v),
        }
    }
}
