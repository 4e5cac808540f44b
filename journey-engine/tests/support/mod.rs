//! Shared wiring for the integration tests.

#![allow(dead_code)]

use journey_core::{EntityIdType, JourneyConfig, NodeState, TenantId, UserId};
use journey_engine::JourneyService;
use journey_test_utils::{
    fixtures, InMemoryJourneyStore, MockBlobStore, MockDocumentService, RecordingNotifier,
};
use std::sync::Arc;

pub struct Harness {
    pub service: JourneyService,
    pub store: Arc<InMemoryJourneyStore>,
    pub blob: MockBlobStore,
    pub documents: MockDocumentService,
    pub notifier: RecordingNotifier,
    pub tenant: TenantId,
    pub user: UserId,
}

pub struct HarnessBuilder {
    playbook: String,
    config: JourneyConfig,
    with_blob: bool,
    with_documents: bool,
    notifier: Option<RecordingNotifier>,
}

impl HarnessBuilder {
    pub fn config(mut self, config: JourneyConfig) -> Self {
        self.config = config;
        self
    }

    pub fn without_blob(mut self) -> Self {
        self.with_blob = false;
        self
    }

    pub fn without_documents(mut self) -> Self {
        self.with_documents = false;
        self
    }

    pub fn notifier(mut self, notifier: RecordingNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Must run inside a tokio runtime when a notifier is set.
    pub fn build(self) -> Harness {
        let store = Arc::new(InMemoryJourneyStore::new());
        fixtures::seed_policy(&store);

        let blob = MockBlobStore::new();
        let documents = MockDocumentService::new();
        let notifier = self.notifier.clone().unwrap_or_default();

        let mut builder = JourneyService::builder(store.clone(), fixtures::playbook(&self.playbook))
            .config(self.config);
        if self.with_blob {
            builder = builder.blob_store(Arc::new(blob.clone()));
        }
        if self.with_documents {
            builder = builder.document_service(Arc::new(documents.clone()));
        }
        if let Some(n) = self.notifier {
            builder = builder.notifier(Arc::new(n));
        }

        Harness {
            service: builder.build().expect("service builds"),
            store,
            blob,
            documents,
            notifier,
            tenant: TenantId::now_v7(),
            user: UserId::now_v7(),
        }
    }
}

impl Harness {
    pub fn builder(playbook: &str) -> HarnessBuilder {
        HarnessBuilder {
            playbook: playbook.to_string(),
            config: JourneyConfig::default(),
            with_blob: true,
            with_documents: true,
            notifier: None,
        }
    }

    /// Happy-path playbook with every capability except notifications.
    pub fn happy_path() -> Harness {
        Self::builder(fixtures::HAPPY_PATH_PLAYBOOK).build()
    }

    /// Presign and attach `filename` to `slot_key` of `node_id`. Returns the object key.
    pub async fn upload(&self, node_id: &str, slot_key: &str, filename: &str) -> String {
        let presigned = self
            .service
            .presign_upload(self.user, node_id, slot_key, filename, "application/pdf", 1024)
            .await
            .expect("presign");
        self.service
            .attach_upload(
                self.tenant,
                self.user,
                node_id,
                slot_key,
                &presigned.object_key,
                filename,
                1024,
            )
            .await
            .expect("attach");
        presigned.object_key
    }

    pub async fn state_of(&self, node_id: &str) -> Option<NodeState> {
        self.store
            .get_instance(self.user, node_id)
            .await
            .expect("store read")
            .map(|i| i.state)
    }
}

pub use journey_storage::JourneyStore;
