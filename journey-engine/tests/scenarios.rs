//! End-to-end journey scenarios over the in-memory store.

mod support;

use journey_core::{
    EntityIdType, ErrorKind, JourneyError, NodeEventKind, NodeState, TenantId, TransitionError,
    UserId,
};
use journey_engine::{SlotEngine, StateMachine};
use journey_test_utils::assertions::{assert_kind, assert_message};
use journey_test_utils::fixtures;
use std::sync::Arc;
use support::{Harness, JourneyStore};
use uuid::Uuid;

fn count(events: &[journey_core::NodeEvent], kind: NodeEventKind) -> usize {
    events.iter().filter(|e| e.kind == kind).count()
}

#[tokio::test]
async fn student_completes_node_and_successor_activates() {
    let h = Harness::happy_path();

    let presigned = h
        .service
        .presign_upload(h.user, "N1", "pdf", "a.pdf", "application/pdf", 1024)
        .await
        .unwrap();
    assert!(presigned.object_key.starts_with("node_uploads/N1/pdf/"));
    assert!(presigned.object_key.ends_with("/a.pdf"));

    h.service
        .attach_upload(h.tenant, h.user, "N1", "pdf", &presigned.object_key, "a.pdf", 1024)
        .await
        .unwrap();

    let n1 = h
        .service
        .put_submission(h.tenant, h.user, "student", "N1", None, "done", br#"{"notes":"ok"}"#.to_vec())
        .await
        .unwrap();
    assert_eq!(n1.state, NodeState::Done);
    assert_eq!(n1.current_rev, 1);

    let n2 = h.store.get_instance(h.user, "N2").await.unwrap().unwrap();
    assert_eq!(n2.state, NodeState::Active);

    let n1_events = h.store.list_events(n1.instance_id).await.unwrap();
    assert_eq!(count(&n1_events, NodeEventKind::Opened), 1);
    assert_eq!(count(&n1_events, NodeEventKind::StateChanged), 1);
    let changed = n1_events
        .iter()
        .find(|e| e.kind == NodeEventKind::StateChanged)
        .unwrap();
    assert_eq!(changed.payload["from"], "active");
    assert_eq!(changed.payload["to"], "done");

    let n2_events = h.store.list_events(n2.instance_id).await.unwrap();
    assert_eq!(n2_events.len(), 1);
    assert_eq!(n2_events[0].kind, NodeEventKind::NodeActivated);
    assert_eq!(n2_events[0].payload["source"], "N1");
    assert_eq!(n2_events[0].payload["reason"], "prerequisites_met");

    let state = h.service.get_state(h.user, h.tenant).await.unwrap();
    assert_eq!(state.get("N1"), Some(&NodeState::Done));
    assert_eq!(state.get("N2"), Some(&NodeState::Active));
}

#[tokio::test]
async fn missing_required_file_blocks_completion() {
    let h = Harness::happy_path();

    let result = h
        .service
        .put_submission(h.tenant, h.user, "student", "N1", None, "done", Vec::new())
        .await;
    assert_message(&result, "requirements not met: pdf");
    assert_kind(&result, ErrorKind::RequirementsNotMet);

    assert_eq!(h.state_of("N1").await, Some(NodeState::Active));
    assert!(h.store.get_instance(h.user, "N2").await.unwrap().is_none());

    let n1 = h.store.get_instance(h.user, "N1").await.unwrap().unwrap();
    let events = h.store.list_events(n1.instance_id).await.unwrap();
    assert_eq!(count(&events, NodeEventKind::StateChanged), 0);
}

#[tokio::test]
async fn role_outside_policy_is_denied() {
    let h = Harness::happy_path();

    let result = h
        .service
        .patch_state(h.tenant, h.user, "student", "N1", "waiting")
        .await;
    assert_kind(&result, ErrorKind::RoleNotPermitted);
    assert_eq!(h.state_of("N1").await, Some(NodeState::Active));

    let moved = h
        .service
        .patch_state(h.tenant, h.user, "advisor", "N1", "waiting")
        .await
        .unwrap();
    assert_eq!(moved.state, NodeState::Waiting);
}

#[tokio::test]
async fn stale_transition_loses_cas_and_retry_succeeds() {
    let h = Harness::happy_path();
    h.upload("N1", "pdf", "a.pdf").await;
    let snapshot = h.store.get_instance(h.user, "N1").await.unwrap().unwrap();

    let playbook = fixtures::playbook(fixtures::HAPPY_PATH_PLAYBOOK);
    let slots = SlotEngine::new(h.store.clone(), playbook);
    let machine = StateMachine::new(
        h.store.clone(),
        slots,
        journey_engine::NotificationDispatcher::disabled(),
    );

    // Both requests read `active` before either commits.
    let first = machine.transition(&snapshot, h.user, "student", NodeState::Done).await;
    let second = machine.transition(&snapshot, h.user, "student", NodeState::Done).await;
    assert_eq!(first.unwrap(), NodeState::Done);

    let err = second.unwrap_err();
    assert_eq!(
        err,
        JourneyError::Transition(TransitionError::CasConflict {
            expected: NodeState::Active
        })
    );
    assert_eq!(err.to_string(), "state changed by another process (expected active)");

    // A retry re-reads the instance; it is already done, so the request is a no-op.
    let fresh = h.store.get_instance(h.user, "N1").await.unwrap().unwrap();
    let retried = machine.transition(&fresh, h.user, "student", NodeState::Done).await;
    assert_eq!(retried.unwrap(), NodeState::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_commit_once() {
    let h = Arc::new(Harness::happy_path());
    h.upload("N1", "pdf", "a.pdf").await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            h.service
                .patch_state(h.tenant, h.user, "student", "N1", "done")
                .await
        }));
    }

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(inst) => {
                assert_eq!(inst.state, NodeState::Done);
                ok += 1;
            }
            Err(e) => assert_eq!(e.kind(), ErrorKind::CasConflict),
        }
    }
    assert!(ok >= 1);

    let n1 = h.store.get_instance(h.user, "N1").await.unwrap().unwrap();
    assert_eq!(n1.state, NodeState::Done);
    let events = h.store.list_events(n1.instance_id).await.unwrap();
    assert_eq!(count(&events, NodeEventKind::StateChanged), 1);
    assert_eq!(h.store.instance_count(), 2);
}

#[tokio::test]
async fn single_slot_keeps_only_latest_attachment() {
    let h = Harness::happy_path();
    h.blob.insert_object("node_uploads/N1/pdf/k1/a.pdf");
    h.blob.insert_object("node_uploads/N1/pdf/k2/b.pdf");

    h.service
        .attach_upload(h.tenant, h.user, "N1", "pdf", "node_uploads/N1/pdf/k1/a.pdf", "a.pdf", 10)
        .await
        .unwrap();
    let latest = h
        .service
        .attach_upload(h.tenant, h.user, "N1", "pdf", "node_uploads/N1/pdf/k2/b.pdf", "b.pdf", 20)
        .await
        .unwrap();

    let view = h.service.get_submission(h.tenant, h.user, "N1", None).await.unwrap();
    let pdf = view.slots.iter().find(|s| s.slot.slot_key == "pdf").unwrap();
    assert_eq!(pdf.attachments.len(), 2);

    let active: Vec<_> = pdf.active_attachments().collect();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].attachment_id, latest);
    assert_eq!(active[0].object_key, "node_uploads/N1/pdf/k2/b.pdf");

    let superseded = pdf.attachments.iter().find(|a| a.object_key == "node_uploads/N1/pdf/k1/a.pdf").unwrap();
    assert!(!superseded.is_active);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_single_slot_attaches_leave_one_active() {
    let h = Arc::new(Harness::happy_path());
    h.service.get_submission(h.tenant, h.user, "N1", None).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        let key = format!("node_uploads/N1/pdf/k{}/a.pdf", i);
        h.blob.insert_object(&key);
        tasks.push(tokio::spawn(async move {
            h.service
                .attach_upload(h.tenant, h.user, "N1", "pdf", &key, "a.pdf", 10)
                .await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let view = h.service.get_submission(h.tenant, h.user, "N1", None).await.unwrap();
    let pdf = view.slots.iter().find(|s| s.slot.slot_key == "pdf").unwrap();
    assert_eq!(pdf.attachments.len(), 8);
    assert_eq!(pdf.active_attachments().count(), 1);
}

#[tokio::test]
async fn submission_recovers_from_interrupted_revision_write() {
    let h = Harness::happy_path();
    h.service.get_submission(h.tenant, h.user, "N1", None).await.unwrap();
    let inst = h.store.get_instance(h.user, "N1").await.unwrap().unwrap();
    assert_eq!(inst.current_rev, 0);

    // A revision row that landed without the instance rev moving forward.
    h.store
        .insert_form_revision(inst.instance_id, 1, br#"{"notes":"lost"}"#.to_vec(), h.user)
        .await
        .unwrap();

    let saved = h
        .service
        .put_submission(h.tenant, h.user, "student", "N1", None, "", br#"{"notes":"kept"}"#.to_vec())
        .await
        .unwrap();
    assert_eq!(saved.current_rev, 2);

    let view = h.service.get_submission(h.tenant, h.user, "N1", None).await.unwrap();
    let form = view.form.unwrap();
    assert_eq!(form.rev, 2);
    assert_eq!(form.data["notes"], "kept");
}

#[tokio::test]
async fn scoreboard_scores_zero_world_and_inserts_caller() {
    let h = Harness::builder(fixtures::SCORING_PLAYBOOK).build();
    let tenant = TenantId::now_v7();
    let id = |n: u128| UserId::new(Uuid::from_u128(n));
    let (a, b, c, d) = (id(1), id(2), id(3), id(4));

    let mut alice = fixtures::user("Alice", "Abenova", "alice@uni.kz");
    alice.user_id = a;
    alice.avatar_url = Some("https://cdn/a.png".to_string());
    h.store.insert_user(tenant, alice).unwrap();
    let mut dana = fixtures::user("", "", "dana@uni.kz");
    dana.user_id = d;
    h.store.insert_user(tenant, dana).unwrap();

    for (user, node) in [(a, "N1"), (a, "N2"), (b, "N3"), (c, "NX")] {
        h.service.set_state(user, node, "done", tenant).await.unwrap();
    }

    let board = h.service.get_scoreboard(tenant, d).await.unwrap();
    assert_eq!(board.total_users, 3);
    assert_eq!(board.average, 66);

    let top: Vec<(UserId, i64, usize)> = board
        .top5
        .iter()
        .map(|e| (e.user_id, e.total_score, e.rank))
        .collect();
    assert_eq!(top, vec![(a, 200, 1), (b, 0, 2), (c, 0, 3)]);
    assert_eq!(board.top5[0].name, "Alice Abenova");
    assert_eq!(board.top5[0].avatar, "https://cdn/a.png");
    assert_eq!(board.top5[1].name, "Student");

    assert_eq!(board.me.user_id, d);
    assert_eq!(board.me.rank, 4);
    assert_eq!(board.me.total_score, 0);
    assert_eq!(board.me.name, "dana@uni.kz");

    let mine = h.service.get_scoreboard(tenant, a).await.unwrap();
    assert_eq!(mine.me.rank, 1);
    assert_eq!(mine.me.total_score, 200);
}

#[tokio::test]
async fn empty_tenant_scoreboard() {
    let h = Harness::builder(fixtures::SCORING_PLAYBOOK).build();
    let board = h.service.get_scoreboard(h.tenant, h.user).await.unwrap();
    assert_eq!(board.total_users, 0);
    assert_eq!(board.average, 0);
    assert!(board.top5.is_empty());
    assert_eq!(board.me.rank, 1);
    assert_eq!(board.me.name, "Student");
}

#[tokio::test]
async fn top_five_is_capped() {
    let h = Harness::builder(fixtures::SCORING_PLAYBOOK).build();
    for n in 1..=7u128 {
        let user = UserId::new(Uuid::from_u128(n));
        h.service.set_state(user, "N1", "done", h.tenant).await.unwrap();
    }
    let board = h.service.get_scoreboard(h.tenant, h.user).await.unwrap();
    assert_eq!(board.total_users, 7);
    assert_eq!(board.top5.len(), 5);
    assert_eq!(board.average, 100);
    assert_eq!(board.me.rank, 8);
}
