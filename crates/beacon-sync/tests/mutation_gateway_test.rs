//! Mutation gateway tests: write-then-apply, failure signals, stale results.

mod common;

use std::time::Duration;

use beacon_sync::{
    BackendCall, Error, InMemoryBackend, MutationOutcome, NotificationFilter, SyncConfig,
    SyncEvent, UserSignal,
};
use common::{note, three_seeded, Harness};
use uuid::Uuid;

async fn signed_in(config: SyncConfig) -> (Harness, Uuid, Vec<beacon_sync::Notification>) {
    let user_id = Uuid::new_v4();
    let backend = InMemoryBackend::new();
    let seeded = three_seeded(user_id);
    backend.seed_rows(seeded.clone());
    let mut h = Harness::start(backend, config);
    h.sign_in(user_id).await;
    h.backend.clear_calls();
    (h, user_id, seeded)
}

#[tokio::test]
async fn test_mark_as_read_applies_after_write() {
    let (h, _, seeded) = signed_in(SyncConfig::default()).await;

    let outcome = h.handle.gateway().mark_as_read(seeded[0].id).await.unwrap();
    assert_eq!(outcome, MutationOutcome::Applied);

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.unread_count, 1);
    assert!(snapshot.notifications.iter().any(|n| n.id == seeded[0].id && n.read));
    assert!(h.alerts.signals().is_empty());

    let row = h
        .backend
        .rows()
        .into_iter()
        .find(|r| r.id == seeded[0].id)
        .unwrap();
    assert!(row.read);
    assert!(row.read_at.is_some());
}

#[tokio::test]
async fn test_mark_as_read_twice_decrements_once() {
    let (h, _, seeded) = signed_in(SyncConfig::default()).await;
    let gateway = h.handle.gateway();

    gateway.mark_as_read(seeded[0].id).await.unwrap();
    gateway.mark_as_read(seeded[0].id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.handle.snapshot().unread_count, 1);
}

#[tokio::test]
async fn test_mark_all_as_read_failure_then_success() {
    let (h, user_id, _) = signed_in(SyncConfig::default()).await;
    let gateway = h.handle.gateway();
    let before = h.handle.snapshot();

    h.backend.set_fail_writes(true);
    let err = gateway.mark_all_as_read().await.unwrap_err();
    assert!(matches!(err, Error::Write(_)));
    assert_eq!(h.handle.snapshot(), before);
    assert_eq!(
        h.alerts.signals(),
        vec![UserSignal::failure("Failed to mark all notifications as read")]
    );

    h.backend.set_fail_writes(false);
    let outcome = gateway.mark_all_as_read().await.unwrap();
    assert_eq!(outcome, MutationOutcome::Applied);

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.unread_count, 0);
    assert!(snapshot.notifications.iter().all(|n| n.read));
    assert_eq!(
        h.alerts.signals().last(),
        Some(&UserSignal::success("All notifications marked as read"))
    );

    let bulk_writes: Vec<BackendCall> = h
        .backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, BackendCall::UpdateWhere { .. }))
        .collect();
    assert_eq!(bulk_writes.len(), 2);
    assert!(matches!(
        &bulk_writes[1],
        BackendCall::UpdateWhere { filter, .. } if *filter == NotificationFilter::unread(user_id)
    ));
}

#[tokio::test]
async fn test_delete_removes_locally() {
    let (h, _, seeded) = signed_in(SyncConfig::default()).await;

    let outcome = h.handle.gateway().delete(seeded[2].id).await.unwrap();
    assert_eq!(outcome, MutationOutcome::Applied);

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.notifications.len(), 2);
    assert_eq!(snapshot.unread_count, 1);
    assert_eq!(
        h.alerts.signals(),
        vec![UserSignal::success("Notification deleted")]
    );
}

#[tokio::test]
async fn test_delete_failure_keeps_store() {
    let (h, _, seeded) = signed_in(SyncConfig::default()).await;
    h.backend.set_fail_writes(true);

    let err = h.handle.gateway().delete(seeded[0].id).await.unwrap_err();
    assert!(matches!(err, Error::Write(_)));
    assert_eq!(h.handle.snapshot().notifications.len(), 3);
    assert_eq!(
        h.alerts.signals(),
        vec![UserSignal::failure("Failed to delete notification")]
    );
}

#[tokio::test]
async fn test_delete_all_read() {
    let (h, user_id, seeded) = signed_in(SyncConfig::default()).await;

    let outcome = h.handle.gateway().delete_all_read().await.unwrap();
    assert_eq!(outcome, MutationOutcome::Applied);

    let snapshot = h.handle.snapshot();
    assert_eq!(snapshot.notifications.len(), 2);
    assert!(snapshot.notifications.iter().all(|n| n.id != seeded[1].id));
    assert_eq!(snapshot.unread_count, 2);
    assert_eq!(h.backend.rows_for(user_id).len(), 2);
    assert_eq!(
        h.alerts.signals(),
        vec![UserSignal::success("All read notifications deleted")]
    );
}

#[tokio::test]
async fn test_live_echo_of_own_write_does_not_double_count() {
    let (mut h, _, seeded) = signed_in(SyncConfig::default().with_live_deletes(true)).await;
    let gateway = h.handle.gateway();

    gateway.mark_as_read(seeded[0].id).await.unwrap();
    gateway.delete(seeded[2].id).await.unwrap();
    let snapshot = h.wait_for(|s| s.notifications.len() == 2).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(snapshot.unread_count, 0);
    assert_eq!(h.handle.snapshot().unread_count, 0);
}

#[tokio::test]
async fn test_no_session_is_rejected_without_write() {
    let h = Harness::start(InMemoryBackend::new(), SyncConfig::default());

    let err = h.handle.gateway().mark_all_as_read().await.unwrap_err();
    assert!(matches!(err, Error::NoActiveSession));
    let err = h.handle.gateway().delete(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::NoActiveSession));
    assert!(h.backend.calls().is_empty());
    assert!(h.alerts.signals().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_write_finishing_after_identity_change_is_discarded() {
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();
    let backend = InMemoryBackend::new().with_write_latency(Duration::from_millis(500));
    backend.seed_rows(three_seeded(first));
    backend.seed_rows(vec![note(second, 1, false), note(second, 2, true)]);

    let mut h = Harness::start(backend, SyncConfig::default());
    h.sign_in(first).await;

    let gateway = h.handle.gateway();
    let pending = tokio::spawn(async move { gateway.delete_all_read().await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let snapshot = h.sign_in(second).await;

    let outcome = pending.await.unwrap().unwrap();
    assert_eq!(outcome, MutationOutcome::Discarded);
    assert_eq!(h.handle.snapshot(), snapshot);
    assert_eq!(h.handle.snapshot().notifications.len(), 2);
    assert!(h.alerts.signals().is_empty());
}

#[tokio::test]
async fn test_mutation_events() {
    let (h, user_id, seeded) = signed_in(SyncConfig::default()).await;
    let mut events = h.events.subscribe();

    h.handle.gateway().mark_as_read(seeded[0].id).await.unwrap();
    h.backend.set_fail_writes(true);
    let _ = h.handle.gateway().delete_all_read().await;

    let mut applied = None;
    let mut failed = None;
    while let Ok(envelope) = events.try_recv() {
        match envelope.payload {
            SyncEvent::MutationApplied { .. } => applied = Some(envelope.payload.clone()),
            SyncEvent::MutationFailed { .. } => failed = Some(envelope.payload.clone()),
            _ => {}
        }
    }

    assert!(matches!(
        applied,
        Some(SyncEvent::MutationApplied { user_id: u, notification_id: Some(id), unread_count: 1, .. })
            if u == user_id && id == seeded[0].id
    ));
    assert!(matches!(
        failed,
        Some(SyncEvent::MutationFailed { notification_id: None, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_mutation_before_seed_survives_the_seed() {
    let user_id = Uuid::new_v4();
    let backend = InMemoryBackend::new().with_subscribe_latency(Duration::from_millis(500));
    backend.seed_rows(three_seeded(user_id));
    let mut h = Harness::start(backend, SyncConfig::default());

    h.set_user(Some(user_id));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!h.handle.snapshot().seeded);

    let outcome = h.handle.gateway().mark_all_as_read().await.unwrap();
    assert_eq!(outcome, MutationOutcome::Applied);

    let snapshot = h.sign_in(user_id).await;
    let remote_unread = h
        .backend
        .rows_for(user_id)
        .iter()
        .filter(|n| !n.read)
        .count();
    assert_eq!(remote_unread, 0);
    assert_eq!(snapshot.unread_count, remote_unread);
    assert_eq!(snapshot.notifications.len(), 3);
    assert!(snapshot.notifications.iter().all(|n| n.read));
    assert_eq!(
        h.alerts.signals(),
        vec![UserSignal::success("All notifications marked as read")]
    );
}

#[tokio::test(start_paused = true)]
async fn test_deletes_before_seed_are_replayed_in_order() {
    let user_id = Uuid::new_v4();
    let backend = InMemoryBackend::new().with_subscribe_latency(Duration::from_millis(500));
    let seeded = three_seeded(user_id);
    backend.seed_rows(seeded.clone());
    let mut h = Harness::start(backend, SyncConfig::default());

    h.set_user(Some(user_id));
    tokio::time::sleep(Duration::from_millis(100)).await;
    let gateway = h.handle.gateway();
    gateway.mark_as_read(seeded[0].id).await.unwrap();
    gateway.delete_all_read().await.unwrap();

    let snapshot = h.sign_in(user_id).await;
    assert_eq!(snapshot.notifications.len(), 1);
    assert_eq!(snapshot.notifications[0].id, seeded[2].id);
    assert_eq!(snapshot.unread_count, 1);
    assert_eq!(h.backend.rows_for(user_id).len(), 1);
}
