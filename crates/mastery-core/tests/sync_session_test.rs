//! Integration tests for save coalescing, echo suppression, reloads and
//! offline recovery.

use chrono::{Duration, Utc};
use futures::StreamExt;
use mastery_core::config::{RetryPolicy, SyncConfig};
use mastery_core::sync::PendingBackup;
use mastery_core::{
    AppState, AppStatePatch, AppStateStore, ChangeDecision, Clock, Course, DocPath, EchoDetection,
    EventBus, InMemoryRemoteStore, LoadSource, LocalDurableStore, ManualClock, MasteryConfig,
    MemoryLocalStore, NetworkMonitor, RemoteChange, RemoteErrorCode, RemoteStore, SaveOutcome,
    SessionCollaborators, SessionRuntime, SqliteLocalStore, SyncCoordinator, SyncEvent,
};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    clock: ManualClock,
    remote: Arc<InMemoryRemoteStore>,
    coordinator: Arc<SyncCoordinator>,
}

fn harness(echo_detection: EchoDetection) -> Harness {
    let clock = ManualClock::new(Utc::now());
    let remote = Arc::new(InMemoryRemoteStore::new(Arc::new(clock.clone())));
    let config = SyncConfig {
        echo_detection,
        retry: RetryPolicy::with_initial_delay(1),
        ..Default::default()
    };
    let coordinator = Arc::new(SyncCoordinator::new(
        Arc::new(AppStateStore::new()),
        remote.clone(),
        Arc::new(MemoryLocalStore::new()),
        Arc::new(NetworkMonitor::new(true)),
        Arc::new(clock.clone()),
        EventBus::new(),
        config,
    ));
    coordinator.set_user(Some("u1".to_string()));
    Harness {
        clock,
        remote,
        coordinator,
    }
}

fn root() -> DocPath {
    DocPath::user_root("u1")
}

fn courses(ids: &[&str]) -> AppStatePatch {
    AppStatePatch::new().with_courses(ids.iter().map(|id| Course::new(*id, *id)).collect())
}

fn wrong(ids: &[&str]) -> AppStatePatch {
    AppStatePatch::new().with_wrong_history(ids.iter().map(|s| s.to_string()).collect())
}

/// Poll until `check` passes or a second has gone by.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    check()
}

/// Updates arriving during a write are merged and written once, after it.
#[tokio::test]
async fn test_saves_during_write_coalesce_into_one_write() {
    let h = harness(EchoDetection::TimeWindow);
    h.remote.hold_writes();

    let first = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.save_data(courses(&["a"])).await })
    };
    h.remote.wait_for_blocked_write().await;

    assert_eq!(h.coordinator.save_data(wrong(&["b"])).await.unwrap(), SaveOutcome::Queued);
    let mut goals = h.coordinator.store().goals();
    goals.daily_target = 5;
    assert_eq!(
        h.coordinator
            .save_data(AppStatePatch::new().with_goals(goals))
            .await
            .unwrap(),
        SaveOutcome::Queued
    );

    // Reads see queued updates before they are written.
    assert!(h.coordinator.store().wrong_history().contains("b"));
    assert_eq!(h.remote.write_count(), 0);

    h.remote.release_writes();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { .. }));

    let writes = h.remote.writes_to(&root());
    assert_eq!(writes.len(), 2);
    let has_both = |data: &serde_json::Value| {
        data["courses"][0]["id"] == "a" && data["wrongHistory"] == json!(["b"])
    };
    assert_eq!(writes.iter().filter(|w| has_both(&w.data)).count(), 1);
    assert_eq!(writes[1].data["goals"]["dailyTarget"], 5);

    let state = h.coordinator.sync_state();
    assert!(!state.is_saving);
    assert!(!state.is_dirty);
    assert!(state.pending_update.is_none());
}

/// A failed save leaves the state dirty and the next save carries everything.
#[tokio::test]
async fn test_no_update_lost_after_fatal_failure() {
    let h = harness(EchoDetection::TimeWindow);
    h.remote.fail_next(1, RemoteErrorCode::PermissionDenied);
    let mut events = h.coordinator.events().subscribe();

    assert!(h.coordinator.save_data(courses(&["a"])).await.is_err());
    assert!(h.coordinator.is_dirty());
    assert!(events
        .drain()
        .iter()
        .any(|e| matches!(e, SyncEvent::SaveFailed { .. })));

    h.coordinator.save_data(wrong(&["b"])).await.unwrap();
    let doc = h.remote.document(&root()).unwrap();
    assert_eq!(doc.data["courses"][0]["id"], "a");
    assert_eq!(doc.data["wrongHistory"], json!(["b"]));
}

/// The notification caused by our own write does not trigger a reload.
#[tokio::test]
async fn test_own_write_echo_is_suppressed() {
    let h = harness(EchoDetection::TimeWindow);
    let mut changes = h.remote.subscribe(&root()).await.unwrap();

    h.coordinator.save_data(courses(&["a"])).await.unwrap();
    h.coordinator.save_data(wrong(&["q"])).await.unwrap();

    let mut events = h.coordinator.events().subscribe();
    for _ in 0..2 {
        let echo = changes.next().await.unwrap();
        assert_eq!(
            h.coordinator.handle_remote_change(echo).await.unwrap(),
            ChangeDecision::IgnoredEcho
        );
    }
    assert!(!events.drain().iter().any(|e| matches!(e, SyncEvent::Reloaded { .. })));
    assert_eq!(h.remote.write_count(), 2);
}

/// A write from another device replaces local state; stale repeats are ignored.
#[tokio::test]
async fn test_foreign_write_reloads_state() {
    let h = harness(EchoDetection::TimeWindow);
    let mut changes = h.remote.subscribe(&root()).await.unwrap();
    h.coordinator.save_data(courses(&["mine"])).await.unwrap();

    h.clock.advance(Duration::seconds(30));
    h.remote
        .set(
            &root(),
            json!({"courses": [{"id": "theirs", "title": "Other device"}]}),
            true,
        )
        .await
        .unwrap();

    let echo = changes.next().await.unwrap();
    let foreign = changes.next().await.unwrap();
    assert_eq!(
        h.coordinator.handle_remote_change(echo).await.unwrap(),
        ChangeDecision::IgnoredEcho
    );
    assert_eq!(
        h.coordinator.handle_remote_change(foreign.clone()).await.unwrap(),
        ChangeDecision::Reloaded
    );
    assert_eq!(h.coordinator.store().courses()[0].id, "theirs");
    assert_eq!(
        h.coordinator.sync_state().last_remote_seen_at,
        Some(foreign.written_at.timestamp_millis())
    );

    assert_eq!(
        h.coordinator.handle_remote_change(foreign).await.unwrap(),
        ChangeDecision::IgnoredStale
    );

    // Persisting the just-reloaded state is a no-op; a real edit is written.
    let writes = h.remote.write_count();
    assert_eq!(
        h.coordinator.save_data(AppStatePatch::new()).await.unwrap(),
        SaveOutcome::Unchanged
    );
    assert_eq!(h.remote.write_count(), writes);
    h.coordinator.save_data(wrong(&["x"])).await.unwrap();
    assert_eq!(h.remote.write_count(), writes + 1);
}

/// A reload waits for the save in flight instead of interrupting it.
#[tokio::test]
async fn test_reload_waits_for_save_in_flight() {
    let h = harness(EchoDetection::TimeWindow);
    h.remote.hold_writes();
    let save = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.save_data(courses(&["local"])).await })
    };
    h.remote.wait_for_blocked_write().await;

    let reload = {
        let coordinator = h.coordinator.clone();
        let change = RemoteChange {
            path: root(),
            written_at: h.clock.now() + Duration::seconds(10),
            data: None,
        };
        tokio::spawn(async move { coordinator.handle_remote_change(change).await })
    };
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!reload.is_finished());

    h.remote.release_writes();
    save.await.unwrap().unwrap();
    assert_eq!(reload.await.unwrap().unwrap(), ChangeDecision::Reloaded);
    assert_eq!(h.coordinator.store().courses()[0].id, "local");
}

/// Documents the timestamp-window race: an echo stamped more than two seconds
/// after the client's save time is mistaken for a foreign write.
#[tokio::test]
async fn test_time_window_misreads_slow_echo() {
    let h = harness(EchoDetection::TimeWindow);
    let mut changes = h.remote.subscribe(&root()).await.unwrap();
    h.remote.hold_writes();
    let save = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.save_data(courses(&["a"])).await })
    };
    h.remote.wait_for_blocked_write().await;
    h.clock.advance(Duration::seconds(3));
    h.remote.release_writes();
    save.await.unwrap().unwrap();

    let echo = changes.next().await.unwrap();
    assert_eq!(
        h.coordinator.handle_remote_change(echo).await.unwrap(),
        ChangeDecision::Reloaded
    );
    // Harmless here: the reloaded state is our own.
    assert_eq!(h.coordinator.store().courses()[0].id, "a");
}

/// With write tokens the same slow echo is recognized.
#[tokio::test]
async fn test_write_token_recognizes_slow_echo() {
    let h = harness(EchoDetection::WriteToken);
    let mut changes = h.remote.subscribe(&root()).await.unwrap();
    h.remote.hold_writes();
    let save = {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.save_data(courses(&["a"])).await })
    };
    h.remote.wait_for_blocked_write().await;
    h.clock.advance(Duration::seconds(3));
    h.remote.release_writes();
    save.await.unwrap().unwrap();

    let echo = changes.next().await.unwrap();
    assert_eq!(
        h.coordinator.handle_remote_change(echo).await.unwrap(),
        ChangeDecision::IgnoredEcho
    );
}

/// With write tokens a foreign write right after ours is not swallowed.
#[tokio::test]
async fn test_write_token_reloads_foreign_write_inside_window() {
    let h = harness(EchoDetection::WriteToken);
    let mut changes = h.remote.subscribe(&root()).await.unwrap();
    h.coordinator.save_data(courses(&["a"])).await.unwrap();

    h.clock.advance(Duration::milliseconds(500));
    h.remote
        .set(&root(), json!({"courses": [], "writeToken": "someone-else"}), true)
        .await
        .unwrap();

    let _echo = changes.next().await.unwrap();
    let foreign = changes.next().await.unwrap();
    assert_eq!(
        h.coordinator.handle_remote_change(foreign).await.unwrap(),
        ChangeDecision::Reloaded
    );
    assert!(h.coordinator.store().courses().is_empty());
}

/// Offline saves go to a uid-tagged backup and are pushed after reconnecting.
#[tokio::test]
async fn test_offline_backup_synced_on_reconnect() {
    let clock = ManualClock::new(Utc::now());
    let remote = Arc::new(InMemoryRemoteStore::new(Arc::new(clock.clone())));
    let local = Arc::new(MemoryLocalStore::new());
    let network = Arc::new(NetworkMonitor::new(true));
    let collaborators = SessionCollaborators::new(remote.clone(), local.clone(), network.clone())
        .with_clock(Arc::new(clock));
    let mut session = SessionRuntime::new(MasteryConfig::default(), collaborators);
    session.start(Some("u1".to_string())).await.unwrap();

    network.set_online(false);
    let outcome = session.coordinator().save_data(courses(&["offline"])).await.unwrap();
    assert_eq!(outcome, SaveOutcome::Offline);
    assert_eq!(remote.attempt_count(), 0);
    let backup: PendingBackup =
        serde_json::from_str(&local.get("pending_sync_backup").unwrap().unwrap()).unwrap();
    assert_eq!(backup.uid, "u1");
    assert_eq!(backup.state.courses[0].id, "offline");

    network.set_online(true);
    assert!(eventually(|| remote.write_count() == 1).await);
    assert!(eventually(|| !local.contains("pending_sync_backup")).await);
    assert_eq!(
        remote.document(&root()).unwrap().data["courses"][0]["id"],
        "offline"
    );

    session.shutdown().await.unwrap();
}

/// A backup is only restored for the user it belongs to.
#[tokio::test]
async fn test_backup_restored_only_for_its_owner() {
    let clock = ManualClock::new(Utc::now());
    let remote = Arc::new(InMemoryRemoteStore::new(Arc::new(clock.clone())));
    let local = Arc::new(MemoryLocalStore::new());
    let mut state = AppState::default();
    state.wrong_history = BTreeSet::from(["q7".to_string()]);
    let backup = PendingBackup {
        uid: "u1".to_string(),
        saved_at: clock.now_millis(),
        state,
    };
    local
        .set("pending_sync_backup", &serde_json::to_string(&backup).unwrap())
        .unwrap();

    let collaborators = SessionCollaborators::new(
        remote.clone(),
        local.clone(),
        Arc::new(NetworkMonitor::new(true)),
    )
    .with_clock(Arc::new(clock));
    let mut session = SessionRuntime::new(MasteryConfig::default(), collaborators);

    assert_eq!(
        session.start(Some("u2".to_string())).await.unwrap(),
        LoadSource::Empty
    );
    assert!(session.store().wrong_history().is_empty());
    assert!(local.contains("pending_sync_backup"));

    assert_eq!(
        session.switch_user(Some("u1".to_string())).await.unwrap(),
        LoadSource::Backup
    );
    assert!(session.store().wrong_history().contains("q7"));
    assert_eq!(
        remote.document(&root()).unwrap().data["wrongHistory"],
        json!(["q7"])
    );
    assert!(!local.contains("pending_sync_backup"));

    session.shutdown().await.unwrap();
}

/// Guest state is kept in the local database across restarts.
#[tokio::test]
async fn test_guest_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = MasteryConfig::builder()
        .local_db_path(dir.path().join("local.db"))
        .build();
    let remote = Arc::new(InMemoryRemoteStore::new(Arc::new(ManualClock::new(Utc::now()))));

    {
        let network = Arc::new(NetworkMonitor::default());
        let collaborators =
            SessionCollaborators::with_sqlite(remote.clone(), network, &config).unwrap();
        let mut session = SessionRuntime::new(config.clone(), collaborators);
        session.start(None).await.unwrap();
        let outcome = session.coordinator().save_data(courses(&["g"])).await.unwrap();
        assert_eq!(outcome, SaveOutcome::SavedLocally);
        session.shutdown().await.unwrap();
    }

    let local = Arc::new(SqliteLocalStore::new(dir.path().join("local.db")).unwrap());
    let collaborators =
        SessionCollaborators::new(remote.clone(), local, Arc::new(NetworkMonitor::default()));
    let mut session = SessionRuntime::new(config, collaborators);
    assert_eq!(session.start(None).await.unwrap(), LoadSource::Guest);
    assert_eq!(session.store().courses()[0].id, "g");
    assert_eq!(remote.write_count(), 0);
    session.shutdown().await.unwrap();
}

/// The running listener applies foreign writes and ignores our own.
#[tokio::test]
async fn test_listener_applies_foreign_writes() {
    let clock = ManualClock::new(Utc::now());
    let remote = Arc::new(InMemoryRemoteStore::new(Arc::new(clock.clone())));
    let collaborators = SessionCollaborators::new(
        remote.clone(),
        Arc::new(MemoryLocalStore::new()),
        Arc::new(NetworkMonitor::default()),
    )
    .with_clock(Arc::new(clock.clone()));
    let mut session = SessionRuntime::new(MasteryConfig::default(), collaborators);
    session.start(Some("u1".to_string())).await.unwrap();
    let mut events = session.events().subscribe();

    session.coordinator().save_data(courses(&["mine"])).await.unwrap();
    let echo_seen = tokio::time::timeout(std::time::Duration::from_secs(1), async {
        while let Some(event) = events.recv().await {
            if event == SyncEvent::EchoIgnored {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(echo_seen);

    clock.advance(Duration::minutes(1));
    remote
        .set(&root(), json!({"courses": [{"id": "tablet", "title": "Tablet"}]}), true)
        .await
        .unwrap();
    let store = session.store().clone();
    assert!(eventually(|| store.courses().first().is_some_and(|c| c.id == "tablet")).await);

    session.shutdown().await.unwrap();
}

/// Shutting down while the listener is mid-reload does not wait on it forever,
/// and leaves the coordinator able to save.
#[tokio::test]
async fn test_shutdown_during_reload_frees_save_slot() {
    let clock = ManualClock::new(Utc::now());
    let remote = Arc::new(InMemoryRemoteStore::new(Arc::new(clock.clone())));
    let collaborators = SessionCollaborators::new(
        remote.clone(),
        Arc::new(MemoryLocalStore::new()),
        Arc::new(NetworkMonitor::default()),
    )
    .with_clock(Arc::new(clock.clone()));
    let mut session = SessionRuntime::new(MasteryConfig::default(), collaborators);
    session.start(Some("u1".to_string())).await.unwrap();
    let coordinator = session.coordinator().clone();

    remote.hold_reads();
    clock.advance(Duration::minutes(1));
    remote.inject_change(RemoteChange {
        path: root(),
        written_at: clock.now(),
        data: Some(json!({"courses": []})),
    });
    remote.wait_for_blocked_read().await;
    assert!(coordinator.is_saving());

    let stopped = tokio::time::timeout(std::time::Duration::from_secs(1), session.shutdown()).await;
    assert!(matches!(stopped, Ok(Ok(()))));
    assert!(!session.is_listening());
    assert!(!coordinator.is_saving());

    remote.release_reads();
    let outcome = coordinator.save_data(courses(&["after"])).await.unwrap();
    assert!(matches!(outcome, SaveOutcome::Saved { .. }));
    assert_eq!(remote.document(&root()).unwrap().data["courses"][0]["id"], "after");
}
