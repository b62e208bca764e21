//! Durability: failed writes, restarts and recovery from disk.

use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use wonderland_core::testing::{assert_in_room, assert_unchanged, TestHarness};
use wonderland_core::{
    EntityKind, EventId, FileStorage, Realm, RealmBuilder, RealmError, Session, Snapshot,
    Status, WorldConfig,
};

#[tokio::test]
async fn test_failed_append_leaves_no_trace_and_can_be_retried() {
    let harness = TestHarness::new().await.unwrap();
    let alice = harness.join("Alice").await.unwrap();
    let before = harness.snapshot().await;

    harness.storage.fail_appends(true);
    let err = alice.send("east").await.unwrap_err();
    assert!(err.is_retryable());
    assert!(matches!(err, RealmError::Persistence(_)));
    let after = harness.snapshot().await;
    assert_unchanged(&before, &after);
    assert_eq!(before.last_event, after.last_event);

    // Refusals are witnessed too, so they fail the same way.
    let err = alice.send("say obey me").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(harness.realm.event_count().await, before_count(&before));

    harness.storage.fail_appends(false);
    let outcome = alice.send("east").await.unwrap();
    assert!(outcome.is_executed());
    assert_eq!(outcome.event, before.last_event.map(|id| EventId(id.0 + 1)));
    assert_in_room(&harness.snapshot().await, "alice", "garden");
}

fn before_count(snapshot: &Snapshot) -> usize {
    snapshot.last_event.map(|id| id.0 as usize).unwrap_or(0)
}

async fn open_on(dir: &std::path::Path, config: WorldConfig) -> Arc<Realm> {
    let storage = Arc::new(FileStorage::open(dir).await.unwrap());
    let realm = Realm::builder()
        .with_config(config)
        .with_storage(storage)
        .open()
        .await
        .unwrap();
    Arc::new(realm)
}

#[tokio::test]
async fn test_restart_recovers_snapshot_and_tail() {
    let dir = tempfile::tempdir().unwrap();
    let config = WorldConfig::default().with_snapshot_every(0);

    let before = {
        let realm = open_on(dir.path(), config.clone()).await;
        let (alice, _) = Session::open(realm.clone(), "Alice", EntityKind::Daemon)
            .await
            .unwrap();
        alice
            .run_script(["east", "say hello", "down", "reflect"])
            .await
            .unwrap();
        realm.snapshot().await
    };
    assert_eq!(before.last_event, Some(EventId(9)));

    // Only the hosts' arrivals were folded into the snapshot at open.
    let on_disk = Snapshot::load_json(dir.path().join("snapshot.json"))
        .await
        .unwrap();
    assert_eq!(on_disk.last_event, Some(EventId(4)));

    let realm = open_on(dir.path(), config).await;
    let after = realm.snapshot().await;
    assert_eq!(after.world, before.world);
    assert_eq!(after.last_event, before.last_event);
    assert_eq!(realm.event_count().await, 9);
    assert_in_room(&after, "alice", "reflection-pool");

    // The returning visitor picks up where they left off.
    let (alice, arrival) = Session::open(realm.clone(), "Alice", EntityKind::Daemon)
        .await
        .unwrap();
    assert_eq!(arrival.status, Status::Observed);
    assert!(alice.send("up").await.unwrap().is_executed());
    assert_eq!(realm.event_count().await, 10);
}

#[tokio::test]
async fn test_torn_log_tail_is_dropped_on_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = WorldConfig::default().with_snapshot_every(0);
    {
        let realm = open_on(dir.path(), config.clone()).await;
        let (alice, _) = Session::open(realm, "Alice", EntityKind::Daemon)
            .await
            .unwrap();
        alice.send("east").await.unwrap();
    }

    let mut log = tokio::fs::OpenOptions::new()
        .append(true)
        .open(dir.path().join("witness.jsonl"))
        .await
        .unwrap();
    log.write_all(b"{\"id\":7,\"at\":").await.unwrap();
    log.flush().await.unwrap();
    drop(log);

    let realm = open_on(dir.path(), config).await;
    assert_eq!(realm.event_count().await, 6);
    let snapshot = realm.snapshot().await;
    assert_in_room(&snapshot, "alice", "garden");
}

#[tokio::test]
async fn test_reopen_over_memory_storage_matches() {
    let harness = TestHarness::new().await.unwrap();
    let alice = harness.join("Alice").await.unwrap();
    alice.run_script(["down", "down", "east"]).await.unwrap();
    let before = harness.snapshot().await;

    let reopened = TestHarness::reopen(RealmBuilder::new(), harness.storage.clone())
        .await
        .unwrap();
    let after = reopened.snapshot().await;
    assert_eq!(after.world, before.world);
    assert_eq!(reopened.events().await, harness.events().await);
    assert_in_room(&after, "alice", "looking-glass");
}

#[tokio::test]
async fn test_checkpoint_covers_latest_event() {
    let dir = tempfile::tempdir().unwrap();
    let realm = open_on(dir.path(), WorldConfig::default().with_snapshot_every(0)).await;
    let (alice, _) = Session::open(realm.clone(), "Alice", EntityKind::Daemon)
        .await
        .unwrap();
    alice.send("east").await.unwrap();

    let last = realm.checkpoint().await.unwrap();
    assert_eq!(last, Some(EventId(6)));
    let on_disk = Snapshot::load_json(dir.path().join("snapshot.json"))
        .await
        .unwrap();
    assert_eq!(on_disk.last_event, last);
    assert!(on_disk.topology.is_some());
}
