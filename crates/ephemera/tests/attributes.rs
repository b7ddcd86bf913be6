//! Attribute grants end to end: grant, schedule, push, pull, revoke.

use std::sync::Arc;

use ephemera::core::{DataType, ItemKey, Keypair, SecretSeed, TimeSpan};
use ephemera::dht::{DummyDht, MemoryDht};
use ephemera::engine::{Action, EngineConfig, Job, PushOutcome, UpdateExecutor};
use ephemera::store::{DocumentStore, MemoryStore, SqliteStore};
use ephemera::PulledComponent;
use ephemera_testkit::fixtures::{TestAuthority, BASE_TIME, HOUR, MINUTE};

const SEED: &[u8] = b"0123456789abcdef0123456789abcdef";

fn locations(count: usize) -> Vec<ephemera::core::Location> {
    ItemKey::derive(&SecretSeed::from_slice(SEED), "clearance", "MemoryDHT").locations(count, 20)
}

fn memory() -> TestAuthority {
    TestAuthority::new()
}

async fn pull(h: &TestAuthority) -> PulledComponent {
    h.authority
        .puller()
        .fetch_attribute_component(&SecretSeed::from_slice(SEED), "clearance=top")
        .await
        .unwrap()
}

#[tokio::test]
async fn test_grant_is_pushed_and_pulled() {
    let h = memory();
    h.authority
        .grant_attribute("alice", "clearance=top", SEED, b"abe component", 3, vec![])
        .await
        .unwrap();

    assert_eq!(pull(&h).await, PulledComponent::Unavailable);
    h.advance(5_000).await;

    assert_eq!(
        pull(&h).await,
        PulledComponent::Component {
            bytes: b"abe component".to_vec(),
            serialized_version: 3,
            verified: true,
        }
    );
    assert_eq!(h.dht.len().await, 7);
}

#[tokio::test]
async fn test_revoke_leaves_signed_markers_and_purges() {
    let h = memory();
    let id = h
        .authority
        .grant_attribute("alice", "clearance=top", SEED, b"abe component", 1, vec![])
        .await
        .unwrap();
    h.advance(5_000).await;

    h.authority.revoke_attribute(id).await.unwrap();
    let reports = h.advance(5_000).await;

    assert!(reports.iter().any(|r| r.purged == vec![id]));
    assert_eq!(pull(&h).await, PulledComponent::Revoked);
    assert!(h.authority.record(id).await.unwrap().is_none());

    // A second revoke finds nothing.
    assert!(h.authority.revoke_attribute(id).await.is_err());
}

#[tokio::test]
async fn test_timed_grant_starts_and_stops_between_main_events() {
    let h = memory();
    let span = TimeSpan::new(BASE_TIME + 30 * MINUTE, Some(BASE_TIME + 3 * HOUR), true).unwrap();
    h.authority
        .grant_attribute("alice", "clearance", SEED, b"c", 1, vec![span])
        .await
        .unwrap();

    h.advance(5_000).await;
    assert_eq!(pull(&h).await, PulledComponent::Unavailable);
    assert_eq!(h.timer.count(Job::BetweenEvent(BASE_TIME + 30 * MINUTE)), 2);

    h.advance_to(BASE_TIME + 31 * MINUTE).await;
    assert!(matches!(pull(&h).await, PulledComponent::Component { .. }));

    h.advance_to(BASE_TIME + 3 * HOUR + MINUTE).await;
    assert_eq!(pull(&h).await, PulledComponent::Revoked);
}

#[tokio::test]
async fn test_pull_survives_tampered_replicas() {
    let h = memory();
    h.authority
        .grant_attribute("alice", "clearance", SEED, b"component", 1, vec![])
        .await
        .unwrap();
    h.advance(5_000).await;

    let locs = locations(7);
    for loc in &locs[..6] {
        assert!(h.dht.tamper(loc, |v| v[25] ^= 0x80).await);
    }
    assert!(matches!(pull(&h).await, PulledComponent::Component { verified: true, .. }));

    h.dht.tamper(&locs[6], |v| v[25] ^= 0x80).await;
    assert_eq!(pull(&h).await, PulledComponent::Unavailable);
}

#[tokio::test]
async fn test_repeated_changes_debounce_into_one_push() {
    let h = memory();
    let id = h
        .authority
        .grant_attribute("alice", "clearance", SEED, b"c", 1, vec![])
        .await
        .unwrap();
    h.authority
        .update_timespans(id, vec![TimeSpan::open(BASE_TIME - HOUR)])
        .await
        .unwrap();
    h.authority
        .update_timespans(id, vec![TimeSpan::open(BASE_TIME - 2 * HOUR)])
        .await
        .unwrap();

    assert_eq!(h.timer.count(Job::ReevaluationDrain), 1);
    assert_eq!(h.authority.scheduler().inbox_len(), 3);

    let drain = h
        .authority
        .scheduler()
        .drain_reevaluation_inbox()
        .await
        .unwrap();
    assert_eq!(drain.pushed, vec![id]);
    assert_eq!(h.dht.push_calls(), 1);

    let record = h.authority.record(id).await.unwrap().unwrap();
    assert_eq!(record.timespans, vec![TimeSpan::open(BASE_TIME - 2 * HOUR)]);
}

#[tokio::test]
async fn test_outage_requeues_until_store_returns() {
    let h = memory();
    let id = h
        .authority
        .grant_attribute("alice", "clearance", SEED, b"c", 1, vec![])
        .await
        .unwrap();

    h.dht.set_offline(true);
    let reports = h.advance(5_000).await;
    assert!(reports.iter().any(|r| r.failed.contains(&id)));
    assert!(h.authority.scheduler().drain_armed());

    h.dht.set_offline(false);
    let reports = h.advance(5_000).await;
    assert!(reports.iter().any(|r| r.pushed == vec![id]));
    assert!(matches!(pull(&h).await, PulledComponent::Component { .. }));
}

#[tokio::test]
async fn test_deletion_push_is_idempotent() {
    let dht = Arc::new(MemoryDht::new());
    let exec = UpdateExecutor::new(
        dht.clone(),
        Arc::new(Keypair::from_seed(&[42; 32])),
        EngineConfig::default(),
    )
    .unwrap();
    let record = ephemera::core::ExpirableRecord::attribute(
        ephemera::core::AttributeGrant {
            user_id: "alice".into(),
            name: "clearance".into(),
            secret_seed: SecretSeed::from_slice(SEED),
            component: b"c".to_vec(),
            serialized_version: 1,
        },
        vec![TimeSpan::open(0)],
    );
    let loc = &locations(1)[0];

    assert_eq!(exec.execute(&record, Action::Stop).await.unwrap(), PushOutcome::Pushed);
    let first = dht.value(loc).await.unwrap();
    assert_eq!(exec.execute(&record, Action::Stop).await.unwrap(), PushOutcome::Pushed);
    let second = dht.value(loc).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first[0], DataType::Deletion.as_u8());
}

#[tokio::test]
async fn test_dummy_backend_keeps_record_queued() {
    let h = TestAuthority::with_stores(MemoryStore::new(), DummyDht::new());
    let id = h
        .authority
        .grant_attribute("alice", "clearance", SEED, b"c", 1, vec![])
        .await
        .unwrap();

    let reports = h.advance(5_000).await;
    assert!(reports.iter().all(|r| r.pushed.is_empty()));
    assert!(reports.iter().any(|r| r.failed.contains(&id)));
    assert!(h.authority.record(id).await.unwrap().is_some());
    assert!(h.authority.scheduler().drain_armed());
}

#[tokio::test]
async fn test_sqlite_grants_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("authority.db");

    let id = {
        let h = TestAuthority::with_stores(SqliteStore::open(&path).unwrap(), MemoryDht::new());
        h.authority
            .grant_attribute("alice", "clearance", SEED, b"persisted", 1, vec![])
            .await
            .unwrap()
    };

    let h = TestAuthority::with_stores(SqliteStore::open(&path).unwrap(), MemoryDht::new());
    assert_eq!(h.authority.store().record_count().await.unwrap(), 1);

    let reports = h.advance(5_000).await;
    assert!(reports.iter().any(|r| r.pushed == vec![id]));

    let pulled = h
        .authority
        .puller()
        .fetch_attribute_component(&SecretSeed::from_slice(SEED), "clearance")
        .await
        .unwrap();
    assert!(matches!(pulled, PulledComponent::Component { ref bytes, .. } if bytes == b"persisted"));
}
