//! File bags end to end: threshold shares pushed, recovered and destroyed.

use ephemera::core::{CoreError, SymmetricKey, TimeSpan};
use ephemera::engine::EngineError;
use ephemera_testkit::fixtures::{TestAuthority, BASE_TIME, HOUR};

const DATA_KEY: [u8; 32] = [0x5a; 32];

fn memory() -> TestAuthority {
    TestAuthority::new()
}

fn insufficient(err: EngineError) -> (usize, usize) {
    match err {
        EngineError::Core(CoreError::InsufficientShares { have, need }) => (have, need),
        other => panic!("expected InsufficientShares, got {other:?}"),
    }
}

#[tokio::test]
async fn test_registered_bag_key_is_recoverable() {
    let h = memory();
    let (_, header) = h
        .authority
        .register_file_bag("bag", vec!["a.enc".into()], &SymmetricKey::from_bytes(DATA_KEY), 4, vec![])
        .await
        .unwrap();

    h.advance(5_000).await;

    let key = h.authority.puller().recover_data_key(&header).await.unwrap();
    assert_eq!(key.as_bytes(), &DATA_KEY);
    assert_eq!(h.dht.len().await, 7);
}

#[tokio::test]
async fn test_recovery_degrades_to_threshold() {
    let h = memory();
    let (_, header) = h
        .authority
        .register_file_bag("bag", vec![], &SymmetricKey::from_bytes(DATA_KEY), 4, vec![])
        .await
        .unwrap();
    h.advance(5_000).await;

    // One lost, two tampered: exactly four valid shares remain.
    h.dht.forget(&header.locations[0]).await;
    h.dht.tamper(&header.locations[1], |v| v[5] ^= 1).await;
    h.dht.tamper(&header.locations[2], |v| v[5] ^= 1).await;

    let puller = h.authority.puller();
    let key = puller.recover_data_key(&header).await.unwrap();
    assert_eq!(key.as_bytes(), &DATA_KEY);

    h.dht.forget(&header.locations[3]).await;
    let err = puller.recover_data_key(&header).await.unwrap_err();
    assert_eq!(insufficient(err), (3, 4));
}

#[tokio::test]
async fn test_deleted_bag_is_unrecoverable() {
    let h = memory();
    let (id, header) = h
        .authority
        .register_file_bag("bag", vec![], &SymmetricKey::from_bytes(DATA_KEY), 2, vec![])
        .await
        .unwrap();
    h.advance(5_000).await;

    h.authority.delete_file_bag(id).await.unwrap();
    let reports = h.advance(5_000).await;
    assert!(reports.iter().any(|r| r.purged == vec![id]));
    assert!(h.authority.record(id).await.unwrap().is_none());

    let err = h.authority.puller().recover_data_key(&header).await.unwrap_err();
    assert_eq!(insufficient(err), (0, 2));
    assert_eq!(h.dht.len().await, 7);
}

#[tokio::test]
async fn test_bag_expires_at_strict_end() {
    let h = memory();
    let span = TimeSpan::new(BASE_TIME - HOUR, Some(BASE_TIME + 2 * HOUR), true).unwrap();
    let (id, header) = h
        .authority
        .register_file_bag("bag", vec![], &SymmetricKey::from_bytes(DATA_KEY), 3, vec![span])
        .await
        .unwrap();

    h.advance(5_000).await;
    assert!(h.authority.puller().recover_data_key(&header).await.is_ok());

    h.advance_to(BASE_TIME + 2 * HOUR + 1).await;
    let err = h.authority.puller().recover_data_key(&header).await.unwrap_err();
    assert_eq!(insufficient(err), (0, 3));

    // Expiry is not deletion; the record stays.
    assert!(h.authority.record(id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_recovery_with_wrong_header_fails_key_check() {
    let h = memory();
    let (_, mut header) = h
        .authority
        .register_file_bag("bag", vec![], &SymmetricKey::from_bytes(DATA_KEY), 2, vec![])
        .await
        .unwrap();
    h.advance(5_000).await;

    header.key_mask[0] ^= 1;
    let err = h.authority.puller().recover_data_key(&header).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::KeyCheckFailed)));
}
