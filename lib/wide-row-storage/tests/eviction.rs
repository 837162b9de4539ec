mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Engine, Pet, config};
use wide_row_storage::{
    ConnectionStatus, ManualClock, MemoryDatastore, StorageError, StoreConfig, StoreManager,
};

fn rex() -> Pet {
    Pet {
        key: "rex".into(),
        species: "dog".into(),
        age: 3,
    }
}

#[tokio::test]
async fn idle_connections_are_evicted_after_the_timeout() {
    let clock = Arc::new(ManualClock::new(1_000));
    let datastore = MemoryDatastore::strict();
    let store = StoreManager::open_with_clock(datastore.clone(), config(), clock.clone()).unwrap();
    let engine = Engine::new(store.clone());

    engine.handler.insert_object(&engine, &rex()).await.unwrap();
    assert_eq!(store.pool().len(), 1);

    clock.advance(Duration::from_millis(29_999));
    let outcome = store.pool().evict_expired().await;
    assert_eq!(outcome.evicted, 0);

    clock.advance(Duration::from_millis(1));
    let outcome = store.pool().evict_expired().await;
    assert_eq!(outcome.evicted, 1);
    assert!(outcome.failures.is_empty());
    assert!(store.pool().is_empty());
    assert_eq!(datastore.stats().closes, 1);

    // The next operation simply opens a fresh connection.
    assert!(engine.handler.locate_object(&rex()).await.unwrap());
    assert_eq!(store.pool().len(), 1);
}

#[tokio::test]
async fn idle_connection_is_reused_before_its_deadline() {
    let clock = Arc::new(ManualClock::new(0));
    let store = StoreManager::open_with_clock(MemoryDatastore::new(), config(), clock.clone())
        .unwrap();

    let first = store.connection().await.unwrap();
    let id = first.id();
    first.release().unwrap();

    clock.advance(Duration::from_secs(10));
    let again = store.connection().await.unwrap();
    assert_eq!(again.id(), id);
    assert_eq!(again.status(), ConnectionStatus::Active(1));
    again.release().unwrap();
    assert_eq!(store.pool().len(), 1);
}

#[tokio::test]
async fn extra_release_is_a_usage_error() {
    let store = StoreManager::open(MemoryDatastore::new(), config()).unwrap();
    let connection = store.pool().acquire().unwrap();

    connection.release().unwrap();
    let err = connection.release().unwrap_err();
    assert!(matches!(err, StorageError::Usage(message) if message.contains("release()")));
}

#[tokio::test]
async fn background_evictor_runs_on_the_runtime() {
    let datastore = MemoryDatastore::new();
    let store = StoreManager::open(
        datastore.clone(),
        StoreConfig::new()
            .idle_timeout(Duration::from_millis(20))
            .eviction_interval(Duration::from_millis(10)),
    )
    .unwrap();
    let engine = Engine::new(store.clone());
    engine.handler.insert_object(&engine, &rex()).await.unwrap();

    let mut waited = Duration::ZERO;
    while !store.pool().is_empty() && waited < Duration::from_secs(5) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert!(store.pool().is_empty());
    assert_eq!(datastore.stats().closes, 1);

    store.close().await.unwrap();
}

#[tokio::test]
async fn maximum_idle_timeout_never_expires() {
    let config = StoreConfig::from_json(
        r#"{"idleTimeoutMillis": 18446744073709551615, "evictionIntervalMillis": 0}"#,
    )
    .unwrap();
    let clock = Arc::new(ManualClock::new(1_000));
    let store = StoreManager::open_with_clock(MemoryDatastore::new(), config, clock.clone()).unwrap();

    let connection = store.connection().await.unwrap();
    let id = connection.id();
    connection.release().unwrap();

    clock.advance(Duration::from_secs(365 * 24 * 3_600));
    assert_eq!(store.pool().evict_expired().await.evicted, 0);
    let again = store.connection().await.unwrap();
    assert_eq!(again.id(), id);
    again.release().unwrap();
}
