use chrono::{TimeDelta, Utc};
use hopper_storage::Storage;

async fn exercise_queue(storage: &dyn Storage) {
    assert_eq!(storage.queue_size().await.unwrap(), 0);
    assert_eq!(storage.dequeue().await.unwrap(), None);

    for item in [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()] {
        storage.enqueue(item).await.unwrap();
    }
    assert_eq!(storage.queue_size().await.unwrap(), 3);
    assert_eq!(
        storage.enqueued_items(Some(2)).await.unwrap(),
        vec![b"a".to_vec(), b"b".to_vec()]
    );

    // FIFO order, and inspection did not consume anything.
    assert_eq!(storage.dequeue().await.unwrap(), Some(b"a".to_vec()));
    assert_eq!(storage.dequeue().await.unwrap(), Some(b"b".to_vec()));
    assert_eq!(storage.dequeue().await.unwrap(), Some(b"c".to_vec()));
    assert_eq!(storage.dequeue().await.unwrap(), None);
}

async fn exercise_schedule(storage: &dyn Storage) {
    let now = Utc::now();
    storage
        .add_to_schedule(b"later".to_vec(), now + TimeDelta::minutes(5))
        .await
        .unwrap();
    storage
        .add_to_schedule(b"first".to_vec(), now - TimeDelta::minutes(1))
        .await
        .unwrap();
    storage
        .add_to_schedule(b"second".to_vec(), now)
        .await
        .unwrap();
    assert_eq!(storage.schedule_size().await.unwrap(), 3);
    assert_eq!(
        storage.scheduled_items(Some(1)).await.unwrap(),
        vec![b"first".to_vec()]
    );

    // Due entries come back in ETA order and are removed atomically.
    let due = storage.read_schedule(now).await.unwrap();
    assert_eq!(due, vec![b"first".to_vec(), b"second".to_vec()]);
    assert_eq!(storage.schedule_size().await.unwrap(), 1);
    assert!(storage.read_schedule(now).await.unwrap().is_empty());

    let due = storage
        .read_schedule(now + TimeDelta::minutes(10))
        .await
        .unwrap();
    assert_eq!(due, vec![b"later".to_vec()]);
}

async fn exercise_kv(storage: &dyn Storage) {
    assert_eq!(storage.peek_data("missing").await.unwrap(), None);
    assert_eq!(storage.pop_data("missing").await.unwrap(), None);

    storage.put_data("k", b"v1".to_vec()).await.unwrap();
    storage.put_data("k", b"v2".to_vec()).await.unwrap();
    assert_eq!(storage.peek_data("k").await.unwrap(), Some(b"v2".to_vec()));
    assert_eq!(storage.result_store_size().await.unwrap(), 1);

    // A stored serialized null is a value, not absence.
    storage.put_data("null", b"null".to_vec()).await.unwrap();
    assert_eq!(
        storage.peek_data("null").await.unwrap(),
        Some(b"null".to_vec())
    );

    // Pop removes, peek does not.
    assert_eq!(storage.pop_data("k").await.unwrap(), Some(b"v2".to_vec()));
    assert_eq!(storage.peek_data("k").await.unwrap(), None);

    assert!(storage.put_if_empty("lock", b"1".to_vec()).await.unwrap());
    assert!(!storage.put_if_empty("lock", b"2".to_vec()).await.unwrap());
    assert!(storage.delete_data("lock").await.unwrap());
    assert!(!storage.delete_data("lock").await.unwrap());
    assert!(storage.put_if_empty("lock", b"2".to_vec()).await.unwrap());

    let items = storage.result_items().await.unwrap();
    assert_eq!(items.get("null"), Some(&b"null".to_vec()));

    storage.flush_all().await.unwrap();
    assert_eq!(storage.result_store_size().await.unwrap(), 0);
    assert_eq!(storage.queue_size().await.unwrap(), 0);
    assert_eq!(storage.schedule_size().await.unwrap(), 0);
}

async fn conformance(storage: &dyn Storage) {
    exercise_queue(storage).await;
    exercise_schedule(storage).await;
    exercise_kv(storage).await;
}

#[tokio::test]
async fn test_memory_storage_conformance() {
    let storage = hopper_storage::MemoryStorage::new("conformance");
    conformance(&storage).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_storage_conformance() {
    let dir = tempfile::tempdir().unwrap();
    let config = hopper_storage::SqliteStorageConfig {
        filename: dir.path().join("hopper.db"),
    };
    let storage = hopper_storage::SqliteStorage::open("conformance", config).unwrap();
    conformance(&storage).await;
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_sqlite_queues_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let config = hopper_storage::SqliteStorageConfig {
        filename: dir.path().join("hopper.db"),
    };
    let a = hopper_storage::SqliteStorage::open("a", config.clone()).unwrap();
    let b = hopper_storage::SqliteStorage::open("b", config).unwrap();

    a.enqueue(b"only-a".to_vec()).await.unwrap();
    a.put_data("k", b"va".to_vec()).await.unwrap();
    assert_eq!(b.queue_size().await.unwrap(), 0);
    assert_eq!(b.peek_data("k").await.unwrap(), None);
    assert_eq!(a.dequeue().await.unwrap(), Some(b"only-a".to_vec()));
}

// Requires a live redis server; run with
// `cargo test -p hopper-storage --features redis-db -- --ignored`.
#[cfg(feature = "redis-db")]
#[ignore]
#[tokio::test]
async fn test_redis_storage_conformance() {
    let config = hopper_storage::RedisStorageConfig::default();
    let storage = hopper_storage::RedisStorage::open("conformance", config).unwrap();
    storage.flush_all().await.unwrap();
    conformance(&storage).await;
}

#[tokio::test]
async fn test_black_hole_discards() {
    let storage = hopper_storage::BlackHoleStorage::new("void");
    storage.enqueue(b"gone".to_vec()).await.unwrap();
    assert_eq!(storage.queue_size().await.unwrap(), 0);
    assert_eq!(storage.dequeue().await.unwrap(), None);
    storage.put_data("k", b"v".to_vec()).await.unwrap();
    assert_eq!(storage.peek_data("k").await.unwrap(), None);
}
