use std::collections::HashMap;

use chrono::{DateTime, Utc};

mod blackhole;
#[cfg(feature = "in-memory")]
mod mem;
#[cfg(feature = "redis-db")]
mod redis_store;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use blackhole::BlackHoleStorage;
#[cfg(feature = "in-memory")]
pub use mem::MemoryStorage;
#[cfg(feature = "redis-db")]
pub use redis_store::{RedisStorage, RedisStorageConfig};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteStorage, SqliteStorageConfig};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("redis error: {0}")]
    Redis(String),
    #[error("sqlite error: {0}")]
    Sqlite(String),
    #[error("broker unavailable, giving up after {0} consecutive errors")]
    ErrorBudgetExhausted(usize),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Broker abstraction the dispatcher is written against.
///
/// Three data structures live behind one handle: a FIFO queue of opaque task
/// payloads, a schedule sorted by ETA, and a key/value store holding results,
/// revocation records and locks.
///
/// Absence is always `None`; a stored serialized null comes back as
/// `Some(bytes)`. Implementations must preserve FIFO order for enqueues and
/// ETA order (with a deterministic tie-break) for the schedule.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// The queue name this handle is scoped to.
    fn name(&self) -> &str;

    async fn enqueue(&self, data: Vec<u8>) -> StorageResult<()>;

    /// Remove and return the oldest queued payload. Drivers may block up to
    /// a configured read timeout or return `None` immediately.
    async fn dequeue(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Non-destructive view of queued payloads, oldest first.
    async fn enqueued_items(&self, limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>>;

    async fn queue_size(&self) -> StorageResult<usize>;

    async fn add_to_schedule(&self, data: Vec<u8>, eta: DateTime<Utc>) -> StorageResult<()>;

    /// Atomically remove and return every entry with `eta <= now`, in ETA
    /// order.
    async fn read_schedule(&self, now: DateTime<Utc>) -> StorageResult<Vec<Vec<u8>>>;

    async fn scheduled_items(&self, limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>>;

    async fn schedule_size(&self) -> StorageResult<usize>;

    async fn put_data(&self, key: &str, value: Vec<u8>) -> StorageResult<()>;

    async fn peek_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    async fn pop_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Store `value` only if `key` is currently absent. Returns whether the
    /// write happened. This is the primitive task locks are built on, so it
    /// must be atomic across processes.
    async fn put_if_empty(&self, key: &str, value: Vec<u8>) -> StorageResult<bool>;

    async fn delete_data(&self, key: &str) -> StorageResult<bool>;

    async fn result_items(&self) -> StorageResult<HashMap<String, Vec<u8>>>;

    async fn result_store_size(&self) -> StorageResult<usize>;

    async fn flush_queue(&self) -> StorageResult<()>;

    async fn flush_schedule(&self) -> StorageResult<()>;

    async fn flush_results(&self) -> StorageResult<()>;

    async fn flush_all(&self) -> StorageResult<()> {
        self.flush_queue().await?;
        self.flush_schedule().await?;
        self.flush_results().await
    }
}
