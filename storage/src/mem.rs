use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::{Storage, StorageResult};

/// In-process broker. The default for immediate mode and tests; state is
/// lost when the process exits.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    name: String,
    db: Arc<Mutex<MemoryDb>>,
}

#[derive(Debug, Default)]
struct MemoryDb {
    queue: VecDeque<Vec<u8>>,
    // Keyed by (eta millis, insertion seq) so equal ETAs drain FIFO.
    schedule: BTreeMap<(i64, u64), Vec<u8>>,
    seq: u64,
    kv: HashMap<String, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db: Arc::new(Mutex::new(MemoryDb::default())),
        }
    }
}

impl MemoryDb {
    fn read_schedule(&mut self, now: DateTime<Utc>) -> Vec<Vec<u8>> {
        let boundary = (now.timestamp_millis(), u64::MAX);
        let due: Vec<(i64, u64)> = self
            .schedule
            .range(..=boundary)
            .map(|(key, _)| *key)
            .collect();
        due.into_iter()
            .filter_map(|key| self.schedule.remove(&key))
            .collect()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, data: Vec<u8>) -> StorageResult<()> {
        self.db.lock().await.queue.push_back(data);
        Ok(())
    }

    async fn dequeue(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.lock().await.queue.pop_front())
    }

    async fn enqueued_items(&self, limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>> {
        let db = self.db.lock().await;
        let take = limit.unwrap_or(db.queue.len());
        Ok(db.queue.iter().take(take).cloned().collect())
    }

    async fn queue_size(&self) -> StorageResult<usize> {
        Ok(self.db.lock().await.queue.len())
    }

    async fn add_to_schedule(&self, data: Vec<u8>, eta: DateTime<Utc>) -> StorageResult<()> {
        let mut db = self.db.lock().await;
        let seq = db.seq;
        db.seq += 1;
        db.schedule.insert((eta.timestamp_millis(), seq), data);
        Ok(())
    }

    async fn read_schedule(&self, now: DateTime<Utc>) -> StorageResult<Vec<Vec<u8>>> {
        Ok(self.db.lock().await.read_schedule(now))
    }

    async fn scheduled_items(&self, limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>> {
        let db = self.db.lock().await;
        let take = limit.unwrap_or(db.schedule.len());
        Ok(db.schedule.values().take(take).cloned().collect())
    }

    async fn schedule_size(&self) -> StorageResult<usize> {
        Ok(self.db.lock().await.schedule.len())
    }

    async fn put_data(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        self.db.lock().await.kv.insert(key.to_owned(), value);
        Ok(())
    }

    async fn peek_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.lock().await.kv.get(key).cloned())
    }

    async fn pop_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.lock().await.kv.remove(key))
    }

    async fn put_if_empty(&self, key: &str, value: Vec<u8>) -> StorageResult<bool> {
        let mut db = self.db.lock().await;
        if db.kv.contains_key(key) {
            return Ok(false);
        }
        db.kv.insert(key.to_owned(), value);
        Ok(true)
    }

    async fn delete_data(&self, key: &str) -> StorageResult<bool> {
        Ok(self.db.lock().await.kv.remove(key).is_some())
    }

    async fn result_items(&self) -> StorageResult<HashMap<String, Vec<u8>>> {
        Ok(self.db.lock().await.kv.clone())
    }

    async fn result_store_size(&self) -> StorageResult<usize> {
        Ok(self.db.lock().await.kv.len())
    }

    async fn flush_queue(&self) -> StorageResult<()> {
        self.db.lock().await.queue.clear();
        Ok(())
    }

    async fn flush_schedule(&self) -> StorageResult<()> {
        self.db.lock().await.schedule.clear();
        Ok(())
    }

    async fn flush_results(&self) -> StorageResult<()> {
        self.db.lock().await.kv.clear();
        Ok(())
    }
}
