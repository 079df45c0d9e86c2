use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::{Storage, StorageResult};

/// Broker that discards everything. Useful for producers that fire and
/// forget, and for tests that only exercise the enqueue path.
#[derive(Debug, Clone)]
pub struct BlackHoleStorage {
    name: String,
}

impl BlackHoleStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait::async_trait]
impl Storage for BlackHoleStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, _data: Vec<u8>) -> StorageResult<()> {
        Ok(())
    }

    async fn dequeue(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn enqueued_items(&self, _limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    async fn queue_size(&self) -> StorageResult<usize> {
        Ok(0)
    }

    async fn add_to_schedule(&self, _data: Vec<u8>, _eta: DateTime<Utc>) -> StorageResult<()> {
        Ok(())
    }

    async fn read_schedule(&self, _now: DateTime<Utc>) -> StorageResult<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    async fn scheduled_items(&self, _limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>> {
        Ok(Vec::new())
    }

    async fn schedule_size(&self) -> StorageResult<usize> {
        Ok(0)
    }

    async fn put_data(&self, _key: &str, _value: Vec<u8>) -> StorageResult<()> {
        Ok(())
    }

    async fn peek_data(&self, _key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn pop_data(&self, _key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn put_if_empty(&self, _key: &str, _value: Vec<u8>) -> StorageResult<bool> {
        Ok(true)
    }

    async fn delete_data(&self, _key: &str) -> StorageResult<bool> {
        Ok(false)
    }

    async fn result_items(&self) -> StorageResult<HashMap<String, Vec<u8>>> {
        Ok(HashMap::new())
    }

    async fn result_store_size(&self) -> StorageResult<usize> {
        Ok(0)
    }

    async fn flush_queue(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn flush_schedule(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn flush_results(&self) -> StorageResult<()> {
        Ok(())
    }
}
