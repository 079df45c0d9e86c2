#![cfg(feature = "redis-db")]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use backoff::ExponentialBackoff;
use chrono::{DateTime, Utc};
use redis::{Client, Commands, Connection, RedisError, RedisResult};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{Storage, StorageError, StorageResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStorageConfig {
    pub url: String,
    /// Use BLPOP with `read_timeout_secs` instead of a non-blocking LPOP.
    pub blocking: bool,
    pub read_timeout_secs: u64,
    /// Consecutive-error budget. Once this many operations in a row have
    /// failed the driver reports a fatal error so the consumer can bail out.
    pub max_errors: usize,
}

impl Default for RedisStorageConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            blocking: false,
            read_timeout_secs: 1,
            max_errors: 1000,
        }
    }
}

/// Redis-backed broker: the queue is a list, the schedule a sorted set
/// scored by ETA millis, and the result store a hash.
pub struct RedisStorage {
    name: String,
    client: Mutex<Client>,
    config: RedisStorageConfig,
    errors: AtomicUsize,
    queue_key: String,
    schedule_key: String,
    results_key: String,
}

impl From<RedisError> for StorageError {
    fn from(error: RedisError) -> StorageError {
        StorageError::Redis(error.to_string())
    }
}

impl RedisStorage {
    pub fn open(name: impl Into<String>, config: RedisStorageConfig) -> StorageResult<Self> {
        let name = name.into();
        let client = Client::open(config.url.as_str())?;
        Ok(Self {
            queue_key: format!("hopper.queue.{name}"),
            schedule_key: format!("hopper.schedule.{name}"),
            results_key: format!("hopper.results.{name}"),
            name,
            client: Mutex::new(client),
            config,
            errors: AtomicUsize::new(0),
        })
    }

    fn conn(&self) -> RedisResult<Connection> {
        let backoff = ExponentialBackoff {
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(10),
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let mut client = self.client.lock().expect("redis client lock poisoned");
        backoff::retry(backoff, || match client.get_connection() {
            Ok(conn) => Ok(conn),
            Err(e) => {
                error!("failed to connect to redis: {e:?}, retrying");
                *client = Client::open(self.config.url.as_str())?;
                Err(backoff::Error::Transient {
                    err: e,
                    retry_after: None,
                })
            }
        })
        .map_err(|e| match e {
            backoff::Error::Transient { err, .. } | backoff::Error::Permanent(err) => err,
        })
    }

    /// Track consecutive failures against the configured error budget.
    fn track<T>(&self, result: RedisResult<T>) -> StorageResult<T> {
        match result {
            Ok(value) => {
                self.errors.store(0, Ordering::Relaxed);
                Ok(value)
            }
            Err(e) => {
                let seen = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
                if seen >= self.config.max_errors {
                    error!("redis error budget exhausted after {seen} errors: {e:?}");
                    Err(StorageError::ErrorBudgetExhausted(seen))
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Storage for RedisStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, data: Vec<u8>) -> StorageResult<()> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.rpush(&self.queue_key, data))
    }

    async fn dequeue(&self) -> StorageResult<Option<Vec<u8>>> {
        let mut conn = self.track(self.conn())?;
        if self.config.blocking {
            let popped: Option<(String, Vec<u8>)> = self.track(
                conn.blpop(&self.queue_key, self.config.read_timeout_secs as f64),
            )?;
            Ok(popped.map(|(_, data)| data))
        } else {
            self.track(conn.lpop(&self.queue_key, None))
        }
    }

    async fn enqueued_items(&self, limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>> {
        let stop = limit.map(|n| n as isize - 1).unwrap_or(-1);
        let mut conn = self.track(self.conn())?;
        self.track(conn.lrange(&self.queue_key, 0, stop))
    }

    async fn queue_size(&self) -> StorageResult<usize> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.llen(&self.queue_key))
    }

    async fn add_to_schedule(&self, data: Vec<u8>, eta: DateTime<Utc>) -> StorageResult<()> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.zadd(&self.schedule_key, data, eta.timestamp_millis()))
    }

    async fn read_schedule(&self, now: DateTime<Utc>) -> StorageResult<Vec<Vec<u8>>> {
        let mut conn = self.track(self.conn())?;
        // Fetch and trim in one atomic transaction so concurrent readers
        // never hand out the same entry twice.
        let result: RedisResult<(Vec<Vec<u8>>, usize)> = redis::pipe()
            .atomic()
            .cmd("ZRANGEBYSCORE")
            .arg(&self.schedule_key)
            .arg("-inf")
            .arg(now.timestamp_millis())
            .cmd("ZREMRANGEBYSCORE")
            .arg(&self.schedule_key)
            .arg("-inf")
            .arg(now.timestamp_millis())
            .query(&mut conn);
        Ok(self.track(result)?.0)
    }

    async fn scheduled_items(&self, limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>> {
        let stop = limit.map(|n| n as isize - 1).unwrap_or(-1);
        let mut conn = self.track(self.conn())?;
        self.track(conn.zrange(&self.schedule_key, 0, stop))
    }

    async fn schedule_size(&self) -> StorageResult<usize> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.zcard(&self.schedule_key))
    }

    async fn put_data(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.hset(&self.results_key, key, value))
    }

    async fn peek_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.hget(&self.results_key, key))
    }

    async fn pop_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let mut conn = self.track(self.conn())?;
        let result: RedisResult<(Option<Vec<u8>>, usize)> = redis::pipe()
            .atomic()
            .hget(&self.results_key, key)
            .hdel(&self.results_key, key)
            .query(&mut conn);
        Ok(self.track(result)?.0)
    }

    async fn put_if_empty(&self, key: &str, value: Vec<u8>) -> StorageResult<bool> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.hset_nx(&self.results_key, key, value))
    }

    async fn delete_data(&self, key: &str) -> StorageResult<bool> {
        let mut conn = self.track(self.conn())?;
        let removed: usize = self.track(conn.hdel(&self.results_key, key))?;
        Ok(removed > 0)
    }

    async fn result_items(&self) -> StorageResult<HashMap<String, Vec<u8>>> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.hgetall(&self.results_key))
    }

    async fn result_store_size(&self) -> StorageResult<usize> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.hlen(&self.results_key))
    }

    async fn flush_queue(&self) -> StorageResult<()> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.del(&self.queue_key))
    }

    async fn flush_schedule(&self) -> StorageResult<()> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.del(&self.schedule_key))
    }

    async fn flush_results(&self) -> StorageResult<()> {
        let mut conn = self.track(self.conn())?;
        self.track(conn.del(&self.results_key))
    }
}
