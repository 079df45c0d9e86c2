#![cfg(feature = "sqlite")]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{Storage, StorageError, StorageResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteStorageConfig {
    pub filename: PathBuf,
}

impl Default for SqliteStorageConfig {
    fn default() -> Self {
        Self {
            filename: PathBuf::from("hopper.db"),
        }
    }
}

/// Sqlite-backed broker. One database file can host any number of queues;
/// every row is scoped by queue name.
pub struct SqliteStorage {
    name: String,
    db: Arc<Mutex<SqliteDb>>,
}

struct SqliteDb {
    conn: Connection,
    queue: String,
}

impl From<rusqlite::Error> for StorageError {
    fn from(error: rusqlite::Error) -> StorageError {
        StorageError::Sqlite(error.to_string())
    }
}

impl SqliteStorage {
    pub fn open(name: impl Into<String>, config: SqliteStorageConfig) -> StorageResult<Self> {
        let name = name.into();
        let conn = Self::open_conn(&config.filename)?;
        Ok(Self {
            db: Arc::new(Mutex::new(SqliteDb {
                conn,
                queue: name.clone(),
            })),
            name,
        })
    }

    fn open_conn(path: &Path) -> StorageResult<Connection> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS task (
                id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                data BLOB NOT NULL);
            CREATE TABLE IF NOT EXISTS schedule (
                id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                data BLOB NOT NULL,
                timestamp INTEGER NOT NULL);
            CREATE INDEX IF NOT EXISTS schedule_queue_timestamp
                ON schedule (queue, timestamp);
            CREATE TABLE IF NOT EXISTS kv (
                queue TEXT NOT NULL,
                key TEXT NOT NULL,
                value BLOB NOT NULL,
                PRIMARY KEY (queue, key));",
        )?;
        Ok(conn)
    }
}

impl SqliteDb {
    fn dequeue(&mut self) -> rusqlite::Result<Option<Vec<u8>>> {
        let tx = self.conn.transaction()?;
        let row: Option<(i64, Vec<u8>)> = tx
            .query_row(
                "SELECT id, data FROM task WHERE queue = ?1 ORDER BY id LIMIT 1",
                params![self.queue],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let data = match row {
            Some((id, data)) => {
                tx.execute("DELETE FROM task WHERE id = ?1", params![id])?;
                Some(data)
            }
            None => None,
        };
        tx.commit()?;
        Ok(data)
    }

    fn read_schedule(&mut self, now: DateTime<Utc>) -> rusqlite::Result<Vec<Vec<u8>>> {
        let ts = now.timestamp_millis();
        let tx = self.conn.transaction()?;
        let due = {
            let mut stmt = tx.prepare(
                "SELECT data FROM schedule
                 WHERE queue = ?1 AND timestamp <= ?2
                 ORDER BY timestamp, id",
            )?;
            let rows = stmt
                .query_map(params![self.queue, ts], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
            rows
        };
        tx.execute(
            "DELETE FROM schedule WHERE queue = ?1 AND timestamp <= ?2",
            params![self.queue, ts],
        )?;
        tx.commit()?;
        Ok(due)
    }

    fn pop_data(&mut self, key: &str) -> rusqlite::Result<Option<Vec<u8>>> {
        let tx = self.conn.transaction()?;
        let value: Option<Vec<u8>> = tx
            .query_row(
                "SELECT value FROM kv WHERE queue = ?1 AND key = ?2",
                params![self.queue, key],
                |row| row.get(0),
            )
            .optional()?;
        if value.is_some() {
            tx.execute(
                "DELETE FROM kv WHERE queue = ?1 AND key = ?2",
                params![self.queue, key],
            )?;
        }
        tx.commit()?;
        Ok(value)
    }
}

#[async_trait::async_trait]
impl Storage for SqliteStorage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, data: Vec<u8>) -> StorageResult<()> {
        let db = self.db.lock().await;
        db.conn.execute(
            "INSERT INTO task (queue, data) VALUES (?1, ?2)",
            params![db.queue, data],
        )?;
        Ok(())
    }

    async fn dequeue(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.lock().await.dequeue()?)
    }

    async fn enqueued_items(&self, limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>> {
        let db = self.db.lock().await;
        let mut stmt = db.conn.prepare(
            "SELECT data FROM task WHERE queue = ?1 ORDER BY id LIMIT ?2",
        )?;
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let items = stmt
            .query_map(params![db.queue, limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
        Ok(items)
    }

    async fn queue_size(&self) -> StorageResult<usize> {
        let db = self.db.lock().await;
        let count: i64 = db.conn.query_row(
            "SELECT COUNT(*) FROM task WHERE queue = ?1",
            params![db.queue],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn add_to_schedule(&self, data: Vec<u8>, eta: DateTime<Utc>) -> StorageResult<()> {
        let db = self.db.lock().await;
        db.conn.execute(
            "INSERT INTO schedule (queue, data, timestamp) VALUES (?1, ?2, ?3)",
            params![db.queue, data, eta.timestamp_millis()],
        )?;
        Ok(())
    }

    async fn read_schedule(&self, now: DateTime<Utc>) -> StorageResult<Vec<Vec<u8>>> {
        Ok(self.db.lock().await.read_schedule(now)?)
    }

    async fn scheduled_items(&self, limit: Option<usize>) -> StorageResult<Vec<Vec<u8>>> {
        let db = self.db.lock().await;
        let mut stmt = db.conn.prepare(
            "SELECT data FROM schedule WHERE queue = ?1 ORDER BY timestamp, id LIMIT ?2",
        )?;
        let limit = limit.map(|n| n as i64).unwrap_or(-1);
        let items = stmt
            .query_map(params![db.queue, limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<Vec<u8>>>>()?;
        Ok(items)
    }

    async fn schedule_size(&self) -> StorageResult<usize> {
        let db = self.db.lock().await;
        let count: i64 = db.conn.query_row(
            "SELECT COUNT(*) FROM schedule WHERE queue = ?1",
            params![db.queue],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn put_data(&self, key: &str, value: Vec<u8>) -> StorageResult<()> {
        let db = self.db.lock().await;
        db.conn.execute(
            "INSERT OR REPLACE INTO kv (queue, key, value) VALUES (?1, ?2, ?3)",
            params![db.queue, key, value],
        )?;
        Ok(())
    }

    async fn peek_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let db = self.db.lock().await;
        let value = db
            .conn
            .query_row(
                "SELECT value FROM kv WHERE queue = ?1 AND key = ?2",
                params![db.queue, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn pop_data(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.db.lock().await.pop_data(key)?)
    }

    async fn put_if_empty(&self, key: &str, value: Vec<u8>) -> StorageResult<bool> {
        let db = self.db.lock().await;
        let inserted = db.conn.execute(
            "INSERT OR IGNORE INTO kv (queue, key, value) VALUES (?1, ?2, ?3)",
            params![db.queue, key, value],
        )?;
        Ok(inserted == 1)
    }

    async fn delete_data(&self, key: &str) -> StorageResult<bool> {
        let db = self.db.lock().await;
        let removed = db.conn.execute(
            "DELETE FROM kv WHERE queue = ?1 AND key = ?2",
            params![db.queue, key],
        )?;
        Ok(removed > 0)
    }

    async fn result_items(&self) -> StorageResult<HashMap<String, Vec<u8>>> {
        let db = self.db.lock().await;
        let mut stmt = db
            .conn
            .prepare("SELECT key, value FROM kv WHERE queue = ?1")?;
        let items = stmt
            .query_map(params![db.queue], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<HashMap<String, Vec<u8>>>>()?;
        Ok(items)
    }

    async fn result_store_size(&self) -> StorageResult<usize> {
        let db = self.db.lock().await;
        let count: i64 = db.conn.query_row(
            "SELECT COUNT(*) FROM kv WHERE queue = ?1",
            params![db.queue],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    async fn flush_queue(&self) -> StorageResult<()> {
        let db = self.db.lock().await;
        db.conn
            .execute("DELETE FROM task WHERE queue = ?1", params![db.queue])?;
        Ok(())
    }

    async fn flush_schedule(&self) -> StorageResult<()> {
        let db = self.db.lock().await;
        db.conn
            .execute("DELETE FROM schedule WHERE queue = ?1", params![db.queue])?;
        Ok(())
    }

    async fn flush_results(&self) -> StorageResult<()> {
        let db = self.db.lock().await;
        db.conn
            .execute("DELETE FROM kv WHERE queue = ?1", params![db.queue])?;
        Ok(())
    }
}
