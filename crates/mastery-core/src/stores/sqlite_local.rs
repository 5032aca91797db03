//! SQLite-backed local durable store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{MasteryError, MasteryResult};
use crate::traits::LocalDurableStore;

/// Key/value table in a SQLite database on the device.
///
/// Holds the guest state and the offline backup, so it must survive restarts.
pub struct SqliteLocalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLocalStore {
    /// Open (or create) the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> MasteryResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> MasteryResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> MasteryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MasteryError::local_store(e.to_string()))
    }

    fn init_schema(&self) -> MasteryResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS local_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(())
    }
}

impl LocalDurableStore for SqliteLocalStore {
    fn get(&self, key: &str) -> MasteryResult<Option<String>> {
        let conn = self.lock()?;
        let value = conn
            .query_row(
                "SELECT value FROM local_kv WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> MasteryResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO local_kv (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> MasteryResult<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM local_kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}
