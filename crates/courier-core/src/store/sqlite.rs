//! SQLite-backed durable store.

use super::DurableStore;
use crate::error::{CourierError, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Single-table key/value store on SQLite.
///
/// Thread-safe via internal mutex on the connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the store at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CourierError::Io {
                message: format!("Failed to create store directory: {}", e),
                path: Some(parent.to_path_buf()),
                source: Some(e),
            })?;
        }

        let conn = Connection::open(db_path).map_err(|e| CourierError::Store {
            message: format!("Failed to open store database: {}", e),
            source: Some(e),
        })?;

        // Enable WAL mode for concurrent access
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| CourierError::Store {
                message: format!("Failed to set pragmas: {}", e),
                source: Some(e),
            })?;

        let store = Self::from_connection(conn)?;
        debug!("Opened durable store at {}", db_path.display());
        Ok(store)
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kv_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )
        .map_err(|e| CourierError::Store {
            message: format!("Failed to initialize store schema: {}", e),
            source: Some(e),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| CourierError::Store {
            message: format!("Failed to lock database: {}", e),
            source: None,
        })
    }
}

impl DurableStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM kv_entries WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| CourierError::Store {
            message: format!("Failed to read {}: {}", key, e),
            source: Some(e),
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO kv_entries (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = ?2,
                updated_at = ?3
            "#,
            params![key, value, Utc::now().to_rfc3339()],
        )
        .map_err(|e| CourierError::Store {
            message: format!("Failed to write {}: {}", key, e),
            source: Some(e),
        })?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])
            .map_err(|e| CourierError::Store {
                message: format!("Failed to remove {}: {}", key, e),
                source: Some(e),
            })?;
        Ok(())
    }
}
