//! Durable key-value store used to persist the offline request list.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::{CourierError, Result};
use std::collections::HashMap;
use std::sync::Mutex;

/// Process-wide string store that survives restarts.
///
/// All operations are synchronous to match rusqlite's API.
pub trait DurableStore: Send + Sync {
    /// Read the blob stored under `key`.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;
}

/// Volatile store for tests and ephemeral use.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries.lock().map_err(|e| CourierError::Store {
            message: format!("Failed to lock memory store: {}", e),
            source: None,
        })
    }
}

impl DurableStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}
