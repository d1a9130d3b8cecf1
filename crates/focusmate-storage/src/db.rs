//! SQLite-backed key-value store.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::error::StorageError;
use crate::migrations;
use crate::store::{entry_size, KeyValueStore};

/// Database connection wrapper
pub struct SqliteStore {
    conn: Mutex<Connection>,
    quota: Option<usize>,
}

impl SqliteStore {
    /// Open (or create) the store at `db_path`, defaulting to the data directory
    ///
    /// # Errors
    ///
    /// Returns an error if directory creation, connection opening, or schema initialization fails
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = db_path.unwrap_or_else(Self::default_db_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&path).context("Failed to open database connection")?;
        migrations::init_schema(&conn)?;

        log::info!("Database initialized at: {}", path.display());

        Ok(Self {
            conn: Mutex::new(conn),
            quota: None,
        })
    }

    /// In-memory database, mostly for tests and one-shot commands
    ///
    /// # Errors
    ///
    /// Returns an error if schema initialization fails
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quota: None,
        })
    }

    /// Reject writes that would grow the store past `quota` bytes
    #[must_use]
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    fn default_db_path() -> PathBuf {
        let mut path = dirs::data_local_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push("focusmate");
        path.push("focusmate.db");
        path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|e| StorageError::Backend(format!("database lock poisoned: {e}")))
    }

    fn read_value(conn: &Connection, key: &str) -> Result<Option<Value>, StorageError> {
        let raw: Option<String> = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()?;
        raw.map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(StorageError::from)
    }

    fn total_bytes_excluding(
        conn: &Connection,
        items: &HashMap<String, Value>,
    ) -> Result<usize, StorageError> {
        let mut stmt = conn.prepare("SELECT key, LENGTH(CAST(value AS BLOB)) FROM kv")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut total = 0usize;
        for row in rows {
            let (key, len) = row?;
            if !items.contains_key(&key) {
                total += key.len() + usize::try_from(len).unwrap_or(0);
            }
        }
        Ok(total)
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        let conn = self.lock()?;
        let mut values = HashMap::new();
        for key in keys {
            if let Some(value) = Self::read_value(&conn, key)? {
                values.insert((*key).to_string(), value);
            }
        }
        Ok(values)
    }

    async fn set(&self, items: HashMap<String, Value>) -> Result<(), StorageError> {
        let mut conn = self.lock()?;

        if let Some(quota) = self.quota {
            let incoming: usize = items.iter().map(|(key, value)| entry_size(key, value)).sum();
            let needed = Self::total_bytes_excluding(&conn, &items)? + incoming;
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }

        let tx = conn.transaction()?;
        for (key, value) in &items {
            tx.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at",
                params![key, value.to_string()],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for key in keys {
            tx.execute("DELETE FROM kv WHERE key = ?1", [key])?;
        }
        tx.commit()?;
        Ok(())
    }

    async fn bytes_in_use(&self, keys: &[&str]) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let mut total = 0usize;
        for key in keys {
            let len: Option<i64> = conn
                .query_row("SELECT LENGTH(CAST(value AS BLOB)) FROM kv WHERE key = ?1", [key], |row| {
                    row.get(0)
                })
                .optional()?;
            if let Some(len) = len {
                total += key.len() + usize::try_from(len).unwrap_or(0);
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .set(HashMap::from([
                ("a".to_string(), json!({"n": 1})),
                ("b".to_string(), json!("two")),
            ]))
            .await
            .unwrap();

        let values = store.get(&["a", "b", "c"]).await.unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["a"], json!({"n": 1}));

        store.remove(&["a"]).await.unwrap();
        assert!(store.get(&["a"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bytes_in_use_matches_memory_store_estimate() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .set(HashMap::from([("key".to_string(), json!("value"))]))
            .await
            .unwrap();
        // "key" + "\"value\""
        assert_eq!(store.bytes_in_use(&["key"]).await.unwrap(), 3 + 7);
    }

    #[tokio::test]
    async fn test_bytes_in_use_counts_utf8_bytes() {
        let sqlite = SqliteStore::in_memory().unwrap();
        let memory = MemoryStore::new();
        // Five CJK characters, three bytes each
        let reason = json!("\u{4e0e}\u{4efb}\u{52a1}\u{65e0}\u{5173}");
        for store in [&sqlite as &dyn KeyValueStore, &memory] {
            store
                .set(HashMap::from([("reason".to_string(), reason.clone())]))
                .await
                .unwrap();
        }

        let expected = "reason".len() + 2 + 5 * 3;
        assert_eq!(sqlite.bytes_in_use(&["reason"]).await.unwrap(), expected);
        assert_eq!(memory.bytes_in_use(&["reason"]).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_quota_counts_utf8_bytes() {
        // 6 + 2 + 15 bytes fit exactly; one more character does not
        let store = SqliteStore::in_memory().unwrap().with_quota(23);
        store
            .set(HashMap::from([(
                "reason".to_string(),
                json!("\u{4e0e}\u{4efb}\u{52a1}\u{65e0}\u{5173}"),
            )]))
            .await
            .unwrap();

        let err = store
            .set(HashMap::from([("x".to_string(), json!(1))]))
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
    }

    #[tokio::test]
    async fn test_quota_exceeded_leaves_store_untouched() {
        let store = SqliteStore::in_memory().unwrap().with_quota(32);
        store
            .set(HashMap::from([("a".to_string(), json!(1))]))
            .await
            .unwrap();

        let err = store
            .set(HashMap::from([
                ("a".to_string(), json!(2)),
                ("b".to_string(), json!("y".repeat(64))),
            ]))
            .await
            .unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(store.get(&["a"]).await.unwrap()["a"], json!(1));
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("focusmate.db");

        {
            let store = SqliteStore::new(Some(path.clone())).unwrap();
            store
                .set(HashMap::from([("k".to_string(), json!([1, 2, 3]))]))
                .await
                .unwrap();
        }

        let store = SqliteStore::new(Some(path)).unwrap();
        assert_eq!(store.get(&["k"]).await.unwrap()["k"], json!([1, 2, 3]));
    }
}
