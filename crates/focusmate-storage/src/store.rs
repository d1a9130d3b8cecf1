//! Key-value persistence seam.
//!
//! The assistant persists three documents: the focus session, the
//! statistics and the relevance cache. Every backend stores JSON values
//! under string keys, and a single `set` call is applied atomically.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::StorageError;

/// Well-known keys
pub mod keys {
    pub const SESSION: &str = "focus_session";
    pub const STATISTICS: &str = "focus_statistics";
    pub const CACHE: &str = "relevance_cache";
}

/// Persistent key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the given keys; missing keys are absent from the map
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError>;

    /// Write all entries in one atomic step
    async fn set(&self, items: HashMap<String, Value>) -> Result<(), StorageError>;

    async fn remove(&self, keys: &[&str]) -> Result<(), StorageError>;

    /// Approximate bytes used by the given keys (key + serialized value)
    async fn bytes_in_use(&self, keys: &[&str]) -> Result<usize, StorageError>;
}

/// Read one typed document
///
/// # Errors
///
/// Returns an error if the backend fails or the stored JSON does not match `T`
pub async fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let mut values = store.get(&[key]).await?;
    match values.remove(key) {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize one typed document into a `set` entry
///
/// # Errors
///
/// Returns an error if `value` cannot be represented as JSON
pub fn entry<T: Serialize>(key: &str, value: &T) -> Result<(String, Value), StorageError> {
    Ok((key.to_string(), serde_json::to_value(value)?))
}

pub(crate) fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + value.to_string().len()
}

/// In-memory store with an optional byte quota
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
    quota: Option<usize>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes pushing it past `quota` bytes
    #[must_use]
    pub fn with_quota(quota: usize) -> Self {
        Self {
            values: Mutex::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Value>>, StorageError> {
        self.values
            .lock()
            .map_err(|e| StorageError::Backend(format!("memory store lock poisoned: {e}")))
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>, StorageError> {
        let values = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|v| ((*key).to_string(), v.clone())))
            .collect())
    }

    async fn set(&self, items: HashMap<String, Value>) -> Result<(), StorageError> {
        let mut values = self.lock()?;

        if let Some(quota) = self.quota {
            let untouched: usize = values
                .iter()
                .filter(|(key, _)| !items.contains_key(*key))
                .map(|(key, value)| entry_size(key, value))
                .sum();
            let incoming: usize = items.iter().map(|(key, value)| entry_size(key, value)).sum();
            let needed = untouched + incoming;
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }

        values.extend(items);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut values = self.lock()?;
        for key in keys {
            values.remove(*key);
        }
        Ok(())
    }

    async fn bytes_in_use(&self, keys: &[&str]) -> Result<usize, StorageError> {
        let values = self.lock()?;
        Ok(keys
            .iter()
            .filter_map(|key| values.get(*key).map(|v| entry_size(key, v)))
            .sum())
    }
}
