//! Relevance cache keyed by normalized page URL.
//!
//! All entries live in one JSON map under [`keys::CACHE`]. Expired entries
//! read as absent and are purged lazily. Writes are best-effort: a failed
//! write is logged and dropped, never surfaced to the classifier.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use focusmate_ai::Classification;
use focusmate_storage::store::{entry, load};
use focusmate_storage::{keys, CacheEntry, KeyValueStore, StorageError};

use crate::clock::Clock;

/// 24 hours
pub const DEFAULT_TTL_HOURS: i64 = 24;
/// 4 MiB
pub const DEFAULT_MAX_BYTES: usize = 4 * 1024 * 1024;

/// Share of the budget eviction shrinks the cache to
const EVICTION_TARGET_PERCENT: usize = 80;

type CacheMap = HashMap<String, CacheEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Stored,
    Dropped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub bytes: usize,
}

/// Cache identity of a page: trimmed URL without its fragment
#[must_use]
pub fn normalize_page_key(url: &str) -> String {
    let url = url.trim();
    url.split_once('#').map_or(url, |(base, _)| base).to_string()
}

fn entry_bytes(key: &str, entry: &CacheEntry) -> usize {
    // "key":{...},
    key.len() + 4 + entry.estimated_size()
}

fn map_bytes(map: &CacheMap) -> usize {
    2 + map.iter().map(|(k, e)| entry_bytes(k, e)).sum::<usize>()
}

pub struct CacheStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    max_bytes: usize,
}

impl CacheStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            ttl: Duration::hours(DEFAULT_TTL_HOURS),
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }

    #[must_use]
    pub fn with_limits(mut self, ttl: Duration, max_bytes: usize) -> Self {
        self.ttl = ttl;
        self.max_bytes = max_bytes;
        self
    }

    async fn read_map(&self) -> Result<CacheMap, StorageError> {
        Ok(load::<CacheMap>(self.store.as_ref(), keys::CACHE)
            .await?
            .unwrap_or_default())
    }

    async fn write_map(&self, map: &CacheMap) -> Result<(), StorageError> {
        let (key, value) = entry(keys::CACHE, map)?;
        self.store.set(HashMap::from([(key, value)])).await
    }

    /// Cached result for `url`, or `None` when never stored or expired
    pub async fn get(&self, url: &str) -> Option<Classification> {
        let page_key = normalize_page_key(url);
        let mut map = match self.read_map().await {
            Ok(map) => map,
            Err(e) => {
                log::warn!("Cache read failed: {e}");
                return None;
            }
        };

        let now = self.clock.now();
        let entry = map.get(&page_key)?;
        if entry.is_expired(now, self.ttl) {
            log::debug!("Cache entry expired for {page_key}");
            map.remove(&page_key);
            if let Err(e) = self.write_map(&map).await {
                log::warn!("Failed to purge expired cache entry: {e}");
            }
            return None;
        }

        log::debug!("Cache hit for {page_key}");
        Some(Classification::from(entry))
    }

    /// Store a result; the grace-period flag is never persisted
    pub async fn put(&self, url: &str, result: &Classification) -> PutOutcome {
        let page_key = normalize_page_key(url);
        let now = self.clock.now();
        let new_entry = result.to_cache_entry(now);

        let new_bytes = entry_bytes(&page_key, &new_entry) + 2;
        if new_bytes > self.max_bytes {
            log::warn!("Cache entry for {page_key} is larger than the whole budget, dropping");
            return PutOutcome::Dropped;
        }

        let mut map = match self.read_map().await {
            Ok(map) => map,
            Err(e) => {
                log::warn!("Cache read failed, starting from empty: {e}");
                CacheMap::new()
            }
        };
        map.remove(&page_key);

        if map_bytes(&map) + new_bytes > self.max_bytes {
            self.evict(&mut map, new_bytes);
        }
        map.insert(page_key.clone(), new_entry);

        match self.write_map(&map).await {
            Ok(()) => PutOutcome::Stored,
            Err(e) if e.is_quota_exceeded() => {
                log::warn!("Cache write hit the storage quota, sweeping expired entries");
                map.retain(|_, entry| !entry.is_expired(now, self.ttl));
                match self.write_map(&map).await {
                    Ok(()) => PutOutcome::Stored,
                    Err(e) => {
                        log::warn!("Dropping cache entry for {page_key}: {e}");
                        PutOutcome::Dropped
                    }
                }
            }
            Err(e) => {
                log::warn!("Dropping cache entry for {page_key}: {e}");
                PutOutcome::Dropped
            }
        }
    }

    /// Drop oldest entries until the map plus `incoming` bytes fits the eviction target
    fn evict(&self, map: &mut CacheMap, incoming: usize) {
        let target = self.max_bytes / 100 * EVICTION_TARGET_PERCENT;
        let mut by_age: Vec<(String, chrono::DateTime<chrono::Utc>)> = map
            .iter()
            .map(|(key, entry)| (key.clone(), entry.timestamp))
            .collect();
        by_age.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        let mut size = map_bytes(map);
        let mut evicted = 0usize;
        for (key, _) in by_age {
            if size + incoming <= target {
                break;
            }
            if let Some(entry) = map.remove(&key) {
                size -= entry_bytes(&key, &entry);
                evicted += 1;
            }
        }
        log::debug!("Evicted {evicted} cache entries, {size} bytes remain");
    }

    /// Remove every cached judgment
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot remove the cache key
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(&[keys::CACHE]).await?;
        log::info!("Relevance cache cleared");
        Ok(())
    }

    /// Purge expired entries, returning how many were removed
    ///
    /// # Errors
    ///
    /// Returns an error if the cache cannot be read or rewritten
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        let mut map = self.read_map().await?;
        let now = self.clock.now();
        let before = map.len();
        map.retain(|_, entry| !entry.is_expired(now, self.ttl));
        let removed = before - map.len();
        if removed > 0 {
            self.write_map(&map).await?;
            log::info!("Purged {removed} expired cache entries");
        }
        Ok(removed)
    }

    /// # Errors
    ///
    /// Returns an error if the cache cannot be read
    pub async fn stats(&self) -> Result<CacheStats, StorageError> {
        let map = self.read_map().await?;
        let now = self.clock.now();
        let expired = map
            .values()
            .filter(|entry| entry.is_expired(now, self.ttl))
            .count();
        Ok(CacheStats {
            total: map.len(),
            valid: map.len() - expired,
            expired,
            bytes: self.store.bytes_in_use(&[keys::CACHE]).await?,
        })
    }
}
