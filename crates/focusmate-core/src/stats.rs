use std::collections::HashMap;
use std::sync::Arc;

use focusmate_storage::store::{entry, load};
use focusmate_storage::{keys, KeyValueStore, Statistics, StorageError};

/// Reads and writes the process-wide statistics document
#[derive(Clone)]
pub struct StatisticsStore {
    store: Arc<dyn KeyValueStore>,
}

impl StatisticsStore {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Current statistics, zeroed when nothing was recorded yet
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails or the stored document is corrupt
    pub async fn load(&self) -> Result<Statistics, StorageError> {
        Ok(load::<Statistics>(self.store.as_ref(), keys::STATISTICS)
            .await?
            .unwrap_or_default())
    }

    /// Count one block event
    ///
    /// # Errors
    ///
    /// Returns an error if the statistics cannot be read or written; the
    /// stored count is unchanged in that case
    pub async fn record_block(&self) -> Result<Statistics, StorageError> {
        let stats = self.load().await?.with_block();
        let (key, value) = entry(keys::STATISTICS, &stats)?;
        self.store.set(HashMap::from([(key, value)])).await?;
        log::debug!("Blocked count is now {}", stats.blocked_count);
        Ok(stats)
    }
}
