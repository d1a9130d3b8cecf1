use thiserror::Error;

/// Errors raised by key-value store backends
#[derive(Debug, Error)]
pub enum StorageError {
    /// The write would push the store past its byte quota
    #[error("storage quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("failed to (de)serialize stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage backend unavailable: {0}")]
    Backend(String),
}

impl StorageError {
    #[must_use]
    pub const fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}
