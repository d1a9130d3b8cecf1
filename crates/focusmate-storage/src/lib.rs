pub mod db;
pub mod error;
pub mod migrations;
pub mod models;
pub mod store;

pub use db::SqliteStore;
pub use error::StorageError;
pub use models::{BreakKind, CacheEntry, FocusSession, Phase, Statistics, Verdict};
pub use store::{keys, KeyValueStore, MemoryStore};
