//! Persistence: a namespaced key-value contract and its backends.
//!
//! Values are JSON documents. Every call is independently atomic; callers
//! that read-modify-write accept that the sequence as a whole is not.

pub mod memory;
pub mod sqlite;
pub mod watermark;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use watermark::{ChatKind, Destination, DestinationMeta, WatermarkStore};

/// Logical partition of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Namespace {
    /// Operational config, watermark and admin data.
    Config,
    /// Destination registry.
    Chats,
}

impl Namespace {
    /// Stable name used as the storage discriminator.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Chats => "chats",
        }
    }
}

/// Persistence failures. These are fatal to the process.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    /// Filesystem failure while preparing the database location.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Namespaced key-value storage.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value under `key`.
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write `value` under `key`, replacing any previous value.
    async fn put(&self, ns: Namespace, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Remove `key`. Returns `true` if it existed.
    async fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StoreError>;

    /// All entries of a namespace, ordered by key.
    async fn iterate(&self, ns: Namespace) -> Result<Vec<(String, Value)>, StoreError>;

    /// Remove every entry of a namespace. Returns the number removed.
    async fn clear(&self, ns: Namespace) -> Result<u64, StoreError>;
}
