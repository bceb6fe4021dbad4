//! In-memory backend for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{KvStore, Namespace, StoreError};

/// Volatile [`KvStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<(Namespace, String), Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut BTreeMap<(Namespace, String), Value>) -> T) -> T {
        let mut guard = self
            .entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.with(|map| map.get(&(ns, key.to_owned())).cloned()))
    }

    async fn put(&self, ns: Namespace, key: &str, value: &Value) -> Result<(), StoreError> {
        self.with(|map| map.insert((ns, key.to_owned()), value.clone()));
        Ok(())
    }

    async fn delete(&self, ns: Namespace, key: &str) -> Result<bool, StoreError> {
        Ok(self.with(|map| map.remove(&(ns, key.to_owned())).is_some()))
    }

    async fn iterate(&self, ns: Namespace) -> Result<Vec<(String, Value)>, StoreError> {
        Ok(self.with(|map| {
            map.iter()
                .filter(|((entry_ns, _), _)| *entry_ns == ns)
                .map(|((_, key), value)| (key.clone(), value.clone()))
                .collect()
        }))
    }

    async fn clear(&self, ns: Namespace) -> Result<u64, StoreError> {
        Ok(self.with(|map| {
            let before = map.len();
            map.retain(|(entry_ns, _), _| *entry_ns != ns);
            u64::try_from(before.saturating_sub(map.len())).unwrap_or(u64::MAX)
        }))
    }
}
