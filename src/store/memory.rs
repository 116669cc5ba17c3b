//! Process-local key-value store.

use crate::error::StoreError;
use crate::store::KeyValueStore;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// A [`KeyValueStore`] backed by a `HashMap`.
///
/// Batches are applied under one lock, so a reader never sees half a batch. The timeout
/// is accepted for interface parity and never reached.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use utec_daq::store::{InMemoryStore, KeyValueStore};
///
/// # tokio_test::block_on(async {
/// let store = InMemoryStore::new();
/// store.set("utec::logging::start", "1");
/// assert_eq!(store.read("utec::logging::start").await.unwrap().as_deref(), Some("1"));
///
/// let batch = [("utec::read::torque::drill".to_string(), "11.298480".to_string())];
/// store.batch_write(&batch, Duration::from_secs(2)).await.unwrap();
/// assert_eq!(store.len(), 2);
/// # })
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one key, as an operator client would.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.lock().insert(key.into(), value.into());
    }

    /// Current value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.entries.lock().remove(key)
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn batch_write(
        &self,
        entries: &[(String, String)],
        _timeout: Duration,
    ) -> Result<(), StoreError> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get(key))
    }
}
