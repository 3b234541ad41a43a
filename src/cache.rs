//! In-memory key/value cache backend.
//!
//! Records live as encoded blobs under namespaced keys. There is no
//! secondary index and no bulk read; listing goes through key enumeration.

use crate::codec::{namespace_prefix, storage_key, strip_namespace, Encoding, DEFAULT_NAMESPACE};
use crate::model::UserRecord;
use crate::store::{StoreCapabilities, StoreError, UserStore};
use async_trait::async_trait;
use dashmap::DashMap;

#[derive(Debug)]
pub struct CacheStore {
    entries: DashMap<String, Vec<u8>>,
    namespace: String,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::with_namespace(DEFAULT_NAMESPACE)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            entries: DashMap::new(),
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Number of keys held, across all namespaces.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Store raw bytes under a key without encoding.
    pub fn put_raw(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.entries.insert(key.into(), bytes);
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserStore for CacheStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities::default()
    }

    fn key_for(&self, id: &str) -> String {
        storage_key(&self.namespace, id)
    }

    fn id_from_key(&self, key: &str) -> String {
        strip_namespace(&self.namespace, key).to_string()
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<UserRecord>, StoreError> {
        let Some(bytes) = self.entries.get(key).map(|entry| entry.value().clone()) else {
            return Ok(None);
        };
        Encoding::Blob.decode(&bytes).map(Some)
    }

    async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.contains_key(&self.key_for(id)))
    }

    async fn put(&self, record: &UserRecord) -> Result<(), StoreError> {
        let bytes = Encoding::Blob.encode(record)?;
        self.entries.insert(self.key_for(&record.id), bytes);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.entries.remove(&self.key_for(id));
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let prefix = namespace_prefix(&self.namespace);
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let prefix = namespace_prefix(&self.namespace);
        // Count inside retain; len() races with concurrent inserts.
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !key.starts_with(&prefix);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
