//! # Store Module
//!
//! The storage adapter seam. Every backend implements [`UserStore`]; the
//! engine only ever talks to an injected `Arc<dyn UserStore>`.

use crate::model::UserRecord;
use async_trait::async_trait;

/// Failure reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("failed to decode stored record: {0}")]
    Decode(String),
    #[error("record already exists: {0}")]
    Conflict(String),
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

/// Optional query paths a backend offers beyond point reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreCapabilities {
    /// Indexed lookup by phone number.
    pub secondary_lookup: bool,
    /// Single-call retrieval of every record.
    pub full_scan: bool,
}

/// Key-addressed user record store.
///
/// Keys are the backend's own key space; [`UserStore::key_for`] maps a record
/// identifier into it. Implementations must be safe to share across request
/// tasks.
#[async_trait]
pub trait UserStore: Send + Sync {
    fn capabilities(&self) -> StoreCapabilities;

    /// Storage key for an identifier.
    fn key_for(&self, id: &str) -> String;

    /// Identifier stored under a key.
    fn id_from_key(&self, key: &str) -> String;

    /// Point read by storage key. `Ok(None)` means the key is absent.
    async fn get_by_key(&self, key: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Point read by identifier.
    async fn get(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        self.get_by_key(&self.key_for(id)).await
    }

    async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.get(id).await?.is_some())
    }

    async fn find_by_phone(&self, _phone: &str) -> Result<Option<UserRecord>, StoreError> {
        Err(StoreError::Unsupported("secondary lookup by phone number"))
    }

    /// Store a record that must not exist yet. Backends without insert
    /// semantics overwrite.
    async fn insert(&self, record: &UserRecord) -> Result<(), StoreError> {
        self.put(record).await
    }

    /// Full replacement keyed by `record.id`.
    async fn put(&self, record: &UserRecord) -> Result<(), StoreError>;

    /// Remove a record. Removing an absent record succeeds.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;

    /// Every storage key in the record namespace.
    async fn list_keys(&self) -> Result<Vec<String>, StoreError>;

    async fn scan_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        Err(StoreError::Unsupported("full scan"))
    }

    /// Remove every record in the namespace and return how many were removed.
    async fn clear(&self) -> Result<usize, StoreError>;

    /// Flush and release backend resources.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
