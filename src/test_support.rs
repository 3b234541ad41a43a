//! Fixtures and fault injection shared by unit tests, integration tests and
//! benches.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::model::{UserId, UserRecord};
use crate::store::{StoreCapabilities, StoreError, UserStore};

/// A record with a freshly generated identifier.
pub fn user(name: &str, phone: &str) -> UserRecord {
    UserRecord::new(name, phone).with_id(UserId::generate().to_string())
}

/// `count` records with distinct phone numbers.
pub fn users(count: usize) -> Vec<UserRecord> {
    (0..count)
        .map(|i| user(&format!("user-{i}"), &format!("+1555{i:07}")))
        .collect()
}

/// Shared view of how many writes reached the wrapped store.
#[derive(Debug, Clone, Default)]
pub struct WriteCounter(Arc<AtomicUsize>);

impl WriteCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Delegating store that fails or stalls on demand.
pub struct FaultyStore {
    inner: Arc<dyn UserStore>,
    stalled: HashSet<String>,
    failing: HashSet<String>,
    corrupt: HashSet<String>,
    fail_point_reads: bool,
    fail_listing: bool,
    fail_phone_lookups: bool,
    writes: WriteCounter,
}

impl FaultyStore {
    pub fn new<S: UserStore + 'static>(inner: Arc<S>) -> Self {
        Self {
            inner,
            stalled: HashSet::new(),
            failing: HashSet::new(),
            corrupt: HashSet::new(),
            fail_point_reads: false,
            fail_listing: false,
            fail_phone_lookups: false,
            writes: WriteCounter::default(),
        }
    }

    /// Reads of `key` never complete.
    pub fn stall_key(mut self, key: impl Into<String>) -> Self {
        self.stalled.insert(key.into());
        self
    }

    /// Reads of `key` fail with a backend error.
    pub fn fail_key(mut self, key: impl Into<String>) -> Self {
        self.failing.insert(key.into());
        self
    }

    /// Reads of `key` fail with a decode error.
    pub fn corrupt_key(mut self, key: impl Into<String>) -> Self {
        self.corrupt.insert(key.into());
        self
    }

    /// Every point read fails with a backend error.
    pub fn fail_point_reads(mut self) -> Self {
        self.fail_point_reads = true;
        self
    }

    pub fn fail_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn fail_phone_lookups(mut self) -> Self {
        self.fail_phone_lookups = true;
        self
    }

    pub fn write_counter(&self) -> WriteCounter {
        self.writes.clone()
    }
}

#[async_trait]
impl UserStore for FaultyStore {
    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }

    fn key_for(&self, id: &str) -> String {
        self.inner.key_for(id)
    }

    fn id_from_key(&self, key: &str) -> String {
        self.inner.id_from_key(key)
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<UserRecord>, StoreError> {
        if self.stalled.contains(key) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail_point_reads || self.failing.contains(key) {
            return Err(StoreError::Backend(format!("injected read failure for {key}")));
        }
        if self.corrupt.contains(key) {
            return Err(StoreError::Decode(format!("injected corruption for {key}")));
        }
        self.inner.get_by_key(key).await
    }

    async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.get(id).await?.is_some())
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, StoreError> {
        if self.fail_phone_lookups {
            return Err(StoreError::Backend(format!("injected lookup failure for {phone}")));
        }
        self.inner.find_by_phone(phone).await
    }

    async fn insert(&self, record: &UserRecord) -> Result<(), StoreError> {
        self.writes.bump();
        self.inner.insert(record).await
    }

    async fn put(&self, record: &UserRecord) -> Result<(), StoreError> {
        self.writes.bump();
        self.inner.put(record).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.inner.delete(id).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        if self.fail_listing {
            return Err(StoreError::Backend("injected listing failure".to_string()));
        }
        self.inner.list_keys().await
    }

    async fn scan_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        if self.fail_listing {
            return Err(StoreError::Backend("injected listing failure".to_string()));
        }
        self.inner.scan_all().await
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        self.inner.clear().await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}
