//! # Aggregation
//!
//! Builds full listings. Stores with a native scan answer in one call; plain
//! key/value stores are listed by enumerating keys and hydrating each one in
//! its own task, joined before the response is assembled.
//!
//! Every task returns its slot and record to the coordinator through its
//! join handle, so no collection is shared between tasks. A read that fails,
//! times out, or finds its key gone yields `UserRecord::default()` in its
//! slot; the listing itself never fails because of a single record.

use crate::config::{DEFAULT_MAX_IN_FLIGHT, DEFAULT_READ_TIMEOUT_MS};
use crate::model::UserRecord;
use crate::store::{StoreError, UserStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutOptions {
    /// Deadline for a single point read.
    pub read_timeout: Duration,
    /// Upper bound on reads running at once.
    pub max_in_flight: usize,
}

impl Default for FanOutOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

/// Every stored record, hydrated.
pub async fn list_profiles(
    store: &Arc<dyn UserStore>,
    options: FanOutOptions,
) -> Result<Vec<UserRecord>, StoreError> {
    if store.capabilities().full_scan {
        return store.scan_all().await;
    }
    let keys = store.list_keys().await?;
    Ok(hydrate(Arc::clone(store), keys, options).await)
}

/// Every stored identifier, namespace stripped.
pub async fn list_ids(store: &Arc<dyn UserStore>) -> Result<Vec<String>, StoreError> {
    let keys = store.list_keys().await?;
    Ok(keys.iter().map(|key| store.id_from_key(key)).collect())
}

/// Fetch every key concurrently, one task per key. The result has one entry
/// per key, in key order.
#[instrument(skip(store, keys), fields(keys = keys.len()), level = "debug")]
pub async fn hydrate(
    store: Arc<dyn UserStore>,
    keys: Vec<String>,
    options: FanOutOptions,
) -> Vec<UserRecord> {
    let total = keys.len();
    let permits = Arc::new(Semaphore::new(options.max_in_flight.max(1)));
    let mut tasks = JoinSet::new();

    for (slot, key) in keys.into_iter().enumerate() {
        let store = Arc::clone(&store);
        let permits = Arc::clone(&permits);
        let read_timeout = options.read_timeout;
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            let record = read_one(store.as_ref(), &key, read_timeout).await;
            (slot, record)
        });
    }

    let mut records = vec![UserRecord::default(); total];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((slot, record)) => records[slot] = record,
            Err(err) => warn!(error = %err, "listing task did not complete"),
        }
    }
    debug!(total, "hydrated listing");
    records
}

async fn read_one(store: &dyn UserStore, key: &str, read_timeout: Duration) -> UserRecord {
    match tokio::time::timeout(read_timeout, store.get_by_key(key)).await {
        Ok(Ok(Some(record))) => record,
        Ok(Ok(None)) => {
            debug!(key, "key vanished during listing");
            UserRecord::default()
        }
        Ok(Err(err)) => {
            warn!(key, error = %err, "listing read failed");
            UserRecord::default()
        }
        Err(_) => {
            let timeout_ms = read_timeout.as_millis() as u64;
            warn!(key, timeout_ms, "listing read timed out");
            UserRecord::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::test_support::{user, FaultyStore};

    async fn seeded_cache(count: usize) -> Arc<CacheStore> {
        let store = Arc::new(CacheStore::new());
        for i in 0..count {
            store
                .put(&user(&format!("user-{i}"), &format!("+1555000{i:04}")))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn hydrates_every_key() {
        let cache = seeded_cache(25).await;
        let store: Arc<dyn UserStore> = cache;
        let records = list_profiles(&store, FanOutOptions::default()).await.unwrap();
        assert_eq!(records.len(), 25);
        assert!(records.iter().all(|record| record.has_id()));
    }

    #[tokio::test]
    async fn preserves_key_order() {
        let cache = seeded_cache(10).await;
        let store: Arc<dyn UserStore> = cache;
        let keys = store.list_keys().await.unwrap();
        let records = hydrate(Arc::clone(&store), keys.clone(), FanOutOptions::default()).await;
        let ids: Vec<String> = keys.iter().map(|key| store.id_from_key(key)).collect();
        let hydrated: Vec<String> = records.into_iter().map(|record| record.id).collect();
        assert_eq!(ids, hydrated);
    }

    #[tokio::test]
    async fn corrupt_record_becomes_empty_slot() {
        let cache = seeded_cache(3).await;
        cache.put_raw("user:broken", vec![0xff]);
        let store: Arc<dyn UserStore> = cache;

        let records = list_profiles(&store, FanOutOptions::default()).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(
            records.iter().filter(|record| **record == UserRecord::default()).count(),
            1
        );
    }

    #[tokio::test]
    async fn stalled_read_times_out() {
        let cache = seeded_cache(4).await;
        let keys = cache.list_keys().await.unwrap();
        let faulty = FaultyStore::new(cache).stall_key(keys[0].clone());
        let store: Arc<dyn UserStore> = Arc::new(faulty);

        let options = FanOutOptions {
            read_timeout: Duration::from_millis(50),
            max_in_flight: 2,
        };
        let records = list_profiles(&store, options).await.unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records.iter().filter(|record| record.has_id()).count(), 3);
    }

    #[tokio::test]
    async fn failed_read_becomes_empty_slot() {
        let cache = seeded_cache(3).await;
        let keys = cache.list_keys().await.unwrap();
        let faulty = FaultyStore::new(cache).fail_key(keys[2].clone());
        let store: Arc<dyn UserStore> = Arc::new(faulty);

        let records = list_profiles(&store, FanOutOptions::default()).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records.iter().filter(|record| record.has_id()).count(), 2);
    }

    #[tokio::test]
    async fn key_listing_failure_is_surfaced() {
        let cache = seeded_cache(3).await;
        let faulty = FaultyStore::new(cache).fail_listing();
        let store: Arc<dyn UserStore> = Arc::new(faulty);
        assert!(list_profiles(&store, FanOutOptions::default()).await.is_err());
    }

    #[tokio::test]
    async fn list_ids_strips_namespace() {
        let cache = seeded_cache(2).await;
        let store: Arc<dyn UserStore> = cache;
        let ids = list_ids(&store).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert!(ids.iter().all(|id| !id.starts_with("user:")));
    }

    #[tokio::test]
    async fn empty_listing() {
        let store: Arc<dyn UserStore> = Arc::new(CacheStore::new());
        assert!(list_profiles(&store, FanOutOptions::default())
            .await
            .unwrap()
            .is_empty());
    }
}
