//! RocksDB-backed record stores.
//!
//! [`DocumentStore`] keeps JSON documents keyed by identifier plus a phone
//! number index and answers full scans. [`BlobStore`] reuses the same engine
//! as a plain namespaced key/value cache with no index.

use crate::codec::{namespace_prefix, storage_key, strip_namespace, Encoding, DEFAULT_NAMESPACE};
use crate::model::UserRecord;
use crate::store::{StoreCapabilities, StoreError, UserStore};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

const CF_RECORDS: &str = "records";
const CF_PHONE_INDEX: &str = "index_phone_number";
const CF_METADATA: &str = "metadata";

const KEY_MANIFEST: &[u8] = b"manifest";

const STORAGE_FORMAT_VERSION: u32 = 1;

/// Which store created a data directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
enum Layout {
    Document,
    Blob,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct StorageManifest {
    format_version: u32,
    layout: Layout,
    app_version: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PersistentOpenOptions {
    pub repair: bool,
}

impl From<rocksdb::Error> for StoreError {
    fn from(err: rocksdb::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Insert,
    Replace,
}

/// Run a blocking RocksDB operation off the async executor.
async fn run_blocking<I, T, F>(inner: &Arc<I>, op: F) -> Result<T, StoreError>
where
    I: Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&I) -> Result<T, StoreError> + Send + 'static,
{
    let inner = Arc::clone(inner);
    tokio::task::spawn_blocking(move || op(&inner))
        .await
        .map_err(|err| StoreError::Backend(format!("storage task failed: {err}")))?
}

// =============================================================================
// Document store
// =============================================================================

pub struct DocumentStore {
    inner: Arc<DocumentInner>,
}

struct DocumentInner {
    db: DB,
    // Serializes read-modify-write of a record and its index entry.
    write_lock: Mutex<()>,
}

impl DocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        options: PersistentOpenOptions,
    ) -> Result<Self> {
        if options.repair {
            repair_db(path.as_ref())?;
        }
        let db = open_db(path, &[CF_RECORDS, CF_PHONE_INDEX, CF_METADATA])?;
        validate_or_init_manifest(&db, Layout::Document)?;
        Ok(Self {
            inner: Arc::new(DocumentInner {
                db,
                write_lock: Mutex::new(()),
            }),
        })
    }
}

impl DocumentInner {
    fn read(&self, id: &str) -> Result<Option<UserRecord>, StoreError> {
        let records_cf = cf(&self.db, CF_RECORDS)?;
        let Some(bytes) = self.db.get_cf(records_cf, id.as_bytes())? else {
            return Ok(None);
        };
        Encoding::Document.decode(&bytes).map(Some)
    }

    fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, StoreError> {
        let index_cf = cf(&self.db, CF_PHONE_INDEX)?;
        let Some(id) = self.db.get_cf(index_cf, phone.as_bytes())? else {
            return Ok(None);
        };
        let id = String::from_utf8_lossy(&id).into_owned();
        match self.read(&id)? {
            Some(record) if record.phone_number == phone => Ok(Some(record)),
            _ => {
                debug!(phone, id, "stale phone index entry");
                Ok(None)
            }
        }
    }

    fn write(&self, record: &UserRecord, mode: WriteMode) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let previous = match self.read(&record.id) {
            Ok(previous) => previous,
            Err(StoreError::Decode(err)) => {
                warn!(id = %record.id, error = %err, "overwriting undecodable record");
                None
            }
            Err(err) => return Err(err),
        };
        if mode == WriteMode::Insert && previous.is_some() {
            return Err(StoreError::Conflict(record.id.clone()));
        }

        let records_cf = cf(&self.db, CF_RECORDS)?;
        let index_cf = cf(&self.db, CF_PHONE_INDEX)?;
        let mut batch = WriteBatch::default();
        if let Some(previous) = previous.as_ref() {
            if previous.has_phone_number() && previous.phone_number != record.phone_number {
                self.unindex_phone(&mut batch, &previous.phone_number, &record.id)?;
            }
        }
        batch.put_cf(records_cf, record.id.as_bytes(), Encoding::Document.encode(record)?);
        if record.has_phone_number() {
            batch.put_cf(index_cf, record.phone_number.as_bytes(), record.id.as_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let previous = match self.read(id) {
            Ok(previous) => previous,
            Err(StoreError::Decode(err)) => {
                warn!(id, error = %err, "deleting undecodable record; phone index entry kept");
                None
            }
            Err(err) => return Err(err),
        };
        let records_cf = cf(&self.db, CF_RECORDS)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(records_cf, id.as_bytes());
        if let Some(previous) = previous.filter(UserRecord::has_phone_number) {
            self.unindex_phone(&mut batch, &previous.phone_number, id)?;
        }
        self.db.write(batch)?;
        Ok(())
    }

    // Only drops the index entry while it still points at `id`.
    fn unindex_phone(&self, batch: &mut WriteBatch, phone: &str, id: &str) -> Result<(), StoreError> {
        let index_cf = cf(&self.db, CF_PHONE_INDEX)?;
        if let Some(owner) = self.db.get_cf(index_cf, phone.as_bytes())? {
            if owner == id.as_bytes() {
                batch.delete_cf(index_cf, phone.as_bytes());
            }
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let records_cf = cf(&self.db, CF_RECORDS)?;
        self.db
            .iterator_cf(records_cf, IteratorMode::Start)
            .map(|entry| {
                entry
                    .map(|(key, _)| String::from_utf8_lossy(&key).into_owned())
                    .map_err(StoreError::from)
            })
            .collect()
    }

    fn scan(&self) -> Result<Vec<UserRecord>, StoreError> {
        let records_cf = cf(&self.db, CF_RECORDS)?;
        let mut records = Vec::new();
        for entry in self.db.iterator_cf(records_cf, IteratorMode::Start) {
            let (key, value) = entry?;
            match Encoding::Document.decode(&value) {
                Ok(record) => records.push(record),
                Err(err) => {
                    warn!(key = %String::from_utf8_lossy(&key), error = %err, "undecodable record in scan");
                    records.push(UserRecord::default());
                }
            }
        }
        Ok(records)
    }

    fn clear(&self) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock();
        let removed = clear_cf(&self.db, CF_RECORDS, &[])?;
        clear_cf(&self.db, CF_PHONE_INDEX, &[])?;
        Ok(removed)
    }
}

impl Drop for DocumentInner {
    fn drop(&mut self) {
        let _ = self.db.flush();
    }
}

#[async_trait]
impl UserStore for DocumentStore {
    fn capabilities(&self) -> StoreCapabilities {
        StoreCapabilities {
            secondary_lookup: true,
            full_scan: true,
        }
    }

    fn key_for(&self, id: &str) -> String {
        id.to_string()
    }

    fn id_from_key(&self, key: &str) -> String {
        key.to_string()
    }

    async fn get_by_key(&self, key: &str) -> Result<Option<UserRecord>, StoreError> {
        let key = key.to_string();
        run_blocking(&self.inner, move |inner| inner.read(&key)).await
    }

    async fn find_by_phone(&self, phone: &str) -> Result<Option<UserRecord>, StoreError> {
        let phone = phone.to_string();
        run_blocking(&self.inner, move |inner| inner.find_by_phone(&phone)).await
    }

    async fn insert(&self, record: &UserRecord) -> Result<(), StoreError> {
        let record = record.clone();
        run_blocking(&self.inner, move |inner| inner.write(&record, WriteMode::Insert)).await
    }

    async fn put(&self, record: &UserRecord) -> Result<(), StoreError> {
        let record = record.clone();
        run_blocking(&self.inner, move |inner| inner.write(&record, WriteMode::Replace)).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        run_blocking(&self.inner, move |inner| inner.delete(&id)).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        run_blocking(&self.inner, |inner| inner.keys()).await
    }

    async fn scan_all(&self) -> Result<Vec<UserRecord>, StoreError> {
        run_blocking(&self.inner, |inner| inner.scan()).await
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        run_blocking(&self.inner, |inner| inner.clear()).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        run_blocking(&self.inner, |inner| inner.db.flush().map_err(StoreError::from)).await
    }
}

// =============================================================================
// Blob store
// =============================================================================

pub struct BlobStore {
    inner: Arc<BlobInner>,
    namespace: String,
}

struct BlobInner {
    db: DB,
}

impl BlobStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, DEFAULT_NAMESPACE, PersistentOpenOptions::default())
    }

    pub fn open_with_options(
        path: impl AsRef<Path>,
        namespace: impl Into<String>,
        options: PersistentOpenOptions,
    ) -> Result<Self> {
        if options.repair {
            repair_db(path.as_ref())?;
        }
        let db = open_db(path, &[CF_RECORDS, CF_METADATA])?;
        validate_or_init_manifest(&db, Layout::Blob)?;
        Ok(Self {
            inner: Arc::new(BlobInner { db }),
            namespace: namespace.into(),
        })
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Store raw bytes under a key without encoding.
    pub fn put_raw(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let records_cf = cf(&self.inner.db, CF_RECORDS)?;
        self.inner.db.put_cf(records_cf, key.as_bytes(), bytes)?;
        Ok(())
    }
}

impl BlobInner {
    fn read(&self, key: &str) -> Result<Option<UserRecord>, StoreError> {
        let records_cf = cf(&self.db, CF_RECORDS)?;
        match self.db.get_cf(records_cf, key.as_bytes())? {
            Some(bytes) => Encoding::Blob.decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn contains(&self, key: &str) -> Result<bool, StoreError> {
        let records_cf = cf(&self.db, CF_RECORDS)?;
        Ok(self.db.get_pinned_cf(records_cf, key.as_bytes())?.is_some())
    }

    fn write(&self, key: &str, record: &UserRecord) -> Result<(), StoreError> {
        let records_cf = cf(&self.db, CF_RECORDS)?;
        self.db
            .put_cf(records_cf, key.as_bytes(), Encoding::Blob.encode(record)?)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        let records_cf = cf(&self.db, CF_RECORDS)?;
        self.db.delete_cf(records_cf, key.as_bytes())?;
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let records_cf = cf(&self.db, CF_RECORDS)?;
        let iter = self.db.iterator_cf(
            records_cf,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        );
        let mut keys = Vec::new();
        for entry in iter {
            let (key, _) = entry?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }
}

impl Drop for BlobInner {
    fn drop(&mut self) {
        let _ = self.db.flush();
    }
}

#[async_trait]
impl UserStore for BlobStore {
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
        let key = key.to_string();
        run_blocking(&self.inner, move |inner| inner.read(&key)).await
    }

    async fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let key = self.key_for(id);
        run_blocking(&self.inner, move |inner| inner.contains(&key)).await
    }

    async fn put(&self, record: &UserRecord) -> Result<(), StoreError> {
        let key = self.key_for(&record.id);
        let record = record.clone();
        run_blocking(&self.inner, move |inner| inner.write(&key, &record)).await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let key = self.key_for(id);
        run_blocking(&self.inner, move |inner| inner.delete(&key)).await
    }

    async fn list_keys(&self) -> Result<Vec<String>, StoreError> {
        let prefix = namespace_prefix(&self.namespace);
        run_blocking(&self.inner, move |inner| inner.keys_with_prefix(&prefix)).await
    }

    async fn clear(&self) -> Result<usize, StoreError> {
        let prefix = namespace_prefix(&self.namespace);
        run_blocking(&self.inner, move |inner| {
            clear_cf(&inner.db, CF_RECORDS, prefix.as_bytes())
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        run_blocking(&self.inner, |inner| inner.db.flush().map_err(StoreError::from)).await
    }
}

// =============================================================================
// Shared helpers
// =============================================================================

fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily, StoreError> {
    db.cf_handle(name)
        .ok_or_else(|| StoreError::Backend(format!("missing column family {name}")))
}

fn open_db(path: impl AsRef<Path>, families: &[&str]) -> Result<DB> {
    let mut options = Options::default();
    options.create_if_missing(true);
    options.create_missing_column_families(true);
    options.set_paranoid_checks(true);
    let cfs = families
        .iter()
        .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
        .collect::<Vec<_>>();
    Ok(DB::open_cf_descriptors(&options, path, cfs)?)
}

fn repair_db(path: &Path) -> Result<()> {
    let mut options = Options::default();
    options.create_if_missing(true);
    DB::repair(&options, path)?;
    Ok(())
}

fn validate_or_init_manifest(db: &DB, layout: Layout) -> Result<()> {
    let metadata_cf = db
        .cf_handle(CF_METADATA)
        .ok_or_else(|| anyhow!("missing metadata column family"))?;
    if let Some(bytes) = db.get_cf(metadata_cf, KEY_MANIFEST)? {
        let manifest: StorageManifest = bincode::deserialize(&bytes)?;
        if manifest.format_version != STORAGE_FORMAT_VERSION {
            return Err(anyhow!(
                "storage format version mismatch: expected {}, found {}",
                STORAGE_FORMAT_VERSION,
                manifest.format_version
            ));
        }
        if manifest.layout != layout {
            return Err(anyhow!(
                "storage layout mismatch: expected {:?}, found {:?}",
                layout,
                manifest.layout
            ));
        }
        return Ok(());
    }

    let manifest = StorageManifest {
        format_version: STORAGE_FORMAT_VERSION,
        layout,
        app_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    let bytes = bincode::serialize(&manifest)?;
    db.put_cf(metadata_cf, KEY_MANIFEST, bytes)?;
    Ok(())
}

/// Delete every key starting with `prefix` (all keys for an empty prefix).
fn clear_cf(db: &DB, cf_name: &str, prefix: &[u8]) -> Result<usize, StoreError> {
    let handle = cf(db, cf_name)?;
    let mut keys = Vec::new();
    for entry in db.iterator_cf(handle, IteratorMode::From(prefix, Direction::Forward)) {
        let (key, _) = entry?;
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key);
    }
    if keys.is_empty() {
        return Ok(0);
    }
    let mut batch = WriteBatch::default();
    for key in &keys {
        batch.delete_cf(handle, key);
    }
    db.write(batch)?;
    Ok(keys.len())
}
