//! # Record Codec
//!
//! Storage representations of a [`UserRecord`], storage-key derivation and
//! the identifier policy applied before a record is persisted.

use crate::error::DirectoryError;
use crate::model::{UserId, UserRecord};
use crate::store::StoreError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_NAMESPACE: &str = "user";
const NAMESPACE_SEPARATOR: char = ':';

/// Document form: the identifier travels as `_id`, the document key.
#[derive(Debug, Serialize, Deserialize)]
struct UserDocument {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    phone_number: String,
    #[serde(default)]
    image_url: String,
    #[serde(default)]
    status: String,
}

impl From<&UserRecord> for UserDocument {
    fn from(record: &UserRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            phone_number: record.phone_number.clone(),
            image_url: record.image_url.clone(),
            status: record.status.clone(),
        }
    }
}

impl From<UserDocument> for UserRecord {
    fn from(doc: UserDocument) -> Self {
        Self {
            name: doc.name,
            phone_number: doc.phone_number,
            image_url: doc.image_url,
            status: doc.status,
            id: doc.id,
        }
    }
}

/// Value encoding used by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// JSON document keyed by `_id`.
    Document,
    /// Flat bincode blob.
    Blob,
}

impl Encoding {
    pub fn encode(self, record: &UserRecord) -> Result<Vec<u8>, StoreError> {
        match self {
            Encoding::Document => serde_json::to_vec(&UserDocument::from(record))
                .map_err(|err| StoreError::Backend(format!("encode document: {err}"))),
            Encoding::Blob => bincode::serialize(record)
                .map_err(|err| StoreError::Backend(format!("encode blob: {err}"))),
        }
    }

    pub fn decode(self, bytes: &[u8]) -> Result<UserRecord, StoreError> {
        match self {
            Encoding::Document => serde_json::from_slice::<UserDocument>(bytes)
                .map(UserRecord::from)
                .map_err(|err| StoreError::Decode(err.to_string())),
            Encoding::Blob => {
                bincode::deserialize(bytes).map_err(|err| StoreError::Decode(err.to_string()))
            }
        }
    }
}

/// Namespaced storage key for an identifier. Applying it to a key that
/// already carries the namespace returns the key unchanged.
pub fn storage_key(namespace: &str, id: &str) -> String {
    if namespace_prefixed(namespace, id) {
        id.to_string()
    } else {
        format!("{namespace}{NAMESPACE_SEPARATOR}{id}")
    }
}

/// Inverse of [`storage_key`]. Keys outside the namespace come back as is.
pub fn strip_namespace<'a>(namespace: &str, key: &'a str) -> &'a str {
    if namespace_prefixed(namespace, key) {
        &key[namespace.len() + NAMESPACE_SEPARATOR.len_utf8()..]
    } else {
        key
    }
}

/// Key prefix shared by every record in the namespace.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{namespace}{NAMESPACE_SEPARATOR}")
}

fn namespace_prefixed(namespace: &str, key: &str) -> bool {
    key.strip_prefix(namespace)
        .is_some_and(|rest| rest.starts_with(NAMESPACE_SEPARATOR))
}

/// Generate-if-absent, validate-if-present. A supplied identifier is kept
/// exactly as written once it parses.
pub fn finalize_identifier(raw: &str) -> Result<String, DirectoryError> {
    if raw.is_empty() {
        return Ok(UserId::generate().to_string());
    }
    UserId::parse(raw)?;
    Ok(raw.to_string())
}
