//! # Userdir
//!
//! A user-profile directory: register, update, look up and delete user
//! records over a pluggable record store.
//!
//! A user identity can be reached through two independent keys, a generated
//! identifier and a phone number. [`Directory`] reconciles the two on every
//! write (see [`resolve`]) and assembles full listings from stores that have
//! no bulk read (see [`aggregate`]).

pub mod aggregate;
pub mod cache;
pub mod codec;
pub mod config;
pub mod error;
pub mod model;
pub mod persistence;
pub mod resolve;
pub mod server;
pub mod store;
pub mod test_support;

// Re-export main types for convenience
pub use aggregate::FanOutOptions;
pub use cache::CacheStore;
pub use config::{Backend, DirectoryConfig};
pub use error::{DirectoryError, Result};
pub use model::{UserId, UserRecord};
pub use persistence::{BlobStore, DocumentStore, PersistentOpenOptions};
pub use resolve::{UpdateMode, VariantPolicy};
pub use store::{StoreCapabilities, StoreError, UserStore};

use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Result of an update request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum UpdateOutcome {
    /// The merged record that was written.
    Merged(UserRecord),
    /// Whether a conditional overwrite took place.
    Applied(bool),
}

/// Main API for the directory service.
pub struct Directory {
    store: Arc<dyn UserStore>,
    policy: VariantPolicy,
    fan_out: FanOutOptions,
}

impl Directory {
    /// Bind a policy to a store. Phone lookups are disabled when the store
    /// has no secondary index.
    pub fn new(store: Arc<dyn UserStore>, policy: VariantPolicy) -> Self {
        let mut policy = policy;
        if policy.secondary_lookup && !store.capabilities().secondary_lookup {
            debug!("store has no secondary index; phone lookups disabled");
            policy.secondary_lookup = false;
        }
        Self {
            store,
            policy,
            fan_out: FanOutOptions::default(),
        }
    }

    pub fn with_fan_out(mut self, fan_out: FanOutOptions) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Open the configured backend and bind the matching policy.
    pub fn open(config: &DirectoryConfig) -> anyhow::Result<Self> {
        let storage = &config.storage;
        let options = PersistentOpenOptions {
            repair: storage.repair,
        };
        let store: Arc<dyn UserStore> = match storage.backend {
            Backend::Document => {
                Arc::new(DocumentStore::open_with_options(&storage.data_dir, options)?)
            }
            Backend::DocumentCache => Arc::new(BlobStore::open_with_options(
                &storage.data_dir,
                storage.namespace.clone(),
                options,
            )?),
            Backend::Cache => Arc::new(CacheStore::with_namespace(storage.namespace.clone())),
        };
        info!(backend = ?storage.backend, data_dir = %storage.data_dir.display(), "opened store");
        Ok(Self::new(store, config.policy()).with_fan_out(config.fan_out()))
    }

    pub fn policy(&self) -> &VariantPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn UserStore> {
        &self.store
    }

    /// Register a profile, resolving it against a stored identity first.
    #[instrument(skip(self, incoming), level = "debug")]
    pub async fn register(&self, incoming: UserRecord) -> Result<UserRecord> {
        let mut incoming = incoming;
        if self.policy.require_phone && !incoming.has_phone_number() {
            return Err(DirectoryError::validation("phone number is required"));
        }

        let by_phone = self.lookup_phone(&incoming.phone_number).await?;
        let by_id = match by_phone {
            Some(_) => None,
            None => {
                incoming.id = codec::finalize_identifier(&incoming.id)?;
                self.store.get(&incoming.id).await?
            }
        };

        let decision = resolve::decide_register(by_phone.as_ref(), by_id.as_ref(), &incoming);
        debug!(?decision, "register resolved");
        let (record, write) = decision.apply(incoming);
        match write {
            resolve::WriteKind::Insert => self.store.insert(&record).await?,
            resolve::WriteKind::Replace => self.store.put(&record).await?,
        }
        Ok(record)
    }

    /// Update a profile addressed by identifier, phone number, or both.
    #[instrument(skip(self, incoming), level = "debug")]
    pub async fn update(&self, incoming: UserRecord) -> Result<UpdateOutcome> {
        if !incoming.has_id() && !incoming.has_phone_number() {
            return Err(DirectoryError::validation(
                "an identifier or a phone number is required",
            ));
        }
        if incoming.has_id() {
            UserId::parse(&incoming.id)?;
        }

        match self.policy.update_mode {
            resolve::UpdateMode::Merge => self.merge_update(incoming).await.map(UpdateOutcome::Merged),
            resolve::UpdateMode::Conditional => {
                self.conditional_update(incoming).await.map(UpdateOutcome::Applied)
            }
        }
    }

    async fn merge_update(&self, incoming: UserRecord) -> Result<UserRecord> {
        let by_phone = self.lookup_phone(&incoming.phone_number).await?;
        let by_id = if incoming.has_id() {
            self.store.get(&incoming.id).await?
        } else {
            None
        };

        let decision = resolve::decide_update(by_phone.as_ref(), by_id.as_ref());
        debug!(?decision, "update resolved");
        let record = decision
            .apply(incoming)
            .ok_or_else(|| DirectoryError::not_found("no profile matches the identifier or phone number"))?;
        self.store.put(&record).await?;
        Ok(record)
    }

    async fn conditional_update(&self, incoming: UserRecord) -> Result<bool> {
        if !incoming.has_id() || !self.store.contains(&incoming.id).await? {
            debug!(id = %incoming.id, "conditional update skipped");
            return Ok(false);
        }
        self.store.put(&incoming).await?;
        Ok(true)
    }

    /// Profile stored under an identifier.
    pub async fn profile(&self, id: &str) -> Result<UserRecord> {
        UserId::parse(id)?;
        self.store
            .get(id)
            .await?
            .ok_or_else(|| DirectoryError::not_found(format!("no profile with identifier {id}")))
    }

    /// Profile stored under a phone number.
    pub async fn profile_by_phone(&self, phone: &str) -> Result<UserRecord> {
        if phone.is_empty() {
            return Err(DirectoryError::validation("phone number cannot be empty"));
        }
        if !self.policy.secondary_lookup {
            return Err(DirectoryError::validation(
                "phone lookup is not supported by this backend",
            ));
        }
        // Format is advisory; lookups proceed either way.
        if !model::is_well_formed_phone(phone) {
            debug!(phone, "phone number does not match the expected format");
        }
        self.store
            .find_by_phone(phone)
            .await?
            .ok_or_else(|| DirectoryError::not_found(format!("no profile with phone number {phone}")))
    }

    /// Every profile, hydrated.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_profiles(&self) -> Result<Vec<UserRecord>> {
        Ok(aggregate::list_profiles(&self.store, self.fan_out).await?)
    }

    /// Every stored identifier.
    pub async fn list_ids(&self) -> Result<Vec<String>> {
        if !self.policy.list_ids {
            return Err(DirectoryError::validation(
                "identifier listing is not supported by this backend",
            ));
        }
        Ok(aggregate::list_ids(&self.store).await?)
    }

    /// Delete a profile. Deleting an unknown identifier succeeds.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Ok(());
        }
        self.store.delete(id).await?;
        Ok(())
    }

    /// Clear the whole record namespace.
    pub async fn flush(&self) -> Result<usize> {
        if !self.policy.flush {
            return Err(DirectoryError::validation(
                "flush is not supported by this backend",
            ));
        }
        let removed = self.store.clear().await?;
        info!(removed, "flushed record namespace");
        Ok(removed)
    }

    /// Flush and release the store.
    pub async fn close(&self) -> Result<()> {
        self.store.close().await?;
        Ok(())
    }

    async fn lookup_phone(&self, phone: &str) -> Result<Option<UserRecord>> {
        if !self.policy.secondary_lookup || phone.is_empty() {
            return Ok(None);
        }
        Ok(self.store.find_by_phone(phone).await?)
    }
}
