//! # Identity Resolution
//!
//! Decides which stored identity a register or update request refers to.
//! A request can name an identity by phone number, by identifier, or both,
//! and the two lookups can disagree. The precedence rules are written as two
//! small decision tables over the lookup outcomes so every cell can be
//! audited and tested on its own:
//!
//! Register (the by-id lookup only runs when no phone match exists):
//!
//! | by phone | by id                                     | decision                |
//! |----------|-------------------------------------------|-------------------------|
//! | found    | -                                         | adopt stored identifier |
//! | absent   | found, stored phone set, incoming empty   | replace, backfill phone |
//! | absent   | found, otherwise                          | replace                 |
//! | absent   | absent                                    | insert                  |
//!
//! Update:
//!
//! | by phone | by id  | decision                         |
//! |----------|--------|----------------------------------|
//! | any      | found  | identifier wins, keep its phone  |
//! | found    | absent | adopt identifier of phone match  |
//! | absent   | absent | not found                        |

use crate::model::UserRecord;

/// How `update` behaves for a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Cross-fill from both lookups and return the merged record.
    Merge,
    /// Overwrite only if the identifier's key exists; report a boolean.
    Conditional,
}

/// Per-backend behaviour of the directory engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariantPolicy {
    /// Query the phone-number index on register and update.
    pub secondary_lookup: bool,
    /// Reject register requests without a phone number.
    pub require_phone: bool,
    pub update_mode: UpdateMode,
    /// Expose identifier listing.
    pub list_ids: bool,
    /// Expose namespace flush.
    pub flush: bool,
}

impl VariantPolicy {
    pub fn document() -> Self {
        Self {
            secondary_lookup: true,
            require_phone: true,
            update_mode: UpdateMode::Merge,
            list_ids: false,
            flush: false,
        }
    }

    pub fn document_cache() -> Self {
        Self {
            secondary_lookup: false,
            require_phone: false,
            update_mode: UpdateMode::Merge,
            list_ids: true,
            flush: true,
        }
    }

    pub fn cache() -> Self {
        Self {
            secondary_lookup: false,
            require_phone: false,
            update_mode: UpdateMode::Conditional,
            list_ids: true,
            flush: true,
        }
    }

    pub fn with_require_phone(mut self, require_phone: bool) -> Self {
        self.require_phone = require_phone;
        self
    }
}

/// How the resolved register record is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// New entry; fails if the identifier appeared concurrently.
    Insert,
    /// Full replacement of the stored identity.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterDecision {
    AdoptPhoneIdentity { id: String },
    Replace { backfill_phone: Option<String> },
    Insert,
}

pub fn decide_register(
    by_phone: Option<&UserRecord>,
    by_id: Option<&UserRecord>,
    incoming: &UserRecord,
) -> RegisterDecision {
    match (by_phone, by_id) {
        (Some(existing), _) => RegisterDecision::AdoptPhoneIdentity {
            id: existing.id.clone(),
        },
        (None, Some(existing)) if existing.has_phone_number() && !incoming.has_phone_number() => {
            RegisterDecision::Replace {
                backfill_phone: Some(existing.phone_number.clone()),
            }
        }
        (None, Some(_)) => RegisterDecision::Replace {
            backfill_phone: None,
        },
        (None, None) => RegisterDecision::Insert,
    }
}

impl RegisterDecision {
    /// Merge the decision into the incoming record.
    pub fn apply(self, mut incoming: UserRecord) -> (UserRecord, WriteKind) {
        match self {
            RegisterDecision::AdoptPhoneIdentity { id } => {
                incoming.id = id;
                (incoming, WriteKind::Replace)
            }
            RegisterDecision::Replace { backfill_phone } => {
                if let Some(phone) = backfill_phone {
                    incoming.phone_number = phone;
                }
                (incoming, WriteKind::Replace)
            }
            RegisterDecision::Insert => (incoming, WriteKind::Insert),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateDecision {
    IdAuthoritative { phone: String },
    AdoptPhoneIdentity { id: String },
    NotFound,
}

pub fn decide_update(by_phone: Option<&UserRecord>, by_id: Option<&UserRecord>) -> UpdateDecision {
    match (by_phone, by_id) {
        (_, Some(existing)) => UpdateDecision::IdAuthoritative {
            phone: existing.phone_number.clone(),
        },
        (Some(existing), None) => UpdateDecision::AdoptPhoneIdentity {
            id: existing.id.clone(),
        },
        (None, None) => UpdateDecision::NotFound,
    }
}

impl UpdateDecision {
    /// Merged record to persist, or `None` when nothing matched.
    pub fn apply(self, mut incoming: UserRecord) -> Option<UserRecord> {
        match self {
            UpdateDecision::IdAuthoritative { phone } => {
                incoming.phone_number = phone;
                Some(incoming)
            }
            UpdateDecision::AdoptPhoneIdentity { id } => {
                incoming.id = id;
                Some(incoming)
            }
            UpdateDecision::NotFound => None,
        }
    }
}
