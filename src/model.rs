//! # Data Model
//!
//! The user record, its identifier type and the phone-number format helper.

use crate::error::DirectoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A user profile as exchanged over HTTP and persisted by every backend.
///
/// All fields are free text on the way in; missing fields decode as empty
/// strings. `id` is the primary key in every storage variant and is only
/// guaranteed to be a valid UUID once it has passed through the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct UserRecord {
    pub name: String,
    #[serde(alias = "phoneNumber")]
    pub phone_number: String,
    #[serde(alias = "imageURL")]
    pub image_url: String,
    pub status: String,
    #[serde(rename = "uuid", alias = "id")]
    pub id: String,
}

impl UserRecord {
    pub fn new(name: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone_number: phone_number.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = image_url.into();
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn has_id(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn has_phone_number(&self) -> bool {
        !self.phone_number.is_empty()
    }
}

/// Validated user identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(Uuid);

impl UserId {
    /// Generate a fresh random (v4) identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse an identifier supplied by a caller.
    pub fn parse(raw: &str) -> Result<Self, DirectoryError> {
        Uuid::parse_str(raw)
            .map(Self)
            .map_err(|err| DirectoryError::Validation(format!("invalid identifier {raw:?}: {err}")))
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for UserId {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Minimum number of digits after the leading `+`.
pub const MIN_PHONE_DIGITS: usize = 5;

/// Checks the `^\+\d{5,}$` shape. Advisory only: no write path rejects a
/// phone number that fails it.
pub fn is_well_formed_phone(phone: &str) -> bool {
    match phone.strip_prefix('+') {
        Some(digits) => {
            digits.len() >= MIN_PHONE_DIGITS && digits.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}
