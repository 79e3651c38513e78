//! Identity Module - Authenticated principals and owner keys
//!
//! The store never verifies credentials. It receives a principal that an
//! outer layer already authenticated and trusts its id, username and plan.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MAX_OWNER_ID_LEN: usize = 128;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Owner id is empty")]
    EmptyOwnerId,

    #[error("Owner id too long: {0} characters")]
    OwnerIdTooLong(usize),

    #[error("Owner id contains invalid character {0:?}")]
    InvalidOwnerChar(char),
}

/// Stable key of an owner.
///
/// Doubles as the owner's namespace name in the blob store, so it is limited
/// to ASCII alphanumerics, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    /// Parse and validate an owner id
    pub fn parse(raw: &str) -> Result<Self, IdentityError> {
        if raw.is_empty() {
            return Err(IdentityError::EmptyOwnerId);
        }
        if raw.len() > MAX_OWNER_ID_LEN {
            return Err(IdentityError::OwnerIdTooLong(raw.len()));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdentityError::InvalidOwnerChar(c));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for OwnerId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<OwnerId> for String {
    fn from(id: OwnerId) -> Self {
        id.0
    }
}

/// An already-authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: OwnerId,
    pub username: String,
    /// Plan name, resolved against the plan table on every write
    pub plan: String,
}

impl Principal {
    pub fn new(id: &str, username: &str, plan: &str) -> Result<Self, IdentityError> {
        Ok(Self {
            id: OwnerId::parse(id)?,
            username: username.to_string(),
            plan: plan.to_string(),
        })
    }
}
