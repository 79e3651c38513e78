//! Catalog records

use crate::identity::{OwnerId, Principal};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Document identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(Uuid);

impl DocumentId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Metadata of one stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,

    /// Physical blob name inside the owner's namespace
    pub filename: String,

    /// Owner-scoped virtual path
    pub path: String,

    /// Size in bytes; equals the blob's length at rest
    pub size: u64,

    /// BLAKE3 hex digest of the content
    pub checksum: String,

    pub mimetype: String,

    /// Set once at creation, survives replacement
    pub upload_date: DateTime<Utc>,
}

impl Document {
    /// Wire representation
    pub fn view(&self) -> DocumentView {
        DocumentView {
            id: self.id,
            filename: self.filename.clone(),
            path: self.path.clone(),
            size: self.size,
            upload_date: self.upload_date,
        }
    }
}

/// `{id, filename, path, size, uploadDate}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: DocumentId,
    pub filename: String,
    pub path: String,
    pub size: u64,
    pub upload_date: DateTime<Utc>,
}

/// The part of a user this store owns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerRecord {
    pub id: OwnerId,
    pub username: String,
    pub plan: String,
    /// Ordered, duplicate-free
    pub documents: Vec<DocumentId>,
}

impl OwnerRecord {
    pub fn new(id: OwnerId, username: &str, plan: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            plan: plan.to_string(),
            documents: Vec::new(),
        }
    }

    pub fn from_principal(principal: &Principal) -> Self {
        Self::new(principal.id.clone(), &principal.username, &principal.plan)
    }

    pub fn owns(&self, id: &DocumentId) -> bool {
        self.documents.contains(id)
    }

    /// Append a reference; returns false if it was already listed
    pub fn attach(&mut self, id: DocumentId) -> bool {
        if self.owns(&id) {
            return false;
        }
        self.documents.push(id);
        true
    }

    /// Remove a reference; returns false if it was not listed
    pub fn detach(&mut self, id: &DocumentId) -> bool {
        let before = self.documents.len();
        self.documents.retain(|d| d != id);
        self.documents.len() != before
    }
}
