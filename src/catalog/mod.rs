//! Catalog Module - Document metadata and per-owner reference lists
//!
//! The catalog persists records; it never decides which documents an owner
//! holds. Reference lists are edited by the lifecycle layer and written back
//! whole.

mod document;
mod memory;
mod sled_store;

pub use document::{Document, DocumentId, DocumentView, OwnerRecord};
pub use memory::MemoryCatalog;
pub use sled_store::SledCatalog;

use crate::identity::OwnerId;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Document already exists: {0}")]
    DuplicateDocument(DocumentId),

    #[error("Catalog unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Persistence of document records and owner records
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>, CatalogError>;

    /// Insert a new record. Not idempotent: an existing id is an error.
    async fn insert_document(&self, document: &Document) -> Result<(), CatalogError>;

    /// Overwrite an existing record (or create it)
    async fn save_document(&self, document: &Document) -> Result<(), CatalogError>;

    async fn remove_document(&self, id: &DocumentId) -> Result<Option<Document>, CatalogError>;

    /// Every document record, for reconciliation
    async fn documents(&self) -> Result<Vec<Document>, CatalogError>;

    async fn get_owner(&self, id: &OwnerId) -> Result<Option<OwnerRecord>, CatalogError>;

    async fn save_owner(&self, owner: &OwnerRecord) -> Result<(), CatalogError>;

    async fn remove_owner(&self, id: &OwnerId) -> Result<Option<OwnerRecord>, CatalogError>;

    /// Every owner record, for reconciliation
    async fn owners(&self) -> Result<Vec<OwnerRecord>, CatalogError>;
}
