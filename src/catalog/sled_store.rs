//! sled-backed catalog
//!
//! Two trees: `documents` keyed by the 16 raw id bytes and `owners` keyed by
//! the owner id. Values are JSON. Every write is flushed before returning.

use super::{CatalogError, CatalogStore, Document, DocumentId, OwnerRecord};
use crate::identity::OwnerId;

use async_trait::async_trait;
use std::path::Path;

const DOCUMENTS_TREE: &str = "documents";
const OWNERS_TREE: &str = "owners";

#[derive(Clone)]
pub struct SledCatalog {
    db: sled::Db,
    documents: sled::Tree,
    owners: sled::Tree,
}

impl SledCatalog {
    /// Open (or create) a catalog at `path`
    pub fn open(path: &Path) -> Result<Self, CatalogError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Throwaway catalog, removed on drop
    pub fn temporary() -> Result<Self, CatalogError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, CatalogError> {
        let documents = db.open_tree(DOCUMENTS_TREE)?;
        let owners = db.open_tree(OWNERS_TREE)?;
        Ok(Self {
            db,
            documents,
            owners,
        })
    }

    async fn flush(&self) -> Result<(), CatalogError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for SledCatalog {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>, CatalogError> {
        match self.documents.get(id.as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn insert_document(&self, document: &Document) -> Result<(), CatalogError> {
        let value = serde_json::to_vec(document)?;
        let swapped = self.documents.compare_and_swap(
            document.id.as_bytes(),
            None as Option<&[u8]>,
            Some(value),
        )?;
        if swapped.is_err() {
            return Err(CatalogError::DuplicateDocument(document.id));
        }
        self.flush().await
    }

    async fn save_document(&self, document: &Document) -> Result<(), CatalogError> {
        let value = serde_json::to_vec(document)?;
        self.documents.insert(document.id.as_bytes(), value)?;
        self.flush().await
    }

    async fn remove_document(&self, id: &DocumentId) -> Result<Option<Document>, CatalogError> {
        let removed = match self.documents.remove(id.as_bytes())? {
            Some(raw) => Some(serde_json::from_slice(&raw)?),
            None => None,
        };
        self.flush().await?;
        Ok(removed)
    }

    async fn documents(&self) -> Result<Vec<Document>, CatalogError> {
        let mut documents = Vec::new();
        for item in self.documents.iter() {
            let (_, raw) = item?;
            documents.push(serde_json::from_slice(&raw)?);
        }
        Ok(documents)
    }

    async fn get_owner(&self, id: &OwnerId) -> Result<Option<OwnerRecord>, CatalogError> {
        match self.owners.get(id.as_str().as_bytes())? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save_owner(&self, owner: &OwnerRecord) -> Result<(), CatalogError> {
        let value = serde_json::to_vec(owner)?;
        self.owners.insert(owner.id.as_str().as_bytes(), value)?;
        self.flush().await
    }

    async fn remove_owner(&self, id: &OwnerId) -> Result<Option<OwnerRecord>, CatalogError> {
        let removed = match self.owners.remove(id.as_str().as_bytes())? {
            Some(raw) => Some(serde_json::from_slice(&raw)?),
            None => None,
        };
        self.flush().await?;
        Ok(removed)
    }

    async fn owners(&self) -> Result<Vec<OwnerRecord>, CatalogError> {
        let mut owners = Vec::new();
        for item in self.owners.iter() {
            let (_, raw) = item?;
            owners.push(serde_json::from_slice(&raw)?);
        }
        Ok(owners)
    }
}
