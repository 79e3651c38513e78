//! In-process catalog, for tests and ephemeral deployments

use super::{CatalogError, CatalogStore, Document, DocumentId, OwnerRecord};
use crate::identity::OwnerId;

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
pub struct MemoryCatalog {
    documents: RwLock<HashMap<DocumentId, Document>>,
    owners: RwLock<BTreeMap<OwnerId, OwnerRecord>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>, CatalogError> {
        Ok(self.documents.read().get(id).cloned())
    }

    async fn insert_document(&self, document: &Document) -> Result<(), CatalogError> {
        let mut documents = self.documents.write();
        if documents.contains_key(&document.id) {
            return Err(CatalogError::DuplicateDocument(document.id));
        }
        documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn save_document(&self, document: &Document) -> Result<(), CatalogError> {
        self.documents.write().insert(document.id, document.clone());
        Ok(())
    }

    async fn remove_document(&self, id: &DocumentId) -> Result<Option<Document>, CatalogError> {
        Ok(self.documents.write().remove(id))
    }

    async fn documents(&self) -> Result<Vec<Document>, CatalogError> {
        Ok(self.documents.read().values().cloned().collect())
    }

    async fn get_owner(&self, id: &OwnerId) -> Result<Option<OwnerRecord>, CatalogError> {
        Ok(self.owners.read().get(id).cloned())
    }

    async fn save_owner(&self, owner: &OwnerRecord) -> Result<(), CatalogError> {
        self.owners.write().insert(owner.id.clone(), owner.clone());
        Ok(())
    }

    async fn remove_owner(&self, id: &OwnerId) -> Result<Option<OwnerRecord>, CatalogError> {
        Ok(self.owners.write().remove(id))
    }

    async fn owners(&self) -> Result<Vec<OwnerRecord>, CatalogError> {
        Ok(self.owners.read().values().cloned().collect())
    }
}
