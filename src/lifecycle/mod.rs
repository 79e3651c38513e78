//! Document Lifecycle - create, update and delete across blob store and catalog
//!
//! There is no transaction spanning the blob store and the catalog, so every
//! write is a short saga:
//!
//! | step                     | idempotent | compensation               |
//! |--------------------------|------------|----------------------------|
//! | blob put                 | no         | blob delete                |
//! | blob delete              | yes        | none (orphan is harmless)  |
//! | catalog record insert    | no         | record remove              |
//! | catalog record overwrite | yes        | none (new blob discarded)  |
//! | owner reference save     | yes        | undo the record step       |
//!
//! A compensation that itself fails is logged and left to the reconciler;
//! the caller still gets the error of the primary failure.

mod admission;
mod pending;
mod upload;

#[cfg(test)]
mod tests;

pub use admission::{AdmissionGuard, AdmissionLocks};
pub use upload::{Upload, UploadPolicy};

use crate::catalog::{CatalogError, CatalogStore, Document, DocumentId, OwnerRecord, SledCatalog};
use crate::config::DocVaultConfig;
use crate::identity::{OwnerId, Principal};
use crate::maintenance::Reconciler;
use crate::storage::{
    BlobStore, FsBlobStore, QuotaCheckResult, QuotaEnforcer, QuotaSummary, StoredBlob,
    UsageAccountant, WriteIntent,
};
use crate::{DocVaultError, Result};
use pending::PendingBlob;

use chrono::Utc;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No document selected")]
    MissingUpload,

    #[error("Only one document can be uploaded at a time, got {0}")]
    TooManyFiles(usize),

    #[error("Only .{expected} documents can be uploaded, got {file_name:?}")]
    UnsupportedType { file_name: String, expected: String },

    #[error("Invalid file name: {0:?}")]
    InvalidFileName(String),

    #[error("Invalid document id: {0:?}")]
    InvalidDocumentId(String),
}

/// What `purge_owner` removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub documents_removed: u64,
    pub bytes_released: u64,
}

/// Orchestrates writes over the blob store, catalog, usage accountant and
/// quota enforcer.
#[derive(Clone)]
pub struct DocumentLifecycle {
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogStore>,
    accountant: UsageAccountant,
    enforcer: QuotaEnforcer,
    uploads: UploadPolicy,
    admission: Arc<AdmissionLocks>,
    public_prefix: String,
}

impl DocumentLifecycle {
    /// Wire a lifecycle over existing stores. `config` must already be validated.
    pub fn new(
        config: &DocVaultConfig,
        blobs: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            accountant: UsageAccountant::new(blobs.clone()),
            enforcer: QuotaEnforcer::new(Arc::new(config.plans.clone())),
            uploads: UploadPolicy::new(&config.allowed_extension),
            admission: Arc::new(AdmissionLocks::new(config.serialize_admission)),
            public_prefix: config.public_prefix.trim_end_matches('/').to_string(),
            blobs,
            catalog,
        }
    }

    /// Validate `config` and open the filesystem blob store and sled catalog
    pub fn open(config: &DocVaultConfig) -> Result<Self> {
        config.validate()?;

        let blobs = Arc::new(FsBlobStore::new(config.storage_root.clone()));
        let catalog = Arc::new(SledCatalog::open(&config.catalog_path)?);

        tracing::info!(
            storage_root = %config.storage_root.display(),
            catalog = %config.catalog_path.display(),
            plans = config.plans.len(),
            "document store opened"
        );

        Ok(Self::new(config, blobs, catalog))
    }

    pub fn blobs(&self) -> &Arc<dyn BlobStore> {
        &self.blobs
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogStore> {
        &self.catalog
    }

    pub fn accountant(&self) -> &UsageAccountant {
        &self.accountant
    }

    pub fn enforcer(&self) -> &QuotaEnforcer {
        &self.enforcer
    }

    /// Out-of-band consistency checks sharing this lifecycle's owner locks
    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.blobs.clone(),
            self.catalog.clone(),
            self.admission.clone(),
        )
    }

    /// Store a new document for `principal`.
    ///
    /// `files` are the files of the request; exactly one is accepted.
    pub async fn create(&self, principal: &Principal, files: Vec<Upload>) -> Result<Document> {
        let upload = self.uploads.select(files)?;
        self.plan_limit(principal)?;

        let admission = self.admission.acquire(&principal.id).await;

        self.blobs.ensure_namespace(&principal.id).await?;
        let stored = self
            .blobs
            .put(&principal.id, &upload.file_name, &upload.bytes)
            .await?;
        let pending = PendingBlob::new(
            self.blobs.clone(),
            principal.id.clone(),
            stored.physical_name.clone(),
        );

        // From here on the saga runs detached: once the owner reference is
        // saved the blob must survive, even if the caller goes away.
        let lifecycle = self.clone();
        let principal = principal.clone();
        run_detached(async move {
            let _admission = admission;
            match lifecycle.commit_create(&principal, &upload, &stored).await {
                Ok(document) => {
                    pending.commit();
                    tracing::info!(
                        owner = %principal.id,
                        document = %document.id,
                        bytes = document.size,
                        "document created"
                    );
                    Ok(document)
                }
                Err(e) => {
                    pending.discard().await;
                    Err(e)
                }
            }
        })
        .await
    }

    async fn commit_create(
        &self,
        principal: &Principal,
        upload: &Upload,
        stored: &StoredBlob,
    ) -> Result<Document> {
        let used = self
            .accountant
            .used_bytes_excluding(&principal.id, &stored.physical_name)
            .await?;
        self.admit(principal, used, WriteIntent::Create { size: stored.size })?;

        let document = Document {
            id: DocumentId::generate(),
            filename: stored.physical_name.clone(),
            path: self.virtual_path(&principal.id, &stored.physical_name),
            size: stored.size,
            checksum: upload.checksum(),
            mimetype: upload.mime_type(),
            upload_date: Utc::now(),
        };
        self.catalog.insert_document(&document).await?;

        let mut owner = self.load_owner(principal).await?;
        owner.attach(document.id);
        if let Err(e) = self.catalog.save_owner(&owner).await {
            if let Err(undo) = self.catalog.remove_document(&document.id).await {
                tracing::error!(
                    owner = %principal.id,
                    document = %document.id,
                    error = %undo,
                    "failed to remove unreferenced record"
                );
            }
            return Err(e.into());
        }

        Ok(document)
    }

    /// Replace the content of an owned document, keeping its id and upload date
    pub async fn update(
        &self,
        principal: &Principal,
        document_id: &str,
        files: Vec<Upload>,
    ) -> Result<Document> {
        let id = parse_document_id(document_id)?;
        self.plan_limit(principal)?;

        let admission = self.admission.acquire(&principal.id).await;

        let existing = self.owned_document(principal, &id).await?;
        let upload = self.uploads.select(files)?;

        self.blobs.ensure_namespace(&principal.id).await?;
        let stored = self
            .blobs
            .put(&principal.id, &upload.file_name, &upload.bytes)
            .await?;
        let pending = PendingBlob::new(
            self.blobs.clone(),
            principal.id.clone(),
            stored.physical_name.clone(),
        );

        // Once the record is overwritten the new blob must survive and the
        // old one must go, even if the caller goes away.
        let lifecycle = self.clone();
        let principal = principal.clone();
        run_detached(async move {
            let _admission = admission;
            match lifecycle
                .commit_update(&principal, &existing, &upload, &stored)
                .await
            {
                Ok(document) => {
                    pending.commit();
                    lifecycle
                        .retire_blob(&principal.id, &existing.filename)
                        .await;
                    tracing::info!(
                        owner = %principal.id,
                        document = %document.id,
                        old_bytes = existing.size,
                        bytes = document.size,
                        "document replaced"
                    );
                    Ok(document)
                }
                Err(e) => {
                    pending.discard().await;
                    Err(e)
                }
            }
        })
        .await
    }

    async fn commit_update(
        &self,
        principal: &Principal,
        existing: &Document,
        upload: &Upload,
        stored: &StoredBlob,
    ) -> Result<Document> {
        let used = self
            .accountant
            .used_bytes_excluding(&principal.id, &stored.physical_name)
            .await?;
        self.admit(
            principal,
            used,
            WriteIntent::Replace {
                old_size: existing.size,
                new_size: stored.size,
            },
        )?;

        let document = Document {
            id: existing.id,
            filename: stored.physical_name.clone(),
            path: self.virtual_path(&principal.id, &stored.physical_name),
            size: stored.size,
            checksum: upload.checksum(),
            mimetype: upload.mime_type(),
            upload_date: existing.upload_date,
        };
        self.catalog.save_document(&document).await?;

        Ok(document)
    }

    /// Remove an owned document: record, reference, then blob
    pub async fn delete(&self, principal: &Principal, document_id: &str) -> Result<Document> {
        let id = parse_document_id(document_id)?;

        let admission = self.admission.acquire(&principal.id).await;

        let owner = match self.catalog.get_owner(&principal.id).await? {
            Some(owner) if owner.owns(&id) => owner,
            _ => return Err(not_found(&id)),
        };

        let lifecycle = self.clone();
        run_detached(async move {
            let _admission = admission;
            lifecycle.remove_owned(owner, id).await
        })
        .await
    }

    async fn remove_owned(&self, mut owner: OwnerRecord, id: DocumentId) -> Result<Document> {
        let document = match self.catalog.remove_document(&id).await? {
            Some(document) => document,
            None => {
                tracing::warn!(owner = %owner.id, document = %id, "dropping dangling reference");
                owner.detach(&id);
                self.catalog.save_owner(&owner).await?;
                return Err(not_found(&id));
            }
        };

        owner.detach(&id);
        if let Err(e) = self.catalog.save_owner(&owner).await {
            if let Err(undo) = self.catalog.insert_document(&document).await {
                tracing::error!(
                    owner = %owner.id,
                    document = %id,
                    error = %undo,
                    "failed to restore record; reference is dangling"
                );
            }
            return Err(e.into());
        }

        self.retire_blob(&owner.id, &document.filename).await;
        tracing::info!(owner = %owner.id, document = %id, bytes = document.size, "document deleted");

        Ok(document)
    }

    /// Fetch one owned document
    pub async fn get(&self, principal: &Principal, document_id: &str) -> Result<Document> {
        let id = parse_document_id(document_id)?;
        self.owned_document(principal, &id).await
    }

    /// All documents of `principal` in reference order
    pub async fn list(&self, principal: &Principal) -> Result<Vec<Document>> {
        let owner = match self.catalog.get_owner(&principal.id).await? {
            Some(owner) => owner,
            None => return Ok(Vec::new()),
        };

        let records = try_join_all(
            owner
                .documents
                .iter()
                .map(|id| self.catalog.get_document(id)),
        )
        .await?;

        Ok(owner
            .documents
            .iter()
            .zip(records)
            .filter_map(|(id, record)| {
                if record.is_none() {
                    tracing::warn!(owner = %principal.id, document = %id, "skipping dangling reference");
                }
                record
            })
            .collect())
    }

    /// Content of an owned document
    pub async fn read_content(&self, principal: &Principal, document_id: &str) -> Result<Vec<u8>> {
        let id = parse_document_id(document_id)?;
        let document = self.owned_document(principal, &id).await?;
        Ok(self.blobs.read(&principal.id, &document.filename).await?)
    }

    /// Remaining capacity of `principal`'s plan
    pub async fn quota(&self, principal: &Principal, round: bool) -> Result<QuotaSummary> {
        self.plan_limit(principal)?;
        let used = self.accountant.used_bytes(&principal.id).await?;
        Ok(self.enforcer.summary(&principal.plan, used, round)?)
    }

    /// Remove everything stored for `owner`: records, blobs, owner record.
    ///
    /// Records go first and the owner record last, so an interrupted purge
    /// can simply be run again.
    pub async fn purge_owner(&self, owner: &OwnerId) -> Result<PurgeReport> {
        let _admission = self.admission.acquire(owner).await;

        let mut report = PurgeReport::default();
        if let Some(record) = self.catalog.get_owner(owner).await? {
            for id in &record.documents {
                if self.catalog.remove_document(id).await?.is_some() {
                    report.documents_removed += 1;
                }
            }
        }

        report.bytes_released = self.accountant.used_bytes(owner).await?;
        self.blobs.remove_namespace(owner).await?;
        self.catalog.remove_owner(owner).await?;

        tracing::info!(
            owner = %owner,
            documents = report.documents_removed,
            bytes = report.bytes_released,
            "owner purged"
        );

        Ok(report)
    }

    /// Resolve a document the principal owns. Unknown and foreign ids both
    /// come back as `NotFound`.
    async fn owned_document(&self, principal: &Principal, id: &DocumentId) -> Result<Document> {
        let owns = self
            .catalog
            .get_owner(&principal.id)
            .await?
            .map(|owner| owner.owns(id))
            .unwrap_or(false);
        if !owns {
            tracing::debug!(owner = %principal.id, document = %id, "document not referenced by owner");
            return Err(not_found(id));
        }

        match self.catalog.get_document(id).await? {
            Some(document) => Ok(document),
            None => {
                tracing::warn!(owner = %principal.id, document = %id, "dangling reference");
                Err(not_found(id))
            }
        }
    }

    /// Current owner record, created from the principal on first write
    async fn load_owner(&self, principal: &Principal) -> Result<OwnerRecord> {
        let mut owner = self
            .catalog
            .get_owner(&principal.id)
            .await?
            .unwrap_or_else(|| OwnerRecord::from_principal(principal));
        owner.username = principal.username.clone();
        owner.plan = principal.plan.clone();
        Ok(owner)
    }

    fn plan_limit(&self, principal: &Principal) -> Result<u64> {
        self.enforcer
            .plan_limit_bytes(&principal.plan)
            .map_err(|e| {
                tracing::error!(
                    owner = %principal.id,
                    plan = %principal.plan,
                    "principal carries a plan missing from the plan table"
                );
                DocVaultError::from(e)
            })
    }

    fn admit(&self, principal: &Principal, used: u64, intent: WriteIntent) -> Result<()> {
        match self.enforcer.check(&principal.plan, used, intent)? {
            QuotaCheckResult::Allowed { remaining_bytes } => {
                tracing::debug!(owner = %principal.id, used, remaining_bytes, "write admitted");
                Ok(())
            }
            QuotaCheckResult::Exceeded {
                limit_bytes,
                requested_bytes,
                remaining_bytes,
                ..
            } => {
                tracing::info!(
                    owner = %principal.id,
                    plan = %principal.plan,
                    limit_bytes,
                    used,
                    requested_bytes,
                    "write rejected by quota"
                );
                Err(DocVaultError::QuotaExceeded {
                    requested_bytes,
                    remaining_bytes,
                })
            }
        }
    }

    /// Best-effort removal of a blob no record points at any more
    async fn retire_blob(&self, owner: &OwnerId, physical_name: &str) {
        if let Err(e) = self.blobs.delete(owner, physical_name).await {
            tracing::warn!(
                owner = %owner,
                blob = %physical_name,
                error = %e,
                "failed to delete retired blob; orphan left for reconciliation"
            );
        }
    }

    fn virtual_path(&self, owner: &OwnerId, physical_name: &str) -> String {
        format!("{}/{}/{}", self.public_prefix, owner, physical_name)
    }
}

/// Run the mutating half of a saga on its own task so dropping the request
/// future cannot stop it between a catalog write and the matching blob step.
async fn run_detached<F>(saga: F) -> Result<Document>
where
    F: Future<Output = Result<Document>> + Send + 'static,
{
    match tokio::spawn(saga).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            tracing::error!(error = %e, "write task cancelled");
            Err(CatalogError::Unavailable("write task cancelled".into()).into())
        }
    }
}

fn parse_document_id(raw: &str) -> Result<DocumentId> {
    raw.parse::<DocumentId>()
        .map_err(|_| DocVaultError::from(ValidationError::InvalidDocumentId(raw.to_string())))
}

fn not_found(id: &DocumentId) -> DocVaultError {
    DocVaultError::NotFound(id.to_string())
}
