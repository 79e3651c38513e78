//! Reconciler
//!
//! Per-owner scans and repairs take the same admission lock as writes, so a
//! blob whose record is still being written is never mistaken for an orphan.
//! With admission serialization disabled that guarantee is gone and `repair`
//! should only run while the store is idle.

use super::{OwnerReport, ReconcileReport, RepairSummary, SizeDrift, SweepSummary};
use crate::catalog::{CatalogStore, Document, DocumentId, OwnerRecord};
use crate::identity::OwnerId;
use crate::lifecycle::AdmissionLocks;
use crate::storage::BlobStore;
use crate::Result;

use chrono::Utc;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Snapshot of one owner taken under its lock
struct Inspection {
    report: OwnerReport,
    record: Option<OwnerRecord>,
    blob_sizes: HashMap<String, u64>,
}

pub struct Reconciler {
    blobs: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogStore>,
    admission: Arc<AdmissionLocks>,
}

impl Reconciler {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogStore>,
        admission: Arc<AdmissionLocks>,
    ) -> Self {
        Self {
            blobs,
            catalog,
            admission,
        }
    }

    /// Compare one owner's namespace with its reference list
    pub async fn scan_owner(&self, owner: &OwnerId) -> Result<OwnerReport> {
        let _guard = self.admission.acquire(owner).await;
        Ok(self.inspect(owner).await?.report)
    }

    /// Scan every owner known to either store, plus records no owner lists
    pub async fn scan_all(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for owner in self.known_owners().await? {
            report.owners.push(self.scan_owner(&owner).await?);
        }
        report.unreferenced_documents = self
            .unreferenced_documents()
            .await?
            .into_iter()
            .map(|d| d.id)
            .collect();
        Ok(report)
    }

    /// Delete orphan blobs, drop dangling references and remove unreferenced
    /// records older than `grace`. Partial blobs are left to `sweep_partials`.
    pub async fn repair(&self, grace: Duration) -> Result<RepairSummary> {
        let mut summary = RepairSummary::default();

        for owner in self.known_owners().await? {
            let _guard = self.admission.acquire(&owner).await;
            let inspection = self.inspect(&owner).await?;

            for name in &inspection.report.orphan_blobs {
                self.blobs.delete(&owner, name).await?;
                summary.orphans_deleted += 1;
                summary.bytes_released += inspection.blob_sizes.get(name).copied().unwrap_or(0);
                tracing::info!(owner = %owner, blob = %name, "deleted orphan blob");
            }

            if let Some(mut record) = inspection.record {
                let dangling = &inspection.report.dangling_refs;
                if !dangling.is_empty() {
                    record.documents.retain(|id| !dangling.contains(id));
                    self.catalog.save_owner(&record).await?;
                    summary.references_dropped += dangling.len() as u64;
                    tracing::info!(owner = %owner, count = dangling.len(), "dropped dangling references");
                }
            }
        }

        let grace = chrono::Duration::from_std(grace).unwrap_or_else(|_| chrono::Duration::zero());
        let cutoff = Utc::now() - grace;
        for document in self.unreferenced_documents().await? {
            if document.upload_date > cutoff {
                continue;
            }
            if self.catalog.remove_document(&document.id).await?.is_some() {
                summary.records_removed += 1;
                tracing::info!(document = %document.id, "removed unreferenced record");
            }
        }

        Ok(summary)
    }

    /// Remove `.partial` blobs untouched for longer than `ttl`, one owner at a
    /// time under its admission lock
    pub async fn sweep_partials(&self, ttl: Duration) -> Result<SweepSummary> {
        let mut summary = SweepSummary::default();
        let now = SystemTime::now();

        for owner in self.blobs.namespaces().await? {
            // A writer holding the lock may still be filling its partial file
            let _guard = self.admission.acquire(&owner).await;
            for entry in self.blobs.entries(&owner).await? {
                if !entry.is_partial() {
                    continue;
                }
                let stale = entry
                    .modified
                    .map(|m| now.duration_since(m).unwrap_or_default() >= ttl)
                    .unwrap_or(false);
                if !stale {
                    continue;
                }

                self.blobs.delete(&owner, &entry.name).await?;
                summary.removed += 1;
                summary.bytes_released += entry.size;
                tracing::info!(owner = %owner, blob = %entry.name, "swept partial blob");
            }
        }

        Ok(summary)
    }

    async fn inspect(&self, owner: &OwnerId) -> Result<Inspection> {
        let mut report = OwnerReport::new(owner.clone());
        let entries = self.blobs.entries(owner).await?;
        let record = self.catalog.get_owner(owner).await?;

        let mut referenced: HashMap<String, Document> = HashMap::new();
        if let Some(record) = &record {
            for id in &record.documents {
                match self.catalog.get_document(id).await? {
                    Some(document) => {
                        referenced.insert(document.filename.clone(), document);
                    }
                    None => report.dangling_refs.push(*id),
                }
            }
        }

        let mut blob_sizes = HashMap::new();
        for entry in entries {
            if entry.is_partial() {
                report.partial_blobs.push(entry.name);
                continue;
            }
            if !referenced.contains_key(&entry.name) {
                report.orphan_blobs.push(entry.name.clone());
            }
            blob_sizes.insert(entry.name, entry.size);
        }

        for (name, document) in &referenced {
            match blob_sizes.get(name) {
                None => report.missing_blobs.push(document.id),
                Some(&actual) if actual != document.size => report.size_drift.push(SizeDrift {
                    document: document.id,
                    recorded: document.size,
                    actual,
                }),
                Some(_) => {}
            }
        }

        report.orphan_blobs.sort();
        report.partial_blobs.sort();
        report.missing_blobs.sort();
        report.size_drift.sort_by_key(|d| d.document);

        if !report.is_clean() {
            tracing::warn!(
                owner = %owner,
                orphans = report.orphan_blobs.len(),
                partials = report.partial_blobs.len(),
                dangling = report.dangling_refs.len(),
                missing = report.missing_blobs.len(),
                drift = report.size_drift.len(),
                "owner is inconsistent"
            );
        }

        Ok(Inspection {
            report,
            record,
            blob_sizes,
        })
    }

    async fn known_owners(&self) -> Result<Vec<OwnerId>> {
        let mut owners: BTreeSet<OwnerId> = self
            .catalog
            .owners()
            .await?
            .into_iter()
            .map(|o| o.id)
            .collect();
        owners.extend(self.blobs.namespaces().await?);
        Ok(owners.into_iter().collect())
    }

    async fn unreferenced_documents(&self) -> Result<Vec<Document>> {
        let referenced: HashSet<DocumentId> = self
            .catalog
            .owners()
            .await?
            .into_iter()
            .flat_map(|o| o.documents)
            .collect();

        let mut unreferenced: Vec<Document> = self
            .catalog
            .documents()
            .await?
            .into_iter()
            .filter(|d| !referenced.contains(&d.id))
            .collect();
        unreferenced.sort_by_key(|d| d.id);
        Ok(unreferenced)
    }
}
