//! Maintenance Module - Out-of-band consistency checks
//!
//! Lists what is physically stored against what the catalog describes and
//! repairs the drift that interrupted sagas leave behind.

mod reconcile;

pub use reconcile::Reconciler;

use crate::catalog::DocumentId;
use crate::identity::OwnerId;
use serde::{Deserialize, Serialize};

/// A record whose size disagrees with its blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeDrift {
    pub document: DocumentId,
    pub recorded: u64,
    pub actual: u64,
}

/// Findings for one owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReport {
    pub owner: OwnerId,
    /// Blobs no referenced record points at
    pub orphan_blobs: Vec<String>,
    /// Leftovers of interrupted writes
    pub partial_blobs: Vec<String>,
    /// References whose record is gone
    pub dangling_refs: Vec<DocumentId>,
    /// Records whose blob is gone
    pub missing_blobs: Vec<DocumentId>,
    pub size_drift: Vec<SizeDrift>,
}

impl OwnerReport {
    pub(crate) fn new(owner: OwnerId) -> Self {
        Self {
            owner,
            orphan_blobs: Vec::new(),
            partial_blobs: Vec::new(),
            dangling_refs: Vec::new(),
            missing_blobs: Vec::new(),
            size_drift: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.orphan_blobs.is_empty()
            && self.partial_blobs.is_empty()
            && self.dangling_refs.is_empty()
            && self.missing_blobs.is_empty()
            && self.size_drift.is_empty()
    }
}

/// Findings across the whole store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub owners: Vec<OwnerReport>,
    /// Records no owner references
    pub unreferenced_documents: Vec<DocumentId>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.unreferenced_documents.is_empty() && self.owners.iter().all(OwnerReport::is_clean)
    }
}

/// What `repair` changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSummary {
    pub orphans_deleted: u64,
    pub bytes_released: u64,
    pub references_dropped: u64,
    pub records_removed: u64,
}

/// What `sweep_partials` removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub removed: u64,
    pub bytes_released: u64,
}
