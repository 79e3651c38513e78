//! Usage Accountant
//!
//! Consumption is the literal sum of file sizes in the owner's namespace.
//! Orphans and unfinished partial writes count too. The scan takes no lock,
//! so under concurrent writers it is a point-in-time snapshot.

use super::{BlobStore, StorageError};
use crate::identity::OwnerId;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result of one namespace scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub used_bytes: u64,
    pub file_count: u64,
}

#[derive(Clone)]
pub struct UsageAccountant {
    blobs: Arc<dyn BlobStore>,
}

impl UsageAccountant {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Bytes currently stored for `owner`; 0 when no namespace exists
    pub async fn used_bytes(&self, owner: &OwnerId) -> Result<u64, StorageError> {
        Ok(self.snapshot(owner).await?.used_bytes)
    }

    /// Bytes stored for `owner`, ignoring one blob.
    ///
    /// Admission checks run after the candidate blob is already on disk;
    /// excluding it keeps the candidate from being charged twice.
    pub async fn used_bytes_excluding(
        &self,
        owner: &OwnerId,
        physical_name: &str,
    ) -> Result<u64, StorageError> {
        let entries = self.blobs.entries(owner).await?;
        Ok(entries
            .iter()
            .filter(|e| e.name != physical_name)
            .map(|e| e.size)
            .sum())
    }

    pub async fn snapshot(&self, owner: &OwnerId) -> Result<UsageSnapshot, StorageError> {
        let entries = self.blobs.entries(owner).await?;
        let snapshot = UsageSnapshot {
            used_bytes: entries.iter().map(|e| e.size).sum(),
            file_count: entries.len() as u64,
        };

        tracing::trace!(
            owner = %owner,
            bytes = snapshot.used_bytes,
            files = snapshot.file_count,
            "usage scan"
        );

        Ok(snapshot)
    }
}
