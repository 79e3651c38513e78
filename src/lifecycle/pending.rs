//! Blob written but not yet committed to the catalog
//!
//! Either `commit` or `discard` must be called. If the owning task is dropped
//! first (runtime shutdown, or an abort before the commit task started), the
//! blob is removed from a spawned task.

use crate::identity::OwnerId;
use crate::storage::BlobStore;

use std::sync::Arc;

pub(crate) struct PendingBlob {
    blobs: Arc<dyn BlobStore>,
    owner: OwnerId,
    name: String,
    armed: bool,
}

impl PendingBlob {
    pub(crate) fn new(blobs: Arc<dyn BlobStore>, owner: OwnerId, name: String) -> Self {
        Self {
            blobs,
            owner,
            name,
            armed: true,
        }
    }

    /// The catalog now references the blob; keep it
    pub(crate) fn commit(mut self) {
        self.armed = false;
    }

    /// Compensating delete. A failure leaves an orphan and is only logged.
    pub(crate) async fn discard(mut self) {
        self.armed = false;
        match self.blobs.delete(&self.owner, &self.name).await {
            Ok(_) => tracing::debug!(owner = %self.owner, blob = %self.name, "discarded blob"),
            Err(e) => tracing::warn!(
                owner = %self.owner,
                blob = %self.name,
                error = %e,
                "failed to discard blob; orphan left for reconciliation"
            ),
        }
    }
}

impl Drop for PendingBlob {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let blobs = self.blobs.clone();
        let owner = self.owner.clone();
        let name = std::mem::take(&mut self.name);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = blobs.delete(&owner, &name).await {
                        tracing::warn!(
                            owner = %owner,
                            blob = %name,
                            error = %e,
                            "failed to remove blob of aborted write"
                        );
                    }
                });
            }
            Err(_) => tracing::warn!(
                owner = %owner,
                blob = %name,
                "aborted write outside a runtime; orphan left for reconciliation"
            ),
        }
    }
}
