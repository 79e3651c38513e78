//! Per-owner admission serialization
//!
//! A write holds its owner's lock from blob write through catalog commit, so
//! two writers of the same owner cannot both pass the quota check on the same
//! stale usage reading. Different owners never contend. An owner's entry is
//! dropped again once nobody holds or waits on its lock.

use crate::identity::OwnerId;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<OwnerId, Arc<Mutex<()>>>;

/// Held owner lock. Owned, so it can move into a spawned task.
pub struct AdmissionGuard {
    guard: Option<OwnedMutexGuard<()>>,
    owner: OwnerId,
    locks: Arc<LockMap>,
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Entry API clones under the shard lock, so a count of 1 means no waiter
        self.locks
            .remove_if(&self.owner, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[derive(Debug, Default)]
pub struct AdmissionLocks {
    enabled: bool,
    locks: Arc<LockMap>,
}

impl AdmissionLocks {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Wait for the owner's lock. `None` when serialization is disabled.
    pub async fn acquire(&self, owner: &OwnerId) -> Option<AdmissionGuard> {
        if !self.enabled {
            return None;
        }
        let lock = self
            .locks
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        Some(AdmissionGuard {
            guard: Some(guard),
            owner: owner.clone(),
            locks: self.locks.clone(),
        })
    }

    pub fn tracked_owners(&self) -> usize {
        self.locks.len()
    }
}
