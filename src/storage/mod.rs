//! Storage Module - Blob persistence, usage accounting and quota admission
//!
//! Blobs live in one namespace per owner. Usage is measured from what is
//! physically present there, never from catalog records.

mod blob;
mod quota;
mod usage;

pub use blob::{BlobEntry, BlobStore, DeleteOutcome, FsBlobStore, StoredBlob, PARTIAL_SUFFIX};
pub use quota::{
    bytes_to_mb, mb_to_bytes, QuotaCheckResult, QuotaEnforcer, QuotaSummary, WriteIntent,
};
pub use usage::{UsageAccountant, UsageSnapshot};

use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid blob name: {0}")]
    InvalidName(String),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
