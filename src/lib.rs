//! DocVault Core - Quota-enforced document store
//!
//! Keeps three independently failing resources coherent: the blob store
//! (bytes on disk, one namespace per owner), the catalog (document records and
//! each owner's reference list) and the usage accountant that both must agree
//! with before a write is admitted.

pub mod catalog;
pub mod config;
pub mod identity;
pub mod lifecycle;
pub mod logging;
pub mod maintenance;
pub mod storage;

pub use catalog::{Document, DocumentId, DocumentView};
pub use config::{DocVaultConfig, PlanTable};
pub use identity::{OwnerId, Principal};
pub use lifecycle::{DocumentLifecycle, Upload};

use thiserror::Error;

/// Main error type for DocVault operations
#[derive(Error, Debug)]
pub enum DocVaultError {
    #[error("Validation error: {0}")]
    Validation(#[from] lifecycle::ValidationError),

    #[error("Identity error: {0}")]
    Identity(#[from] identity::IdentityError),

    /// Unknown id, or an id the caller does not own. Callers cannot tell
    /// the two apart.
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Quota exceeded: {requested_bytes} bytes requested, {remaining_bytes} bytes would remain")]
    QuotaExceeded {
        requested_bytes: u64,
        remaining_bytes: i64,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] catalog::CatalogError),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Coarse error classes, for mapping onto transport status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    QuotaExceeded,
    StorageIo,
    Catalog,
    Configuration,
}

impl DocVaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::Identity(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::Storage(_) => ErrorKind::StorageIo,
            Self::Catalog(_) => ErrorKind::Catalog,
            Self::Config(_) => ErrorKind::Configuration,
        }
    }
}

pub type Result<T> = std::result::Result<T, DocVaultError>;
