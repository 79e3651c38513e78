//! Blob Store - raw bytes under a per-owner namespace
//!
//! Layout on disk:
//! ```text
//! <root>/
//!   <owner id>/
//!     report--3f2a...e1.json
//!     .draft--9bc0...44.json.partial   (write in progress)
//! ```
//!
//! Writes land in a hidden `.partial` file first and are renamed into place,
//! so a reader never sees half of a committed blob.

use super::StorageError;
use crate::identity::OwnerId;

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::io::AsyncWriteExt;

/// Suffix of blobs whose write has not completed
pub const PARTIAL_SUFFIX: &str = ".partial";

const NAME_SEPARATOR: &str = "--";
const FALLBACK_STEM: &str = "document";
const MAX_STEM_CHARS: usize = 100;

/// Result of a successful `put`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub physical_name: String,
    pub size: u64,
}

/// A file found in a namespace
#[derive(Debug, Clone)]
pub struct BlobEntry {
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl BlobEntry {
    /// Leftover of an interrupted write
    pub fn is_partial(&self) -> bool {
        self.name.ends_with(PARTIAL_SUFFIX)
    }
}

/// Outcome of an idempotent delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    AlreadyAbsent,
}

/// Byte storage scoped per owner
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Create the namespace if absent. Losing a creation race is success.
    async fn ensure_namespace(&self, owner: &OwnerId) -> Result<(), StorageError>;

    /// Store `bytes` under a fresh physical name derived from `declared_name`
    async fn put(
        &self,
        owner: &OwnerId,
        declared_name: &str,
        bytes: &[u8],
    ) -> Result<StoredBlob, StorageError>;

    async fn read(&self, owner: &OwnerId, physical_name: &str) -> Result<Vec<u8>, StorageError>;

    /// Remove a blob. Deleting an absent blob is not an error.
    async fn delete(
        &self,
        owner: &OwnerId,
        physical_name: &str,
    ) -> Result<DeleteOutcome, StorageError>;

    /// Every regular file in the namespace; empty if the namespace is missing
    async fn entries(&self, owner: &OwnerId) -> Result<Vec<BlobEntry>, StorageError>;

    /// Owners that currently have a namespace
    async fn namespaces(&self) -> Result<Vec<OwnerId>, StorageError>;

    /// Drop a namespace with everything in it
    async fn remove_namespace(&self, owner: &OwnerId) -> Result<DeleteOutcome, StorageError>;
}

/// Build a collision-free physical name: `<stem>--<uuid>.<ext>`.
///
/// Only the final path component of the declared name is used; characters
/// outside `[A-Za-z0-9._-]` are replaced with `_`.
pub fn physical_name(declared_name: &str) -> String {
    let file_name = Path::new(declared_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let path = Path::new(file_name);

    let stem: String = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_CHARS)
        .collect();
    let stem = stem.trim_start_matches('.');
    let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };

    let unique = uuid::Uuid::new_v4().simple();
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if !ext.is_empty() => format!(
            "{}{}{}.{}",
            stem,
            NAME_SEPARATOR,
            unique,
            ext.to_ascii_lowercase()
        ),
        _ => format!("{}{}{}", stem, NAME_SEPARATOR, unique),
    }
}

/// Reject anything that could escape the namespace
fn check_blob_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn partial_name(physical_name: &str) -> String {
    format!(".{}{}", physical_name, PARTIAL_SUFFIX)
}

/// Blob store on the local filesystem
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn namespace_path(&self, owner: &OwnerId) -> PathBuf {
        self.root.join(owner.as_str())
    }

    fn blob_path(&self, owner: &OwnerId, name: &str) -> Result<PathBuf, StorageError> {
        check_blob_name(name)?;
        Ok(self.namespace_path(owner).join(name))
    }

    async fn write_partial(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await
            .map_err(|e| StorageError::io(path, e))?;

        file.write_all(bytes)
            .await
            .map_err(|e| StorageError::io(path, e))?;
        file.sync_all()
            .await
            .map_err(|e| StorageError::io(path, e))?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn ensure_namespace(&self, owner: &OwnerId) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;

        let dir = self.namespace_path(owner);
        match tokio::fs::create_dir(&dir).await {
            Ok(()) => {
                tracing::debug!(owner = %owner, "created namespace");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }

    async fn put(
        &self,
        owner: &OwnerId,
        declared_name: &str,
        bytes: &[u8],
    ) -> Result<StoredBlob, StorageError> {
        let name = physical_name(declared_name);
        let final_path = self.blob_path(owner, &name)?;
        let temp_path = self.blob_path(owner, &partial_name(&name))?;

        if let Err(e) = Self::write_partial(&temp_path, bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e);
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::io(&final_path, e));
        }

        tracing::debug!(owner = %owner, blob = %name, bytes = bytes.len(), "stored blob");

        Ok(StoredBlob {
            physical_name: name,
            size: bytes.len() as u64,
        })
    }

    async fn read(&self, owner: &OwnerId, physical_name: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.blob_path(owner, physical_name)?;
        tokio::fs::read(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))
    }

    async fn delete(
        &self,
        owner: &OwnerId,
        physical_name: &str,
    ) -> Result<DeleteOutcome, StorageError> {
        let path = self.blob_path(owner, physical_name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(DeleteOutcome::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    async fn entries(&self, owner: &OwnerId) -> Result<Vec<BlobEntry>, StorageError> {
        let dir = self.namespace_path(owner);
        let mut reader = match tokio::fs::read_dir(&dir).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&dir, e)),
        };

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // Removed between listing and stat
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(&entry.path(), e)),
            };
            if !metadata.is_file() {
                continue;
            }
            entries.push(BlobEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                size: metadata.len(),
                modified: metadata.modified().ok(),
            });
        }

        Ok(entries)
    }

    async fn namespaces(&self) -> Result<Vec<OwnerId>, StorageError> {
        let mut reader = match tokio::fs::read_dir(&self.root).await {
            Ok(reader) => reader,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.root, e)),
        };

        let mut owners = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if !is_dir {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match OwnerId::parse(&name) {
                Ok(owner) => owners.push(owner),
                Err(e) => tracing::warn!(dir = %name, error = %e, "skipping foreign directory"),
            }
        }

        owners.sort();
        Ok(owners)
    }

    async fn remove_namespace(&self, owner: &OwnerId) -> Result<DeleteOutcome, StorageError> {
        let dir = self.namespace_path(owner);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(DeleteOutcome::Removed),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(DeleteOutcome::AlreadyAbsent),
            Err(e) => Err(StorageError::io(&dir, e)),
        }
    }
}
