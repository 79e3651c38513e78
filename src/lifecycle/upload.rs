//! Upload intake
//!
//! Everything here is checked before a single byte reaches the blob store.

use super::ValidationError;
use std::path::Path;

/// One file from a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Name the client declared for the file
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: &str, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.to_string(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn mime_type(&self) -> String {
        mime_guess::from_path(&self.file_name)
            .first_or_octet_stream()
            .to_string()
    }

    pub fn checksum(&self) -> String {
        blake3::hash(&self.bytes).to_hex().to_string()
    }
}

/// Accepts exactly one file carrying the configured extension
#[derive(Debug, Clone)]
pub struct UploadPolicy {
    extension: String,
}

impl UploadPolicy {
    pub fn new(extension: &str) -> Self {
        Self {
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Pick the single upload out of a request's files
    pub fn select(&self, files: Vec<Upload>) -> Result<Upload, ValidationError> {
        let mut files = files.into_iter();
        let upload = files.next().ok_or(ValidationError::MissingUpload)?;
        let extra = files.count();
        if extra > 0 {
            return Err(ValidationError::TooManyFiles(extra + 1));
        }
        self.check(&upload)?;
        Ok(upload)
    }

    pub fn check(&self, upload: &Upload) -> Result<(), ValidationError> {
        let name = upload.file_name.trim();
        if name.is_empty() {
            return Err(ValidationError::InvalidFileName(upload.file_name.clone()));
        }

        let matches = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false);
        if !matches {
            return Err(ValidationError::UnsupportedType {
                file_name: upload.file_name.clone(),
                expected: self.extension.clone(),
            });
        }

        Ok(())
    }
}
