//! Configuration - plan table and store settings
//!
//! Loaded once at startup and passed around explicitly. Nothing here is
//! mutated after `validate` succeeds.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bytes in one megabyte (binary, 2^20)
pub const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown plan: {0}")]
    UnknownPlan(String),

    #[error("Invalid plan {name}: {reason}")]
    InvalidPlan { name: String, reason: String },

    #[error("Plan table is empty")]
    EmptyPlanTable,

    #[error("Invalid setting {field}: {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(String),
}

/// Plan name -> capacity in megabytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanTable(BTreeMap<String, u64>);

impl PlanTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with_plan(mut self, name: &str, capacity_mb: u64) -> Self {
        self.0.insert(name.to_string(), capacity_mb);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Capacity of a plan in megabytes
    pub fn capacity_mb(&self, name: &str) -> Result<u64, ConfigError> {
        self.0
            .get(name)
            .copied()
            .ok_or_else(|| ConfigError::UnknownPlan(name.to_string()))
    }

    /// Capacity of a plan in bytes
    pub fn limit_bytes(&self, name: &str) -> Result<u64, ConfigError> {
        let mb = self.capacity_mb(name)?;
        mb.checked_mul(BYTES_PER_MB).ok_or_else(|| ConfigError::InvalidPlan {
            name: name.to_string(),
            reason: format!("{} MB overflows a byte count", mb),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.0.iter().map(|(name, mb)| (name.as_str(), *mb))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.0.is_empty() {
            return Err(ConfigError::EmptyPlanTable);
        }
        for (name, mb) in self.iter() {
            if name.trim().is_empty() {
                return Err(ConfigError::InvalidPlan {
                    name: name.to_string(),
                    reason: "plan name is blank".into(),
                });
            }
            if mb == 0 {
                return Err(ConfigError::InvalidPlan {
                    name: name.to_string(),
                    reason: "capacity must be positive".into(),
                });
            }
            self.limit_bytes(name)?;
        }
        Ok(())
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocVaultConfig {
    /// Root directory holding one namespace directory per owner
    pub storage_root: PathBuf,

    /// Directory of the sled catalog database
    pub catalog_path: PathBuf,

    /// Prefix of the owner-scoped virtual path stored on each document
    pub public_prefix: String,

    /// The single extension accepted for uploads (without the dot)
    pub allowed_extension: String,

    /// Plan assigned to owners created outside a principal (admin tooling)
    pub default_plan: String,

    /// Capacity per plan
    pub plans: PlanTable,

    /// Age after which an unfinished `.partial` blob is swept
    pub partial_upload_ttl_secs: u64,

    /// Serialize quota admission per owner
    pub serialize_admission: bool,
}

impl Default for DocVaultConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./docvault_data/uploads"),
            catalog_path: PathBuf::from("./docvault_data/catalog"),
            public_prefix: "/uploads".to_string(),
            allowed_extension: "json".to_string(),
            default_plan: "free".to_string(),
            plans: PlanTable::new().with_plan("free", 50).with_plan("premium", 500),
            partial_upload_ttl_secs: 60 * 60, // 1 hour
            serialize_admission: true,
        }
    }
}

impl DocVaultConfig {
    /// Load and validate a JSON config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON config document
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Startup checks. Any error here is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.plans.validate()?;

        if !self.plans.contains(&self.default_plan) {
            return Err(ConfigError::UnknownPlan(self.default_plan.clone()));
        }

        let ext = self.allowed_extension.trim_start_matches('.');
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidSetting {
                field: "allowed_extension",
                reason: format!("{:?} is not a plain file extension", self.allowed_extension),
            });
        }

        if !self.public_prefix.starts_with('/') {
            return Err(ConfigError::InvalidSetting {
                field: "public_prefix",
                reason: "must start with '/'".into(),
            });
        }

        Ok(())
    }
}
