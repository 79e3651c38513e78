//! Quota Enforcement
//!
//! Pure admission arithmetic over a plan table and a usage reading. The
//! enforcer keeps no state of its own; usage always comes from a fresh scan.

use crate::config::{ConfigError, PlanTable, BYTES_PER_MB};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Convert megabytes to bytes (1 MB = 2^20 bytes)
pub fn mb_to_bytes(mb: u64) -> u64 {
    mb.saturating_mul(BYTES_PER_MB)
}

/// Convert bytes to megabytes, optionally rounded to two decimals
pub fn bytes_to_mb(bytes: i64, round: bool) -> f64 {
    let mb = bytes as f64 / BYTES_PER_MB as f64;
    if round {
        (mb * 100.0).round() / 100.0
    } else {
        mb
    }
}

/// A prospective change in stored bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteIntent {
    /// A new document of `size` bytes
    Create { size: u64 },
    /// A document of `old_size` bytes replaced by one of `new_size` bytes
    Replace { old_size: u64, new_size: u64 },
}

impl WriteIntent {
    pub fn requested_bytes(&self) -> u64 {
        match *self {
            Self::Create { size } => size,
            Self::Replace { new_size, .. } => new_size,
        }
    }

    pub fn credited_bytes(&self) -> u64 {
        match *self {
            Self::Create { .. } => 0,
            Self::Replace { old_size, .. } => old_size,
        }
    }
}

/// Result of an admission check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaCheckResult {
    Allowed {
        /// Bytes left after the write lands
        remaining_bytes: i64,
    },
    Exceeded {
        limit_bytes: u64,
        used_bytes: u64,
        requested_bytes: u64,
        credited_bytes: u64,
        remaining_bytes: i64,
    },
}

impl QuotaCheckResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Remaining capacity as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSummary {
    pub used_bytes_remaining: i64,
    pub used_mb_remaining: f64,
}

#[derive(Debug, Clone)]
pub struct QuotaEnforcer {
    plans: Arc<PlanTable>,
}

impl QuotaEnforcer {
    pub fn new(plans: Arc<PlanTable>) -> Self {
        Self { plans }
    }

    /// Capacity of `plan` in bytes
    pub fn plan_limit_bytes(&self, plan: &str) -> Result<u64, ConfigError> {
        self.plans.limit_bytes(plan)
    }

    /// Decide whether `intent` fits into `plan` given `used_bytes`.
    ///
    /// `used_bytes` must not include the candidate blob, but does include a
    /// replaced blob that is still on disk. Create: `limit - used - size >= 0`.
    /// Replace: `limit - used + old - new >= 0`, and a replace that does not
    /// grow the document is always admitted.
    pub fn check(
        &self,
        plan: &str,
        used_bytes: u64,
        intent: WriteIntent,
    ) -> Result<QuotaCheckResult, ConfigError> {
        let limit_bytes = self.plan_limit_bytes(plan)?;
        let requested_bytes = intent.requested_bytes();
        let credited_bytes = intent.credited_bytes();

        let remaining = limit_bytes as i128 - used_bytes as i128 + credited_bytes as i128
            - requested_bytes as i128;
        let remaining_bytes = clamp_i64(remaining);

        let shrinking = matches!(intent, WriteIntent::Replace { old_size, new_size } if new_size <= old_size);

        if remaining >= 0 || shrinking {
            Ok(QuotaCheckResult::Allowed { remaining_bytes })
        } else {
            Ok(QuotaCheckResult::Exceeded {
                limit_bytes,
                used_bytes,
                requested_bytes,
                credited_bytes,
                remaining_bytes,
            })
        }
    }

    /// Remaining capacity of `plan` at `used_bytes`
    pub fn summary(
        &self,
        plan: &str,
        used_bytes: u64,
        round: bool,
    ) -> Result<QuotaSummary, ConfigError> {
        let limit_bytes = self.plan_limit_bytes(plan)?;
        let remaining = clamp_i64(limit_bytes as i128 - used_bytes as i128);
        Ok(QuotaSummary {
            used_bytes_remaining: remaining,
            used_mb_remaining: bytes_to_mb(remaining, round),
        })
    }
}

fn clamp_i64(value: i128) -> i64 {
    value.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}
