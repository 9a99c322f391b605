// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Engine configuration.
//!
//! Loaded from TOML. Every section falls back to its defaults, so an empty
//! file is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::stripe::{StripeLayout, MAX_STRIPES};

/// Default document count above which a bucket is split.
pub const DEFAULT_SPLIT_COUNT: u32 = 1024;

/// Default byte size above which a bucket is split (32 MiB).
pub const DEFAULT_SPLIT_SIZE: u64 = 32 * 1024 * 1024;

/// Default number of maintenance operations a stripe may have in flight.
pub const DEFAULT_MAX_PENDING_PER_STRIPE: usize = 100;

/// Default number of buckets examined per scan step.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 1000;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Stripe configuration.
    pub stripes: StripeConfig,
    /// Maintenance configuration.
    pub maintenance: MaintenanceConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(crate::Error::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed or validated.
    pub fn parse(content: &str) -> crate::Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| crate::Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] describing the first violation.
    pub fn validate(&self) -> crate::Result<()> {
        self.stripes.validate()?;
        self.maintenance.validate()
    }
}

/// Stripe configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StripeConfig {
    /// Requested number of stripes. `0` tunes the count from the host's core
    /// count; other values are rounded up to a power of two.
    pub count: u32,
}

impl StripeConfig {
    fn validate(&self) -> crate::Result<()> {
        if self.count > MAX_STRIPES {
            return Err(crate::Error::config(format!(
                "stripes.count must be at most {MAX_STRIPES}, got {}",
                self.count
            )));
        }
        Ok(())
    }

    /// Resolves the configured count into a stripe layout.
    #[must_use]
    pub fn layout(&self) -> StripeLayout {
        StripeLayout::from_config(self.count)
    }
}

/// Thresholds for size-driven split and join, plus scheduling limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Split buckets holding more documents than this. `0` disables.
    pub split_count: u32,
    /// Split buckets larger than this many bytes. `0` disables.
    pub split_size: u64,
    /// Join sibling buckets when both hold fewer documents than this.
    pub join_count: u32,
    /// Join sibling buckets when both are smaller than this many bytes.
    pub join_size: u64,
    /// Buckets are never joined below this many used bits.
    pub minimal_bucket_split: u8,
    /// Maximum maintenance operations in flight per stripe.
    pub max_pending_per_stripe: usize,
    /// Buckets examined per scan step.
    pub scan_batch_size: usize,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            split_count: DEFAULT_SPLIT_COUNT,
            split_size: DEFAULT_SPLIT_SIZE,
            join_count: DEFAULT_SPLIT_COUNT / 2,
            join_size: DEFAULT_SPLIT_SIZE / 2,
            minimal_bucket_split: 16,
            max_pending_per_stripe: DEFAULT_MAX_PENDING_PER_STRIPE,
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
        }
    }
}

impl MaintenanceConfig {
    fn validate(&self) -> crate::Result<()> {
        if self.split_count != 0 && self.join_count >= self.split_count {
            return Err(crate::Error::config(format!(
                "maintenance.join_count ({}) must be below split_count ({})",
                self.join_count, self.split_count
            )));
        }
        if self.split_size != 0 && self.join_size >= self.split_size {
            return Err(crate::Error::config(format!(
                "maintenance.join_size ({}) must be below split_size ({})",
                self.join_size, self.split_size
            )));
        }
        if self.max_pending_per_stripe == 0 {
            return Err(crate::Error::config("maintenance.max_pending_per_stripe must be positive"));
        }
        if self.scan_batch_size == 0 {
            return Err(crate::Error::config("maintenance.scan_batch_size must be positive"));
        }
        Ok(())
    }

    /// Returns true if joining is enabled at all.
    #[must_use]
    pub fn joins_enabled(&self) -> bool {
        self.join_count > 0 || self.join_size > 0
    }
}
