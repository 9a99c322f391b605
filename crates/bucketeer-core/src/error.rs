// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Error types shared by the Bucketeer crates.
//!
//! Everything here is a configuration or setup error. Degraded cluster
//! conditions (too few nodes, missing buckets) are never reported through
//! this type; they are represented as data by the components themselves.

use thiserror::Error;

/// A specialized `Result` type for Bucketeer setup operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while constructing or configuring engine components.
#[derive(Debug, Error)]
pub enum Error {
    /// A bucket was given more used bits than there are location bits.
    #[error("used bits must be at most {max}, got {used_bits}")]
    InvalidUsedBits {
        /// The requested used-bits count.
        used_bits: u8,
        /// The largest valid count.
        max: u8,
    },

    /// A stripe count that is not a power of two in `[1, MAX_STRIPES]`.
    #[error("stripe count must be a power of two in [1, {max}], got {requested}")]
    InvalidStripeCount {
        /// The requested stripe count.
        requested: u32,
        /// The largest valid count.
        max: u32,
    },

    /// A distribution bit count outside the supported range.
    #[error("distribution bits must be in [1, {max}], got {bits}")]
    InvalidDistributionBits {
        /// The offending bit count.
        bits: u8,
        /// The largest valid count.
        max: u8,
    },

    /// A memoizing component was set up against a different bit count than
    /// the cluster state it computes with.
    #[error("distribution bit mismatch: expected {expected}, cluster state has {actual}")]
    DistributionBitMismatch {
        /// The bit count the caller set up the component with.
        expected: u8,
        /// The bit count carried by the cluster state.
        actual: u8,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error while reading configuration.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true for errors caused by invalid configuration values, as
    /// opposed to environment failures.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        !matches!(self, Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidStripeCount { requested: 3, max: 256 };
        assert_eq!(err.to_string(), "stripe count must be a power of two in [1, 256], got 3");

        let err = Error::DistributionBitMismatch { expected: 16, actual: 8 };
        assert_eq!(
            err.to_string(),
            "distribution bit mismatch: expected 16, cluster state has 8"
        );
    }

    #[test]
    fn test_is_config_error() {
        assert!(Error::config("bad").is_config_error());
        assert!(Error::InvalidUsedBits { used_bits: 60, max: 58 }.is_config_error());

        let io = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        assert!(!io.is_config_error());
    }
}
