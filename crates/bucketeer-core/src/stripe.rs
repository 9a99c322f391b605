// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Partitioning of the bucket key space into stripes.
//!
//! A stripe is an independent slice of the key space with its own bucket
//! database and worker. The stripe of a bucket is the top `n` bits of its
//! key, so the mapping is a pure function and never needs a lookup table.
//!
//! The stripe count only affects parallelism, never correctness, so the
//! helpers here clamp out-of-range input instead of failing. The one
//! validating entry point is [`StripeLayout::new`], used when a caller insists
//! on an exact count.

use tracing::debug;

use crate::bucket::BucketId;
use crate::error::{Error, Result};

/// Maximum number of stripe bits.
pub const MAX_STRIPE_BITS: u8 = 8;

/// Maximum number of stripes.
pub const MAX_STRIPES: u32 = 1 << MAX_STRIPE_BITS;

/// Cores served by a single stripe before a second one pays off.
const SINGLE_STRIPE_MAX_CORES: u32 = 16;

/// Additional cores needed for each doubling of the stripe count.
const CORES_PER_STRIPE_DOUBLING: u32 = 48;

/// Returns the stripe owning a bucket key.
///
/// Uses the top `num_stripe_bits` bits of the key. Bit counts above
/// [`MAX_STRIPE_BITS`] are clamped.
#[inline]
#[must_use]
pub fn stripe_of_bucket_key(key: u64, num_stripe_bits: u8) -> usize {
    if num_stripe_bits == 0 {
        return 0;
    }
    let bits = u32::from(num_stripe_bits.min(MAX_STRIPE_BITS));
    (key >> (64 - bits)) as usize
}

/// Returns the stripe owning a bucket.
///
/// Unused location bits are stripped before the key is formed.
#[inline]
#[must_use]
pub fn stripe_of_bucket(bucket: BucketId, num_stripe_bits: u8) -> usize {
    stripe_of_bucket_key(bucket.to_key(), num_stripe_bits)
}

/// Returns `log2(num_stripes)`.
///
/// `num_stripes` is expected to be a power of two, as produced by
/// [`adjusted_num_stripes`]. Other values yield the floor of the logarithm,
/// and the result is capped at [`MAX_STRIPE_BITS`].
#[inline]
#[must_use]
pub fn calc_num_stripe_bits(num_stripes: u32) -> u8 {
    let log2 = 31 - num_stripes.max(1).leading_zeros();
    (log2 as u8).min(MAX_STRIPE_BITS)
}

/// Rounds a requested stripe count up to a power of two in `[1, MAX_STRIPES]`.
#[inline]
#[must_use]
pub fn adjusted_num_stripes(requested: u32) -> u32 {
    requested.clamp(1, MAX_STRIPES).next_power_of_two()
}

/// Picks a stripe count for a host with `cpu_cores` cores.
///
/// One stripe up to 16 cores, then the count doubles for every started
/// block of 48 further cores, up to [`MAX_STRIPES`].
#[must_use]
pub fn tune_num_stripes_based_on_cpu_cores(cpu_cores: u32) -> u32 {
    if cpu_cores <= SINGLE_STRIPE_MAX_CORES {
        return 1;
    }
    let doublings = (cpu_cores - SINGLE_STRIPE_MAX_CORES).div_ceil(CORES_PER_STRIPE_DOUBLING);
    1 << doublings.min(u32::from(MAX_STRIPE_BITS))
}

/// A validated stripe count together with its bit width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripeLayout {
    num_stripes: u32,
    num_stripe_bits: u8,
}

impl Default for StripeLayout {
    fn default() -> Self {
        Self { num_stripes: 1, num_stripe_bits: 0 }
    }
}

impl StripeLayout {
    /// Creates a layout with exactly `num_stripes` stripes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStripeCount`] unless `num_stripes` is a power
    /// of two in `[1, MAX_STRIPES]`.
    pub fn new(num_stripes: u32) -> Result<Self> {
        if num_stripes == 0 || num_stripes > MAX_STRIPES || !num_stripes.is_power_of_two() {
            return Err(Error::InvalidStripeCount { requested: num_stripes, max: MAX_STRIPES });
        }
        Ok(Self { num_stripes, num_stripe_bits: calc_num_stripe_bits(num_stripes) })
    }

    /// Creates a layout from any requested count, rounding as
    /// [`adjusted_num_stripes`] does.
    #[must_use]
    pub fn adjusted(requested: u32) -> Self {
        let num_stripes = adjusted_num_stripes(requested);
        Self { num_stripes, num_stripe_bits: calc_num_stripe_bits(num_stripes) }
    }

    /// Resolves a configured stripe count, where `0` means "tune from the
    /// number of available cores".
    #[must_use]
    pub fn from_config(configured: u32) -> Self {
        let layout = if configured == 0 {
            let cores = std::thread::available_parallelism()
                .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
                .unwrap_or(1);
            Self::adjusted(tune_num_stripes_based_on_cpu_cores(cores))
        } else {
            Self::adjusted(configured)
        };
        debug!(
            configured,
            stripes = layout.num_stripes,
            stripe_bits = layout.num_stripe_bits,
            "Resolved stripe layout"
        );
        layout
    }

    /// Number of stripes.
    #[must_use]
    pub const fn num_stripes(&self) -> u32 {
        self.num_stripes
    }

    /// Number of key bits used to select a stripe.
    #[must_use]
    pub const fn num_stripe_bits(&self) -> u8 {
        self.num_stripe_bits
    }

    /// The stripe owning `bucket`.
    #[must_use]
    pub fn stripe_of(&self, bucket: BucketId) -> usize {
        stripe_of_bucket(bucket, self.num_stripe_bits)
    }
}
