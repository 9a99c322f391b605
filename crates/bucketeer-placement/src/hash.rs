// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Hash functions for ideal-state placement.
//!
//! Every node in the cluster must arrive at the same ideal state for the same
//! inputs, so the hashes are seeded with a fixed key. They must be:
//! - Deterministic: same input always produces same output
//! - Uniform: output is uniformly distributed
//! - Fast: evaluated once per candidate node per lookup

use std::hash::Hasher;

use siphasher::sip::SipHasher13;

/// Fixed SipHash key shared by every node computing ideal states.
const PLACEMENT_KEY: (u64, u64) = (0x6275_636b_6574_6565, 0x7220_706c_6163_6521);

/// Salt mixed into distributor ownership draws so they are independent of
/// storage replica draws for the same bucket.
pub const DISTRIBUTOR_SALT: u64 = 0x6469_7374_7269_6275;

/// Salt mixed into group ranking draws.
pub const GROUP_SALT: u64 = 0x6772_6f75_7073_616c;

/// Hashes a sequence of words, typically `[seed, node]` or
/// `[seed, salt, index]`. Word order is significant.
#[inline]
#[must_use]
pub fn placement_hash(words: &[u64]) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(PLACEMENT_KEY.0, PLACEMENT_KEY.1);
    for &word in words {
        hasher.write_u64(word);
    }
    hasher.finish()
}

/// Maps a hash onto the half-open unit interval `(0, 1]`.
///
/// Uses the top 53 bits so every value is exactly representable.
#[inline]
#[must_use]
pub fn unit_interval(hash: u64) -> f64 {
    const SCALE: f64 = (1u64 << 53) as f64;
    ((hash >> 11) + 1) as f64 / SCALE
}

/// Highest-random-weight score of one candidate.
///
/// A uniform draw `u` is raised to `1 / capacity`, so a node with twice the
/// capacity wins twice as often. Non-positive capacities never win.
#[inline]
#[must_use]
pub fn weighted_score(hash: u64, capacity: f64) -> f64 {
    if capacity <= 0.0 || !capacity.is_finite() {
        return f64::NEG_INFINITY;
    }
    let u = unit_interval(hash);
    if (capacity - 1.0).abs() < f64::EPSILON {
        u
    } else {
        u.powf(capacity.recip())
    }
}
