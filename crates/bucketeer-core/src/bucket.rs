// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Bucket identifiers and their ordering key.
//!
//! A [`BucketId`] packs two things into one `u64`:
//!
//! ```text
//!  63      58 57                                              0
//! ┌──────────┬─────────────────────────────────────────────────┐
//! │ used bits│                 location bits                   │
//! └──────────┴─────────────────────────────────────────────────┘
//! ```
//!
//! Only the lowest `used_bits` location bits are significant. A bucket with
//! `n` used bits is split into two children with `n + 1` used bits, so the
//! set of buckets forms a binary tree addressed by the low location bits.
//!
//! The database key ([`BucketId::to_key`]) bit-reverses the location so the
//! significant bits become the most significant ones, and stores the used-bits
//! count in the low 6 bits. Under this encoding an ancestor never sorts after
//! any of its descendants, and every subtree occupies one contiguous key range.

use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use siphasher::sip::SipHasher13;

use crate::error::{Error, Result};

/// Number of bits reserved for the used-bits count.
pub const COUNT_BITS: u32 = 6;

/// Maximum number of significant location bits.
pub const MAX_USED_BITS: u8 = 58;

const LOCATION_MASK: u64 = (1 << MAX_USED_BITS) - 1;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

/// Fixed hashing key so every node maps routing keys to the same bucket.
const ROUTING_HASH_KEY: (u64, u64) = (0x6275_636b_6574_6565, 0x7220_726f_7574_696e);

/// Returns a mask with the lowest `bits` bits set.
#[inline]
#[must_use]
pub const fn low_bits_mask(bits: u8) -> u64 {
    if bits == 0 {
        0
    } else if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Identity of one bucket in the split hierarchy.
///
/// Equality and hashing consider only the significant bits, so two ids that
/// differ in unused location bits name the same bucket. Ordering follows the
/// database key order (see [`BucketId::to_key`]).
#[derive(Clone, Copy, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketId(u64);

impl BucketId {
    /// Creates a bucket id, saturating `used_bits` at [`MAX_USED_BITS`].
    ///
    /// Location bits above bit 57 are discarded. Bits between `used_bits`
    /// and 57 are kept so that [`BucketId::raw`] round-trips, but they are not
    /// significant.
    #[must_use]
    pub const fn new(used_bits: u8, location: u64) -> Self {
        let used = if used_bits > MAX_USED_BITS { MAX_USED_BITS } else { used_bits };
        Self(((used as u64) << MAX_USED_BITS) | (location & LOCATION_MASK))
    }

    /// Creates a bucket id, rejecting used-bits counts that exceed the
    /// number of location bits.
    pub fn try_new(used_bits: u8, location: u64) -> Result<Self> {
        if used_bits > MAX_USED_BITS {
            return Err(Error::InvalidUsedBits { used_bits, max: MAX_USED_BITS });
        }
        Ok(Self::new(used_bits, location))
    }

    /// Reinterprets a packed raw value.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Hashes a document routing key into the bucket with `used_bits`
    /// significant bits that contains it.
    #[must_use]
    pub fn from_routing_key(used_bits: u8, routing_key: &[u8]) -> Self {
        let mut hasher = SipHasher13::new_with_keys(ROUTING_HASH_KEY.0, ROUTING_HASH_KEY.1);
        hasher.write(routing_key);
        Self::new(used_bits, hasher.finish()).strip_unused()
    }

    /// Number of significant location bits.
    #[inline]
    #[must_use]
    pub const fn used_bits(self) -> u8 {
        let used = (self.0 >> MAX_USED_BITS) as u8;
        if used > MAX_USED_BITS {
            MAX_USED_BITS
        } else {
            used
        }
    }

    /// The packed value, including any unused location bits.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// All 58 location bits, significant or not.
    #[inline]
    #[must_use]
    pub const fn location(self) -> u64 {
        self.0 & LOCATION_MASK
    }

    /// The significant location bits only.
    #[inline]
    #[must_use]
    pub const fn significant_location(self) -> u64 {
        self.0 & low_bits_mask(self.used_bits())
    }

    /// Returns the same bucket with all unused location bits cleared.
    #[inline]
    #[must_use]
    pub const fn strip_unused(self) -> Self {
        Self::new(self.used_bits(), self.significant_location())
    }

    /// Returns true if `other` is this bucket or one of its descendants.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        let mask = low_bits_mask(self.used_bits());
        other.used_bits() >= self.used_bits() && (other.0 & mask) == (self.0 & mask)
    }

    /// Returns true if this bucket is a strict ancestor of `other`.
    #[must_use]
    pub const fn is_strict_ancestor_of(self, other: Self) -> bool {
        other.used_bits() > self.used_bits() && self.contains(other)
    }

    /// Returns true if one of the two buckets contains the other.
    #[must_use]
    pub const fn overlaps(self, other: Self) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// The ancestor of this bucket that has exactly `used_bits` bits.
    ///
    /// Returns `None` if `used_bits` is larger than this bucket's own count.
    #[must_use]
    pub const fn ancestor_with_bits(self, used_bits: u8) -> Option<Self> {
        if used_bits > self.used_bits() {
            return None;
        }
        Some(Self::new(used_bits, self.0 & low_bits_mask(used_bits)))
    }

    /// The bucket this one was split from, if any.
    #[must_use]
    pub const fn parent(self) -> Option<Self> {
        if self.used_bits() == 0 {
            return None;
        }
        self.ancestor_with_bits(self.used_bits() - 1)
    }

    /// The two buckets produced by splitting this one.
    #[must_use]
    pub const fn children(self) -> Option<(Self, Self)> {
        let used = self.used_bits();
        if used >= MAX_USED_BITS {
            return None;
        }
        let base = self.significant_location();
        Some((Self::new(used + 1, base), Self::new(used + 1, base | (1 << used))))
    }

    /// The other child of this bucket's parent.
    #[must_use]
    pub const fn sibling(self) -> Option<Self> {
        let used = self.used_bits();
        if used == 0 {
            return None;
        }
        Some(Self::new(used, self.significant_location() ^ (1 << (used - 1))))
    }

    /// The database ordering key of this bucket.
    #[inline]
    #[must_use]
    pub const fn to_key(self) -> u64 {
        bucket_id_to_key(self.strip_unused().0)
    }

    /// The largest key any descendant of this bucket can have. The subtree
    /// occupies the key range `to_key()..=subtree_end_key()`.
    #[inline]
    #[must_use]
    pub const fn subtree_end_key(self) -> u64 {
        self.to_key() | low_bits_mask(64 - self.used_bits())
    }

    /// Decodes a database key back into the (stripped) bucket id.
    #[inline]
    #[must_use]
    pub const fn from_key(key: u64) -> Self {
        Self(key_to_bucket_id(key))
    }
}

/// Moves the count bits to the bottom and bit-reverses the location.
#[inline]
const fn bucket_id_to_key(id: u64) -> u64 {
    let reversed = id.reverse_bits();
    let used = id >> MAX_USED_BITS;
    ((reversed >> COUNT_BITS) << COUNT_BITS) | used
}

#[inline]
const fn key_to_bucket_id(key: u64) -> u64 {
    let reversed = key.reverse_bits();
    let used = (key & COUNT_MASK) << MAX_USED_BITS;
    ((reversed << COUNT_BITS) >> COUNT_BITS) | used
}

impl PartialEq for BucketId {
    fn eq(&self, other: &Self) -> bool {
        self.strip_unused().0 == other.strip_unused().0
    }
}

impl Eq for BucketId {}

impl Hash for BucketId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.strip_unused().0.hash(state);
    }
}

impl PartialOrd for BucketId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BucketId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_key().cmp(&other.to_key())
    }
}

impl std::fmt::Debug for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BucketId(0x{:016x})", self.0)
    }
}

impl std::fmt::Display for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BucketId(0x{:016x})", self.0)
    }
}
