// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Memoized distributor ownership lookups.
//!
//! Operations tend to arrive in runs for the same bucket, so the cache keeps
//! only the last answer. It is owned by a single stripe and never shared.

use std::sync::Arc;

use bucketeer_core::{low_bits_mask, BucketId, Error, Result, MAX_USED_BITS};

use crate::distribution::Distribution;
use crate::ideal::{ideal_distributor_node, ideal_nodes, IdealNodeList};
use crate::state::{ClusterState, NodeType, UpStates};

#[derive(Debug, Clone, Copy)]
struct LastLookup {
    key: u64,
    up_states: UpStates,
    owner: Option<u16>,
}

/// Single-entry cache of distributor ownership for one cluster state.
#[derive(Debug, Clone)]
pub struct DistributorStateCache {
    distribution: Arc<Distribution>,
    state: Arc<ClusterState>,
    mask: u64,
    last: Option<LastLookup>,
}

impl DistributorStateCache {
    /// Creates a cache computing with `state`'s distribution bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDistributionBits`] if the state carries a bit
    /// count outside `[1, 58]`, which can only happen for a state that was
    /// deserialized rather than parsed.
    pub fn new(distribution: Arc<Distribution>, state: Arc<ClusterState>) -> Result<Self> {
        let bits = state.distribution_bits();
        if bits == 0 || bits > MAX_USED_BITS {
            return Err(Error::InvalidDistributionBits { bits, max: MAX_USED_BITS });
        }
        Ok(Self { distribution, state, mask: low_bits_mask(bits), last: None })
    }

    /// Creates a cache for a caller that expects `bits` distribution bits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DistributionBitMismatch`] if the state disagrees.
    pub fn with_distribution_bits(
        distribution: Arc<Distribution>,
        state: Arc<ClusterState>,
        bits: u8,
    ) -> Result<Self> {
        let actual = state.distribution_bits();
        if bits != actual {
            return Err(Error::DistributionBitMismatch { expected: bits, actual });
        }
        Self::new(distribution, state)
    }

    /// The distributor owning `bucket`, or `None` if no distributor in
    /// `up_states` is available or the bucket is too coarse to place.
    pub fn get_owner(&mut self, bucket: BucketId, up_states: UpStates) -> Option<u16> {
        if bucket.used_bits() < self.state.distribution_bits() {
            return None;
        }
        let key = bucket.location() & self.mask;
        if let Some(last) = self.last {
            if last.key == key && last.up_states == up_states {
                return last.owner;
            }
        }
        let owner = ideal_distributor_node(&self.state, bucket, up_states);
        self.last = Some(LastLookup { key, up_states, owner });
        owner
    }

    /// Returns true if `distributor` owns `bucket`.
    pub fn is_owned_by(&mut self, bucket: BucketId, distributor: u16, up_states: UpStates) -> bool {
        self.get_owner(bucket, up_states) == Some(distributor)
    }

    /// Ideal storage nodes for `bucket`. Not memoized.
    #[must_use]
    pub fn ideal_storage_nodes(&self, bucket: BucketId, up_states: UpStates) -> IdealNodeList {
        ideal_nodes(NodeType::Storage, &self.state, &self.distribution, bucket, up_states)
    }

    /// The distribution in use.
    #[must_use]
    pub fn distribution(&self) -> &Arc<Distribution> {
        &self.distribution
    }

    /// The cluster state in use.
    #[must_use]
    pub fn cluster_state(&self) -> &Arc<ClusterState> {
        &self.state
    }

    /// Distribution bits of the cluster state.
    #[must_use]
    pub fn distribution_bits(&self) -> u8 {
        self.state.distribution_bits()
    }
}
