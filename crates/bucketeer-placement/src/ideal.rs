// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Ideal-state calculation.
//!
//! Given a cluster state, a distribution and a bucket, computes the ordered
//! list of nodes that should hold the bucket. Every candidate node draws a
//! weighted score from a hash of the bucket seed and its own index, and the
//! highest scores win:
//!
//! ```text
//!   seed = location & mask(distribution_bits)
//!
//!   node 0: u(seed, 0) ^ (1 / capacity_0)  ─┐
//!   node 1: u(seed, 1) ^ (1 / capacity_1)   ├─ sort desc ─> take redundancy
//!   node 2: u(seed, 2) ^ (1 / capacity_2)  ─┘
//! ```
//!
//! Only the drawn node leaves or joins a list when a node changes state, so
//! state changes move as few buckets as possible. With a group tree the same
//! scoring first ranks the subgroups, which then receive copies according to
//! the group's partitions.

use bucketeer_core::{low_bits_mask, BucketId};

use crate::distribution::{Distribution, Group};
use crate::hash::{placement_hash, weighted_score, DISTRIBUTOR_SALT, GROUP_SALT};
use crate::state::{ClusterState, NodeType, State, UpStates};

/// Ordered list of ideal nodes for a bucket, best first. Never contains
/// duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct IdealNodeList(Vec<u16>);

impl IdealNodeList {
    /// The preferred node, if any.
    #[must_use]
    pub fn primary(&self) -> Option<u16> {
        self.0.first().copied()
    }

    /// Returns true if `node` is in the list.
    #[must_use]
    pub fn contains(&self, node: u16) -> bool {
        self.0.contains(&node)
    }

    /// Position of `node` in the list.
    #[must_use]
    pub fn position(&self, node: u16) -> Option<usize> {
        self.0.iter().position(|&n| n == node)
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no node qualified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the nodes in preference order.
    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.0.iter().copied()
    }

    /// The nodes as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[u16] {
        &self.0
    }
}

impl From<IdealNodeList> for Vec<u16> {
    fn from(list: IdealNodeList) -> Self {
        list.0
    }
}

impl std::fmt::Display for IdealNodeList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, node) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{node}")?;
        }
        write!(f, "]")
    }
}

/// A scored candidate node.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    node: u16,
    retired: bool,
    score: f64,
}

/// Non-retired before retired, then higher score, then lower index.
fn rank(candidates: &mut [Candidate]) {
    candidates.sort_unstable_by(|a, b| {
        a.retired
            .cmp(&b.retired)
            .then_with(|| b.score.total_cmp(&a.score))
            .then_with(|| a.node.cmp(&b.node))
    });
}

/// Seed for all draws of a bucket: its location masked to the distribution
/// bits, or `None` if the bucket is too coarse to place.
fn placement_seed(state: &ClusterState, bucket: BucketId) -> Option<u64> {
    let bits = state.distribution_bits();
    if !state.is_cluster_up() || bucket.used_bits() < bits {
        return None;
    }
    Some(bucket.location() & low_bits_mask(bits))
}

fn candidate(
    state: &ClusterState,
    node_type: NodeType,
    node: u16,
    up_states: UpStates,
    hash: u64,
) -> Option<Candidate> {
    if node >= state.node_count(node_type) {
        return None;
    }
    let node_state = state.node_state(node_type, node);
    if !up_states.admits(node_state.state) {
        return None;
    }
    let score = weighted_score(hash, node_state.capacity);
    score.is_finite().then_some(Candidate {
        node,
        retired: node_state.state == State::Retired,
        score,
    })
}

/// Computes the ideal nodes of `node_type` for `bucket`.
///
/// The list holds at most the distribution's redundancy for storage nodes and
/// at most one distributor. It is shorter when too few nodes are available,
/// and empty when the cluster is down or the bucket has fewer used bits than
/// the distribution bits. Retired nodes are only picked once every other
/// eligible candidate is taken.
#[must_use]
pub fn ideal_nodes(
    node_type: NodeType,
    state: &ClusterState,
    distribution: &Distribution,
    bucket: BucketId,
    up_states: UpStates,
) -> IdealNodeList {
    let Some(seed) = placement_seed(state, bucket) else {
        return IdealNodeList::default();
    };
    match node_type {
        NodeType::Distributor => {
            IdealNodeList(select_distributor(state, seed, up_states).into_iter().collect())
        }
        NodeType::Storage => {
            let mut out = Vec::with_capacity(usize::from(distribution.redundancy()));
            select_from_group(
                distribution.root(),
                distribution.redundancy(),
                seed,
                state,
                up_states,
                &mut out,
            );
            IdealNodeList(out)
        }
    }
}

/// The distributor owning `bucket`, if one is available.
///
/// Distributor ownership ignores the group tree and uses redundancy 1.
#[must_use]
pub fn ideal_distributor_node(
    state: &ClusterState,
    bucket: BucketId,
    up_states: UpStates,
) -> Option<u16> {
    placement_seed(state, bucket).and_then(|seed| select_distributor(state, seed, up_states))
}

fn select_distributor(state: &ClusterState, seed: u64, up_states: UpStates) -> Option<u16> {
    let mut candidates: Vec<Candidate> = (0..state.node_count(NodeType::Distributor))
        .filter_map(|node| {
            let hash = placement_hash(&[seed, DISTRIBUTOR_SALT, u64::from(node)]);
            candidate(state, NodeType::Distributor, node, up_states, hash)
        })
        .collect();
    rank(&mut candidates);
    candidates.first().map(|c| c.node)
}

fn select_from_group(
    group: &Group,
    copies: u16,
    seed: u64,
    state: &ClusterState,
    up_states: UpStates,
    out: &mut Vec<u16>,
) {
    if copies == 0 {
        return;
    }

    if group.is_leaf() {
        let mut candidates: Vec<Candidate> = group
            .nodes()
            .iter()
            .filter_map(|&node| {
                let hash = placement_hash(&[seed, u64::from(node)]);
                candidate(state, NodeType::Storage, node, up_states, hash)
            })
            .collect();
        rank(&mut candidates);
        out.extend(candidates.iter().take(usize::from(copies)).map(|c| c.node));
        return;
    }

    // Subgroups without any eligible node take no part in the ranking.
    let mut ranked: Vec<(&Group, f64)> = group
        .subgroups()
        .iter()
        .filter(|sub| has_eligible_node(sub, state, up_states))
        .map(|sub| {
            let hash = placement_hash(&[seed, GROUP_SALT, u64::from(sub.index())]);
            (sub, weighted_score(hash, sub.capacity()))
        })
        .collect();
    ranked.sort_unstable_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa).then_with(|| a.index().cmp(&b.index()))
    });

    let shares = group.redundancy_array(copies);
    for ((sub, _), share) in ranked.into_iter().zip(shares) {
        select_from_group(sub, share, seed, state, up_states, out);
    }
}

fn has_eligible_node(group: &Group, state: &ClusterState, up_states: UpStates) -> bool {
    if group.is_leaf() {
        group.nodes().iter().any(|&node| {
            node < state.node_count(NodeType::Storage)
                && up_states.admits(state.node_state(NodeType::Storage, node).state)
        })
    } else {
        group.subgroups().iter().any(|sub| has_eligible_node(sub, state, up_states))
    }
}
