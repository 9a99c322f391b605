// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Cancellation of in-flight operations.
//!
//! When a cluster state change makes some target nodes of a running
//! operation unavailable, their replies must be treated as if the nodes had
//! never been contacted. A [`CancelScope`] records which nodes that applies
//! to; it is plain data that consumers check before trusting a reply.

use std::collections::BTreeSet;

use crate::replica::BucketCopy;

/// Set of nodes whose contribution to an operation must be disregarded, or
/// the whole operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelScope {
    fully_cancelled: bool,
    nodes: BTreeSet<u16>,
}

impl CancelScope {
    /// A scope that cancels nothing.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// A scope that cancels the whole operation.
    #[must_use]
    pub fn of_fully_cancelled() -> Self {
        Self { fully_cancelled: true, nodes: BTreeSet::new() }
    }

    /// A scope cancelling only `nodes`.
    #[must_use]
    pub fn of_node_subset(nodes: impl IntoIterator<Item = u16>) -> Self {
        Self { fully_cancelled: false, nodes: nodes.into_iter().collect() }
    }

    /// The union of two scopes.
    #[must_use]
    pub fn merged(&self, other: &Self) -> Self {
        Self {
            fully_cancelled: self.fully_cancelled || other.fully_cancelled,
            nodes: self.nodes.union(&other.nodes).copied().collect(),
        }
    }

    /// Returns true if anything at all is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.fully_cancelled || !self.nodes.is_empty()
    }

    /// Returns true if the whole operation is cancelled.
    #[must_use]
    pub fn fully_cancelled(&self) -> bool {
        self.fully_cancelled
    }

    /// Returns true if replies from `node` must be ignored.
    #[must_use]
    pub fn node_is_cancelled(&self, node: u16) -> bool {
        self.fully_cancelled || self.nodes.contains(&node)
    }

    /// Explicitly cancelled nodes.
    #[must_use]
    pub fn cancelled_nodes(&self) -> &BTreeSet<u16> {
        &self.nodes
    }
}

/// Drops the copies on cancelled nodes, keeping the others in order.
///
/// A fully cancelled scope yields no copies at all.
#[must_use]
pub fn prune_cancelled_nodes(replicas: &[BucketCopy], scope: &CancelScope) -> Vec<BucketCopy> {
    if scope.fully_cancelled() {
        return Vec::new();
    }
    let mut pruned = Vec::with_capacity(replicas.len().saturating_sub(scope.nodes.len()));
    pruned.extend(replicas.iter().filter(|copy| !scope.nodes.contains(&copy.node())).copied());
    pruned
}
