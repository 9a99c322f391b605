// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Per-node capability negotiation.
//!
//! Storage nodes advertise the optional protocol features they support. The
//! distributor only uses a feature towards a node that has advertised it.
//! Repositories are immutable snapshots; an update produces a new snapshot
//! that is published atomically through [`SharedFeaturesRepo`].

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::debug;

bitflags::bitflags! {
    /// Optional features a storage node may support.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct NodeSupportedFeatures: u32 {
        /// Merges may be forwarded along the node chain in any order.
        const UNORDERED_MERGE_CHAINING = 1 << 0;
        /// Remove-location is split into a prepare and a commit phase.
        const TWO_PHASE_REMOVE_LOCATION = 1 << 1;
        /// Activating a bucket does not implicitly index it.
        const NO_IMPLICIT_INDEXING_OF_ACTIVE_BUCKETS = 1 << 2;
        /// Test-and-set conditions can be probed without writing.
        const DOCUMENT_CONDITION_PROBE = 1 << 3;
        /// Test-and-set conditions may carry timestamps.
        const TIMESTAMPS_IN_TAS_CONDITIONS = 1 << 4;
    }
}

/// Immutable mapping from storage node index to its features.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSupportedFeaturesRepo {
    features: HashMap<u16, NodeSupportedFeatures>,
}

impl NodeSupportedFeaturesRepo {
    /// An empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository holding exactly `features`.
    #[must_use]
    pub fn from_map(features: HashMap<u16, NodeSupportedFeatures>) -> Self {
        Self { features }
    }

    /// Features of `node`. Nodes that never advertised anything support
    /// nothing.
    #[must_use]
    pub fn node_supported_features(&self, node: u16) -> NodeSupportedFeatures {
        self.features.get(&node).copied().unwrap_or_else(NodeSupportedFeatures::empty)
    }

    /// A new repository where `overlay` replaces this one's entries for the
    /// nodes it names. `self` is left unchanged.
    #[must_use]
    pub fn make_union_of(&self, overlay: &HashMap<u16, NodeSupportedFeatures>) -> Arc<Self> {
        let mut features = self.features.clone();
        features.extend(overlay.iter().map(|(&node, &f)| (node, f)));
        Arc::new(Self { features })
    }

    /// Number of nodes with advertised features.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Returns true if no node has advertised anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Atomically replaceable handle to the current features snapshot.
///
/// Readers get a consistent snapshot without locking; writers never block
/// readers.
#[derive(Debug)]
pub struct SharedFeaturesRepo {
    current: ArcSwap<NodeSupportedFeaturesRepo>,
}

impl Default for SharedFeaturesRepo {
    fn default() -> Self {
        Self::new(Arc::new(NodeSupportedFeaturesRepo::new()))
    }
}

impl SharedFeaturesRepo {
    /// Creates a handle publishing `initial`.
    #[must_use]
    pub fn new(initial: Arc<NodeSupportedFeaturesRepo>) -> Self {
        Self { current: ArcSwap::new(initial) }
    }

    /// The current snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<NodeSupportedFeaturesRepo> {
        self.current.load_full()
    }

    /// Replaces the current snapshot.
    pub fn store(&self, repo: Arc<NodeSupportedFeaturesRepo>) {
        self.current.store(repo);
    }

    /// Overlays `updates` on the current snapshot and publishes the result.
    /// Concurrent publishers never lose each other's updates.
    pub fn publish_union_of(&self, updates: &HashMap<u16, NodeSupportedFeatures>) {
        self.current.rcu(|current| current.make_union_of(updates));
        debug!(nodes = updates.len(), "Published node feature updates");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(u16, NodeSupportedFeatures)]) -> HashMap<u16, NodeSupportedFeatures> {
        entries.iter().copied().collect()
    }

    #[test]
    fn test_unknown_node_has_no_features() {
        let repo = NodeSupportedFeaturesRepo::new();
        assert_eq!(repo.node_supported_features(3), NodeSupportedFeatures::empty());
    }

    #[test]
    fn test_union_overlays_and_keeps_base() {
        let base = NodeSupportedFeaturesRepo::from_map(map(&[
            (0, NodeSupportedFeatures::UNORDERED_MERGE_CHAINING),
            (1, NodeSupportedFeatures::DOCUMENT_CONDITION_PROBE),
        ]));
        let both = NodeSupportedFeatures::TWO_PHASE_REMOVE_LOCATION
            | NodeSupportedFeatures::TIMESTAMPS_IN_TAS_CONDITIONS;
        let merged = base.make_union_of(&map(&[(1, both), (2, NodeSupportedFeatures::all())]));

        assert_eq!(merged.node_supported_features(0), NodeSupportedFeatures::UNORDERED_MERGE_CHAINING);
        assert_eq!(merged.node_supported_features(1), both);
        assert_eq!(merged.node_supported_features(2), NodeSupportedFeatures::all());
        assert_eq!(merged.len(), 3);

        assert_eq!(base.node_supported_features(1), NodeSupportedFeatures::DOCUMENT_CONDITION_PROBE);
        assert_eq!(base.node_supported_features(2), NodeSupportedFeatures::empty());
    }

    #[test]
    fn test_shared_repo_publish() {
        let shared = SharedFeaturesRepo::default();
        let before = shared.load();
        shared.publish_union_of(&map(&[(4, NodeSupportedFeatures::DOCUMENT_CONDITION_PROBE)]));
        shared.publish_union_of(&map(&[(5, NodeSupportedFeatures::UNORDERED_MERGE_CHAINING)]));

        let after = shared.load();
        assert!(before.is_empty());
        assert_eq!(after.len(), 2);
        assert!(after
            .node_supported_features(4)
            .contains(NodeSupportedFeatures::DOCUMENT_CONDITION_PROBE));

        shared.store(Arc::new(NodeSupportedFeaturesRepo::new()));
        assert!(shared.load().is_empty());
    }

    #[test]
    fn test_features_serde() {
        let flags = NodeSupportedFeatures::UNORDERED_MERGE_CHAINING
            | NodeSupportedFeatures::NO_IMPLICIT_INDEXING_OF_ACTIVE_BUCKETS;
        let json = serde_json::to_string(&flags).unwrap();
        let back: NodeSupportedFeatures = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
    }
}
