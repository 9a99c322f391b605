// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Bucket state checking.
//!
//! Compares a bucket's indexed replicas with its ideal state and classifies
//! what, if anything, needs doing:
//!
//! | condition                                   | operation      | priority  |
//! |---------------------------------------------|----------------|-----------|
//! | fewer used bits than distribution bits      | split          | very high |
//! | indexed descendants (split left incomplete) | split          | high      |
//! | fewer copies than a majority                | merge          | highest   |
//! | fewer copies than ideal nodes               | merge          | very high |
//! | copies disagree                             | merge          | high      |
//! | an ideal node lacks a copy                  | merge          | medium    |
//! | above split limits                          | split          | medium    |
//! | surplus copies, ideal nodes in sync         | delete         | low       |
//! | wrong copies active                         | set state      | very low  |
//! | bucket and sibling below join limits        | join           | very low  |
//!
//! Every check runs; the most urgent result wins and earlier rows win ties.

use bucketeer_core::{MaintenanceConfig, MAX_USED_BITS};
use bucketeer_placement::{Distribution, IdealNodeList};

use super::priority::{MaintenanceDecision, MaintenanceOperationType, MaintenancePriority};
use crate::database::Entry;
use crate::replica::{BucketCopy, BucketInfo};

/// Everything known about one bucket when checking it.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext<'a> {
    /// The bucket's entry.
    pub entry: &'a Entry,
    /// Ideal storage nodes for the bucket.
    pub ideal: &'a IdealNodeList,
    /// Distribution in effect.
    pub distribution: &'a Distribution,
    /// Distribution bits of the cluster state in effect.
    pub distribution_bits: u8,
    /// Number of immediate child subtrees holding entries (0 to 2).
    pub child_subtrees: u8,
    /// The sibling's entry, if indexed.
    pub sibling: Option<&'a Entry>,
}

type Check = fn(&BucketStateChecker, &CheckContext<'_>) -> Option<MaintenanceDecision>;

/// Classifies buckets into maintenance decisions.
#[derive(Debug, Clone, Default)]
pub struct BucketStateChecker {
    config: MaintenanceConfig,
}

impl BucketStateChecker {
    /// Creates a checker using the given split and join limits.
    #[must_use]
    pub fn new(config: MaintenanceConfig) -> Self {
        Self { config }
    }

    /// The limits in use.
    #[must_use]
    pub fn config(&self) -> &MaintenanceConfig {
        &self.config
    }

    /// Checks one bucket.
    #[must_use]
    pub fn check(&self, ctx: &CheckContext<'_>) -> MaintenanceDecision {
        const CHECKS: [Check; 10] = [
            BucketStateChecker::check_too_few_used_bits,
            BucketStateChecker::check_inconsistent_split,
            BucketStateChecker::check_below_quorum,
            BucketStateChecker::check_below_redundancy,
            BucketStateChecker::check_out_of_sync,
            BucketStateChecker::check_misplaced,
            BucketStateChecker::check_split_size,
            BucketStateChecker::check_excess_replicas,
            BucketStateChecker::check_activation,
            BucketStateChecker::check_join,
        ];

        let mut best: Option<MaintenanceDecision> = None;
        for check in CHECKS {
            if let Some(decision) = check(self, ctx) {
                if best.as_ref().map_or(true, |b| decision.priority > b.priority) {
                    best = Some(decision);
                }
            }
        }
        best.unwrap_or_else(|| MaintenanceDecision::no_maintenance(ctx.entry.bucket_id()))
    }

    fn check_too_few_used_bits(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        (ctx.entry.bucket_id().used_bits() < ctx.distribution_bits)
            .then(|| decision(ctx, MaintenancePriority::VeryHigh, MaintenanceOperationType::SplitBucket))
    }

    fn check_inconsistent_split(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        (ctx.child_subtrees > 0)
            .then(|| decision(ctx, MaintenancePriority::High, MaintenanceOperationType::SplitBucket))
    }

    fn check_below_quorum(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        let target = ideal_count(ctx);
        let quorum = ctx.distribution.quorum().min(target);
        (replica_count(ctx) < quorum).then(|| {
            decision(ctx, MaintenancePriority::Highest, MaintenanceOperationType::MergeBucket)
                .with_missing_nodes(missing_nodes(ctx))
        })
    }

    fn check_below_redundancy(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        (replica_count(ctx) < ideal_count(ctx)).then(|| {
            decision(ctx, MaintenancePriority::VeryHigh, MaintenanceOperationType::MergeBucket)
                .with_missing_nodes(missing_nodes(ctx))
        })
    }

    fn check_out_of_sync(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        (!ctx.entry.info.is_consistent()).then(|| {
            decision(ctx, MaintenancePriority::High, MaintenanceOperationType::MergeBucket)
                .with_missing_nodes(missing_nodes(ctx))
        })
    }

    fn check_misplaced(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        let missing = missing_nodes(ctx);
        (!missing.is_empty()).then(|| {
            decision(ctx, MaintenancePriority::Medium, MaintenanceOperationType::MergeBucket)
                .with_missing_nodes(missing)
        })
    }

    fn check_split_size(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        let info = &ctx.entry.info;
        let too_many_docs =
            self.config.split_count > 0 && info.highest_document_count() > self.config.split_count;
        let too_large =
            self.config.split_size > 0 && info.highest_total_bytes() > self.config.split_size;
        let splittable = ctx.entry.bucket_id().used_bits() < MAX_USED_BITS;
        (splittable && (too_many_docs || too_large))
            .then(|| decision(ctx, MaintenancePriority::Medium, MaintenanceOperationType::SplitBucket))
    }

    fn check_excess_replicas(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        let info = &ctx.entry.info;
        if ctx.ideal.is_empty() || !missing_nodes(ctx).is_empty() || !info.is_consistent() {
            return None;
        }
        let excess: Vec<u16> = info.nodes().filter(|&n| !ctx.ideal.contains(n)).collect();
        (!excess.is_empty()).then(|| {
            decision(ctx, MaintenancePriority::Low, MaintenanceOperationType::DeleteBucket)
                .with_excess_nodes(excess)
        })
    }

    fn check_activation(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        let info = &ctx.entry.info;
        if info.is_empty() {
            return None;
        }
        let wanted = wanted_active(ctx);
        let activate: Vec<u16> = wanted
            .iter()
            .copied()
            .filter(|&n| !info.node(n).is_some_and(|c| c.info().active))
            .collect();
        let deactivate: Vec<u16> = info
            .replicas()
            .iter()
            .filter(|c| c.info().active && !wanted.contains(&c.node()))
            .map(BucketCopy::node)
            .collect();
        (!activate.is_empty() || !deactivate.is_empty()).then(|| {
            decision(ctx, MaintenancePriority::VeryLow, MaintenanceOperationType::SetBucketState)
                .with_missing_nodes(activate)
                .with_excess_nodes(deactivate)
        })
    }

    fn check_join(&self, ctx: &CheckContext<'_>) -> Option<MaintenanceDecision> {
        if !self.config.joins_enabled() || ctx.child_subtrees > 0 {
            return None;
        }
        let used_bits = ctx.entry.bucket_id().used_bits();
        if used_bits <= self.config.minimal_bucket_split.max(ctx.distribution_bits) {
            return None;
        }
        let sibling = ctx.sibling?;
        (self.below_join_limits(&ctx.entry.info) && self.below_join_limits(&sibling.info))
            .then(|| decision(ctx, MaintenancePriority::VeryLow, MaintenanceOperationType::JoinBucket))
    }

    fn below_join_limits(&self, info: &BucketInfo) -> bool {
        let docs_ok =
            self.config.join_count == 0 || info.highest_document_count() < self.config.join_count;
        let size_ok =
            self.config.join_size == 0 || info.highest_total_bytes() < self.config.join_size;
        docs_ok && size_ok
    }
}

fn decision(
    ctx: &CheckContext<'_>,
    priority: MaintenancePriority,
    operation: MaintenanceOperationType,
) -> MaintenanceDecision {
    MaintenanceDecision::new(ctx.entry.bucket_id(), priority, operation)
}

fn replica_count(ctx: &CheckContext<'_>) -> u16 {
    u16::try_from(ctx.entry.info.replica_count()).unwrap_or(u16::MAX)
}

fn ideal_count(ctx: &CheckContext<'_>) -> u16 {
    u16::try_from(ctx.ideal.len()).unwrap_or(u16::MAX)
}

fn missing_nodes(ctx: &CheckContext<'_>) -> Vec<u16> {
    ctx.ideal.iter().filter(|&n| ctx.entry.info.node(n).is_none()).collect()
}

/// Copies that should be active: the best copy overall, or the best copy in
/// each leaf group. Ready copies beat unready ones, then ideal order decides,
/// with copies outside the ideal state last.
fn wanted_active(ctx: &CheckContext<'_>) -> Vec<u16> {
    let mut ranked: Vec<&BucketCopy> = ctx.entry.info.replicas().iter().collect();
    ranked.sort_by_key(|c| {
        let position = ctx.ideal.position(c.node()).unwrap_or(usize::MAX);
        (!c.info().ready, position, c.node())
    });

    if !ctx.distribution.active_per_leaf_group() {
        return ranked.first().map(|c| c.node()).into_iter().collect();
    }
    let mut wanted = Vec::new();
    let mut groups_seen = Vec::new();
    for copy in ranked {
        let Some(group) = ctx.distribution.leaf_group_of(copy.node()) else {
            continue;
        };
        if !groups_seen.contains(&group.index()) {
            groups_seen.push(group.index());
            wanted.push(copy.node());
        }
    }
    wanted
}

#[cfg(test)]
mod tests {
    use bucketeer_core::BucketId;
    use bucketeer_placement::{ClusterState, DistributionConfig, GroupConfig};

    use super::*;
    use crate::replica::ReplicaInfo;

    struct Fixture {
        entry: Entry,
        ideal: IdealNodeList,
        distribution: Distribution,
        child_subtrees: u8,
        sibling: Option<Entry>,
        checker: BucketStateChecker,
    }

    impl Fixture {
        fn new(ideal_state: &str, replicas: Vec<BucketCopy>) -> Self {
            let distribution = Distribution::flat(3, 6).unwrap();
            let state: ClusterState = ideal_state.parse().unwrap();
            let bucket = BucketId::new(20, 0x1_2345);
            let ideal = bucketeer_placement::ideal_nodes(
                bucketeer_placement::NodeType::Storage,
                &state,
                &distribution,
                bucket,
                bucketeer_placement::UpStates::UP_INIT,
            );
            Self {
                entry: Entry::new(bucket, BucketInfo::with_replicas(replicas)),
                ideal,
                distribution,
                child_subtrees: 0,
                sibling: None,
                checker: BucketStateChecker::new(MaintenanceConfig {
                    split_count: 100,
                    split_size: 10_000,
                    join_count: 10,
                    join_size: 1_000,
                    ..MaintenanceConfig::default()
                }),
            }
        }

        /// Replicas on exactly the ideal nodes, in sync, first one active.
        fn ideal(ideal_state: &str) -> Self {
            let mut fixture = Self::new(ideal_state, Vec::new());
            let copies: Vec<BucketCopy> = fixture
                .ideal
                .iter()
                .enumerate()
                .map(|(i, n)| with_active(synced(n), i == 0))
                .collect();
            fixture.entry.info.add_replicas(copies);
            fixture
        }

        fn check(&self) -> MaintenanceDecision {
            self.checker.check(&CheckContext {
                entry: &self.entry,
                ideal: &self.ideal,
                distribution: &self.distribution,
                distribution_bits: 16,
                child_subtrees: self.child_subtrees,
                sibling: self.sibling.as_ref(),
            })
        }
    }

    const STATE: &str = "version:1 distributor:1 storage:6";

    fn synced(node: u16) -> BucketCopy {
        BucketCopy::new(node, 1, ReplicaInfo::new(0xabc, 5, 500).with_ready(true))
    }

    fn with_active(mut copy: BucketCopy, active: bool) -> BucketCopy {
        copy.set_active(active);
        copy
    }

    fn outside_ideal(fixture: &Fixture) -> u16 {
        (0..6).find(|n| !fixture.ideal.contains(*n)).unwrap()
    }

    #[test]
    fn test_ideal_bucket_needs_nothing() {
        let fixture = Fixture::ideal(STATE);
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::NoMaintenanceNeeded, "{decision:?}");
        assert!(decision.operation.is_none());
    }

    #[test]
    fn test_too_few_used_bits() {
        let mut fixture = Fixture::ideal(STATE);
        let coarse = BucketId::new(12, 0x345);
        fixture.entry = Entry::new(coarse, fixture.entry.info.clone());
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::VeryHigh);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::SplitBucket));
    }

    #[test]
    fn test_inconsistent_split() {
        let mut fixture = Fixture::ideal(STATE);
        fixture.child_subtrees = 1;
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::High);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::SplitBucket));
    }

    #[test]
    fn test_below_quorum() {
        let fixture = Fixture::ideal(STATE);
        let primary = fixture.ideal.primary().unwrap();
        let fixture = Fixture::new(STATE, vec![synced(primary)]);
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::Highest);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::MergeBucket));
        assert_eq!(decision.missing_nodes.len(), 2);
        assert!(!decision.missing_nodes.contains(&primary));
    }

    #[test]
    fn test_below_redundancy() {
        let mut fixture = Fixture::ideal(STATE);
        let last = fixture.ideal.as_slice()[2];
        fixture.entry.info.remove_node(last);
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::VeryHigh);
        assert_eq!(decision.missing_nodes, vec![last]);
    }

    #[test]
    fn test_degraded_ideal_state_is_satisfiable() {
        // Only two storage nodes up: two copies are all that can be had.
        let state = "version:1 distributor:1 storage:6 .0.s:d .1.s:d .2.s:d .3.s:d";
        let fixture = Fixture::ideal(state);
        assert_eq!(fixture.ideal.len(), 2);
        assert_eq!(fixture.check().priority, MaintenancePriority::NoMaintenanceNeeded);
    }

    #[test]
    fn test_out_of_sync() {
        let mut fixture = Fixture::ideal(STATE);
        let node = fixture.ideal.as_slice()[1];
        fixture.entry.info.add_replicas([BucketCopy::new(node, 2, ReplicaInfo::new(0xdef, 6, 600))]);
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::High);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::MergeBucket));
    }

    #[test]
    fn test_misplaced() {
        let mut fixture = Fixture::ideal(STATE);
        let last = fixture.ideal.as_slice()[2];
        let outsider = outside_ideal(&fixture);
        fixture.entry.info.remove_node(last);
        fixture.entry.info.add_replicas([synced(outsider)]);
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::Medium);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::MergeBucket));
        assert_eq!(decision.missing_nodes, vec![last]);
    }

    #[test]
    fn test_split_size() {
        let mut fixture = Fixture::ideal(STATE);
        let node = fixture.ideal.primary().unwrap();
        let big = BucketCopy::new(node, 2, ReplicaInfo::new(0xabc, 500, 500).with_ready(true).with_active(true));
        fixture.entry.info.add_replicas([big]);
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::Medium);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::SplitBucket));
    }

    #[test]
    fn test_excess_replicas() {
        let mut fixture = Fixture::ideal(STATE);
        let outsider = outside_ideal(&fixture);
        fixture.entry.info.add_replicas([synced(outsider)]);
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::Low);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::DeleteBucket));
        assert_eq!(decision.excess_nodes, vec![outsider]);
    }

    #[test]
    fn test_activation() {
        let mut fixture = Fixture::ideal(STATE);
        let primary = fixture.ideal.primary().unwrap();
        let second = fixture.ideal.as_slice()[1];
        fixture.entry.info.node_mut(primary).unwrap().set_active(false);
        fixture.entry.info.node_mut(second).unwrap().set_active(true);
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::VeryLow);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::SetBucketState));
        assert_eq!(decision.missing_nodes, vec![primary]);
        assert_eq!(decision.excess_nodes, vec![second]);
    }

    #[test]
    fn test_activation_prefers_ready() {
        let mut fixture = Fixture::ideal(STATE);
        let primary = fixture.ideal.primary().unwrap();
        let second = fixture.ideal.as_slice()[1];
        fixture.entry.info.add_replicas([
            BucketCopy::new(primary, 1, ReplicaInfo::new(0xabc, 5, 500)),
            with_active(synced(second), true),
        ]);
        assert_eq!(fixture.check().priority, MaintenancePriority::NoMaintenanceNeeded);
    }

    #[test]
    fn test_active_per_leaf_group() {
        let config = DistributionConfig {
            redundancy: 2,
            active_per_leaf_group: true,
            group: GroupConfig::inner(
                0,
                "root",
                "1|1",
                vec![GroupConfig::leaf(0, "a", vec![0, 1, 2]), GroupConfig::leaf(1, "b", vec![3, 4, 5])],
            ),
            ..DistributionConfig::default()
        };
        let mut fixture = Fixture::new(STATE, Vec::new());
        fixture.distribution = Distribution::new(&config).unwrap();
        fixture.ideal = bucketeer_placement::ideal_nodes(
            bucketeer_placement::NodeType::Storage,
            &STATE.parse::<ClusterState>().unwrap(),
            &fixture.distribution,
            fixture.entry.bucket_id(),
            bucketeer_placement::UpStates::UP_INIT,
        );
        let nodes: Vec<u16> = fixture.ideal.iter().collect();
        fixture.entry.info.add_replicas(nodes.iter().map(|&n| synced(n)));
        let decision = fixture.check();
        assert_eq!(decision.operation, Some(MaintenanceOperationType::SetBucketState));
        let mut activate = decision.missing_nodes.clone();
        activate.sort_unstable();
        let mut expected = nodes;
        expected.sort_unstable();
        assert_eq!(activate, expected);
    }

    #[test]
    fn test_join() {
        let mut fixture = Fixture::ideal(STATE);
        for node in fixture.ideal.as_slice().to_vec() {
            fixture.entry.info.add_replicas([BucketCopy::new(node, 2, ReplicaInfo::new(0xabc, 1, 10).with_ready(true))]);
        }
        let primary = fixture.ideal.primary().unwrap();
        fixture.entry.info.node_mut(primary).unwrap().set_active(true);
        assert_eq!(fixture.check().priority, MaintenancePriority::NoMaintenanceNeeded);

        let sibling_id = fixture.entry.bucket_id().sibling().unwrap();
        fixture.sibling = Some(Entry::new(sibling_id, fixture.entry.info.clone()));
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::VeryLow);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::JoinBucket));

        // A large sibling blocks the join.
        fixture.sibling = Some(Entry::new(
            sibling_id,
            BucketInfo::with_replicas([BucketCopy::new(0, 1, ReplicaInfo::new(1, 50, 10))]),
        ));
        assert_eq!(fixture.check().priority, MaintenancePriority::NoMaintenanceNeeded);
    }

    #[test]
    fn test_most_urgent_wins() {
        let fixture = Fixture::ideal(STATE);
        let primary = fixture.ideal.primary().unwrap();
        let outsider = outside_ideal(&fixture);
        // Too few copies, out of sync and misplaced at once.
        let fixture = Fixture::new(
            STATE,
            vec![synced(primary), BucketCopy::new(outsider, 1, ReplicaInfo::new(0x1, 1, 1))],
        );
        let decision = fixture.check();
        assert_eq!(decision.priority, MaintenancePriority::VeryHigh);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::MergeBucket));
        assert_eq!(decision.missing_nodes.len(), 2);
    }
}
