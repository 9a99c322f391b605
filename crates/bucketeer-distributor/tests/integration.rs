// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Integration tests for the distributor's bucket bookkeeping.

use std::collections::{BTreeSet, HashMap};
use std::ops::ControlFlow;
use std::sync::Arc;

use bucketeer_core::{BucketId, Config};
use bucketeer_distributor::{
    prune_cancelled_nodes, BucketCopy, BucketDatabase, BucketInfo, Entry, MaintenanceOperationType,
    MaintenancePriority, NodeSupportedFeatures, NodeSupportedFeaturesRepo, ReplicaInfo,
    StripePool,
};
use bucketeer_placement::{ClusterState, Distribution};
use proptest::prelude::*;

const STATE: &str = "version:1 bits:8 distributor:1 storage:4";

fn pool() -> StripePool {
    let config = Config::parse("[stripes]\ncount = 2\n").unwrap();
    let distribution = Arc::new(Distribution::flat(2, 4).unwrap());
    let state: Arc<ClusterState> = Arc::new(STATE.parse().unwrap());
    StripePool::new(0, &config, distribution, state).unwrap()
}

fn ready_copy(node: u16, active: bool) -> BucketCopy {
    BucketCopy::new(node, 1, ReplicaInfo::new(0xfeed, 20, 2_000).with_ready(true).with_active(active))
}

#[test]
fn test_maintenance_round_trip() {
    let pool = pool();
    let bucket = BucketId::new(16, 0x4321);
    let ideal = pool.with_stripe(bucket, |stripe| stripe.ideal_storage_nodes(bucket));
    assert_eq!(ideal.len(), 2);
    let (primary, secondary) = (ideal.as_slice()[0], ideal.as_slice()[1]);

    pool.update_replica(bucket, ready_copy(primary, true));
    let progress = pool.scan_all().unwrap();
    assert_eq!(progress.examined, 1);
    assert!(progress.pass_completed);

    let decision = pool.with_stripe(bucket, |stripe| stripe.next_operation()).unwrap();
    assert_eq!(decision.bucket_id, bucket);
    assert_eq!(decision.priority, MaintenancePriority::Highest);
    assert_eq!(decision.operation, Some(MaintenanceOperationType::MergeBucket));
    assert_eq!(decision.missing_nodes, vec![secondary]);

    // Still broken, but already being worked on.
    pool.scan_all().unwrap();
    assert!(pool.with_stripe(bucket, |stripe| stripe.next_operation()).is_none());

    pool.update_replica(bucket, ready_copy(secondary, false));
    assert!(pool.with_stripe(bucket, |stripe| stripe.complete_operation(bucket)));
    pool.scan_all().unwrap();
    pool.with_stripe(bucket, |stripe| {
        assert!(stripe.queue().is_empty());
        assert!(stripe.next_operation().is_none());
        assert_eq!(stripe.pending_operations(), 0);
    });
}

#[test]
fn test_state_change_cancels_lost_nodes() {
    let pool = pool();
    let bucket = BucketId::new(16, 0x99);
    for node in 0..4 {
        pool.update_replica(bucket, ready_copy(node, node == 0));
    }

    let state: Arc<ClusterState> =
        Arc::new("version:2 bits:8 distributor:1 storage:4 .1.s:d .3.s:m".parse().unwrap());
    let scope = pool
        .on_cluster_state_change(state, Arc::new(Distribution::flat(2, 4).unwrap()))
        .unwrap();
    assert_eq!(scope.cancelled_nodes().iter().copied().collect::<Vec<_>>(), vec![1, 3]);

    let survivors = pool.with_stripe(bucket, |stripe| {
        let entry = stripe.database().get(bucket).unwrap();
        prune_cancelled_nodes(entry.info.replicas(), &scope).len()
    });
    assert_eq!(survivors, 2);
}

#[test]
fn test_rejected_state_leaves_pool_unchanged() {
    let pool = pool();
    let bucket = BucketId::new(16, 5);
    pool.update_replica(bucket, ready_copy(0, true));

    let broken: ClusterState = serde_json::from_str(
        r#"{"version":2,"distribution_bits":0,"cluster_up":true,"distributors":[],"storage":[]}"#,
    )
    .unwrap();
    assert!(pool
        .on_cluster_state_change(Arc::new(broken), Arc::new(Distribution::flat(2, 4).unwrap()))
        .is_err());
    pool.with_stripe(bucket, |stripe| {
        assert_eq!(stripe.cluster_state().version(), 1);
        assert!(stripe.database().contains(bucket));
    });
}

#[test]
fn test_features_published_to_all_stripes() {
    let pool = pool();
    let updates = HashMap::from([(2, NodeSupportedFeatures::UNORDERED_MERGE_CHAINING)]);
    pool.publish_node_features(&updates);
    for index in 0..pool.len() {
        let features = pool.with_stripe_at(index, |stripe| stripe.node_supported_features(2)).unwrap();
        assert_eq!(features, NodeSupportedFeatures::UNORDERED_MERGE_CHAINING);
    }
}

fn bucket_strategy() -> impl Strategy<Value = BucketId> {
    (1u8..=12, any::<u64>()).prop_map(|(bits, location)| BucketId::new(bits, location).strip_unused())
}

fn database_of(buckets: &[BucketId]) -> BucketDatabase {
    let mut db = BucketDatabase::new();
    for &bucket in buckets {
        db.update(Entry::new(bucket, BucketInfo::new()));
    }
    db
}

fn features_strategy() -> impl Strategy<Value = HashMap<u16, NodeSupportedFeatures>> {
    proptest::collection::hash_map(0u16..16, (0u32..32).prop_map(NodeSupportedFeatures::from_bits_truncate), 0..8)
}

proptest! {
    #[test]
    fn prop_parents_are_exactly_strict_ancestors(
        buckets in proptest::collection::vec(bucket_strategy(), 0..40),
        query in bucket_strategy(),
    ) {
        let db = database_of(&buckets);
        let parents: Vec<BucketId> = db.get_parents(query).unwrap().iter().map(|e| e.bucket_id()).collect();

        let expected: BTreeSet<BucketId> =
            buckets.iter().copied().filter(|b| b.is_strict_ancestor_of(query)).collect();
        prop_assert_eq!(parents.iter().copied().collect::<BTreeSet<_>>(), expected);
        prop_assert!(parents.windows(2).all(|w| w[0].used_bits() < w[1].used_bits()));
    }

    #[test]
    fn prop_get_all_is_every_overlapping_bucket(
        buckets in proptest::collection::vec(bucket_strategy(), 0..40),
        query in bucket_strategy(),
    ) {
        let db = database_of(&buckets);
        let all: BTreeSet<BucketId> = db.get_all(query).unwrap().iter().map(|e| e.bucket_id()).collect();
        let expected: BTreeSet<BucketId> = buckets.iter().copied().filter(|b| b.overlaps(query)).collect();
        prop_assert_eq!(all, expected);

        let descendants = buckets
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .filter(|b| query.is_strict_ancestor_of(*b))
            .count();
        prop_assert_eq!(db.child_count(query).unwrap(), descendants);
    }

    #[test]
    fn prop_for_each_visits_in_key_order(buckets in proptest::collection::vec(bucket_strategy(), 0..40)) {
        let db = database_of(&buckets);
        let mut keys = Vec::new();
        db.for_each(None, |entry| {
            keys.push(entry.bucket_id().to_key());
            ControlFlow::Continue(())
        });
        prop_assert_eq!(keys.len(), db.len());
        prop_assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn prop_union_with_empty_is_identity(base in features_strategy()) {
        let repo = NodeSupportedFeaturesRepo::from_map(base);
        let same = repo.make_union_of(&HashMap::new());
        prop_assert_eq!(&*same, &repo);
    }

    #[test]
    fn prop_union_later_overlay_wins(
        base in features_strategy(),
        first in features_strategy(),
        second in features_strategy(),
    ) {
        let repo = NodeSupportedFeaturesRepo::from_map(base.clone());
        let merged = repo.make_union_of(&first).make_union_of(&second);
        for node in 0u16..16 {
            let expected = second
                .get(&node)
                .or_else(|| first.get(&node))
                .or_else(|| base.get(&node))
                .copied()
                .unwrap_or_else(NodeSupportedFeatures::empty);
            prop_assert_eq!(merged.node_supported_features(node), expected);
        }
        prop_assert_eq!(NodeSupportedFeaturesRepo::from_map(base), repo);
    }
}
