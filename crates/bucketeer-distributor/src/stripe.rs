// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Stripes: independent partitions of the bucket space.
//!
//! Each [`DistributorStripe`] owns the buckets whose keys fall in its range
//! and everything needed to maintain them: a bucket database, an ownership
//! cache, a checker, a priority queue, a scanner and a scheduler. Nothing is
//! shared between stripes except immutable snapshots, so stripes can be
//! driven from different threads with one lock each.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use bucketeer_core::{BucketId, Config};
//! use bucketeer_distributor::{BucketCopy, ReplicaInfo, StripePool};
//! use bucketeer_placement::{ClusterState, Distribution};
//!
//! let distribution = Arc::new(Distribution::flat(2, 4).unwrap());
//! let state: Arc<ClusterState> = Arc::new("version:1 bits:8 distributor:1 storage:4".parse().unwrap());
//! let pool = StripePool::new(0, &Config::default(), distribution, state).unwrap();
//!
//! let bucket = BucketId::new(16, 0x1234);
//! pool.update_replica(bucket, BucketCopy::new(3, 1, ReplicaInfo::new(0xbeef, 10, 1024)));
//! pool.scan_all().unwrap();
//! assert!(pool.with_stripe(bucket, |stripe| stripe.queue().len()) <= 1);
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use bucketeer_core::{BucketId, Config, MaintenanceConfig, Result, StripeLayout};
use bucketeer_placement::{
    ClusterState, Distribution, DistributorStateCache, IdealNodeList, NodeType, UpStates,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cancel::CancelScope;
use crate::database::{BucketDatabase, DatabaseError, Entry, Visit};
use crate::features::{NodeSupportedFeatures, SharedFeaturesRepo};
use crate::maintenance::{
    BucketPriorityDatabase, BucketStateChecker, CheckContext, MaintenanceDecision,
    MaintenanceScanner, MaintenanceScheduler, ScanProgress,
};
use crate::replica::BucketCopy;

/// One stripe of a distributor.
#[derive(Debug)]
pub struct DistributorStripe {
    index: usize,
    node_index: u16,
    up_states: UpStates,
    scan_batch_size: usize,
    db: BucketDatabase,
    cache: DistributorStateCache,
    checker: BucketStateChecker,
    queue: BucketPriorityDatabase,
    scanner: MaintenanceScanner,
    scheduler: MaintenanceScheduler,
    features: Arc<SharedFeaturesRepo>,
}

impl DistributorStripe {
    /// Creates stripe `index` of distributor `node_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster state's distribution bits are
    /// unusable.
    pub fn new(
        index: usize,
        node_index: u16,
        config: &MaintenanceConfig,
        distribution: Arc<Distribution>,
        state: Arc<ClusterState>,
        features: Arc<SharedFeaturesRepo>,
    ) -> Result<Self> {
        Ok(Self {
            index,
            node_index,
            up_states: UpStates::UP_INIT,
            scan_batch_size: config.scan_batch_size,
            db: BucketDatabase::for_stripe(index),
            cache: DistributorStateCache::new(distribution, state)?,
            checker: BucketStateChecker::new(config.clone()),
            queue: BucketPriorityDatabase::new(),
            scanner: MaintenanceScanner::new(index),
            scheduler: MaintenanceScheduler::new(index, config.max_pending_per_stripe),
            features,
        })
    }

    /// Sets which node states count as available. Takes effect on the next
    /// lookup.
    #[must_use]
    pub fn with_up_states(mut self, up_states: UpStates) -> Self {
        self.up_states = up_states;
        self
    }

    /// This stripe's index.
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// The stripe's bucket database.
    #[must_use]
    pub fn database(&self) -> &BucketDatabase {
        &self.db
    }

    /// Mutable access to the stripe's bucket database.
    pub fn database_mut(&mut self) -> &mut BucketDatabase {
        &mut self.db
    }

    /// Removes `bucket` from the database along with any queued decision
    /// for it. An operation already in flight stays pending until released.
    pub fn remove_bucket(&mut self, bucket: BucketId) -> Option<Entry> {
        self.queue.remove(bucket);
        self.db.remove(bucket)
    }

    /// Pending maintenance decisions.
    #[must_use]
    pub fn queue(&self) -> &BucketPriorityDatabase {
        &self.queue
    }

    /// The scan position and pass count.
    #[must_use]
    pub fn scanner(&self) -> &MaintenanceScanner {
        &self.scanner
    }

    /// The cluster state in effect.
    #[must_use]
    pub fn cluster_state(&self) -> &Arc<ClusterState> {
        self.cache.cluster_state()
    }

    /// Returns true if this distributor owns `bucket` in the current state.
    pub fn owns(&mut self, bucket: BucketId) -> bool {
        self.cache.is_owned_by(bucket, self.node_index, self.up_states)
    }

    /// Ideal storage nodes for `bucket` in the current state.
    #[must_use]
    pub fn ideal_storage_nodes(&self, bucket: BucketId) -> IdealNodeList {
        self.cache.ideal_storage_nodes(bucket, self.up_states)
    }

    /// Features `node` has advertised.
    #[must_use]
    pub fn node_supported_features(&self, node: u16) -> NodeSupportedFeatures {
        self.features.load().node_supported_features(node)
    }

    /// Records a replica reported by a storage node.
    pub fn update_replica(&mut self, bucket: BucketId, copy: BucketCopy) {
        self.db.merge_replica(bucket, copy);
    }

    /// Switches to a new cluster state and distribution.
    ///
    /// Replicas on storage nodes that are no longer available are dropped,
    /// as are buckets now owned by another distributor. The maintenance
    /// queue is rebuilt from scratch by the next scan. The returned scope
    /// names the nodes whose replies to in-flight operations must be
    /// disregarded.
    ///
    /// # Errors
    ///
    /// Returns an error if the new state's distribution bits are unusable.
    /// The stripe is left unchanged in that case.
    pub fn on_cluster_state_change(
        &mut self,
        state: Arc<ClusterState>,
        distribution: Arc<Distribution>,
    ) -> Result<CancelScope> {
        let previous = Arc::clone(self.cache.cluster_state());
        self.cache = DistributorStateCache::new(distribution, Arc::clone(&state))?;
        self.queue.clear();
        self.scanner.reset();

        if !state.is_cluster_up() {
            let dropped = self.db.len();
            self.db.clear();
            self.scheduler.clear();
            warn!(stripe = self.index, version = state.version(), dropped, "Cluster is down, dropped all buckets");
            return Ok(CancelScope::of_fully_cancelled());
        }

        // Nodes that may hold replicas or be targets of in-flight operations.
        let mut known: BTreeSet<u16> = self.db.iter().flat_map(|entry| entry.info.nodes()).collect();
        if previous.is_cluster_up() {
            known.extend(previous.available_nodes(NodeType::Storage, self.up_states));
        }
        let gone: Vec<u16> = known
            .into_iter()
            .filter(|&node| !state.is_available(NodeType::Storage, node, self.up_states))
            .collect();
        let dropped_replicas: usize = gone.iter().map(|&node| self.db.remove_node_from_all(node)).sum();

        let Self { db, cache, node_index, up_states, .. } = self;
        let mut moved = 0usize;
        db.for_each_mut(None, |entry| match cache.get_owner(entry.bucket_id(), *up_states) {
            Some(owner) if owner != *node_index => {
                moved += 1;
                Visit::Remove
            }
            _ => Visit::Continue,
        });

        info!(
            stripe = self.index,
            version = state.version(),
            unavailable_nodes = gone.len(),
            dropped_replicas,
            moved_buckets = moved,
            "Applied cluster state"
        );
        Ok(CancelScope::of_node_subset(gone))
    }

    /// Examines the next batch of buckets and queues the ones needing
    /// maintenance.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::IndexCorruption`] if the database is found
    /// to be inconsistent. The scan resumes at the same bucket next time.
    pub fn scan_step(&mut self) -> std::result::Result<ScanProgress, DatabaseError> {
        let Self { db, cache, checker, queue, scanner, up_states, scan_batch_size, .. } = self;
        scanner.scan(db, queue, *scan_batch_size, |db, entry| {
            let bucket = entry.bucket_id();
            let ideal = cache.ideal_storage_nodes(bucket, *up_states);
            let child_subtrees = db.child_subtree_count(bucket)?;
            let sibling = bucket.sibling().and_then(|sibling| db.get(sibling));
            Ok(checker.check(&CheckContext {
                entry,
                ideal: &ideal,
                distribution: cache.distribution(),
                distribution_bits: cache.distribution_bits(),
                child_subtrees,
                sibling,
            }))
        })
    }

    /// The most urgent maintenance decision whose bucket has no operation
    /// in flight. The bucket stays pending until
    /// [`complete_operation`](Self::complete_operation) is called.
    ///
    /// Decisions for buckets no longer in the database are discarded.
    pub fn next_operation(&mut self) -> Option<MaintenanceDecision> {
        loop {
            let decision = self.scheduler.next(&mut self.queue)?;
            if self.db.contains(decision.bucket_id) {
                return Some(decision);
            }
            self.scheduler.release(decision.bucket_id);
            debug!(stripe = self.index, bucket = %decision.bucket_id, "Discarded decision for removed bucket");
        }
    }

    /// Marks the operation on `bucket` as done.
    pub fn complete_operation(&mut self, bucket: BucketId) -> bool {
        self.scheduler.release(bucket)
    }

    /// Number of operations in flight.
    #[must_use]
    pub fn pending_operations(&self) -> usize {
        self.scheduler.pending_count()
    }
}

/// All stripes of one distributor, each behind its own lock.
#[derive(Debug)]
pub struct StripePool {
    layout: StripeLayout,
    stripes: Vec<Mutex<DistributorStripe>>,
    features: Arc<SharedFeaturesRepo>,
}

impl StripePool {
    /// Creates the stripes for distributor `node_index` as configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the cluster state's distribution bits are
    /// unusable.
    pub fn new(
        node_index: u16,
        config: &Config,
        distribution: Arc<Distribution>,
        state: Arc<ClusterState>,
    ) -> Result<Self> {
        let layout = config.stripes.layout();
        let features = Arc::new(SharedFeaturesRepo::default());
        let stripes = (0..layout.num_stripes() as usize)
            .map(|index| {
                DistributorStripe::new(
                    index,
                    node_index,
                    &config.maintenance,
                    Arc::clone(&distribution),
                    Arc::clone(&state),
                    Arc::clone(&features),
                )
                .map(Mutex::new)
            })
            .collect::<Result<Vec<_>>>()?;
        info!(node_index, stripes = stripes.len(), "Created distributor stripes");
        Ok(Self { layout, stripes, features })
    }

    /// The stripe layout in use.
    #[must_use]
    pub fn layout(&self) -> StripeLayout {
        self.layout
    }

    /// Number of stripes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Returns true if the pool has no stripes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Index of the stripe owning `bucket`.
    #[must_use]
    pub fn stripe_index_of(&self, bucket: BucketId) -> usize {
        self.layout.stripe_of(bucket)
    }

    /// Runs `f` with the stripe owning `bucket` locked.
    pub fn with_stripe<R>(&self, bucket: BucketId, f: impl FnOnce(&mut DistributorStripe) -> R) -> R {
        let mut stripe = self.stripes[self.stripe_index_of(bucket)].lock();
        f(&mut stripe)
    }

    /// Runs `f` with stripe `index` locked, or returns `None` if there is
    /// no such stripe.
    pub fn with_stripe_at<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut DistributorStripe) -> R,
    ) -> Option<R> {
        let mut stripe = self.stripes.get(index)?.lock();
        Some(f(&mut stripe))
    }

    /// Records a replica in the owning stripe.
    pub fn update_replica(&self, bucket: BucketId, copy: BucketCopy) {
        self.with_stripe(bucket, |stripe| stripe.update_replica(bucket, copy));
    }

    /// Applies a new cluster state to every stripe, returning the union of
    /// their cancellation scopes.
    ///
    /// # Errors
    ///
    /// Returns an error if the new state's distribution bits are unusable;
    /// no stripe is changed in that case.
    pub fn on_cluster_state_change(
        &self,
        state: Arc<ClusterState>,
        distribution: Arc<Distribution>,
    ) -> Result<CancelScope> {
        DistributorStateCache::new(Arc::clone(&distribution), Arc::clone(&state))?;
        let mut scope = CancelScope::none();
        for stripe in &self.stripes {
            let stripe_scope = stripe
                .lock()
                .on_cluster_state_change(Arc::clone(&state), Arc::clone(&distribution))?;
            scope = scope.merged(&stripe_scope);
        }
        debug!(version = state.version(), cancelled = scope.is_cancelled(), "Cluster state applied to all stripes");
        Ok(scope)
    }

    /// Runs one scan step on every stripe and sums the progress.
    ///
    /// # Errors
    ///
    /// Returns the first corruption error; stripes after it are not
    /// scanned this round.
    pub fn scan_all(&self) -> std::result::Result<ScanProgress, DatabaseError> {
        let mut total = ScanProgress { pass_completed: true, ..ScanProgress::default() };
        for stripe in &self.stripes {
            let progress = stripe.lock().scan_step()?;
            total.examined += progress.examined;
            total.queued += progress.queued;
            total.pass_completed &= progress.pass_completed;
        }
        Ok(total)
    }

    /// Publishes features advertised by storage nodes to all stripes.
    pub fn publish_node_features(&self, updates: &HashMap<u16, NodeSupportedFeatures>) {
        self.features.publish_union_of(updates);
    }

    /// The shared features handle.
    #[must_use]
    pub fn features(&self) -> &Arc<SharedFeaturesRepo> {
        &self.features
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::{MaintenanceOperationType, MaintenancePriority};
    use crate::replica::ReplicaInfo;

    const STATE: &str = "version:1 bits:8 distributor:1 storage:4";

    fn stripe() -> DistributorStripe {
        let distribution = Arc::new(Distribution::flat(2, 4).unwrap());
        let state: Arc<ClusterState> = Arc::new(STATE.parse().unwrap());
        DistributorStripe::new(
            0,
            0,
            &MaintenanceConfig::default(),
            distribution,
            state,
            Arc::new(SharedFeaturesRepo::default()),
        )
        .unwrap()
    }

    fn copy(node: u16) -> BucketCopy {
        BucketCopy::new(node, 1, ReplicaInfo::new(0x1234, 10, 1000))
    }

    #[test]
    fn test_scan_finds_missing_replicas() {
        let mut stripe = stripe();
        let bucket = BucketId::new(16, 0xabcd);
        let primary = stripe.ideal_storage_nodes(bucket).primary().unwrap();
        stripe.update_replica(bucket, copy(primary));

        let progress = stripe.scan_step().unwrap();
        assert_eq!(progress.examined, 1);
        assert!(progress.pass_completed);

        let decision = stripe.next_operation().unwrap();
        assert_eq!(decision.bucket_id, bucket);
        assert_eq!(decision.operation, Some(MaintenanceOperationType::MergeBucket));
        assert!(decision.priority >= MaintenancePriority::VeryHigh);
        assert_eq!(stripe.pending_operations(), 1);
        assert!(stripe.complete_operation(bucket));
    }

    #[test]
    fn test_state_change_drops_unavailable_nodes() {
        let mut stripe = stripe();
        let bucket = BucketId::new(16, 0x77);
        stripe.update_replica(bucket, copy(1));
        stripe.update_replica(bucket, copy(2));
        stripe.update_replica(BucketId::new(16, 0x78), copy(2));

        let distribution = Arc::new(Distribution::flat(2, 4).unwrap());
        let state: Arc<ClusterState> = Arc::new("version:2 bits:8 distributor:1 storage:4 .2.s:d".parse().unwrap());
        let scope = stripe.on_cluster_state_change(state, distribution).unwrap();

        assert!(scope.node_is_cancelled(2));
        assert!(!scope.node_is_cancelled(1));
        assert_eq!(stripe.database().len(), 1);
        assert_eq!(stripe.database().get(bucket).unwrap().info.replica_count(), 1);
        assert_eq!(stripe.cluster_state().version(), 2);
    }

    #[test]
    fn test_state_change_drops_moved_buckets() {
        let mut stripe = stripe();
        for location in 0..64 {
            stripe.update_replica(BucketId::new(16, location), copy(0));
        }
        let distribution = Arc::new(Distribution::flat(2, 4).unwrap());
        let state: Arc<ClusterState> = Arc::new("version:2 bits:8 distributor:2 storage:4".parse().unwrap());
        stripe.on_cluster_state_change(state, distribution).unwrap();

        let kept = stripe.database().len();
        assert!(kept < 64);
        let kept_buckets: Vec<BucketId> = stripe.database().iter().map(|e| e.bucket_id()).collect();
        for bucket in kept_buckets {
            assert!(stripe.owns(bucket));
        }
    }

    #[test]
    fn test_state_change_cancels_merge_target_without_replica() {
        let mut stripe = stripe();
        let bucket = BucketId::new(16, 0x3c3c);
        let ideal = stripe.ideal_storage_nodes(bucket);
        let (primary, target) = (ideal.as_slice()[0], ideal.as_slice()[1]);
        stripe.update_replica(bucket, copy(primary));
        stripe.scan_step().unwrap();
        let decision = stripe.next_operation().unwrap();
        assert_eq!(decision.missing_nodes, vec![target]);

        let distribution = Arc::new(Distribution::flat(2, 4).unwrap());
        let text = format!("version:2 bits:8 distributor:1 storage:4 .{target}.s:d");
        let state: Arc<ClusterState> = Arc::new(text.parse().unwrap());
        let scope = stripe.on_cluster_state_change(state, distribution).unwrap();

        assert!(scope.node_is_cancelled(target));
        assert!(!scope.node_is_cancelled(primary));
        assert_eq!(scope.cancelled_nodes().len(), 1);
    }

    #[test]
    fn test_removed_bucket_is_not_dispatched() {
        let mut stripe = stripe();
        let removed = BucketId::new(16, 0x10);
        let direct = BucketId::new(16, 0x11);
        let kept = BucketId::new(16, 0x12);
        for bucket in [removed, direct, kept] {
            stripe.update_replica(bucket, copy(0));
        }
        stripe.scan_step().unwrap();
        assert_eq!(stripe.queue().len(), 3);

        assert!(stripe.remove_bucket(removed).is_some());
        assert!(stripe.queue().get(removed).is_none());
        stripe.database_mut().remove(direct);

        let decision = stripe.next_operation().unwrap();
        assert_eq!(decision.bucket_id, kept);
        assert!(stripe.next_operation().is_none());
        assert_eq!(stripe.pending_operations(), 1);
        assert!(stripe.queue().is_empty());
    }

    #[test]
    fn test_cluster_down_cancels_everything() {
        let mut stripe = stripe();
        stripe.update_replica(BucketId::new(16, 1), copy(0));
        let distribution = Arc::new(Distribution::flat(2, 4).unwrap());
        let state: Arc<ClusterState> = Arc::new("version:3 cluster:d distributor:1 storage:4".parse().unwrap());
        let scope = stripe.on_cluster_state_change(state, distribution).unwrap();
        assert!(scope.fully_cancelled());
        assert!(stripe.database().is_empty());
    }

    #[test]
    fn test_node_features_visible_to_stripe() {
        let stripe = stripe();
        let updates = HashMap::from([(1, NodeSupportedFeatures::TWO_PHASE_REMOVE_LOCATION)]);
        stripe.features.publish_union_of(&updates);
        assert_eq!(stripe.node_supported_features(1), NodeSupportedFeatures::TWO_PHASE_REMOVE_LOCATION);
        assert!(stripe.node_supported_features(0).is_empty());
    }

    #[test]
    fn test_pool_routes_by_stripe() {
        let config = Config::parse("[stripes]\ncount = 4\n").unwrap();
        let distribution = Arc::new(Distribution::flat(2, 4).unwrap());
        let state: Arc<ClusterState> = Arc::new(STATE.parse().unwrap());
        let pool = StripePool::new(0, &config, distribution, state).unwrap();
        assert_eq!(pool.len(), 4);

        for location in 0..32 {
            let bucket = BucketId::new(16, location);
            pool.update_replica(bucket, copy(0));
            let index = pool.stripe_index_of(bucket);
            assert!(pool.with_stripe_at(index, |s| s.database().contains(bucket)).unwrap());
        }
        let total: usize = (0..4).filter_map(|i| pool.with_stripe_at(i, |s| s.database().len())).sum();
        assert_eq!(total, 32);
        assert!(pool.with_stripe_at(4, |_| ()).is_none());

        let progress = pool.scan_all().unwrap();
        assert_eq!(progress.examined, 32);
        assert!(progress.pass_completed);
    }
}
