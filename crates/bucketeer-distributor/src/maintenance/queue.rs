// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Buckets awaiting maintenance, most urgent first.
//!
//! Ties within a priority level are broken by bucket key order rather than
//! arrival time, so a scan that keeps re-queueing the same buckets cannot
//! starve the ones further along the key space.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use bucketeer_core::BucketId;

use super::priority::{MaintenanceDecision, MaintenancePriority};

type QueueKey = (Reverse<MaintenancePriority>, u64);

/// Priority-ordered set of pending maintenance decisions, at most one per
/// bucket.
#[derive(Debug, Default)]
pub struct BucketPriorityDatabase {
    ordered: BTreeMap<QueueKey, MaintenanceDecision>,
    priorities: HashMap<u64, MaintenancePriority>,
}

impl BucketPriorityDatabase {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `decision` for its bucket, replacing any earlier one. A
    /// decision that needs no maintenance just removes the bucket.
    pub fn set_priority(&mut self, decision: MaintenanceDecision) {
        let key = decision.bucket_id.to_key();
        if let Some(old) = self.priorities.remove(&key) {
            self.ordered.remove(&(Reverse(old), key));
        }
        if decision.requires_maintenance() {
            self.priorities.insert(key, decision.priority);
            self.ordered.insert((Reverse(decision.priority), key), decision);
        }
    }

    /// Removes the bucket's decision, if queued.
    pub fn remove(&mut self, bucket: BucketId) -> Option<MaintenanceDecision> {
        let key = bucket.to_key();
        let priority = self.priorities.remove(&key)?;
        self.ordered.remove(&(Reverse(priority), key))
    }

    /// The queued decision for `bucket`.
    #[must_use]
    pub fn get(&self, bucket: BucketId) -> Option<&MaintenanceDecision> {
        let key = bucket.to_key();
        let priority = self.priorities.get(&key)?;
        self.ordered.get(&(Reverse(*priority), key))
    }

    /// Decisions from most to least urgent.
    pub fn iter(&self) -> impl Iterator<Item = &MaintenanceDecision> + '_ {
        self.ordered.values()
    }

    /// Removes and returns the most urgent decision.
    pub fn pop_highest(&mut self) -> Option<MaintenanceDecision> {
        let ((_, key), decision) = self.ordered.pop_first()?;
        self.priorities.remove(&key);
        Some(decision)
    }

    /// Number of queued buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Number of queued buckets at each level.
    #[must_use]
    pub fn count_at(&self, priority: MaintenancePriority) -> usize {
        self.priorities.values().filter(|&&p| p == priority).count()
    }

    /// Drops every queued decision.
    pub fn clear(&mut self) {
        self.ordered.clear();
        self.priorities.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::maintenance::priority::MaintenanceOperationType;

    fn decision(bucket: BucketId, priority: MaintenancePriority) -> MaintenanceDecision {
        MaintenanceDecision::new(bucket, priority, MaintenanceOperationType::MergeBucket)
    }

    #[test]
    fn test_priority_then_key_order() {
        let mut queue = BucketPriorityDatabase::new();
        let a = BucketId::new(2, 0b00);
        let b = BucketId::new(2, 0b10);
        let c = BucketId::new(2, 0b01);
        queue.set_priority(decision(c, MaintenancePriority::Low));
        queue.set_priority(decision(b, MaintenancePriority::High));
        queue.set_priority(decision(a, MaintenancePriority::Low));

        let order: Vec<BucketId> = queue.iter().map(|d| d.bucket_id).collect();
        assert_eq!(order, vec![b, a, c]);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.count_at(MaintenancePriority::Low), 2);
    }

    #[test]
    fn test_replace_and_clear_priority() {
        let mut queue = BucketPriorityDatabase::new();
        let bucket = BucketId::new(16, 7);
        queue.set_priority(decision(bucket, MaintenancePriority::Low));
        queue.set_priority(decision(bucket, MaintenancePriority::Highest));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(bucket).unwrap().priority, MaintenancePriority::Highest);

        queue.set_priority(MaintenanceDecision::no_maintenance(bucket));
        assert!(queue.is_empty());
        assert!(queue.get(bucket).is_none());
    }

    #[test]
    fn test_pop_and_remove() {
        let mut queue = BucketPriorityDatabase::new();
        let low = BucketId::new(16, 1);
        let high = BucketId::new(16, 2);
        queue.set_priority(decision(low, MaintenancePriority::VeryLow));
        queue.set_priority(decision(high, MaintenancePriority::VeryHigh));

        assert_eq!(queue.pop_highest().unwrap().bucket_id, high);
        assert!(queue.remove(high).is_none());
        assert_eq!(queue.remove(low).unwrap().bucket_id, low);
        assert!(queue.pop_highest().is_none());
    }
}
