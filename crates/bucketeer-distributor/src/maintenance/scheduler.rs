// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Hands out maintenance work in priority order.

use std::collections::HashSet;

use bucketeer_core::BucketId;
use metrics::{counter, gauge};
use tracing::debug;

use super::priority::MaintenanceDecision;
use super::queue::BucketPriorityDatabase;

/// Picks the next bucket to work on, never running two operations on the
/// same bucket at once.
///
/// A bucket stays pending from the moment its decision is handed out until
/// the caller releases it.
#[derive(Debug)]
pub struct MaintenanceScheduler {
    stripe: usize,
    pending: HashSet<u64>,
    max_pending: usize,
}

impl MaintenanceScheduler {
    /// Creates a scheduler allowing `max_pending` operations in flight.
    #[must_use]
    pub fn new(stripe: usize, max_pending: usize) -> Self {
        Self { stripe, pending: HashSet::new(), max_pending }
    }

    /// Takes the most urgent decision whose bucket is not already pending.
    ///
    /// Returns `None` when the queue has nothing eligible or the in-flight
    /// limit is reached.
    pub fn next(&mut self, queue: &mut BucketPriorityDatabase) -> Option<MaintenanceDecision> {
        if self.pending.len() >= self.max_pending {
            return None;
        }
        let bucket = queue
            .iter()
            .map(|decision| decision.bucket_id)
            .find(|bucket| !self.pending.contains(&bucket.to_key()))?;
        let decision = queue.remove(bucket)?;
        self.pending.insert(bucket.to_key());

        let operation = decision.operation.map_or("none", |op| op.as_str());
        counter!(
            "bucketeer_maintenance_operations_started",
            "operation" => operation,
            "priority" => decision.priority.as_str()
        )
        .increment(1);
        gauge!("bucketeer_maintenance_pending_operations", "stripe" => self.stripe.to_string())
            .set(self.pending.len() as f64);
        debug!(
            stripe = self.stripe,
            bucket = %bucket,
            operation,
            priority = %decision.priority,
            "Scheduled maintenance operation"
        );
        Some(decision)
    }

    /// Marks the operation on `bucket` as finished. Returns true if the
    /// bucket was pending.
    pub fn release(&mut self, bucket: BucketId) -> bool {
        let released = self.pending.remove(&bucket.to_key());
        if released {
            gauge!("bucketeer_maintenance_pending_operations", "stripe" => self.stripe.to_string())
                .set(self.pending.len() as f64);
        }
        released
    }

    /// Returns true if an operation on `bucket` is in flight.
    #[must_use]
    pub fn is_pending(&self, bucket: BucketId) -> bool {
        self.pending.contains(&bucket.to_key())
    }

    /// Number of operations in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forgets all in-flight operations.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
