// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Resumable sequential scan over a stripe's bucket database.
//!
//! The scanner remembers the last bucket it examined and continues from the
//! next key on each call, so a scan can be spread over many short steps
//! interleaved with other work. Buckets added or removed between steps are
//! picked up or skipped naturally. Reaching the end of the key space
//! completes a pass and wraps around.

use bucketeer_core::BucketId;
use metrics::{counter, gauge};
use tracing::{debug, trace};

use super::priority::MaintenanceDecision;
use super::queue::BucketPriorityDatabase;
use crate::database::{BucketDatabase, DatabaseError, Entry};

/// Outcome of one scan step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanProgress {
    /// Buckets examined.
    pub examined: usize,
    /// Examined buckets that needed maintenance.
    pub queued: usize,
    /// The step reached the end of the database.
    pub pass_completed: bool,
}

/// Scan position over one stripe's database.
#[derive(Debug, Default)]
pub struct MaintenanceScanner {
    stripe: usize,
    cursor: Option<BucketId>,
    passes_completed: u64,
}

impl MaintenanceScanner {
    /// Creates a scanner positioned before the first bucket.
    #[must_use]
    pub fn new(stripe: usize) -> Self {
        Self { stripe, ..Self::default() }
    }

    /// Restarts from the first bucket.
    pub fn reset(&mut self) {
        self.cursor = None;
    }

    /// The last bucket examined in the current pass.
    #[must_use]
    pub fn cursor(&self) -> Option<BucketId> {
        self.cursor
    }

    /// Number of full passes completed.
    #[must_use]
    pub fn passes_completed(&self) -> u64 {
        self.passes_completed
    }

    /// Examines up to `limit` buckets, feeding each decision into `queue`.
    ///
    /// `evaluate` receives the database along with each entry so it can look
    /// at related buckets.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error from `evaluate`. The failing
    /// bucket is not consumed; the next step retries it.
    pub fn scan<F>(
        &mut self,
        db: &BucketDatabase,
        queue: &mut BucketPriorityDatabase,
        limit: usize,
        mut evaluate: F,
    ) -> Result<ScanProgress, DatabaseError>
    where
        F: FnMut(&BucketDatabase, &Entry) -> Result<MaintenanceDecision, DatabaseError>,
    {
        let mut progress = ScanProgress::default();
        while progress.examined < limit {
            let next = match self.cursor {
                Some(cursor) => db.upper_bound(cursor),
                None => db.first(),
            };
            let Some(entry) = next else {
                self.complete_pass();
                progress.pass_completed = true;
                break;
            };

            let decision = evaluate(db, entry)?;
            self.cursor = Some(entry.bucket_id());
            progress.examined += 1;
            if decision.requires_maintenance() {
                trace!(bucket = %decision.bucket_id, priority = %decision.priority, "Bucket needs maintenance");
                counter!("bucketeer_maintenance_buckets_flagged", "priority" => decision.priority.as_str())
                    .increment(1);
                progress.queued += 1;
            }
            queue.set_priority(decision);
        }

        counter!("bucketeer_maintenance_buckets_scanned", "stripe" => self.stripe.to_string())
            .increment(progress.examined as u64);
        gauge!("bucketeer_maintenance_queue_size", "stripe" => self.stripe.to_string())
            .set(queue.len() as f64);
        Ok(progress)
    }

    fn complete_pass(&mut self) {
        self.cursor = None;
        self.passes_completed += 1;
        counter!("bucketeer_maintenance_scan_passes", "stripe" => self.stripe.to_string()).increment(1);
        debug!(stripe = self.stripe, passes = self.passes_completed, "Completed maintenance scan pass");
    }
}
