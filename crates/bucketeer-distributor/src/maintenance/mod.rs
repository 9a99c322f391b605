// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Maintenance of bucket replicas.
//!
//! Brings indexed replicas in line with the ideal state:
//!
//! ```text
//!   BucketDatabase ──▶ MaintenanceScanner ──▶ BucketStateChecker
//!                                                    │ MaintenanceDecision
//!                                                    ▼
//!   dispatcher ◀── MaintenanceScheduler ◀── BucketPriorityDatabase
//! ```
//!
//! The scanner walks a stripe's database a few buckets at a time, the
//! checker classifies each bucket, and the priority database keeps the
//! resulting decisions ordered by urgency. The scheduler hands them to the
//! operation dispatcher one bucket at a time.

mod checker;
mod priority;
mod queue;
mod scanner;
mod scheduler;

pub use checker::{BucketStateChecker, CheckContext};
pub use priority::{MaintenanceDecision, MaintenanceOperationType, MaintenancePriority};
pub use queue::BucketPriorityDatabase;
pub use scanner::{MaintenanceScanner, ScanProgress};
pub use scheduler::MaintenanceScheduler;
