// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Distributor-side bucket bookkeeping and maintenance for Bucketeer.
//!
//! This crate provides:
//! - The bucket database, an ordered index from bucket to replica set with
//!   ancestor and descendant queries
//! - Replica records and cancellation-aware pruning of replica lists
//! - Bucket state checking, a priority queue of maintenance decisions, and a
//!   resumable scanner and scheduler feeding it
//! - Per-node capability negotiation
//! - Stripes, which partition the bucket space into independently locked
//!   shards of all of the above
//!
//! # Architecture
//!
//! ```text
//!                      ClusterState + Distribution (Arc snapshots)
//!                                      │
//!            ┌─────────────────────────┼─────────────────────────┐
//!            ▼                         ▼                         ▼
//!   ┌──────────────────┐     ┌──────────────────┐     ┌──────────────────┐
//!   │ DistributorStripe│     │ DistributorStripe│ ... │ DistributorStripe│
//!   │  BucketDatabase  │     │  BucketDatabase  │     │  BucketDatabase  │
//!   │  StateCache      │     │  StateCache      │     │  StateCache      │
//!   │  Scanner/Queue   │     │  Scanner/Queue   │     │  Scanner/Queue   │
//!   └──────────────────┘     └──────────────────┘     └──────────────────┘
//!            ▲                         ▲                         ▲
//!            └──────────── StripePool routes by bucket key ──────┘
//! ```
//!
//! Storage nodes report replicas through [`StripePool::update_replica`].
//! Scans classify buckets with [`BucketStateChecker`] and queue
//! [`MaintenanceDecision`]s, which the operation dispatcher takes through
//! [`DistributorStripe::next_operation`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod database;
pub mod features;
pub mod maintenance;
pub mod replica;
pub mod stripe;

pub use cancel::{prune_cancelled_nodes, CancelScope};
pub use database::{BucketDatabase, DatabaseError, Entry, Visit};
pub use features::{NodeSupportedFeatures, NodeSupportedFeaturesRepo, SharedFeaturesRepo};
pub use maintenance::{
    BucketPriorityDatabase, BucketStateChecker, CheckContext, MaintenanceDecision,
    MaintenanceOperationType, MaintenancePriority, MaintenanceScanner, MaintenanceScheduler,
    ScanProgress,
};
pub use replica::{BucketCopy, BucketInfo, ReplicaInfo};
pub use stripe::{DistributorStripe, StripePool};
