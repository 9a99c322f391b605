// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Ideal-state placement for the Bucketeer distributor.
//!
//! Given a [`ClusterState`] snapshot and a [`Distribution`], this crate
//! computes which storage nodes should hold each bucket and which distributor
//! owns it. The computation is deterministic: every node that sees the same
//! inputs arrives at the same answer, without coordination.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   ┌──────────────────┐
//! │   ClusterState   │   │   Distribution   │
//! │ (wire text form) │   │  (TOML, groups)  │
//! └────────┬─────────┘   └────────┬─────────┘
//!          └──────────┬───────────┘
//!                     ▼
//!            ┌─────────────────┐
//!            │   ideal_nodes   │  weighted highest-random-weight
//!            └────────┬────────┘
//!                     ▼
//!        ┌─────────────────────────┐
//!        │  DistributorStateCache  │  last owner lookup, per stripe
//!        └─────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use bucketeer_core::BucketId;
//! use bucketeer_placement::{ideal_nodes, ClusterState, Distribution, NodeType, UpStates};
//!
//! let state: ClusterState = "version:3 distributor:2 storage:4 .1.s:d".parse().unwrap();
//! let distribution = Distribution::flat(2, 4).unwrap();
//!
//! let bucket = BucketId::new(16, 0x1234);
//! let nodes = ideal_nodes(NodeType::Storage, &state, &distribution, bucket, UpStates::UP_INIT);
//! assert_eq!(nodes.len(), 2);
//! assert!(!nodes.contains(1));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod distribution;
pub mod hash;
pub mod ideal;
pub mod state;

pub use cache::DistributorStateCache;
pub use distribution::{Distribution, DistributionConfig, DistributionError, Group, GroupConfig};
pub use ideal::{ideal_distributor_node, ideal_nodes, IdealNodeList};
pub use state::{
    ClusterState, ClusterStateError, NodeState, NodeType, State, UpStates,
    DEFAULT_DISTRIBUTION_BITS,
};
