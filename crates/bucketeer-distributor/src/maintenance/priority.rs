// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Maintenance urgency levels and the decisions carrying them.

use std::fmt;

use bucketeer_core::BucketId;
use serde::{Deserialize, Serialize};

/// How urgently a bucket needs corrective work.
///
/// Variants are declared in ascending order, so the derived ordering is the
/// urgency order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MaintenancePriority {
    /// The bucket is in its ideal state.
    #[default]
    NoMaintenanceNeeded,
    /// Cosmetic work such as activation or joining small buckets.
    VeryLow,
    /// Reclaiming space held by surplus copies.
    Low,
    /// Moving copies to their ideal nodes, or splitting large buckets.
    Medium,
    /// Copies disagree, or a split was left incomplete.
    High,
    /// Fewer copies than configured, or a bucket too coarse to place.
    VeryHigh,
    /// Fewer copies than a majority; data is at risk.
    Highest,
}

impl MaintenancePriority {
    /// All levels, lowest first.
    pub const ALL: [Self; 7] = [
        Self::NoMaintenanceNeeded,
        Self::VeryLow,
        Self::Low,
        Self::Medium,
        Self::High,
        Self::VeryHigh,
        Self::Highest,
    ];

    /// Returns true for every level except [`Self::NoMaintenanceNeeded`].
    #[must_use]
    pub const fn requires_maintenance(self) -> bool {
        !matches!(self, Self::NoMaintenanceNeeded)
    }

    /// Stable lowercase name, used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoMaintenanceNeeded => "no_maintenance_needed",
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
            Self::Highest => "highest",
        }
    }
}

impl fmt::Display for MaintenancePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of corrective operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceOperationType {
    /// Bring copies in sync and onto their ideal nodes.
    MergeBucket,
    /// Split the bucket into its two children.
    SplitBucket,
    /// Join the bucket with its sibling into their parent.
    JoinBucket,
    /// Delete copies on nodes outside the ideal state.
    DeleteBucket,
    /// Change which copies are active.
    SetBucketState,
}

impl MaintenanceOperationType {
    /// Stable lowercase name, used as a metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MergeBucket => "merge",
            Self::SplitBucket => "split",
            Self::JoinBucket => "join",
            Self::DeleteBucket => "delete",
            Self::SetBucketState => "set_bucket_state",
        }
    }
}

impl fmt::Display for MaintenanceOperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of checking one bucket, consumed by the operation dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceDecision {
    /// The bucket checked.
    pub bucket_id: BucketId,
    /// How urgent the work is.
    pub priority: MaintenancePriority,
    /// What to do, if anything.
    pub operation: Option<MaintenanceOperationType>,
    /// Ideal nodes that should receive a copy (or be activated).
    pub missing_nodes: Vec<u16>,
    /// Nodes whose copy should go away (or be deactivated).
    pub excess_nodes: Vec<u16>,
}

impl MaintenanceDecision {
    /// A decision that nothing needs doing.
    #[must_use]
    pub fn no_maintenance(bucket_id: BucketId) -> Self {
        Self {
            bucket_id,
            priority: MaintenancePriority::NoMaintenanceNeeded,
            operation: None,
            missing_nodes: Vec::new(),
            excess_nodes: Vec::new(),
        }
    }

    /// A decision to run `operation` at `priority`.
    #[must_use]
    pub fn new(
        bucket_id: BucketId,
        priority: MaintenancePriority,
        operation: MaintenanceOperationType,
    ) -> Self {
        Self { priority, operation: Some(operation), ..Self::no_maintenance(bucket_id) }
    }

    /// Sets the nodes missing a copy.
    #[must_use]
    pub fn with_missing_nodes(mut self, nodes: Vec<u16>) -> Self {
        self.missing_nodes = nodes;
        self
    }

    /// Sets the nodes holding a surplus copy.
    #[must_use]
    pub fn with_excess_nodes(mut self, nodes: Vec<u16>) -> Self {
        self.excess_nodes = nodes;
        self
    }

    /// Returns true if the decision asks for work.
    #[must_use]
    pub fn requires_maintenance(&self) -> bool {
        self.priority.requires_maintenance()
    }
}
