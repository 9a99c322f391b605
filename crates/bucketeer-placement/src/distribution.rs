// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Distribution configuration and the group hierarchy.
//!
//! A [`Distribution`] describes how many copies each bucket should have and
//! how the storage nodes are organized into groups:
//!
//! ```text
//!                    root  (partitions "1|*")
//!           ┌─────────┴─────────┐
//!       group 0              group 1          (leaf groups)
//!     nodes 0,1,2          nodes 3,4,5
//! ```
//!
//! With redundancy 3 and partitions `"1|*"`, the highest-ranked subgroup
//! receives two copies and the next one receives one copy (the wildcard takes
//! the remainder, and larger shares go to higher-ranked groups).
//!
//! The configuration is deserialized from TOML by the config layer and
//! validated once, when the [`Distribution`] is built.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when building a distribution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DistributionError {
    /// Redundancy must be at least 1.
    #[error("redundancy must be at least 1")]
    InvalidRedundancy,

    /// A secondary copy count exceeds the redundancy.
    #[error("{field} ({value}) cannot exceed redundancy ({redundancy})")]
    ExceedsRedundancy {
        /// The offending field.
        field: &'static str,
        /// Its value.
        value: u16,
        /// The configured redundancy.
        redundancy: u16,
    },

    /// A storage node appears in more than one leaf group.
    #[error("node {0} is listed in more than one group")]
    DuplicateNode(u16),

    /// Two sibling groups share an index.
    #[error("group index {0} is used by more than one sibling group")]
    DuplicateGroupIndex(u16),

    /// A group mixes nodes and subgroups, or has neither.
    #[error("group '{0}' must contain either nodes or subgroups")]
    InvalidGroupShape(String),

    /// A group with subgroups lacks a partitions spec, or a leaf has one.
    #[error("group '{0}': partitions are required exactly when the group has subgroups")]
    PartitionsMismatch(String),

    /// A partitions spec failed to parse.
    #[error("group '{group}': invalid partitions '{spec}'")]
    InvalidPartitions {
        /// Group name.
        group: String,
        /// The rejected spec.
        spec: String,
    },

    /// A partitions spec has more entries than there are subgroups.
    #[error("group '{group}': {entries} partitions but only {subgroups} subgroups")]
    TooManyPartitions {
        /// Group name.
        group: String,
        /// Number of partition entries.
        entries: usize,
        /// Number of subgroups.
        subgroups: usize,
    },

    /// A group capacity is not a positive finite number.
    #[error("group '{0}' must have a positive capacity")]
    InvalidCapacity(String),

    /// TOML deserialization failed.
    #[error("invalid distribution config: {0}")]
    Parse(String),
}

/// Serializable group description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Index among sibling groups; part of the hash input.
    pub index: u16,
    /// Human-readable name.
    pub name: String,
    /// Relative capacity used when ranking sibling groups.
    pub capacity: f64,
    /// How copies are divided among subgroups, e.g. `"1|*"`.
    pub partitions: Option<String>,
    /// Storage node indices (leaf groups only).
    pub nodes: Vec<u16>,
    /// Subgroups (inner groups only).
    pub groups: Vec<GroupConfig>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            index: 0,
            name: "invalid".to_string(),
            capacity: 1.0,
            partitions: None,
            nodes: Vec::new(),
            groups: Vec::new(),
        }
    }
}

impl GroupConfig {
    /// A leaf group holding `nodes`.
    #[must_use]
    pub fn leaf(index: u16, name: impl Into<String>, nodes: Vec<u16>) -> Self {
        Self { index, name: name.into(), nodes, ..Self::default() }
    }

    /// An inner group dividing copies among `groups` per `partitions`.
    #[must_use]
    pub fn inner(
        index: u16,
        name: impl Into<String>,
        partitions: impl Into<String>,
        groups: Vec<GroupConfig>,
    ) -> Self {
        Self {
            index,
            name: name.into(),
            partitions: Some(partitions.into()),
            groups,
            ..Self::default()
        }
    }

    /// Sets the capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }
}

/// Serializable distribution description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// Total number of copies per bucket.
    pub redundancy: u16,
    /// Copies that must be written before a new bucket is acknowledged.
    /// `0` means the same as `redundancy`.
    pub initial_redundancy: u16,
    /// Copies that should be ready (indexed) for serving.
    pub ready_copies: u16,
    /// Keep one active copy per leaf group rather than one per cluster.
    pub active_per_leaf_group: bool,
    /// Root of the group hierarchy.
    pub group: GroupConfig,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            redundancy: 2,
            initial_redundancy: 0,
            ready_copies: 1,
            active_per_leaf_group: false,
            group: GroupConfig::default(),
        }
    }
}

impl DistributionConfig {
    /// Parses a TOML document.
    pub fn parse(content: &str) -> Result<Self, DistributionError> {
        toml::from_str(content).map_err(|e| DistributionError::Parse(e.to_string()))
    }
}

/// One entry of a partitions spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Partition {
    Fixed(u16),
    Rest,
}

fn parse_partitions(spec: &str) -> Option<Vec<Partition>> {
    spec.split('|')
        .map(|part| match part.trim() {
            "*" => Some(Partition::Rest),
            n => n.parse().ok().filter(|&n: &u16| n > 0).map(Partition::Fixed),
        })
        .collect()
}

/// A validated group in the hierarchy.
#[derive(Debug, Clone)]
pub struct Group {
    index: u16,
    name: String,
    capacity: f64,
    partitions: Vec<Partition>,
    nodes: Vec<u16>,
    subgroups: Vec<Group>,
}

impl Group {
    fn from_config(config: &GroupConfig, seen: &mut HashSet<u16>) -> Result<Self, DistributionError> {
        if !(config.capacity > 0.0 && config.capacity.is_finite()) {
            return Err(DistributionError::InvalidCapacity(config.name.clone()));
        }
        let is_leaf = config.groups.is_empty();
        if is_leaf == config.nodes.is_empty() {
            return Err(DistributionError::InvalidGroupShape(config.name.clone()));
        }
        if is_leaf == config.partitions.is_some() {
            return Err(DistributionError::PartitionsMismatch(config.name.clone()));
        }

        let partitions = match &config.partitions {
            Some(spec) => {
                let parsed = parse_partitions(spec).ok_or_else(|| {
                    DistributionError::InvalidPartitions {
                        group: config.name.clone(),
                        spec: spec.clone(),
                    }
                })?;
                if parsed.len() > config.groups.len() {
                    return Err(DistributionError::TooManyPartitions {
                        group: config.name.clone(),
                        entries: parsed.len(),
                        subgroups: config.groups.len(),
                    });
                }
                parsed
            }
            None => Vec::new(),
        };

        for &node in &config.nodes {
            if !seen.insert(node) {
                return Err(DistributionError::DuplicateNode(node));
            }
        }

        let mut sibling_indices = HashSet::new();
        let mut subgroups = Vec::with_capacity(config.groups.len());
        for sub in &config.groups {
            if !sibling_indices.insert(sub.index) {
                return Err(DistributionError::DuplicateGroupIndex(sub.index));
            }
            subgroups.push(Self::from_config(sub, seen)?);
        }

        let mut nodes = config.nodes.clone();
        nodes.sort_unstable();

        Ok(Self {
            index: config.index,
            name: config.name.clone(),
            capacity: config.capacity,
            partitions,
            nodes,
            subgroups,
        })
    }

    /// Index among sibling groups.
    #[must_use]
    pub fn index(&self) -> u16 {
        self.index
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Relative capacity.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Returns true if the group holds nodes directly.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.subgroups.is_empty()
    }

    /// Storage nodes of a leaf group, sorted.
    #[must_use]
    pub fn nodes(&self) -> &[u16] {
        &self.nodes
    }

    /// Subgroups of an inner group.
    #[must_use]
    pub fn subgroups(&self) -> &[Group] {
        &self.subgroups
    }

    /// Splits `redundancy` copies among the ranked subgroups.
    ///
    /// Fixed entries are taken in order until the redundancy is used up; the
    /// remainder is spread evenly over wildcard entries, earlier wildcards
    /// taking the odd copies. The result is sorted descending so the largest
    /// share goes to the highest-ranked subgroup, and contains no zeros.
    #[must_use]
    pub fn redundancy_array(&self, redundancy: u16) -> Vec<u16> {
        let mut result = Vec::with_capacity(self.partitions.len());
        let mut remaining = redundancy;
        let mut wildcards = 0u16;
        for partition in &self.partitions {
            match *partition {
                Partition::Fixed(n) => {
                    let take = n.min(remaining);
                    remaining -= take;
                    result.push(take);
                }
                Partition::Rest => {
                    wildcards += 1;
                    result.push(0);
                }
            }
        }
        if wildcards > 0 {
            let share = remaining / wildcards;
            let mut extra = remaining % wildcards;
            for (slot, partition) in result.iter_mut().zip(&self.partitions) {
                if *partition == Partition::Rest {
                    *slot = share + u16::from(extra > 0);
                    extra = extra.saturating_sub(1);
                }
            }
        }
        result.retain(|&n| n > 0);
        result.sort_unstable_by(|a, b| b.cmp(a));
        result
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a Group>) {
        if self.is_leaf() {
            out.push(self);
        } else {
            for sub in &self.subgroups {
                sub.collect_leaves(out);
            }
        }
    }
}

/// Validated distribution configuration. Immutable once built.
#[derive(Debug, Clone)]
pub struct Distribution {
    redundancy: u16,
    initial_redundancy: u16,
    ready_copies: u16,
    active_per_leaf_group: bool,
    root: Group,
}

impl Distribution {
    /// Builds and validates a distribution from its configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`DistributionError`] describing the first problem found.
    pub fn new(config: &DistributionConfig) -> Result<Self, DistributionError> {
        if config.redundancy == 0 {
            return Err(DistributionError::InvalidRedundancy);
        }
        for (field, value) in [
            ("initial_redundancy", config.initial_redundancy),
            ("ready_copies", config.ready_copies),
        ] {
            if value > config.redundancy {
                return Err(DistributionError::ExceedsRedundancy {
                    field,
                    value,
                    redundancy: config.redundancy,
                });
            }
        }
        let root = Group::from_config(&config.group, &mut HashSet::new())?;
        Ok(Self {
            redundancy: config.redundancy,
            initial_redundancy: if config.initial_redundancy == 0 {
                config.redundancy
            } else {
                config.initial_redundancy
            },
            ready_copies: config.ready_copies,
            active_per_leaf_group: config.active_per_leaf_group,
            root,
        })
    }

    /// A single flat group of `node_count` storage nodes.
    ///
    /// # Errors
    ///
    /// Fails if `redundancy` is zero or `node_count` is zero.
    pub fn flat(redundancy: u16, node_count: u16) -> Result<Self, DistributionError> {
        Self::new(&DistributionConfig {
            redundancy,
            ready_copies: redundancy.min(1),
            group: GroupConfig::leaf(0, "flat", (0..node_count).collect()),
            ..DistributionConfig::default()
        })
    }

    /// Total number of copies per bucket.
    #[must_use]
    pub fn redundancy(&self) -> u16 {
        self.redundancy
    }

    /// Copies required before a new bucket is acknowledged.
    #[must_use]
    pub fn initial_redundancy(&self) -> u16 {
        self.initial_redundancy
    }

    /// Copies that should be ready for serving.
    #[must_use]
    pub fn ready_copies(&self) -> u16 {
        self.ready_copies
    }

    /// Whether each leaf group keeps its own active copy.
    #[must_use]
    pub fn active_per_leaf_group(&self) -> bool {
        self.active_per_leaf_group
    }

    /// Smallest number of copies that still forms a majority.
    #[must_use]
    pub fn quorum(&self) -> u16 {
        self.redundancy / 2 + 1
    }

    /// Root of the group hierarchy.
    #[must_use]
    pub fn root(&self) -> &Group {
        &self.root
    }

    /// All leaf groups in configuration order.
    #[must_use]
    pub fn leaf_groups(&self) -> Vec<&Group> {
        let mut out = Vec::new();
        self.root.collect_leaves(&mut out);
        out
    }

    /// The leaf group holding `node`, if it is configured.
    #[must_use]
    pub fn leaf_group_of(&self, node: u16) -> Option<&Group> {
        self.leaf_groups().into_iter().find(|g| g.nodes.binary_search(&node).is_ok())
    }
}
