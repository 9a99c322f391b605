// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Cluster state snapshots.
//!
//! A [`ClusterState`] enumerates the reported state of every distributor and
//! storage node plus the number of distribution bits in effect. Snapshots are
//! immutable; a state change produces a new snapshot that is shared behind an
//! `Arc`.
//!
//! # Wire format
//!
//! The compact text form lists non-default values only:
//!
//! ```text
//! version:12 bits:20 distributor:4 .2.s:d storage:6 .0.s:m .3.s:r .3.c:2.5
//! ```
//!
//! Nodes default to up with capacity 1.0. Nodes at or beyond the declared
//! count are down. `bits` defaults to 16 and `cluster:d` marks the whole
//! cluster as down.

use std::fmt;
use std::str::FromStr;

use bucketeer_core::MAX_USED_BITS;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Distribution bit count used when the wire form does not specify one.
pub const DEFAULT_DISTRIBUTION_BITS: u8 = 16;

/// Errors produced while building or parsing a cluster state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterStateError {
    /// A token was not of the form `key:value`.
    #[error("malformed token '{0}'")]
    MalformedToken(String),

    /// A top-level key is not recognized.
    #[error("unknown key '{0}'")]
    UnknownKey(String),

    /// A numeric value failed to parse.
    #[error("invalid value '{value}' for '{key}'")]
    InvalidValue {
        /// The key carrying the value.
        key: String,
        /// The value that failed to parse.
        value: String,
    },

    /// A state character is not one of `u d m r s i -`.
    #[error("unknown node state '{0}'")]
    UnknownState(char),

    /// A per-node token appeared before any `distributor:` or `storage:`.
    #[error("node attribute '{0}' given before a node type")]
    MissingNodeType(String),

    /// A per-node token referenced an index beyond the declared node count.
    #[error("{node_type} node {index} is out of range (count {count})")]
    NodeOutOfRange {
        /// The node type in effect.
        node_type: NodeType,
        /// The referenced index.
        index: u16,
        /// The declared count.
        count: u16,
    },

    /// The distribution bit count is out of range.
    #[error("distribution bits must be in [1, {max}], got {bits}", max = MAX_USED_BITS)]
    InvalidDistributionBits {
        /// The rejected bit count.
        bits: u8,
    },
}

/// Reported availability of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    /// State has not been reported.
    Unknown,
    /// Node is up and serving.
    #[default]
    Up,
    /// Node is down.
    Down,
    /// Node is temporarily down for maintenance; its data is expected back.
    Maintenance,
    /// Node is up but being phased out.
    Retired,
    /// Node is shutting down.
    Stopping,
    /// Node is starting up and still listing its buckets.
    Initializing,
}

impl State {
    /// All states, in wire order.
    pub const ALL: [Self; 7] = [
        Self::Up,
        Self::Down,
        Self::Maintenance,
        Self::Retired,
        Self::Stopping,
        Self::Initializing,
        Self::Unknown,
    ];

    /// The single-character wire representation.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Up => 'u',
            Self::Down => 'd',
            Self::Maintenance => 'm',
            Self::Retired => 'r',
            Self::Stopping => 's',
            Self::Initializing => 'i',
            Self::Unknown => '-',
        }
    }

    /// Parses the single-character wire representation.
    pub fn from_char(c: char) -> Result<Self, ClusterStateError> {
        Self::ALL.into_iter().find(|s| s.as_char() == c).ok_or(ClusterStateError::UnknownState(c))
    }

    const fn flag(self) -> UpStates {
        match self {
            Self::Up => UpStates::UP,
            Self::Down => UpStates::DOWN,
            Self::Maintenance => UpStates::MAINTENANCE,
            Self::Retired => UpStates::RETIRED,
            Self::Stopping => UpStates::STOPPING,
            Self::Initializing => UpStates::INITIALIZING,
            Self::Unknown => UpStates::UNKNOWN,
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

bitflags::bitflags! {
    /// The set of node states that count as available for a lookup.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UpStates: u8 {
        /// Up.
        const UP = 1 << 0;
        /// Down.
        const DOWN = 1 << 1;
        /// Maintenance.
        const MAINTENANCE = 1 << 2;
        /// Retired.
        const RETIRED = 1 << 3;
        /// Stopping.
        const STOPPING = 1 << 4;
        /// Initializing.
        const INITIALIZING = 1 << 5;
        /// Unknown.
        const UNKNOWN = 1 << 6;
    }
}

impl UpStates {
    /// `"ui"`: nodes that can take new requests.
    pub const UP_INIT: Self = Self::UP.union(Self::INITIALIZING);

    /// `"uim"`: nodes that are expected to hold their data.
    pub const UP_INIT_MAINTENANCE: Self = Self::UP_INIT.union(Self::MAINTENANCE);

    /// `"uimr"`: as above, including nodes being phased out.
    pub const UP_INIT_MAINTENANCE_RETIRED: Self = Self::UP_INIT_MAINTENANCE.union(Self::RETIRED);

    /// Returns true if a node in `state` is available under this set.
    #[inline]
    #[must_use]
    pub const fn admits(self, state: State) -> bool {
        self.contains(state.flag())
    }

    /// Parses a string of state characters such as `"uim"`.
    pub fn parse(chars: &str) -> Result<Self, ClusterStateError> {
        chars.chars().try_fold(Self::empty(), |acc, c| Ok(acc | State::from_char(c)?.flag()))
    }
}

impl Default for UpStates {
    fn default() -> Self {
        Self::UP_INIT
    }
}

impl fmt::Display for UpStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for state in State::ALL {
            if self.admits(state) {
                write!(f, "{}", state.as_char())?;
            }
        }
        Ok(())
    }
}

/// Kind of cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// Nodes that own buckets and schedule maintenance.
    Distributor,
    /// Nodes that store bucket replicas.
    Storage,
}

impl NodeType {
    /// The wire name of this node type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Distributor => "distributor",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reported state of a single node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    /// Availability.
    pub state: State,
    /// Relative capacity used to weight placement (storage nodes only).
    pub capacity: f64,
}

impl Default for NodeState {
    fn default() -> Self {
        Self { state: State::Up, capacity: 1.0 }
    }
}

impl NodeState {
    /// A node in `state` with default capacity.
    #[must_use]
    pub const fn new(state: State) -> Self {
        Self { state, capacity: 1.0 }
    }

    /// Sets the capacity.
    #[must_use]
    pub const fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    const DOWN: Self = Self::new(State::Down);
}

/// Immutable snapshot of the cluster's node states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterState {
    version: u32,
    distribution_bits: u8,
    cluster_up: bool,
    distributors: Vec<NodeState>,
    storage: Vec<NodeState>,
}

impl Default for ClusterState {
    fn default() -> Self {
        Self {
            version: 0,
            distribution_bits: DEFAULT_DISTRIBUTION_BITS,
            cluster_up: true,
            distributors: Vec::new(),
            storage: Vec::new(),
        }
    }
}

impl ClusterState {
    /// Creates an up cluster with `distributors` and `storage_nodes` nodes,
    /// all up.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterStateError::InvalidDistributionBits`] for a bit count
    /// outside `[1, 58]`.
    pub fn new(
        distribution_bits: u8,
        distributors: u16,
        storage_nodes: u16,
    ) -> Result<Self, ClusterStateError> {
        validate_distribution_bits(distribution_bits)?;
        Ok(Self {
            distribution_bits,
            distributors: vec![NodeState::default(); usize::from(distributors)],
            storage: vec![NodeState::default(); usize::from(storage_nodes)],
            ..Self::default()
        })
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Marks the whole cluster up or down.
    #[must_use]
    pub fn with_cluster_up(mut self, up: bool) -> Self {
        self.cluster_up = up;
        self
    }

    /// Sets the state of one node, growing the node list if needed. Nodes
    /// added to fill a gap are down.
    #[must_use]
    pub fn with_node_state(mut self, node_type: NodeType, index: u16, state: NodeState) -> Self {
        let nodes = self.nodes_mut(node_type);
        let index = usize::from(index);
        if index >= nodes.len() {
            nodes.resize(index + 1, NodeState::DOWN);
        }
        nodes[index] = state;
        self
    }

    /// Cluster state version.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Number of distribution bits in effect.
    #[must_use]
    pub const fn distribution_bits(&self) -> u8 {
        self.distribution_bits
    }

    /// Whether the cluster as a whole is up.
    #[must_use]
    pub const fn is_cluster_up(&self) -> bool {
        self.cluster_up
    }

    /// Number of declared nodes of a type.
    #[must_use]
    pub fn node_count(&self, node_type: NodeType) -> u16 {
        u16::try_from(self.nodes(node_type).len()).unwrap_or(u16::MAX)
    }

    /// State of a node. Undeclared nodes are down.
    #[must_use]
    pub fn node_state(&self, node_type: NodeType, index: u16) -> NodeState {
        self.nodes(node_type).get(usize::from(index)).copied().unwrap_or(NodeState::DOWN)
    }

    /// Indices of nodes of a type whose state is admitted by `up_states`.
    pub fn available_nodes(
        &self,
        node_type: NodeType,
        up_states: UpStates,
    ) -> impl Iterator<Item = u16> + '_ {
        self.nodes(node_type)
            .iter()
            .enumerate()
            .filter(move |(_, ns)| up_states.admits(ns.state))
            .filter_map(|(i, _)| u16::try_from(i).ok())
    }

    /// Returns true if the node exists and its state is admitted by
    /// `up_states`.
    #[must_use]
    pub fn is_available(&self, node_type: NodeType, index: u16, up_states: UpStates) -> bool {
        self.cluster_up && up_states.admits(self.node_state(node_type, index).state)
    }

    fn nodes(&self, node_type: NodeType) -> &[NodeState] {
        match node_type {
            NodeType::Distributor => &self.distributors,
            NodeType::Storage => &self.storage,
        }
    }

    fn nodes_mut(&mut self, node_type: NodeType) -> &mut Vec<NodeState> {
        match node_type {
            NodeType::Distributor => &mut self.distributors,
            NodeType::Storage => &mut self.storage,
        }
    }
}

fn validate_distribution_bits(bits: u8) -> Result<(), ClusterStateError> {
    if bits == 0 || bits > MAX_USED_BITS {
        return Err(ClusterStateError::InvalidDistributionBits { bits });
    }
    Ok(())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ClusterStateError> {
    value.parse().map_err(|_| ClusterStateError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

impl FromStr for ClusterState {
    type Err = ClusterStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut state = Self::default();
        let mut current: Option<NodeType> = None;

        for token in s.split_whitespace() {
            let (key, value) =
                token.split_once(':').ok_or_else(|| ClusterStateError::MalformedToken(token.into()))?;

            if let Some(rest) = key.strip_prefix('.') {
                let node_type = current.ok_or_else(|| ClusterStateError::MissingNodeType(token.into()))?;
                let (index, attribute) = rest
                    .split_once('.')
                    .ok_or_else(|| ClusterStateError::MalformedToken(token.into()))?;
                let index: u16 = parse_value(key, index)?;
                let count = state.node_count(node_type);
                if index >= count {
                    return Err(ClusterStateError::NodeOutOfRange { node_type, index, count });
                }
                let node = &mut state.nodes_mut(node_type)[usize::from(index)];
                match attribute {
                    "s" => {
                        let mut chars = value.chars();
                        let (Some(c), None) = (chars.next(), chars.next()) else {
                            return Err(ClusterStateError::InvalidValue {
                                key: key.to_string(),
                                value: value.to_string(),
                            });
                        };
                        node.state = State::from_char(c)?;
                    }
                    "c" => node.capacity = parse_value(key, value)?,
                    // Free-form description, not part of the state proper.
                    "m" => {}
                    _ => return Err(ClusterStateError::UnknownKey(key.to_string())),
                }
                continue;
            }

            match key {
                "version" => state.version = parse_value(key, value)?,
                "bits" => {
                    let bits = parse_value(key, value)?;
                    validate_distribution_bits(bits)?;
                    state.distribution_bits = bits;
                }
                "cluster" => {
                    state.cluster_up = match value {
                        "u" => true,
                        "d" => false,
                        _ => {
                            return Err(ClusterStateError::InvalidValue {
                                key: key.to_string(),
                                value: value.to_string(),
                            })
                        }
                    };
                }
                "distributor" | "storage" => {
                    let node_type =
                        if key == "distributor" { NodeType::Distributor } else { NodeType::Storage };
                    let count: u16 = parse_value(key, value)?;
                    *state.nodes_mut(node_type) = vec![NodeState::default(); usize::from(count)];
                    current = Some(node_type);
                }
                _ => return Err(ClusterStateError::UnknownKey(key.to_string())),
            }
        }

        Ok(state)
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "version:{}", self.version)?;
        if self.distribution_bits != DEFAULT_DISTRIBUTION_BITS {
            write!(f, " bits:{}", self.distribution_bits)?;
        }
        if !self.cluster_up {
            write!(f, " cluster:d")?;
        }
        for node_type in [NodeType::Distributor, NodeType::Storage] {
            let nodes = self.nodes(node_type);
            if nodes.is_empty() {
                continue;
            }
            write!(f, " {}:{}", node_type, nodes.len())?;
            for (index, node) in nodes.iter().enumerate() {
                if node.state != State::Up {
                    write!(f, " .{index}.s:{}", node.state)?;
                }
                if (node.capacity - 1.0).abs() > f64::EPSILON {
                    write!(f, " .{index}.c:{}", node.capacity)?;
                }
            }
        }
        Ok(())
    }
}
