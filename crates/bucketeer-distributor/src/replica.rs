// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Replica bookkeeping.
//!
//! Each storage node reports what it holds of a bucket as a [`BucketCopy`].
//! A [`BucketInfo`] collects the copies of one bucket, kept sorted by node
//! index, and derives the bucket-level facts the maintenance checkers need.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// What one node reports about its copy of a bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaInfo {
    /// Content checksum. Copies with equal checksums are in sync.
    pub checksum: u32,
    /// Number of documents in the copy.
    pub doc_count: u32,
    /// Total size of the copy in bytes.
    pub total_bytes: u64,
    /// The copy is indexed and can serve reads.
    pub ready: bool,
    /// The copy is the one serving reads.
    pub active: bool,
}

impl ReplicaInfo {
    /// Creates replica info for an inactive, not yet ready copy.
    #[must_use]
    pub const fn new(checksum: u32, doc_count: u32, total_bytes: u64) -> Self {
        Self { checksum, doc_count, total_bytes, ready: false, active: false }
    }

    /// Sets the ready flag.
    #[must_use]
    pub const fn with_ready(mut self, ready: bool) -> Self {
        self.ready = ready;
        self
    }

    /// Sets the active flag.
    #[must_use]
    pub const fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Returns true if the copy holds no documents.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.doc_count == 0
    }
}

/// One node's copy of a bucket.
///
/// Two copies are equal, and ordered, by node index alone: a bucket never
/// has more than one copy per node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketCopy {
    node: u16,
    timestamp: u64,
    info: ReplicaInfo,
    trusted: bool,
}

impl BucketCopy {
    /// Creates an untrusted copy reported at `timestamp`.
    #[must_use]
    pub const fn new(node: u16, timestamp: u64, info: ReplicaInfo) -> Self {
        Self { node, timestamp, info, trusted: false }
    }

    /// Marks the copy as trusted.
    #[must_use]
    pub const fn with_trusted(mut self, trusted: bool) -> Self {
        self.trusted = trusted;
        self
    }

    /// Index of the node holding the copy.
    #[must_use]
    pub const fn node(&self) -> u16 {
        self.node
    }

    /// When the copy was last reported.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Reported contents.
    #[must_use]
    pub const fn info(&self) -> &ReplicaInfo {
        &self.info
    }

    /// Whether the copy is known to hold all acknowledged writes.
    #[must_use]
    pub const fn trusted(&self) -> bool {
        self.trusted
    }

    /// Sets the trusted flag.
    pub fn set_trusted(&mut self, trusted: bool) {
        self.trusted = trusted;
    }

    /// Sets the active flag.
    pub fn set_active(&mut self, active: bool) {
        self.info.active = active;
    }

    /// Replaces the reported contents if `timestamp` is not older than the
    /// current one. Returns true if the copy changed.
    pub fn update(&mut self, info: ReplicaInfo, timestamp: u64) -> bool {
        if timestamp < self.timestamp {
            return false;
        }
        self.info = info;
        self.timestamp = timestamp;
        true
    }

    /// Returns true if both copies have the same contents.
    #[must_use]
    pub fn consistent_with(&self, other: &Self) -> bool {
        self.info.checksum == other.info.checksum
    }
}

impl PartialEq for BucketCopy {
    fn eq(&self, other: &Self) -> bool {
        self.node == other.node
    }
}

impl Eq for BucketCopy {}

impl PartialOrd for BucketCopy {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BucketCopy {
    fn cmp(&self, other: &Self) -> Ordering {
        self.node.cmp(&other.node)
    }
}

/// All known copies of one bucket.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketInfo {
    last_gc_timestamp: u64,
    replicas: Vec<BucketCopy>,
}

impl BucketInfo {
    /// Creates an empty bucket info.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates bucket info holding `replicas`.
    #[must_use]
    pub fn with_replicas(replicas: impl IntoIterator<Item = BucketCopy>) -> Self {
        let mut info = Self::default();
        info.add_replicas(replicas);
        info
    }

    /// Copies sorted by node index.
    #[must_use]
    pub fn replicas(&self) -> &[BucketCopy] {
        &self.replicas
    }

    /// Number of copies.
    #[must_use]
    pub fn replica_count(&self) -> usize {
        self.replicas.len()
    }

    /// Returns true if no node holds a copy.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.replicas.is_empty()
    }

    /// Adds copies, replacing any existing copy on the same node.
    pub fn add_replicas(&mut self, replicas: impl IntoIterator<Item = BucketCopy>) {
        for copy in replicas {
            match self.replicas.binary_search(&copy) {
                Ok(pos) => self.replicas[pos] = copy,
                Err(pos) => self.replicas.insert(pos, copy),
            }
        }
    }

    /// Removes the copy on `node`. Returns true if there was one.
    pub fn remove_node(&mut self, node: u16) -> bool {
        match self.position(node) {
            Some(pos) => {
                self.replicas.remove(pos);
                true
            }
            None => false,
        }
    }

    /// The copy on `node`, if any.
    #[must_use]
    pub fn node(&self, node: u16) -> Option<&BucketCopy> {
        self.position(node).map(|pos| &self.replicas[pos])
    }

    /// Mutable access to the copy on `node`.
    pub fn node_mut(&mut self, node: u16) -> Option<&mut BucketCopy> {
        self.position(node).map(move |pos| &mut self.replicas[pos])
    }

    /// Nodes holding a copy, ascending.
    pub fn nodes(&self) -> impl Iterator<Item = u16> + '_ {
        self.replicas.iter().map(BucketCopy::node)
    }

    /// Returns true if every copy has the same checksum.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        match self.replicas.split_first() {
            Some((first, rest)) => rest.iter().all(|copy| copy.consistent_with(first)),
            None => true,
        }
    }

    /// Returns true if the copy on `node` exists and is trusted.
    #[must_use]
    pub fn is_trusted_on(&self, node: u16) -> bool {
        self.node(node).is_some_and(BucketCopy::trusted)
    }

    /// Returns true if at least one copy is trusted.
    #[must_use]
    pub fn has_trusted(&self) -> bool {
        self.replicas.iter().any(BucketCopy::trusted)
    }

    /// Trusts every copy when all copies are in sync. Otherwise copies that
    /// disagree with a trusted copy lose their trust.
    pub fn reset_trusted(&mut self) {
        if self.is_consistent() {
            for copy in &mut self.replicas {
                copy.set_trusted(true);
            }
            return;
        }
        if let Some(reference) = self.replicas.iter().find(|c| c.trusted()).copied() {
            for copy in &mut self.replicas {
                let trusted = copy.consistent_with(&reference);
                copy.set_trusted(trusted);
            }
        }
    }

    /// Returns true if at least one copy is active.
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.active_count() > 0
    }

    /// Number of active copies.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.replicas.iter().filter(|c| c.info().active).count()
    }

    /// Largest document count reported by any copy.
    #[must_use]
    pub fn highest_document_count(&self) -> u32 {
        self.replicas.iter().map(|c| c.info().doc_count).max().unwrap_or(0)
    }

    /// Largest byte size reported by any copy.
    #[must_use]
    pub fn highest_total_bytes(&self) -> u64 {
        self.replicas.iter().map(|c| c.info().total_bytes).max().unwrap_or(0)
    }

    /// When garbage collection last ran on the bucket.
    #[must_use]
    pub fn last_gc_timestamp(&self) -> u64 {
        self.last_gc_timestamp
    }

    /// Records a garbage collection run.
    pub fn set_last_gc_timestamp(&mut self, timestamp: u64) {
        self.last_gc_timestamp = timestamp;
    }

    fn position(&self, node: u16) -> Option<usize> {
        self.replicas.binary_search_by_key(&node, BucketCopy::node).ok()
    }
}
