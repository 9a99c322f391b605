// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Ordered index from buckets to their replicas.
//!
//! Entries are keyed by [`BucketId::to_key`], under which every subtree of the
//! split hierarchy is one contiguous key range:
//!
//! ```text
//!   key order ─────────────────────────────────────────────────────────▶
//!   [ 0b0 (1 bit) ][ 0b00 ][ 0b000 ] ... [ 0b10 ][ 0b100 ] ...  [ 0b1 ] ...
//!   └──────────── subtree of 0b0 ──────────────┘
//! ```
//!
//! Descendant queries are therefore bounded range scans, and ancestor queries
//! are one exact lookup per coarser bit count. Each stripe owns one database;
//! callers route a bucket to its stripe before querying.

use std::collections::BTreeMap;
use std::ops::{Bound, ControlFlow};

use bucketeer_core::BucketId;
use metrics::{counter, gauge};
use thiserror::Error;
use tracing::error;

use crate::replica::{BucketCopy, BucketInfo};

/// Errors raised by hierarchical queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DatabaseError {
    /// An entry is stored under a key that does not encode its bucket, or
    /// sits in a key range it does not belong to.
    #[error("index corruption: key {key:#018x} holds entry for {bucket}")]
    IndexCorruption {
        /// The key the entry was found under.
        key: u64,
        /// The bucket the entry claims to describe.
        bucket: BucketId,
    },
}

/// One indexed bucket.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    bucket_id: BucketId,
    /// Replicas of the bucket.
    pub info: BucketInfo,
}

impl Entry {
    /// Creates an entry. Unused bucket bits are cleared.
    #[must_use]
    pub fn new(bucket_id: BucketId, info: BucketInfo) -> Self {
        Self { bucket_id: bucket_id.strip_unused(), info }
    }

    /// The bucket this entry describes.
    #[must_use]
    pub fn bucket_id(&self) -> BucketId {
        self.bucket_id
    }
}

/// What a mutating visitor wants done with the entry it was shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Keep the (possibly modified) entry and continue.
    Continue,
    /// Remove the entry and continue.
    Remove,
    /// Keep the entry and stop the traversal.
    Stop,
}

/// Bucket database of one stripe.
#[derive(Debug, Default)]
pub struct BucketDatabase {
    entries: BTreeMap<u64, Entry>,
    stripe: usize,
}

impl BucketDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty database reporting metrics for `stripe`.
    #[must_use]
    pub fn for_stripe(stripe: usize) -> Self {
        Self { entries: BTreeMap::new(), stripe }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the database holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.publish_size();
    }

    /// Exact lookup.
    #[must_use]
    pub fn get(&self, bucket: BucketId) -> Option<&Entry> {
        self.entries.get(&bucket.to_key())
    }

    /// Mutable exact lookup.
    pub fn get_mut(&mut self, bucket: BucketId) -> Option<&mut Entry> {
        self.entries.get_mut(&bucket.to_key())
    }

    /// Returns true if `bucket` has an entry.
    #[must_use]
    pub fn contains(&self, bucket: BucketId) -> bool {
        self.entries.contains_key(&bucket.to_key())
    }

    /// Inserts or replaces the entry for `entry.bucket_id()`.
    pub fn update(&mut self, entry: Entry) {
        self.entries.insert(entry.bucket_id.to_key(), entry);
        self.publish_size();
    }

    /// Removes the entry for `bucket`, if there is one.
    pub fn remove(&mut self, bucket: BucketId) -> Option<Entry> {
        let removed = self.entries.remove(&bucket.to_key());
        if removed.is_some() {
            self.publish_size();
        }
        removed
    }

    /// Adds or replaces one replica of `bucket`, creating the entry if needed.
    pub fn merge_replica(&mut self, bucket: BucketId, copy: BucketCopy) {
        let bucket = bucket.strip_unused();
        let before = self.entries.len();
        self.entries
            .entry(bucket.to_key())
            .or_insert_with(|| Entry::new(bucket, BucketInfo::new()))
            .info
            .add_replicas([copy]);
        if self.entries.len() != before {
            self.publish_size();
        }
    }

    /// Drops every replica on `node`, removing entries left without
    /// replicas. Returns the number of replicas dropped.
    pub fn remove_node_from_all(&mut self, node: u16) -> usize {
        let mut dropped = 0;
        self.entries.retain(|_, entry| {
            if entry.info.remove_node(node) {
                dropped += 1;
                !entry.info.is_empty()
            } else {
                true
            }
        });
        if dropped > 0 {
            self.publish_size();
        }
        dropped
    }

    /// The entry with the smallest key.
    #[must_use]
    pub fn first(&self) -> Option<&Entry> {
        self.entries.values().next()
    }

    /// The first entry whose key is strictly greater than `bucket`'s.
    #[must_use]
    pub fn upper_bound(&self, bucket: BucketId) -> Option<&Entry> {
        self.entries
            .range((Bound::Excluded(bucket.to_key()), Bound::Unbounded))
            .map(|(_, entry)| entry)
            .next()
    }

    /// Entries of the strict ancestors of `bucket`, coarsest first.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::IndexCorruption`] if a visited entry does not
    /// match its key.
    pub fn get_parents(&self, bucket: BucketId) -> Result<Vec<&Entry>, DatabaseError> {
        let mut parents = Vec::new();
        for used_bits in 0..bucket.used_bits() {
            let Some(ancestor) = bucket.ancestor_with_bits(used_bits) else {
                continue;
            };
            let key = ancestor.to_key();
            if let Some(entry) = self.entries.get(&key) {
                parents.push(self.verified(key, entry, |b| b.is_strict_ancestor_of(bucket))?);
            }
        }
        Ok(parents)
    }

    /// Entries overlapping `bucket`: its ancestors, itself and its
    /// descendants, in key order.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::IndexCorruption`] if a visited entry does not
    /// match its key.
    pub fn get_all(&self, bucket: BucketId) -> Result<Vec<&Entry>, DatabaseError> {
        let mut all = self.get_parents(bucket)?;
        for (&key, entry) in self.entries.range(bucket.to_key()..=bucket.subtree_end_key()) {
            all.push(self.verified(key, entry, |b| bucket.contains(b))?);
        }
        Ok(all)
    }

    /// Number of indexed strict descendants of `bucket`.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::IndexCorruption`] if a visited entry does not
    /// match its key.
    pub fn child_count(&self, bucket: BucketId) -> Result<usize, DatabaseError> {
        let mut count = 0;
        for (&key, entry) in self.descendants(bucket) {
            self.verified(key, entry, |b| bucket.is_strict_ancestor_of(b))?;
            count += 1;
        }
        Ok(count)
    }

    /// Number of immediate child subtrees of `bucket` (0, 1 or 2) holding at
    /// least one entry. A non-zero count for an indexed bucket means a split
    /// was left incomplete.
    ///
    /// # Errors
    ///
    /// Returns [`DatabaseError::IndexCorruption`] if a visited entry does not
    /// match its key.
    pub fn child_subtree_count(&self, bucket: BucketId) -> Result<u8, DatabaseError> {
        let Some((left, right)) = bucket.children() else {
            return Ok(0);
        };
        let mut count = 0;
        for child in [left, right] {
            let first = self.entries.range(child.to_key()..=child.subtree_end_key()).next();
            if let Some((&key, entry)) = first {
                self.verified(key, entry, |b| child.contains(b))?;
                count += 1;
            }
        }
        Ok(count)
    }

    /// Visits entries in key order, starting after `after` (or at the
    /// beginning), until the visitor breaks.
    pub fn for_each<F>(&self, after: Option<BucketId>, mut visitor: F)
    where
        F: FnMut(&Entry) -> ControlFlow<()>,
    {
        for entry in self.entries.range(Self::after_bound(after)).map(|(_, entry)| entry) {
            if visitor(entry).is_break() {
                break;
            }
        }
    }

    /// Visits entries in key order with mutable access, starting after
    /// `after`. The visitor may modify the entry's replicas, ask for the
    /// entry to be removed, or stop the traversal.
    pub fn for_each_mut<F>(&mut self, after: Option<BucketId>, mut visitor: F)
    where
        F: FnMut(&mut Entry) -> Visit,
    {
        let mut doomed = Vec::new();
        for (&key, entry) in self.entries.range_mut(Self::after_bound(after)) {
            match visitor(entry) {
                Visit::Continue => {}
                Visit::Remove => doomed.push(key),
                Visit::Stop => break,
            }
        }
        if !doomed.is_empty() {
            for key in doomed {
                self.entries.remove(&key);
            }
            self.publish_size();
        }
    }

    /// Iterates all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Entry> + '_ {
        self.entries.values()
    }

    fn after_bound(after: Option<BucketId>) -> (Bound<u64>, Bound<u64>) {
        match after {
            Some(bucket) => (Bound::Excluded(bucket.to_key()), Bound::Unbounded),
            None => (Bound::Unbounded, Bound::Unbounded),
        }
    }

    fn descendants(&self, bucket: BucketId) -> impl Iterator<Item = (&u64, &Entry)> + '_ {
        self.entries.range((Bound::Excluded(bucket.to_key()), Bound::Included(bucket.subtree_end_key())))
    }

    /// Checks that `entry` is stored under its own key and satisfies the
    /// relation the query expects.
    fn verified<'a>(
        &self,
        key: u64,
        entry: &'a Entry,
        expected: impl Fn(BucketId) -> bool,
    ) -> Result<&'a Entry, DatabaseError> {
        let bucket = entry.bucket_id;
        if bucket.to_key() == key && BucketId::from_key(key) == bucket && expected(bucket) {
            return Ok(entry);
        }
        error!(stripe = self.stripe, key, bucket = %bucket, "Bucket database index corruption detected");
        counter!("bucketeer_bucket_db_corruptions", "stripe" => self.stripe.to_string()).increment(1);
        Err(DatabaseError::IndexCorruption { key, bucket })
    }

    fn publish_size(&self) {
        gauge!("bucketeer_bucket_db_entries", "stripe" => self.stripe.to_string())
            .set(self.entries.len() as f64);
    }

    #[cfg(test)]
    fn insert_raw(&mut self, key: u64, entry: Entry) {
        self.entries.insert(key, entry);
    }
}
