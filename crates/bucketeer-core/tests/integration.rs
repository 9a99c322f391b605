// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Integration tests for bucket keys, stripes and configuration.

use std::io::Write;

use bucketeer_core::{stripe_of_bucket, BucketId, Config, StripeLayout};

#[test]
fn test_config_file_drives_stripe_layout() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "[stripes]\ncount = 3\n\n[maintenance]\nsplit_count = 2000\njoin_count = 100").unwrap();

    let config = Config::from_file(file.path()).unwrap();
    let layout = config.stripes.layout();
    assert_eq!(layout, StripeLayout::new(4).unwrap());
    assert_eq!(config.maintenance.split_count, 2000);

    let bucket = BucketId::new(20, 0xa_bcde);
    assert_eq!(layout.stripe_of(bucket), stripe_of_bucket(bucket, 2));
}

#[test]
fn test_subtree_is_contiguous_key_range() {
    let root = BucketId::new(4, 0b1011);
    let mut inside = Vec::new();
    let mut outside = Vec::new();
    for location in 0..1024u64 {
        let bucket = BucketId::new(10, location);
        if root.contains(bucket) {
            inside.push(bucket.to_key());
        } else {
            outside.push(bucket.to_key());
        }
    }
    let (lo, hi) = (root.to_key(), root.subtree_end_key());
    assert_eq!(inside.len(), 64);
    assert!(inside.iter().all(|k| (lo..=hi).contains(k)));
    assert!(outside.iter().all(|k| !(lo..=hi).contains(k)));
}

#[test]
fn test_invalid_config_rejected() {
    assert!(Config::parse("[maintenance]\nsplit_count = 10\njoin_count = 10\n").is_err());
    assert!(Config::parse("[stripes]\ncount = 1000\n").is_err());
}
