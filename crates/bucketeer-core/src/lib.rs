// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Bucketeer Authors

//! Core types for the Bucketeer distributor.
//!
//! This crate provides the building blocks shared by the placement and
//! distributor crates:
//! - [`BucketId`] and its database key encoding
//! - Stripe assignment of the bucket key space
//! - Engine configuration
//! - The setup error type

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bucket;
pub mod config;
pub mod error;
pub mod stripe;

pub use bucket::{low_bits_mask, BucketId, COUNT_BITS, MAX_USED_BITS};
pub use config::{Config, MaintenanceConfig, StripeConfig};
pub use error::{Error, Result};
pub use stripe::{
    adjusted_num_stripes, calc_num_stripe_bits, stripe_of_bucket, stripe_of_bucket_key,
    tune_num_stripes_based_on_cpu_cores, StripeLayout, MAX_STRIPES, MAX_STRIPE_BITS,
};
