//! xfer-s3: S3 backend for xfer
//!
//! This crate implements the `Storage`, `Multiparter` and `HttpSigner`
//! traits from xfer-core using the aws-sdk-s3 crate. It is the only crate
//! that directly depends on the AWS SDK.

pub mod client;
pub mod multipart;

pub use client::S3Storage;
pub use multipart::{MAX_PARTS, MAX_PART_SIZE, MIN_PART_SIZE};
