//! xfer-fs: Local filesystem backend for xfer
//!
//! This crate implements the `Storage` trait from xfer-core on top of
//! `tokio::fs`. Directories are real directories here, so listing and stat
//! report them directly instead of inferring them from key prefixes.

pub mod storage;

pub use storage::FsStorage;
