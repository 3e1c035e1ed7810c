//! xfer-core: Core library for the xfer transfer CLI
//!
//! This crate provides the core functionality for xfer, including:
//! - Configuration and profile management
//! - Path parsing and glob splitting
//! - The `Storage` backend interface and its optional capabilities
//! - Single- and dual-backend operators with bounded-concurrency multipart transfers
//!
//! This crate is independent of any storage SDK; backends live in their own crates.

pub mod config;
pub mod error;
pub mod limit;
pub mod operations;
pub mod path;
pub mod profile;
pub mod traits;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

pub use config::{parse_size, Config, ConfigManager};
pub use error::{Error, Result};
pub use limit::{SpeedLimiter, Throttled};
pub use operations::{
    DualOperator, EmptyResult, ObjectResult, PartResult, Results, SingleOperator, SyncAction,
    SyncOptions, WorkerPool,
};
pub use path::{has_meta, parse_path, ProfilePath};
pub use profile::{Profile, ProfileManager, Service};
pub use traits::{
    Backend, ByteRange, Capabilities, HttpSigner, ListMode, MultipartLimits, MultipartSession,
    Multiparter, Object, ObjectMode, ObjectStream, Part, Storage, StorageMeta,
};
