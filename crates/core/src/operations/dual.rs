//! Operator bound to a source and a destination backend

use crate::error::{Error, Result};
use crate::operations::pool::WorkerPool;
use crate::operations::single::SingleOperator;
use crate::operations::transfer::Limits;
use crate::path::normalize_key;
use crate::traits::Backend;

/// Moves data from `src` to `dst`
///
/// Every stream reads through the shared read limiter and writes through the
/// shared write limiter; every task runs on the shared pool.
#[derive(Debug, Clone)]
pub struct DualOperator {
    pub(crate) src: Backend,
    pub(crate) dst: Backend,
    pub(crate) pool: WorkerPool,
    pub(crate) limits: Limits,
    pub(crate) part_size: Option<u64>,
}

impl DualOperator {
    pub fn new(src: Backend, dst: Backend) -> Self {
        Self {
            src,
            dst,
            pool: WorkerPool::default(),
            limits: Limits::default(),
            part_size: None,
        }
    }

    /// Replace the worker pool with one of `workers` slots
    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        self.pool = WorkerPool::new(workers)?;
        Ok(self)
    }

    /// Cap source reads at `rate` bytes per second
    pub fn with_read_limit(mut self, rate: Option<u64>) -> Result<Self> {
        self.limits.read = Limits::limiter(rate)?;
        Ok(self)
    }

    /// Cap destination writes at `rate` bytes per second
    pub fn with_write_limit(mut self, rate: Option<u64>) -> Result<Self> {
        self.limits.write = Limits::limiter(rate)?;
        Ok(self)
    }

    /// Use a fixed multipart part size instead of planning one per object
    ///
    /// The size is checked against the destination's limits when a transfer
    /// starts.
    pub fn with_part_size(mut self, part_size: Option<u64>) -> Self {
        self.part_size = part_size;
        self
    }

    pub fn src(&self) -> &Backend {
        &self.src
    }

    pub fn dst(&self) -> &Backend {
        &self.dst
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Single-backend operator on the source sharing this operator's pool
    pub fn src_operator(&self) -> SingleOperator {
        SingleOperator::from_parts(self.src.clone(), self.pool.clone(), self.limits.clone())
    }

    /// Single-backend operator on the destination sharing this operator's pool
    pub fn dst_operator(&self) -> SingleOperator {
        SingleOperator::from_parts(self.dst.clone(), self.pool.clone(), self.limits.clone())
    }

    /// Whether `src_path` and `dst_path` name one object on one backend
    pub fn is_same_object(&self, src_path: &str, dst_path: &str) -> bool {
        self.src.is_same_storage(&self.dst) && normalize_key(src_path) == normalize_key(dst_path)
    }

    /// Refuse a transfer whose destination is its own source
    pub(crate) fn ensure_distinct(&self, src_path: &str, dst_path: &str) -> Result<()> {
        if self.is_same_object(src_path, dst_path) {
            return Err(Error::Conflict(format!(
                "'{src_path}' and '{dst_path}' are the same file"
            )));
        }
        Ok(())
    }

    /// Refuse a tree transfer whose destination lies inside its source
    pub(crate) fn ensure_outside(&self, src_dir: &str, dst_dir: &str) -> Result<()> {
        if !self.src.is_same_storage(&self.dst) {
            return Ok(());
        }
        let (src, dst) = (normalize_key(src_dir), normalize_key(dst_dir));
        let inside = src.is_empty() || dst == src || dst.starts_with(&format!("{src}/"));
        if inside {
            return Err(Error::Conflict(format!(
                "cannot copy a directory, '{src_dir}', into itself, '{dst_dir}'"
            )));
        }
        Ok(())
    }

    /// Whether an object of `size` bytes goes up in parts
    pub(crate) fn use_multipart(&self, size: u64, threshold: u64) -> bool {
        if size < threshold {
            return false;
        }
        if !self.dst.capabilities().multipart {
            tracing::debug!(
                size,
                threshold,
                service = %self.dst.metadata().service,
                "destination lacks multipart, using a single write"
            );
            return false;
        }
        true
    }
}
