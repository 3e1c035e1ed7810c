//! Operations on a single backend

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use globset::GlobBuilder;
use tokio::io::AsyncWrite;

use crate::error::{Error, Result};
use crate::limit::Throttled;
use crate::operations::pool::WorkerPool;
use crate::operations::result::{channel, ResultSender, Results, LIST_DEPTH};
use crate::operations::transfer::Limits;
use crate::path::{dir_key, split_glob};
use crate::traits::{Backend, ListMode, Object, Storage, StorageMeta};

/// Operator bound to one backend
#[derive(Debug, Clone)]
pub struct SingleOperator {
    pub(crate) backend: Backend,
    pub(crate) pool: WorkerPool,
    pub(crate) limits: Limits,
}

impl SingleOperator {
    /// Operator with a default-sized pool and no speed limits
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            pool: WorkerPool::default(),
            limits: Limits::default(),
        }
    }

    pub(crate) fn from_parts(backend: Backend, pool: WorkerPool, limits: Limits) -> Self {
        Self {
            backend,
            pool,
            limits,
        }
    }

    /// Replace the worker pool with one of `workers` slots
    pub fn with_workers(mut self, workers: usize) -> Result<Self> {
        self.pool = WorkerPool::new(workers)?;
        Ok(self)
    }

    /// Cap reads at `rate` bytes per second
    pub fn with_read_limit(mut self, rate: Option<u64>) -> Result<Self> {
        self.limits.read = Limits::limiter(rate)?;
        Ok(self)
    }

    /// Cap writes at `rate` bytes per second
    pub fn with_write_limit(mut self, rate: Option<u64>) -> Result<Self> {
        self.limits.write = Limits::limiter(rate)?;
        Ok(self)
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn metadata(&self) -> StorageMeta {
        self.backend.metadata()
    }

    pub(crate) fn storage(&self) -> Arc<dyn Storage> {
        self.backend.storage().clone()
    }

    /// Get the object at `path`
    ///
    /// When the backend has no such object, `path` may still name a directory
    /// (a key prefix on flat backends) or an in-progress multipart upload.
    /// Both are probed before the original not-found error is returned.
    pub async fn stat(&self, path: &str) -> Result<Object> {
        if path.is_empty() {
            return Ok(Object::dir(""));
        }

        let err = match self.backend.storage().stat(path).await {
            Ok(object) => return Ok(object),
            Err(e) if e.is_not_found() => e,
            Err(e) => return Err(e.context("stat", path)),
        };

        if let Some(dir) = self.probe_dir(path).await {
            return Ok(dir);
        }
        if let Some(part) = self.probe_part(path).await {
            return Ok(part);
        }
        Err(err.context("stat", path))
    }

    async fn probe_dir(&self, path: &str) -> Option<Object> {
        let dir = dir_key(path);
        let mut stream = match self.backend.storage().list(&dir, ListMode::Dir).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::debug!(path = %dir, error = %e, "directory probe failed");
                return None;
            }
        };
        while let Some(item) = stream.next().await {
            match item {
                Ok(object) if object.path.starts_with(&dir) => return Some(Object::dir(dir)),
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(path = %dir, error = %e, "directory probe failed");
                    return None;
                }
            }
        }
        None
    }

    async fn probe_part(&self, path: &str) -> Option<Object> {
        if !self.backend.capabilities().multipart {
            return None;
        }
        let mut stream = self
            .backend
            .storage()
            .list(path, ListMode::Part)
            .await
            .ok()?;
        while let Some(item) = stream.next().await {
            match item {
                Ok(object) if object.path == path => return Some(object),
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(path, error = %e, "multipart probe failed");
                    return None;
                }
            }
        }
        None
    }

    /// List the immediate children of `path`
    ///
    /// The first backend error is delivered once and ends the listing.
    pub fn list(&self, path: &str) -> Results<Object> {
        let (tx, results) = channel(LIST_DEPTH);
        let storage = self.storage();
        let path = path.to_string();
        tokio::spawn(async move {
            forward(storage, path, tx).await;
        });
        results
    }

    /// List everything below `path`, every directory after its children
    pub fn list_recursively(&self, path: &str) -> Results<Object> {
        let (tx, results) = channel(LIST_DEPTH);
        let storage = self.storage();
        let path = path.to_string();
        tokio::spawn(async move {
            walk(storage, path, tx).await;
        });
        results
    }

    /// Objects matching a glob pattern
    ///
    /// The literal directory prefix of the pattern is listed recursively and
    /// every entry is matched against the whole pattern; `*` never crosses a
    /// `/`, `**` does.
    pub async fn glob(&self, pattern: &str) -> Result<Vec<Object>> {
        let matcher = GlobBuilder::new(pattern.trim_end_matches('/'))
            .literal_separator(true)
            .build()
            .map_err(|e| Error::InvalidPattern(format!("{pattern}: {e}")))?
            .compile_matcher();

        let (base, _) = split_glob(pattern);
        let mut listing = self.list_recursively(base);
        let mut matched = Vec::new();
        while let Some(item) = listing.recv().await {
            let object = item?;
            if matcher.is_match(object.path.trim_end_matches('/')) {
                matched.push(object);
            }
        }
        tracing::debug!(pattern, base, matched = matched.len(), "glob expanded");
        Ok(matched)
    }

    /// Delete one object
    pub async fn delete(&self, path: &str) -> Result<()> {
        self.backend
            .storage()
            .delete(path)
            .await
            .map_err(|e| e.context("delete", path))
    }

    /// Time-limited read URL for `path`
    pub async fn sign(&self, path: &str, expire: Duration) -> Result<String> {
        let signer = self.backend.require_signer()?;
        signer
            .sign_read(path, expire)
            .await
            .map_err(|e| e.context("sign", path))
    }

    /// Stream the object at `path` into `w`
    pub async fn cat_file(&self, path: &str, w: &mut (dyn AsyncWrite + Send + Unpin)) -> Result<u64> {
        let mut w = Throttled::new(w, self.limits.read.clone());
        self.backend
            .storage()
            .read(path, None, &mut w)
            .await
            .map_err(|e| e.context("read", path))
    }
}

/// Send every entry of one directory listing; false once the consumer is gone
/// or the listing failed
async fn forward(storage: Arc<dyn Storage>, path: String, tx: ResultSender<Object>) -> bool {
    let mut stream = match storage.list(&path, ListMode::Dir).await {
        Ok(stream) => stream,
        Err(e) => {
            tx.err(e.context("list", &path)).await;
            return false;
        }
    };
    while let Some(item) = stream.next().await {
        match item {
            Ok(object) => {
                if object.path == path {
                    continue;
                }
                if !tx.ok(object).await {
                    return false;
                }
            }
            Err(e) => {
                tx.err(e.context("list", &path)).await;
                return false;
            }
        }
    }
    true
}

fn walk(storage: Arc<dyn Storage>, path: String, tx: ResultSender<Object>) -> BoxFuture<'static, bool> {
    async move {
        let mut stream = match storage.list(&path, ListMode::Dir).await {
            Ok(stream) => stream,
            Err(e) => {
                tx.err(e.context("list", &path)).await;
                return false;
            }
        };
        while let Some(item) = stream.next().await {
            let object = match item {
                Ok(object) => object,
                Err(e) => {
                    tx.err(e.context("list", &path)).await;
                    return false;
                }
            };
            if object.path == path {
                continue;
            }
            if object.is_dir() && !walk(storage.clone(), object.path.clone(), tx.clone()).await {
                return false;
            }
            if !tx.ok(object).await {
                return false;
            }
        }
        true
    }
    .boxed()
}
