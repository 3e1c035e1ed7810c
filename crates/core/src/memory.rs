//! In-memory backend for tests
//!
//! A flat key space like an object store: directories exist only as key
//! prefixes. Implements every capability and records multipart activity so
//! tests can assert on completion order and aborted sessions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};
use crate::traits::{
    Backend, ByteRange, HttpSigner, ListMode, MultipartLimits, MultipartSession, Multiparter,
    Object, ObjectStream, Part, Storage, StorageMeta,
};

#[derive(Debug, Clone)]
struct Entry {
    data: Vec<u8>,
    modified: jiff::Timestamp,
}

#[derive(Debug, Default)]
struct Upload {
    path: String,
    parts: BTreeMap<u32, Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    objects: BTreeMap<String, Entry>,
    uploads: BTreeMap<String, Upload>,
    completions: Vec<Vec<u32>>,
    aborted: Vec<String>,
    writes: Vec<String>,
    failing_parts: BTreeSet<u32>,
    failing_paths: BTreeSet<String>,
}

/// In-memory storage with multipart and signing support
#[derive(Debug, Default)]
pub struct MemoryStorage {
    name: String,
    limits: MultipartLimits,
    state: Mutex<State>,
    next_upload: AtomicU64,
}

impl MemoryStorage {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_limits(mut self, limits: MultipartLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Handle exposing every capability
    pub fn into_backend(self) -> (Arc<Self>, Backend) {
        let storage = Arc::new(self);
        let backend = Backend::full(storage.clone());
        (storage, backend)
    }

    /// Handle exposing only plain storage operations
    pub fn into_basic_backend(self) -> (Arc<Self>, Backend) {
        let storage = Arc::new(self);
        let backend = Backend::basic(storage.clone());
        (storage, backend)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `data` at `path`
    pub fn insert(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.insert_at(path, data, jiff::Timestamp::now());
    }

    /// Store `data` at `path` with an explicit modification time
    pub fn insert_at(&self, path: &str, data: impl Into<Vec<u8>>, modified: jiff::Timestamp) {
        self.state().objects.insert(
            path.to_string(),
            Entry {
                data: data.into(),
                modified,
            },
        );
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.state().objects.get(path).map(|e| e.data.clone())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state().objects.contains_key(path)
    }

    pub fn keys(&self) -> Vec<String> {
        self.state().objects.keys().cloned().collect()
    }

    /// Open a multipart upload nobody will finish
    pub fn start_upload(&self, path: &str) -> String {
        let id = format!("upload-{}", self.next_upload.fetch_add(1, Ordering::SeqCst));
        self.state().uploads.insert(
            id.clone(),
            Upload {
                path: path.to_string(),
                ..Default::default()
            },
        );
        id
    }

    /// In-progress uploads as (path, id)
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.state()
            .uploads
            .iter()
            .map(|(id, u)| (u.path.clone(), id.clone()))
            .collect()
    }

    /// Part index lists passed to every successful completion
    pub fn completions(&self) -> Vec<Vec<u32>> {
        self.state().completions.clone()
    }

    /// Ids of aborted uploads
    pub fn aborted(&self) -> Vec<String> {
        self.state().aborted.clone()
    }

    /// Paths written through `write`, in order
    pub fn writes(&self) -> Vec<String> {
        self.state().writes.clone()
    }

    /// Make every write of part `index` fail
    pub fn fail_part(&self, index: u32) {
        self.state().failing_parts.insert(index);
    }

    /// Make reads and writes of `path` fail
    pub fn fail_path(&self, path: &str) {
        self.state().failing_paths.insert(path.to_string());
    }

    fn check_path(&self, op: &str, path: &str) -> Result<()> {
        if self.state().failing_paths.contains(path) {
            return Err(Error::Network(format!("injected {op} failure")));
        }
        Ok(())
    }
}

async fn read_exact_size(r: &mut (dyn AsyncRead + Send + Unpin), size: u64) -> Result<Vec<u8>> {
    let mut data = Vec::with_capacity(size as usize);
    r.take(size).read_to_end(&mut data).await?;
    if data.len() as u64 != size {
        return Err(Error::General(format!(
            "short input: expected {size} bytes, got {}",
            data.len()
        )));
    }
    Ok(data)
}

#[async_trait]
impl Storage for MemoryStorage {
    fn metadata(&self) -> StorageMeta {
        StorageMeta {
            service: "memory".into(),
            name: self.name.clone(),
            work_dir: String::new(),
            location: None,
            multipart: self.limits,
        }
    }

    async fn stat(&self, path: &str) -> Result<Object> {
        let state = self.state();
        let entry = state
            .objects
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(Object::file(path, entry.data.len() as u64).with_last_modified(Some(entry.modified)))
    }

    async fn read(
        &self,
        path: &str,
        range: Option<ByteRange>,
        w: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        self.check_path("read", path)?;
        let data = self
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        let slice = match range {
            Some(r) => {
                let start = (r.offset as usize).min(data.len());
                let end = (r.offset + r.size).min(data.len() as u64) as usize;
                &data[start..end]
            }
            None => &data[..],
        };
        w.write_all(slice).await?;
        w.flush().await?;
        Ok(slice.len() as u64)
    }

    async fn write(
        &self,
        path: &str,
        r: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
    ) -> Result<u64> {
        self.check_path("write", path)?;
        let data = read_exact_size(r, size).await?;
        self.insert(path, data);
        self.state().writes.push(path.to_string());
        Ok(size)
    }

    async fn list(&self, path: &str, mode: ListMode) -> Result<ObjectStream> {
        let state = self.state();
        let mut objects = Vec::new();
        match mode {
            ListMode::Dir => {
                let mut dirs = BTreeSet::new();
                for (key, entry) in state.objects.range(path.to_string()..) {
                    let Some(rest) = key.strip_prefix(path) else {
                        break;
                    };
                    if rest.is_empty() {
                        continue;
                    }
                    match rest.find('/') {
                        Some(pos) => {
                            let dir = format!("{path}{}", &rest[..=pos]);
                            if dirs.insert(dir.clone()) {
                                objects.push(Object::dir(dir));
                            }
                        }
                        None => objects.push(
                            Object::file(key.clone(), entry.data.len() as u64)
                                .with_last_modified(Some(entry.modified)),
                        ),
                    }
                }
            }
            ListMode::Prefix => {
                for (key, entry) in state.objects.range(path.to_string()..) {
                    if !key.starts_with(path) {
                        break;
                    }
                    if !key.ends_with('/') {
                        objects.push(
                            Object::file(key.clone(), entry.data.len() as u64)
                                .with_last_modified(Some(entry.modified)),
                        );
                    }
                }
            }
            ListMode::Part => {
                for (id, upload) in &state.uploads {
                    if upload.path.starts_with(path) {
                        objects.push(Object::part(upload.path.clone(), id.clone()));
                    }
                }
            }
        }
        Ok(futures::stream::iter(objects.into_iter().map(Ok)).boxed())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.state().objects.remove(path);
        Ok(())
    }
}

#[async_trait]
impl Multiparter for MemoryStorage {
    async fn create_multipart(&self, path: &str) -> Result<MultipartSession> {
        let id = self.start_upload(path);
        Ok(MultipartSession::new(path, id))
    }

    async fn write_multipart(
        &self,
        session: &MultipartSession,
        r: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        index: u32,
    ) -> Result<Part> {
        if self.state().failing_parts.contains(&index) {
            return Err(Error::Network(format!("injected failure for part {index}")));
        }
        let data = read_exact_size(r, size).await?;
        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(&session.multipart_id)
            .ok_or_else(|| Error::NotFound(format!("upload {}", session.multipart_id)))?;
        upload.parts.insert(index, data);
        Ok(Part {
            index,
            size,
            etag: Some(format!("etag-{index}")),
        })
    }

    async fn complete_multipart(&self, session: &MultipartSession, parts: &[Part]) -> Result<()> {
        if parts.windows(2).any(|w| w[0].index >= w[1].index) {
            return Err(Error::General("parts are not sorted by index".into()));
        }
        let mut state = self.state();
        let upload = state
            .uploads
            .remove(&session.multipart_id)
            .ok_or_else(|| Error::NotFound(format!("upload {}", session.multipart_id)))?;

        let mut data = Vec::new();
        for part in parts {
            let chunk = upload
                .parts
                .get(&part.index)
                .ok_or_else(|| Error::General(format!("part {} was never written", part.index)))?;
            data.extend_from_slice(chunk);
        }
        state
            .completions
            .push(parts.iter().map(|p| p.index).collect());
        state.objects.insert(
            upload.path,
            Entry {
                data,
                modified: jiff::Timestamp::now(),
            },
        );
        Ok(())
    }

    async fn abort_multipart(&self, session: &MultipartSession) -> Result<()> {
        let mut state = self.state();
        state.uploads.remove(&session.multipart_id);
        state.aborted.push(session.multipart_id.clone());
        Ok(())
    }
}

#[async_trait]
impl HttpSigner for MemoryStorage {
    async fn sign_read(&self, path: &str, expire: Duration) -> Result<String> {
        Ok(format!(
            "memory://{}/{path}?expires={}",
            self.name,
            expire.as_secs()
        ))
    }
}
