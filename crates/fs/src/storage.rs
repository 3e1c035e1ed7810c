//! Filesystem storage implementation

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt};

use xfer_core::path::dir_key;
use xfer_core::{
    Backend, ByteRange, Error, ListMode, Object, ObjectStream, Profile, Result, Storage,
    StorageMeta,
};

/// Storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsStorage {
    name: String,
    root: PathBuf,
}

impl FsStorage {
    /// Storage resolving keys against `root`
    ///
    /// An empty root resolves keys as given, relative to the current
    /// directory or absolute.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    /// Storage for the implicit local profile
    pub fn local() -> Self {
        Self::new("local", PathBuf::new())
    }

    pub fn from_profile(profile: &Profile) -> Self {
        Self::new(&profile.name, &profile.work_dir)
    }

    /// Backend handle; the filesystem has no optional capabilities
    pub fn into_backend(self) -> Backend {
        Backend::basic(Arc::new(self))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn abs(&self, path: &str) -> PathBuf {
        if self.root.as_os_str().is_empty() {
            if path.is_empty() {
                return PathBuf::from(".");
            }
            return PathBuf::from(path);
        }
        self.root.join(path.trim_start_matches('/'))
    }
}

fn map_io(err: std::io::Error, path: &str) -> Error {
    match err.kind() {
        ErrorKind::NotFound => Error::NotFound(path.to_string()),
        ErrorKind::PermissionDenied => Error::Auth(format!("{path}: {err}")),
        _ => Error::Io(err),
    }
}

fn modified(meta: &std::fs::Metadata) -> Option<jiff::Timestamp> {
    meta.modified()
        .ok()
        .and_then(|t| jiff::Timestamp::try_from(t).ok())
}

fn to_object(path: String, meta: &std::fs::Metadata) -> Object {
    if meta.is_dir() {
        Object::dir(dir_key(&path)).with_last_modified(modified(meta))
    } else {
        Object::file(path, meta.len()).with_last_modified(modified(meta))
    }
}

/// Metadata of `path`, following symlinks when the target exists
async fn entry_metadata(path: &Path) -> std::io::Result<std::fs::Metadata> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta),
        Err(_) => tokio::fs::symlink_metadata(path).await,
    }
}

/// Every file below `dir`, depth first
async fn walk_files(root: PathBuf, prefix: String) -> Result<Vec<Object>> {
    let mut files = Vec::new();
    let mut pending = vec![(root, prefix)];
    while let Some((dir, prefix)) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| map_io(e, &prefix))?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let meta = entry_metadata(&entry.path()).await?;
            let key = format!("{prefix}{name}");
            if meta.is_dir() {
                pending.push((entry.path(), format!("{key}/")));
            } else {
                files.push(to_object(key, &meta));
            }
        }
    }
    Ok(files)
}

#[async_trait]
impl Storage for FsStorage {
    fn metadata(&self) -> StorageMeta {
        StorageMeta {
            service: "fs".into(),
            name: self.name.clone(),
            work_dir: self.root.display().to_string(),
            ..Default::default()
        }
    }

    async fn stat(&self, path: &str) -> Result<Object> {
        let meta = tokio::fs::metadata(self.abs(path))
            .await
            .map_err(|e| map_io(e, path))?;
        Ok(to_object(path.to_string(), &meta))
    }

    async fn read(
        &self,
        path: &str,
        range: Option<ByteRange>,
        w: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let mut file = tokio::fs::File::open(self.abs(path))
            .await
            .map_err(|e| map_io(e, path))?;
        let n = match range {
            Some(range) => {
                if range.size == 0 {
                    return Ok(0);
                }
                file.seek(SeekFrom::Start(range.offset)).await?;
                tokio::io::copy(&mut file.take(range.size), w).await?
            }
            None => tokio::io::copy(&mut file, w).await?,
        };
        w.flush().await?;
        Ok(n)
    }

    async fn write(
        &self,
        path: &str,
        r: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
    ) -> Result<u64> {
        let target = self.abs(path);
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&target)
            .await
            .map_err(|e| map_io(e, path))?;
        let n = tokio::io::copy(&mut (&mut *r).take(size), &mut file).await?;
        file.flush().await?;
        if n != size {
            return Err(Error::General(format!(
                "{path}: short input, expected {size} bytes, got {n}"
            )));
        }
        Ok(n)
    }

    async fn list(&self, path: &str, mode: ListMode) -> Result<ObjectStream> {
        let prefix = dir_key(path);
        match mode {
            ListMode::Dir => {
                let entries = tokio::fs::read_dir(self.abs(path))
                    .await
                    .map_err(|e| map_io(e, path))?;
                let stream = futures::stream::try_unfold(entries, move |mut entries| {
                    let prefix = prefix.clone();
                    async move {
                        let Some(entry) = entries.next_entry().await? else {
                            return Ok(None);
                        };
                        let name = entry.file_name().to_string_lossy().into_owned();
                        let meta = entry_metadata(&entry.path()).await?;
                        Ok(Some((to_object(format!("{prefix}{name}"), &meta), entries)))
                    }
                });
                Ok(stream.boxed())
            }
            ListMode::Prefix => {
                let files = walk_files(self.abs(path), prefix).await?;
                Ok(futures::stream::iter(files.into_iter().map(Ok)).boxed())
            }
            ListMode::Part => Ok(futures::stream::empty().boxed()),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let target = self.abs(path);
        let meta = match tokio::fs::symlink_metadata(&target).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(map_io(e, path)),
        };
        let result = if meta.is_dir() {
            tokio::fs::remove_dir(&target).await
        } else {
            tokio::fs::remove_file(&target).await
        };
        match result {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(map_io(e, path)),
            _ => {
                tracing::debug!(path, "deleted");
                Ok(())
            }
        }
    }

    async fn create_dir(&self, path: &str) -> Result<()> {
        if path.is_empty() {
            return Ok(());
        }
        tokio::fs::create_dir_all(self.abs(path))
            .await
            .map_err(|e| map_io(e, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use xfer_core::memory::MemoryStorage;
    use xfer_core::{DualOperator, SingleOperator};

    fn storage() -> (FsStorage, TempDir) {
        let dir = TempDir::new().unwrap();
        (FsStorage::new("test", dir.path()), dir)
    }

    async fn put(fs: &FsStorage, path: &str, data: &[u8]) {
        fs.write(path, &mut &data[..], data.len() as u64)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let (fs, dir) = storage();
        put(&fs, "a/b/c.txt", b"hello world").await;
        assert!(dir.path().join("a/b/c.txt").is_file());

        let mut out = Vec::new();
        fs.read("a/b/c.txt", None, &mut out).await.unwrap();
        assert_eq!(out, b"hello world");

        let mut out = Vec::new();
        let n = fs
            .read("a/b/c.txt", Some(ByteRange::new(6, 5)), &mut out)
            .await
            .unwrap();
        assert_eq!(n, 5);
        assert_eq!(out, b"world");
    }

    #[tokio::test]
    async fn test_short_write_is_an_error() {
        let (fs, _dir) = storage();
        let err = fs.write("f", &mut &b"abc"[..], 10).await.unwrap_err();
        assert!(matches!(err, Error::General(_)));
    }

    #[tokio::test]
    async fn test_stat_file_and_dir() {
        let (fs, _dir) = storage();
        put(&fs, "docs/readme.md", b"# hi").await;

        let file = fs.stat("docs/readme.md").await.unwrap();
        assert_eq!(file.size(), 4);
        assert!(file.last_modified.is_some());

        let dir = fs.stat("docs").await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.path, "docs/");

        assert!(fs.stat("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_marks_directories() {
        let (fs, _dir) = storage();
        put(&fs, "d/a.txt", b"a").await;
        put(&fs, "d/sub/b.txt", b"b").await;

        let mut listed: Vec<String> = fs
            .list("d", ListMode::Dir)
            .await
            .unwrap()
            .map(|o| o.unwrap().path)
            .collect()
            .await;
        listed.sort();
        assert_eq!(listed, vec!["d/a.txt", "d/sub/"]);

        let mut flat: Vec<String> = fs
            .list("d/", ListMode::Prefix)
            .await
            .unwrap()
            .map(|o| o.unwrap().path)
            .collect()
            .await;
        flat.sort();
        assert_eq!(flat, vec!["d/a.txt", "d/sub/b.txt"]);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (fs, dir) = storage();
        put(&fs, "x/y.txt", b"y").await;
        fs.delete("x/y.txt").await.unwrap();
        fs.delete("x/y.txt").await.unwrap();
        fs.delete("x/").await.unwrap();
        assert!(!dir.path().join("x").exists());
    }

    #[tokio::test]
    async fn test_delete_recursively_removes_tree() {
        let (fs, dir) = storage();
        put(&fs, "t/a.txt", b"a").await;
        put(&fs, "t/sub/b.txt", b"b").await;
        put(&fs, "t/sub/deep/c.txt", b"c").await;

        let op = SingleOperator::new(fs.into_backend());
        let errors = op.delete_recursively("t").errors().await;

        assert!(errors.is_empty(), "{errors:?}");
        assert!(!dir.path().join("t").exists());
    }

    #[tokio::test]
    async fn test_copy_tree_to_memory() {
        let (fs, _dir) = storage();
        put(&fs, "src/a.txt", b"a").await;
        put(&fs, "src/nested/b.txt", b"bb").await;

        let (mem, backend) = MemoryStorage::new("mem").into_backend();
        let op = DualOperator::new(fs.into_backend(), backend);
        let errors = op.copy_recursively("src", "dst", 1024).errors().await;

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(mem.keys(), vec!["dst/a.txt", "dst/nested/b.txt"]);
        assert_eq!(mem.get("dst/nested/b.txt").unwrap(), b"bb");
    }

    #[tokio::test]
    async fn test_sync_from_memory_creates_directories() {
        let (fs, dir) = storage();
        let (mem, backend) = MemoryStorage::new("mem").into_backend();
        mem.insert("s/a.txt", "a");
        mem.insert("s/sub/b.txt", "b");

        let op = DualOperator::new(backend, fs.into_backend());
        let opts = xfer_core::SyncOptions {
            recursive: true,
            ..Default::default()
        };
        let (done, errors) = op.sync_dir("s/", "out/", opts).partition().await;

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(done.len(), 2);
        assert_eq!(std::fs::read(dir.path().join("out/sub/b.txt")).unwrap(), b"b");
    }
}
