//! Storage backend interface
//!
//! Backends implement [`Storage`] and optionally [`Multiparter`] and
//! [`HttpSigner`]. The operators never see a concrete backend; they hold a
//! [`Backend`] handle that records which optional capabilities are present.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

/// Bitset describing what kind of entity an [`Object`] is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ObjectMode(u8);

impl ObjectMode {
    pub const DIR: ObjectMode = ObjectMode(1);
    pub const READ: ObjectMode = ObjectMode(1 << 1);
    pub const LINK: ObjectMode = ObjectMode(1 << 2);
    pub const APPEND: ObjectMode = ObjectMode(1 << 3);
    pub const BLOCK: ObjectMode = ObjectMode(1 << 4);
    pub const PAGE: ObjectMode = ObjectMode(1 << 5);
    pub const PART: ObjectMode = ObjectMode(1 << 6);

    const NAMES: [(ObjectMode, &'static str); 7] = [
        (Self::DIR, "dir"),
        (Self::READ, "read"),
        (Self::LINK, "link"),
        (Self::APPEND, "append"),
        (Self::BLOCK, "block"),
        (Self::PAGE, "page"),
        (Self::PART, "part"),
    ];

    pub const fn empty() -> Self {
        ObjectMode(0)
    }

    pub const fn contains(self, other: ObjectMode) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ObjectMode) {
        self.0 |= other.0;
    }

    pub const fn is_dir(self) -> bool {
        self.contains(Self::DIR)
    }

    pub const fn is_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub const fn is_part(self) -> bool {
        self.contains(Self::PART)
    }
}

impl std::ops::BitOr for ObjectMode {
    type Output = ObjectMode;

    fn bitor(self, rhs: ObjectMode) -> ObjectMode {
        ObjectMode(self.0 | rhs.0)
    }
}

impl std::fmt::Display for ObjectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(mode, _)| self.contains(*mode))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

impl Serialize for ObjectMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A backend-resident entity
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Object {
    /// Path relative to the backend's work dir; directories end with `/`
    pub path: String,

    /// Entity kind
    pub mode: ObjectMode,

    /// Size in bytes, when the mode carries one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,

    /// Last modified timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<jiff::Timestamp>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,

    /// In-progress multipart upload this object stands for
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multipart_id: Option<String>,

    /// Backend-specific metadata
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub system_metadata: BTreeMap<String, String>,

    /// User metadata
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub user_metadata: BTreeMap<String, String>,
}

impl Object {
    /// Create a readable file object
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            mode: ObjectMode::READ,
            content_length: Some(size),
            ..Default::default()
        }
    }

    /// Create a directory object
    pub fn dir(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: ObjectMode::DIR,
            ..Default::default()
        }
    }

    /// Create an object standing for an in-progress multipart upload
    pub fn part(path: impl Into<String>, multipart_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: ObjectMode::PART,
            multipart_id: Some(multipart_id.into()),
            ..Default::default()
        }
    }

    pub fn with_last_modified(mut self, ts: Option<jiff::Timestamp>) -> Self {
        self.last_modified = ts;
        self
    }

    pub fn is_dir(&self) -> bool {
        self.mode.is_dir()
    }

    pub fn is_part(&self) -> bool {
        self.mode.is_part()
    }

    /// Size in bytes, zero when unknown
    pub fn size(&self) -> u64 {
        self.content_length.unwrap_or(0)
    }

    /// Human-readable size
    pub fn size_human(&self) -> Option<String> {
        self.content_length
            .map(|size| humansize::format_size(size, humansize::BINARY))
    }

    /// Multipart session this object stands for, if any
    pub fn session(&self) -> Option<MultipartSession> {
        self.multipart_id
            .as_ref()
            .map(|id| MultipartSession::new(&self.path, id))
    }
}

/// One written chunk of a multipart transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Part {
    /// Zero-based part index
    pub index: u32,
    /// Bytes in this part
    pub size: u64,
    /// Backend-assigned tag, set once the part is written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Handle to an in-progress multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MultipartSession {
    pub path: String,
    pub multipart_id: String,
}

impl MultipartSession {
    pub fn new(path: impl Into<String>, multipart_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            multipart_id: multipart_id.into(),
        }
    }
}

/// Byte range for ranged reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub size: u64,
}

impl ByteRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Inclusive end offset, `None` for an empty range
    pub fn last(&self) -> Option<u64> {
        (self.size > 0).then(|| self.offset + self.size - 1)
    }
}

/// Multipart limits a backend declares; `None` means unconstrained
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MultipartLimits {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_part_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_part_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_part_count: Option<u64>,
}

/// Static description of a backend
#[derive(Debug, Clone, Default, Serialize)]
pub struct StorageMeta {
    /// Service name, e.g. "fs" or "s3"
    pub service: String,
    /// Bucket or volume name
    pub name: String,
    /// Root every key is resolved against
    pub work_dir: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub multipart: MultipartLimits,
}

/// Listing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// Immediate children; sub-directories come back as directory objects
    Dir,
    /// Every object under the prefix, flattened
    Prefix,
    /// In-progress multipart uploads under the prefix
    Part,
}

/// Lazy listing; the end of the stream is the done sentinel
pub type ObjectStream = BoxStream<'static, Result<Object>>;

/// Core storage operations every backend provides
#[async_trait]
pub trait Storage: Send + Sync {
    /// Describe the backend
    fn metadata(&self) -> StorageMeta;

    /// Get object metadata; `Error::NotFound` when absent
    async fn stat(&self, path: &str) -> Result<Object>;

    /// Copy the object (or a range of it) into `w`, returning bytes read
    async fn read(
        &self,
        path: &str,
        range: Option<ByteRange>,
        w: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64>;

    /// Write exactly `size` bytes from `r` to `path`, returning bytes written
    async fn write(
        &self,
        path: &str,
        r: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
    ) -> Result<u64>;

    /// List objects under `path`
    async fn list(&self, path: &str, mode: ListMode) -> Result<ObjectStream>;

    /// Delete an object; deleting an absent object succeeds
    async fn delete(&self, path: &str) -> Result<()>;

    /// Make sure a directory exists; flat namespaces have nothing to do
    async fn create_dir(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

/// Optional multipart upload capability
#[async_trait]
pub trait Multiparter: Send + Sync {
    /// Start a multipart upload at `path`
    async fn create_multipart(&self, path: &str) -> Result<MultipartSession>;

    /// Write part `index` of `size` bytes read from `r`
    async fn write_multipart(
        &self,
        session: &MultipartSession,
        r: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        index: u32,
    ) -> Result<Part>;

    /// Assemble the object from parts sorted by index
    async fn complete_multipart(&self, session: &MultipartSession, parts: &[Part]) -> Result<()>;

    /// Drop an in-progress upload and its parts
    async fn abort_multipart(&self, session: &MultipartSession) -> Result<()>;
}

/// Optional presigned URL capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpSigner: Send + Sync {
    /// Time-limited URL that reads `path`
    async fn sign_read(&self, path: &str, expire: Duration) -> Result<String>;
}

/// Optional capabilities present on a [`Backend`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub multipart: bool,
    pub sign: bool,
}

/// Backend handle with its capability set resolved at construction
///
/// Cloning is cheap; every clone shares the same backend.
#[derive(Clone)]
pub struct Backend {
    storage: Arc<dyn Storage>,
    multiparter: Option<Arc<dyn Multiparter>>,
    signer: Option<Arc<dyn HttpSigner>>,
}

impl Backend {
    /// Backend with only the core storage operations
    pub fn basic(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            multiparter: None,
            signer: None,
        }
    }

    /// Backend that implements every capability
    pub fn full<B>(backend: Arc<B>) -> Self
    where
        B: Storage + Multiparter + HttpSigner + 'static,
    {
        Self {
            storage: backend.clone(),
            multiparter: Some(backend.clone()),
            signer: Some(backend),
        }
    }

    /// Attach a URL signer
    pub fn with_signer(mut self, signer: Arc<dyn HttpSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            multipart: self.multiparter.is_some(),
            sign: self.signer.is_some(),
        }
    }

    pub fn metadata(&self) -> StorageMeta {
        self.storage.metadata()
    }

    /// Whether both handles resolve keys against the same store and root
    pub fn is_same_storage(&self, other: &Backend) -> bool {
        let (a, b) = (self.metadata(), other.metadata());
        a.service == b.service && a.name == b.name && a.work_dir == b.work_dir
    }

    /// Multipart capability, or `Error::UnsupportedFeature`
    pub fn require_multipart(&self) -> Result<&Arc<dyn Multiparter>> {
        self.multiparter.as_ref().ok_or_else(|| {
            Error::UnsupportedFeature(format!(
                "{} backend does not support multipart uploads",
                self.storage.metadata().service
            ))
        })
    }

    /// URL signing capability, or `Error::UnsupportedFeature`
    pub fn require_signer(&self) -> Result<&Arc<dyn HttpSigner>> {
        self.signer.as_ref().ok_or_else(|| {
            Error::UnsupportedFeature(format!(
                "{} backend does not support signed URLs",
                self.storage.metadata().service
            ))
        })
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.storage.metadata();
        f.debug_struct("Backend")
            .field("service", &meta.service)
            .field("name", &meta.name)
            .field("capabilities", &self.capabilities())
            .finish()
    }
}
