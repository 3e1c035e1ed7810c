//! S3 storage implementation
//!
//! Wraps aws-sdk-s3 and implements the Storage trait from xfer-core. Keys
//! handed to the trait are relative to the profile's work dir.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_smithy_types::error::display::DisplayErrorContext;
use futures::{StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use xfer_core::path::dir_key;
use xfer_core::{
    Backend, ByteRange, Error, ListMode, Object, ObjectStream, Profile, Result, Storage,
    StorageMeta,
};

use crate::multipart;

/// Storage backed by one S3 bucket
#[derive(Debug, Clone)]
pub struct S3Storage {
    pub(crate) inner: aws_sdk_s3::Client,
    pub(crate) bucket: String,
    work_dir: String,
    region: String,
}

/// Trim a leading `/` and make a non-empty work dir end with `/`
fn normalize_work_dir(work_dir: &str) -> String {
    dir_key(work_dir.trim_start_matches('/'))
}

/// Turn an SDK error into an xfer error for `path`
pub(crate) fn map_sdk_error<E: std::error::Error>(err: &E, path: &str) -> Error {
    classify(&DisplayErrorContext(err).to_string(), path)
}

fn classify(message: &str, path: &str) -> Error {
    const NOT_FOUND: [&str; 4] = ["NotFound", "NoSuchKey", "NoSuchUpload", "NoSuchBucket"];
    const DENIED: [&str; 4] = [
        "AccessDenied",
        "InvalidAccessKeyId",
        "SignatureDoesNotMatch",
        "Forbidden",
    ];
    if NOT_FOUND.iter().any(|code| message.contains(code)) {
        Error::NotFound(path.to_string())
    } else if DENIED.iter().any(|code| message.contains(code)) {
        Error::Auth(message.to_string())
    } else {
        Error::Network(message.to_string())
    }
}

pub(crate) fn timestamp(dt: &aws_sdk_s3::primitives::DateTime) -> Option<jiff::Timestamp> {
    jiff::Timestamp::from_second(dt.secs()).ok()
}

pub(crate) fn content_type(path: &str) -> Option<String> {
    mime_guess::from_path(path).first_raw().map(str::to_string)
}

/// Read exactly `size` bytes for a request body
pub(crate) async fn read_body(r: &mut (dyn AsyncRead + Send + Unpin), size: u64, path: &str) -> Result<Vec<u8>> {
    let mut body = Vec::with_capacity(size as usize);
    (&mut *r).take(size).read_to_end(&mut body).await?;
    if body.len() as u64 != size {
        return Err(Error::General(format!(
            "{path}: short input, expected {size} bytes, got {}",
            body.len()
        )));
    }
    Ok(body)
}

impl S3Storage {
    /// Create a client from a profile configuration
    pub async fn connect(profile: &Profile) -> Result<Self> {
        let bucket = profile
            .bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::Config(format!("profile '{}' needs a bucket", profile.name)))?;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(profile.region.clone()));

        // Static credentials when the profile has them, else the default chain
        if let (Some(access_key), Some(secret_key)) = (&profile.access_key, &profile.secret_key) {
            let credentials = aws_credential_types::Credentials::new(
                access_key,
                secret_key,
                None, // session token
                None, // expiry
                "xfer-static-credentials",
            );
            loader = loader.credentials_provider(credentials);
        }
        if let Some(endpoint) = &profile.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        // Path-style addressing for compatibility with S3-compatible servers
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(profile.bucket_lookup != "dns")
            .build();

        Ok(Self::with_client(
            aws_sdk_s3::Client::from_conf(s3_config),
            bucket,
            &profile.work_dir,
            &profile.region,
        ))
    }

    /// Wrap an existing client
    pub fn with_client(
        client: aws_sdk_s3::Client,
        bucket: impl Into<String>,
        work_dir: &str,
        region: impl Into<String>,
    ) -> Self {
        Self {
            inner: client,
            bucket: bucket.into(),
            work_dir: normalize_work_dir(work_dir),
            region: region.into(),
        }
    }

    /// Backend handle with multipart and signing enabled
    pub fn into_backend(self) -> Backend {
        Backend::full(Arc::new(self))
    }

    /// Get the underlying aws-sdk-s3 client
    pub fn inner(&self) -> &aws_sdk_s3::Client {
        &self.inner
    }

    /// Absolute object key for a relative path
    pub(crate) fn key(&self, path: &str) -> String {
        format!("{}{}", self.work_dir, path.trim_start_matches('/'))
    }

    /// Relative path for an absolute object key
    pub(crate) fn rel(&self, key: &str) -> String {
        key.strip_prefix(&self.work_dir).unwrap_or(key).to_string()
    }

    /// Lazily page through `list_objects_v2`
    fn list_objects(&self, prefix: String, delimiter: bool) -> ObjectStream {
        let client = self.inner.clone();
        let bucket = self.bucket.clone();
        let work_dir = self.work_dir.clone();

        // None once the last page was fetched, Some(token) before each page
        futures::stream::try_unfold(Some(None::<String>), move |state| {
            let client = client.clone();
            let bucket = bucket.clone();
            let prefix = prefix.clone();
            let work_dir = work_dir.clone();
            async move {
                let Some(token) = state else {
                    return Ok(None);
                };

                let mut request = client.list_objects_v2().bucket(&bucket).prefix(&prefix);
                if delimiter {
                    request = request.delimiter("/");
                }
                if let Some(token) = token {
                    request = request.continuation_token(token);
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(&e, &prefix))?;

                let rel = |key: &str| key.strip_prefix(&work_dir).unwrap_or(key).to_string();
                let mut items = Vec::new();
                for common in response.common_prefixes() {
                    if let Some(p) = common.prefix() {
                        items.push(Ok(Object::dir(rel(p))));
                    }
                }
                for object in response.contents() {
                    let key = object.key().unwrap_or_default();
                    // the directory marker itself is not a child
                    if key == prefix {
                        continue;
                    }
                    let size = object.size().unwrap_or(0).max(0) as u64;
                    let mut info = Object::file(rel(key), size)
                        .with_last_modified(object.last_modified().and_then(timestamp));
                    if let Some(etag) = object.e_tag() {
                        info.etag = Some(etag.trim_matches('"').to_string());
                    }
                    if let Some(sc) = object.storage_class() {
                        info.system_metadata
                            .insert("storage-class".into(), sc.as_str().to_string());
                    }
                    items.push(Ok(info));
                }

                let next = if response.is_truncated().unwrap_or(false) {
                    response
                        .next_continuation_token()
                        .map(|t| Some(t.to_string()))
                } else {
                    None
                };
                Ok::<_, Error>(Some((futures::stream::iter(items), next)))
            }
        })
        .try_flatten()
        .boxed()
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn metadata(&self) -> StorageMeta {
        StorageMeta {
            service: "s3".into(),
            name: self.bucket.clone(),
            work_dir: self.work_dir.clone(),
            location: Some(self.region.clone()),
            multipart: multipart::limits(),
        }
    }

    async fn stat(&self, path: &str) -> Result<Object> {
        let response = self
            .inner
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, path))?;

        let size = response.content_length().unwrap_or(0).max(0) as u64;
        let mut info = Object::file(path, size)
            .with_last_modified(response.last_modified().and_then(timestamp));

        if let Some(etag) = response.e_tag() {
            info.etag = Some(etag.trim_matches('"').to_string());
        }
        if let Some(ct) = response.content_type() {
            info.content_type = Some(ct.to_string());
        }
        if let Some(sc) = response.storage_class() {
            info.system_metadata
                .insert("storage-class".into(), sc.as_str().to_string());
        }
        if let Some(metadata) = response.metadata() {
            info.user_metadata = metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>();
        }

        Ok(info)
    }

    async fn read(
        &self,
        path: &str,
        range: Option<ByteRange>,
        w: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<u64> {
        let mut request = self.inner.get_object().bucket(&self.bucket).key(self.key(path));
        if let Some(range) = range {
            let Some(last) = range.last() else {
                return Ok(0);
            };
            request = request.range(format!("bytes={}-{last}", range.offset));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, path))?;
        let mut body = response.body.into_async_read();
        let n = tokio::io::copy(&mut body, w).await?;
        w.flush().await?;
        Ok(n)
    }

    async fn write(
        &self,
        path: &str,
        r: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
    ) -> Result<u64> {
        let body = read_body(r, size, path).await?;
        let mut request = self
            .inner
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .content_length(size as i64)
            .body(aws_sdk_s3::primitives::ByteStream::from(body));
        if let Some(ct) = content_type(path) {
            request = request.content_type(ct);
        }

        request
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, path))?;
        Ok(size)
    }

    async fn list(&self, path: &str, mode: ListMode) -> Result<ObjectStream> {
        match mode {
            ListMode::Dir => Ok(self.list_objects(self.key(&dir_key(path)), true)),
            ListMode::Prefix => Ok(self.list_objects(self.key(path), false)),
            ListMode::Part => self.list_uploads(path).await,
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner
            .delete_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, path))?;
        Ok(())
    }
}
