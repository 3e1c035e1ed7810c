//! Multipart upload and URL signing for S3
//!
//! Part indexes are zero-based in xfer; S3 part numbers start at 1.

use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use futures::StreamExt;
use tokio::io::AsyncRead;

use xfer_core::{
    Error, HttpSigner, MultipartLimits, MultipartSession, Multiparter, Object, ObjectStream,
    Part, Result,
};

use crate::client::{S3Storage, content_type, map_sdk_error, read_body, timestamp};

/// Minimum part size: 5 MiB (S3 requirement, except for the last part)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Maximum part size: 5 GiB
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Maximum number of parts: 10,000 (S3 limit)
pub const MAX_PARTS: u64 = 10_000;

/// Multipart limits S3 enforces
pub fn limits() -> MultipartLimits {
    MultipartLimits {
        min_part_size: Some(MIN_PART_SIZE),
        max_part_size: Some(MAX_PART_SIZE),
        max_part_count: Some(MAX_PARTS),
    }
}

/// S3 part number for a zero-based part index
fn part_number(index: u32) -> Result<i32> {
    if u64::from(index) >= MAX_PARTS {
        return Err(Error::SizePolicy(format!(
            "part index {index} exceeds the S3 limit of {MAX_PARTS} parts"
        )));
    }
    Ok(index as i32 + 1)
}

fn completed_parts(parts: &[Part]) -> Result<Vec<CompletedPart>> {
    let mut sorted: Vec<&Part> = parts.iter().collect();
    sorted.sort_by_key(|p| p.index);
    sorted
        .into_iter()
        .map(|p| {
            Ok(CompletedPart::builder()
                .part_number(part_number(p.index)?)
                .set_e_tag(p.etag.clone())
                .build())
        })
        .collect()
}

impl S3Storage {
    /// In-progress uploads whose key starts with `path`
    pub(crate) async fn list_uploads(&self, path: &str) -> Result<ObjectStream> {
        let client = self.inner.clone();
        let bucket = self.bucket.clone();
        let prefix = self.key(path);
        let this = self.clone();

        // (key marker, upload id marker); None once the last page was fetched
        let stream = futures::stream::try_unfold(
            Some((None::<String>, None::<String>)),
            move |state| {
                let client = client.clone();
                let bucket = bucket.clone();
                let prefix = prefix.clone();
                let this = this.clone();
                async move {
                    let Some((key_marker, upload_marker)) = state else {
                        return Ok(None);
                    };
                    let response = client
                        .list_multipart_uploads()
                        .bucket(&bucket)
                        .prefix(&prefix)
                        .set_key_marker(key_marker)
                        .set_upload_id_marker(upload_marker)
                        .send()
                        .await
                        .map_err(|e| map_sdk_error(&e, &prefix))?;

                    let items: Vec<Result<Object>> = response
                        .uploads()
                        .iter()
                        .filter_map(|upload| {
                            let key = upload.key()?;
                            let id = upload.upload_id()?;
                            Some(Ok(Object::part(this.rel(key), id)
                                .with_last_modified(upload.initiated().and_then(timestamp))))
                        })
                        .collect();

                    let next = if response.is_truncated().unwrap_or(false) {
                        Some((
                            response.next_key_marker().map(str::to_string),
                            response.next_upload_id_marker().map(str::to_string),
                        ))
                    } else {
                        None
                    };
                    Ok::<_, Error>(Some((futures::stream::iter(items), next)))
                }
            },
        );

        Ok(futures::TryStreamExt::try_flatten(stream).boxed())
    }
}

#[async_trait]
impl Multiparter for S3Storage {
    async fn create_multipart(&self, path: &str) -> Result<MultipartSession> {
        let mut request = self
            .inner
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(self.key(path));
        if let Some(ct) = content_type(path) {
            request = request.content_type(ct);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, path))?;
        let upload_id = response
            .upload_id()
            .ok_or_else(|| Error::General(format!("{path}: no upload id returned")))?;

        tracing::debug!(path, upload_id, "multipart upload created");
        Ok(MultipartSession::new(path, upload_id))
    }

    async fn write_multipart(
        &self,
        session: &MultipartSession,
        r: &mut (dyn AsyncRead + Send + Unpin),
        size: u64,
        index: u32,
    ) -> Result<Part> {
        let number = part_number(index)?;
        let body = read_body(r, size, &session.path).await?;

        let response = self
            .inner
            .upload_part()
            .bucket(&self.bucket)
            .key(self.key(&session.path))
            .upload_id(&session.multipart_id)
            .part_number(number)
            .content_length(size as i64)
            .body(aws_sdk_s3::primitives::ByteStream::from(body))
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, &session.path))?;

        Ok(Part {
            index,
            size,
            etag: response.e_tag().map(str::to_string),
        })
    }

    async fn complete_multipart(&self, session: &MultipartSession, parts: &[Part]) -> Result<()> {
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts(parts)?))
            .build();

        self.inner
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(self.key(&session.path))
            .upload_id(&session.multipart_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, &session.path))?;
        Ok(())
    }

    async fn abort_multipart(&self, session: &MultipartSession) -> Result<()> {
        self.inner
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(self.key(&session.path))
            .upload_id(&session.multipart_id)
            .send()
            .await
            .map_err(|e| map_sdk_error(&e, &session.path))?;
        Ok(())
    }
}

#[async_trait]
impl HttpSigner for S3Storage {
    async fn sign_read(&self, path: &str, expire: Duration) -> Result<String> {
        let config = PresigningConfig::expires_in(expire)
            .map_err(|e| Error::General(format!("invalid expiry {expire:?}: {e}")))?;

        let request = self
            .inner
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(path))
            .presigned(config)
            .await
            .map_err(|e| map_sdk_error(&e, path))?;
        Ok(request.uri().to_string())
    }
}
