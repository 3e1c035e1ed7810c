//! Copying between two backends

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::operations::dual::DualOperator;
use crate::operations::planner::{plan_parts, validate_part_size, PartPlan};
use crate::operations::pool::join_all;
use crate::operations::result::{channel, ResultSender, Results, RESULT_DEPTH};
use crate::operations::transfer::{pipe_through, Limits, MultipartUpload};
use crate::path::dir_key;
use crate::traits::Storage;

/// Stream `src_path` into a single write of `dst_path`
pub(crate) async fn write_file(
    src: Arc<dyn Storage>,
    dst: Arc<dyn Storage>,
    limits: &Limits,
    src_path: String,
    dst_path: String,
    size: u64,
) -> Result<()> {
    pipe_through(src, src_path, None, limits, move |mut r| async move {
        dst.write(&dst_path, &mut r, size)
            .await
            .map_err(|e| e.context("write", &dst_path))
    })
    .await?;
    Ok(())
}

impl DualOperator {
    /// Copy one object through a single streamed write
    pub fn copy_file_via_write(&self, src_path: &str, dst_path: &str, size: u64) -> Results<()> {
        let (tx, results) = channel(RESULT_DEPTH);
        if let Err(e) = self.ensure_distinct(src_path, dst_path) {
            tokio::spawn(async move {
                tx.err(e).await;
            });
            return results;
        }
        let src = self.src.storage().clone();
        let dst = self.dst.storage().clone();
        let limits = self.limits.clone();
        let (src_path, dst_path) = (src_path.to_string(), dst_path.to_string());

        tokio::spawn(async move {
            let result = write_file(src, dst, &limits, src_path.clone(), dst_path.clone(), size).await;
            if result.is_ok() {
                tracing::info!(src = %src_path, dst = %dst_path, bytes = size, "copied");
            }
            tx.send(result).await;
        });
        results
    }

    /// Copy one object as a multipart upload, one ranged read per part
    ///
    /// Capability and part-size checks happen before this returns; the
    /// transfer itself reports through the returned channel.
    pub async fn copy_file_via_multipart(
        &self,
        src_path: &str,
        dst_path: &str,
        size: u64,
    ) -> Result<Results<()>> {
        self.ensure_distinct(src_path, dst_path)?;
        let (upload, plan) = self.start_multipart(dst_path, size).await?;
        let (tx, results) = channel(RESULT_DEPTH);
        let this = self.clone();
        let src_path = src_path.to_string();

        tokio::spawn(async move {
            let result = this.transfer_parts(upload, plan, src_path).await;
            tx.send(result).await;
        });
        Ok(results)
    }

    /// Copy one object, picking the write or multipart path by `threshold`
    pub async fn copy_file(
        &self,
        src_path: &str,
        dst_path: &str,
        size: u64,
        threshold: u64,
    ) -> Result<Results<()>> {
        if self.use_multipart(size, threshold) {
            self.copy_file_via_multipart(src_path, dst_path, size).await
        } else {
            Ok(self.copy_file_via_write(src_path, dst_path, size))
        }
    }

    /// Copy every file below `src_dir` to the same relative path below
    /// `dst_dir`
    ///
    /// Files under `threshold` are copied concurrently as pool tasks. Larger
    /// files are driven one at a time from the listing task while their parts
    /// fan out through the pool.
    pub fn copy_recursively(&self, src_dir: &str, dst_dir: &str, threshold: u64) -> Results<()> {
        let (tx, results) = channel(RESULT_DEPTH);
        let this = self.clone();
        let src_dir = dir_key(src_dir);
        let dst_dir = dir_key(dst_dir);

        tokio::spawn(async move {
            if let Err(e) = this.ensure_outside(&src_dir, &dst_dir) {
                tx.err(e).await;
                return;
            }
            let mut listing = this.src_operator().list_recursively(&src_dir);
            let token = this.pool.token().child_token();
            let mut handles = Vec::new();

            while let Some(item) = listing.recv().await {
                if tx.is_closed() {
                    tracing::debug!(path = %src_dir, "consumer gone, stop scheduling copies");
                    break;
                }
                let object = match item {
                    Ok(object) => object,
                    Err(e) => {
                        tx.err(e).await;
                        continue;
                    }
                };
                if object.is_dir() {
                    continue;
                }

                let rel = object.path.strip_prefix(&src_dir).unwrap_or(&object.path);
                let dst_path = format!("{dst_dir}{rel}");
                let scheduled = this
                    .schedule_copy(&token, object.path.clone(), dst_path, object.size(), threshold, &tx, ())
                    .await;
                match scheduled {
                    Ok(Some(handle)) => handles.push(handle),
                    Ok(None) => {}
                    Err(e) => {
                        tx.err(e).await;
                        break;
                    }
                }
            }

            for e in join_all(handles).await {
                tx.err(e).await;
            }
        });
        results
    }

    /// Copy one file found by a directory walk and report `done` on success
    ///
    /// Returns the pool task for a write-path copy. A multipart copy runs to
    /// the end before this returns.
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn schedule_copy<T: Send + 'static>(
        &self,
        token: &CancellationToken,
        src_path: String,
        dst_path: String,
        size: u64,
        threshold: u64,
        tx: &ResultSender<T>,
        done: T,
    ) -> Result<Option<JoinHandle<()>>> {
        if self.use_multipart(size, threshold) {
            let result = self.multipart_copy(&src_path, &dst_path, size).await;
            tx.send(result.map(|()| done)).await;
            return Ok(None);
        }

        let src = self.src.storage().clone();
        let dst = self.dst.storage().clone();
        let limits = self.limits.clone();
        let tx = tx.clone();
        let task = async move {
            let result = write_file(src, dst, &limits, src_path, dst_path, size).await;
            tx.send(result.map(|()| done)).await;
        };
        let handle = self.pool.submit(token, task).await?;
        Ok(Some(handle))
    }

    pub(crate) async fn multipart_copy(&self, src_path: &str, dst_path: &str, size: u64) -> Result<()> {
        let (upload, plan) = self.start_multipart(dst_path, size).await?;
        self.transfer_parts(upload, plan, src_path.to_string()).await
    }

    async fn start_multipart(&self, dst_path: &str, size: u64) -> Result<(MultipartUpload, PartPlan)> {
        self.dst.require_multipart()?;
        let limits = self.dst.metadata().multipart;
        let plan = match self.part_size {
            Some(part_size) => {
                validate_part_size(&limits, size, part_size)?;
                PartPlan {
                    total_size: size,
                    part_size,
                }
            }
            None => plan_parts(&limits, size)?,
        };
        tracing::debug!(
            path = dst_path,
            size,
            part_size = plan.part_size,
            parts = plan.count(),
            "planned multipart copy"
        );
        let upload = MultipartUpload::create(&self.dst, &self.pool, dst_path).await?;
        Ok((upload, plan))
    }

    async fn transfer_parts(&self, mut upload: MultipartUpload, plan: PartPlan, src_path: String) -> Result<()> {
        for (index, range) in plan.ranges() {
            let src = self.src.storage().clone();
            let limits = self.limits.clone();
            let src_path = src_path.clone();
            let submitted = upload
                .submit(index, move |mp, session| async move {
                    pipe_through(src, src_path, Some(range), &limits, move |mut r| async move {
                        mp.write_multipart(&session, &mut r, range.size, index)
                            .await
                            .map_err(|e| e.context("write part", &session.path))
                    })
                    .await
                })
                .await;
            if let Err(e) = submitted {
                return upload.abort_with(e).await;
            }
        }
        upload.finish().await?;
        tracing::info!(src = %src_path, bytes = plan.total_size, parts = plan.count(), "copied in parts");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::error::Error;
    use crate::memory::MemoryStorage;
    use crate::operations::dual::DualOperator;
    use crate::traits::MultipartLimits;

    const MIB: u64 = 1024 * 1024;

    fn pattern(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i % 253) as u8).collect()
    }

    fn pair(limits: MultipartLimits) -> (Arc<MemoryStorage>, Arc<MemoryStorage>, DualOperator) {
        let (src, src_backend) = MemoryStorage::new("src").into_backend();
        let (dst, dst_backend) = MemoryStorage::new("dst").with_limits(limits).into_backend();
        let op = DualOperator::new(src_backend, dst_backend)
            .with_workers(3)
            .unwrap();
        (src, dst, op)
    }

    fn small_parts(part: u64) -> MultipartLimits {
        MultipartLimits {
            min_part_size: Some(part),
            max_part_size: Some(part),
            max_part_count: Some(10_000),
        }
    }

    #[tokio::test]
    async fn test_small_file_goes_through_write() {
        let (src, dst, op) = pair(MultipartLimits::default());
        src.insert("notes.txt", pattern(500));

        let results = op.copy_file("notes.txt", "notes.txt", 500, MIB).await.unwrap();
        let (done, errors) = results.partition().await;

        assert!(errors.is_empty());
        assert_eq!(done.len(), 1);
        assert_eq!(dst.get("notes.txt").unwrap(), pattern(500));
        assert_eq!(dst.writes(), vec!["notes.txt"]);
        assert!(dst.completions().is_empty());
    }

    #[test]
    fn test_multipart_plan_for_large_object() {
        // 300 MiB against S3-like limits; only the plan is checked here
        let limits = MultipartLimits {
            min_part_size: Some(5 * MIB),
            max_part_size: Some(128 * MIB),
            max_part_count: Some(10_000),
        };
        let plan = crate::operations::planner::plan_parts(&limits, 300 * MIB).unwrap();
        let sizes: Vec<u64> = plan.ranges().map(|(_, r)| r.size / MIB).collect();
        assert_eq!(sizes, vec![128, 128, 44]);
    }

    #[tokio::test]
    async fn test_multipart_copy_completes_in_order() {
        let (src, dst, op) = pair(small_parts(1024));
        let data = pattern(3000);
        src.insert("big.bin", data.clone());

        op.copy_file_via_multipart("big.bin", "copy.bin", 3000)
            .await
            .unwrap()
            .finish()
            .await
            .unwrap();

        assert_eq!(dst.get("copy.bin").unwrap(), data);
        assert_eq!(dst.completions(), vec![vec![0, 1, 2]]);
        assert!(dst.writes().is_empty());
    }

    #[tokio::test]
    async fn test_write_and_multipart_paths_agree() {
        let part = 1024u64;
        for size in [0, 1, part - 1, part, part + 1, 10 * part] {
            let (src, dst, op) = pair(small_parts(part));
            let data = pattern(size as usize);
            src.insert("obj", data.clone());

            op.copy_file_via_write("obj", "via-write", size)
                .finish()
                .await
                .unwrap();
            op.copy_file_via_multipart("obj", "via-parts", size)
                .await
                .unwrap()
                .finish()
                .await
                .unwrap();

            assert_eq!(dst.get("via-write").unwrap(), data, "size {size}");
            assert_eq!(dst.get("via-parts").unwrap(), data, "size {size}");
        }
    }

    #[tokio::test]
    async fn test_multipart_requires_capability() {
        let (src, src_backend) = MemoryStorage::new("src").into_backend();
        let (_dst, dst_backend) = MemoryStorage::new("dst").into_basic_backend();
        src.insert("big.bin", pattern(10));
        let op = DualOperator::new(src_backend, dst_backend);

        let err = op
            .copy_file_via_multipart("big.bin", "big.bin", 10)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::UnsupportedFeature(_)));
    }

    #[tokio::test]
    async fn test_part_failure_aborts_session() {
        let (src, dst, op) = pair(small_parts(1024));
        dst.fail_part(2);
        src.insert("big.bin", pattern(5000));

        let err = op
            .copy_file_via_multipart("big.bin", "big.bin", 5000)
            .await
            .unwrap()
            .finish()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PartFailed { index: 2, .. }));
        assert!(!dst.contains("big.bin"));
        assert!(dst.completions().is_empty());
        assert_eq!(dst.aborted().len(), 1);
    }

    #[tokio::test]
    async fn test_part_size_is_validated() {
        let (src, _dst, op) = pair(small_parts(1024));
        src.insert("big.bin", pattern(5000));
        let op = op.with_part_size(Some(100));

        let err = op
            .copy_file_via_multipart("big.bin", "big.bin", 5000)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::SizePolicy(_)));
    }

    #[tokio::test]
    async fn test_copy_recursively_rewrites_prefix() {
        let (src, dst, op) = pair(small_parts(1024));
        src.insert("photos/a.jpg", pattern(10));
        src.insert("photos/2024/b.jpg", pattern(2000));
        src.insert("photos/2024/deep/c.jpg", pattern(20));
        src.insert("other/d.jpg", pattern(5));

        let errors = op
            .copy_recursively("photos", "backup/photos/", 1024)
            .errors()
            .await;

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            dst.keys(),
            vec![
                "backup/photos/2024/b.jpg",
                "backup/photos/2024/deep/c.jpg",
                "backup/photos/a.jpg",
            ]
        );
        // only the file over the threshold went up in parts
        assert_eq!(dst.completions(), vec![vec![0, 1]]);
        assert_eq!(dst.get("backup/photos/2024/b.jpg").unwrap(), pattern(2000));
    }

    #[tokio::test]
    async fn test_copy_recursively_reports_failures_and_continues() {
        let (src, dst, op) = pair(MultipartLimits::default());
        src.insert("d/a.txt", "a");
        src.insert("d/b.txt", "b");
        src.fail_path("d/a.txt");

        let (done, errors) = op.copy_recursively("d/", "e/", u64::MAX).partition().await;

        assert_eq!(done.len(), 1);
        assert_eq!(errors.len(), 1);
        assert_eq!(dst.keys(), vec!["e/b.txt"]);
    }

    #[tokio::test]
    async fn test_copy_onto_itself_is_refused() {
        let (store, backend) = MemoryStorage::new("m").into_backend();
        store.insert("a.txt", "hello");
        let op = DualOperator::new(backend.clone(), backend);

        let err = op
            .copy_file_via_write("a.txt", "./a.txt", 5)
            .finish()
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(err.to_string(), "Conflict: 'a.txt' and './a.txt' are the same file");
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_consumer_stops_scheduling() {
        let (src, dst, op) = pair(MultipartLimits::default());
        for i in 0..20 {
            src.insert(&format!("d/{i}.txt"), "x");
        }

        drop(op.copy_recursively("d/", "out/", MIB));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(dst.keys().is_empty(), "{:?}", dst.keys());
    }
}
