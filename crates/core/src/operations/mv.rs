//! Moving between two backends
//!
//! A move is a copy followed by deleting the source. The delete starts only
//! after every copy result has been drained without a single error.

use crate::error::Result;
use crate::operations::dual::DualOperator;
use crate::operations::result::{channel, Results, RESULT_DEPTH};
use crate::traits::Storage;

async fn delete_source(src: &dyn Storage, path: &str) -> Result<()> {
    src.delete(path)
        .await
        .map_err(|e| e.context("delete", path))
}

impl DualOperator {
    /// Copy through a single write, then delete the source
    pub fn move_file_via_write(&self, src_path: &str, dst_path: &str, size: u64) -> Results<()> {
        let copy = self.copy_file_via_write(src_path, dst_path, size);
        self.delete_after(copy, src_path, dst_path)
    }

    /// Copy as a multipart upload, then delete the source
    pub async fn move_file_via_multipart(
        &self,
        src_path: &str,
        dst_path: &str,
        size: u64,
    ) -> Result<Results<()>> {
        let copy = self.copy_file_via_multipart(src_path, dst_path, size).await?;
        Ok(self.delete_after(copy, src_path, dst_path))
    }

    /// Move one object, picking the write or multipart path by `threshold`
    pub async fn move_file(
        &self,
        src_path: &str,
        dst_path: &str,
        size: u64,
        threshold: u64,
    ) -> Result<Results<()>> {
        let copy = self.copy_file(src_path, dst_path, size, threshold).await?;
        Ok(self.delete_after(copy, src_path, dst_path))
    }

    /// Copy everything below `src_dir`, then delete it
    ///
    /// Copy results are forwarded as they arrive. The source tree is left
    /// untouched if any copy failed.
    pub fn move_recursively(&self, src_dir: &str, dst_dir: &str, threshold: u64) -> Results<()> {
        let (tx, results) = channel(RESULT_DEPTH);
        let mut copy = self.copy_recursively(src_dir, dst_dir, threshold);
        let src = self.src_operator();
        let src_dir = src_dir.to_string();

        tokio::spawn(async move {
            let mut failed = 0usize;
            while let Some(result) = copy.recv().await {
                if result.is_err() {
                    failed += 1;
                }
                tx.send(result).await;
            }
            if failed > 0 {
                tracing::warn!(path = %src_dir, failed, "copy failed, source kept");
                return;
            }

            let mut deletes = src.delete_recursively(&src_dir);
            while let Some(result) = deletes.recv().await {
                if !tx.send(result).await {
                    return;
                }
            }
        });
        results
    }

    /// Delete `src_path` once `copy` drained cleanly
    ///
    /// The source is never deleted when it is also the destination.
    fn delete_after(&self, copy: Results<()>, src_path: &str, dst_path: &str) -> Results<()> {
        let (tx, results) = channel(RESULT_DEPTH);
        let src = self.src.storage().clone();
        let distinct = self.ensure_distinct(src_path, dst_path);
        let src_path = src_path.to_string();

        tokio::spawn(async move {
            let copied = match copy.finish().await {
                Ok(()) => distinct,
                Err(e) => Err(e),
            };
            if let Err(e) = copied {
                tracing::warn!(path = %src_path, error = %e, "copy failed, source kept");
                tx.err(e).await;
                return;
            }
            tx.send(delete_source(&*src, &src_path).await).await;
        });
        results
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::memory::MemoryStorage;
    use crate::operations::dual::DualOperator;
    use crate::traits::MultipartLimits;

    fn pair() -> (Arc<MemoryStorage>, Arc<MemoryStorage>, DualOperator) {
        let (src, src_backend) = MemoryStorage::new("src").into_backend();
        let (dst, dst_backend) = MemoryStorage::new("dst")
            .with_limits(MultipartLimits {
                min_part_size: Some(1024),
                max_part_size: Some(1024),
                max_part_count: Some(100),
            })
            .into_backend();
        (src, dst, DualOperator::new(src_backend, dst_backend))
    }

    #[tokio::test]
    async fn test_move_file_deletes_source() {
        let (src, dst, op) = pair();
        src.insert("a.txt", "hello");

        op.move_file_via_write("a.txt", "b.txt", 5)
            .finish()
            .await
            .unwrap();

        assert!(!src.contains("a.txt"));
        assert_eq!(dst.get("b.txt").unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_failed_copy_keeps_source() {
        let (src, dst, op) = pair();
        src.insert("a.txt", "hello");
        dst.fail_path("b.txt");

        let err = op
            .move_file_via_write("a.txt", "b.txt", 5)
            .finish()
            .await
            .unwrap_err();

        assert!(matches!(err.root(), crate::error::Error::Network(_)));
        assert!(src.contains("a.txt"));
    }

    #[tokio::test]
    async fn test_failed_part_keeps_source() {
        let (src, dst, op) = pair();
        src.insert("big.bin", vec![1u8; 4000]);
        dst.fail_part(3);

        let results = op
            .move_file_via_multipart("big.bin", "big.bin", 4000)
            .await
            .unwrap();
        assert!(results.finish().await.is_err());
        assert!(src.contains("big.bin"));
        assert!(!dst.contains("big.bin"));
    }

    #[tokio::test]
    async fn test_move_recursively() {
        let (src, dst, op) = pair();
        src.insert("d/a.txt", "a");
        src.insert("d/sub/b.bin", vec![2u8; 3000]);
        src.insert("e.txt", "e");

        let errors = op.move_recursively("d/", "moved/", 1024).errors().await;

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(src.keys(), vec!["e.txt"]);
        assert_eq!(dst.keys(), vec!["moved/a.txt", "moved/sub/b.bin"]);
    }

    #[tokio::test]
    async fn test_move_recursively_keeps_tree_on_error() {
        let (src, dst, op) = pair();
        src.insert("d/a.txt", "a");
        src.insert("d/b.txt", "b");
        dst.fail_path("moved/b.txt");

        let errors = op.move_recursively("d/", "moved/", 1024).errors().await;

        assert_eq!(errors.len(), 1);
        assert_eq!(src.keys(), vec!["d/a.txt", "d/b.txt"]);
    }

    #[tokio::test]
    async fn test_move_onto_itself_keeps_source() {
        let (store, backend) = MemoryStorage::new("m").into_backend();
        store.insert("a.txt", "hello");
        let op = DualOperator::new(backend.clone(), backend);

        let err = op
            .move_file("a.txt", "./a.txt", 5, u64::MAX)
            .await
            .unwrap()
            .finish()
            .await
            .unwrap_err();
        assert!(matches!(err.root(), crate::error::Error::Conflict(_)));
        assert_eq!(store.get("a.txt").unwrap(), b"hello");

        let err = op.move_file("a.txt", "a.txt", 5, 1).await.unwrap_err();
        assert!(matches!(err, crate::error::Error::Conflict(_)));
        assert!(store.contains("a.txt"));
    }

    #[tokio::test]
    async fn test_move_tree_into_itself_keeps_tree() {
        let (store, backend) = MemoryStorage::new("m").into_backend();
        store.insert("d/a.txt", "a");
        let op = DualOperator::new(backend.clone(), backend);

        let errors = op.move_recursively("d/", "d/sub/", u64::MAX).errors().await;

        assert_eq!(errors.len(), 1);
        assert_eq!(store.keys(), vec!["d/a.txt"]);
    }
}
