//! Recursive and multipart deletion

use futures::StreamExt;

use crate::error::Result;
use crate::operations::pool::join_all;
use crate::operations::result::{channel, Results, RESULT_DEPTH};
use crate::operations::single::SingleOperator;
use crate::path::dir_key;
use crate::traits::ListMode;

impl SingleOperator {
    /// Delete `path` and everything below it
    ///
    /// Files are deleted concurrently through the pool. Directories go last,
    /// deepest first, and only when the listing itself completed.
    pub fn delete_recursively(&self, path: &str) -> Results<()> {
        let (tx, results) = channel(RESULT_DEPTH);
        let root = dir_key(path);
        let mut listing = self.list_recursively(&root);
        let storage = self.storage();
        let pool = self.pool.clone();

        tokio::spawn(async move {
            let token = pool.token().child_token();
            let mut handles = Vec::new();
            let mut dirs = Vec::new();
            let mut complete = true;

            while let Some(item) = listing.recv().await {
                let object = match item {
                    Ok(object) => object,
                    Err(e) => {
                        complete = false;
                        tx.err(e).await;
                        continue;
                    }
                };
                if object.is_dir() {
                    dirs.push(object.path);
                    continue;
                }

                let storage = storage.clone();
                let sender = tx.clone();
                let task = async move {
                    let result = storage
                        .delete(&object.path)
                        .await
                        .map_err(|e| e.context("delete", &object.path));
                    sender.send(result).await;
                };
                match pool.submit(&token, task).await {
                    Ok(handle) => handles.push(handle),
                    Err(e) => {
                        complete = false;
                        tx.err(e).await;
                        break;
                    }
                }
            }

            for e in join_all(handles).await {
                tx.err(e).await;
            }
            if !complete {
                tracing::warn!(path = %root, "listing incomplete, keeping directories");
                return;
            }

            if !root.is_empty() {
                dirs.push(root);
            }
            for dir in dirs {
                let result = storage
                    .delete(&dir)
                    .await
                    .map_err(|e| e.context("delete", &dir));
                if !tx.send(result).await {
                    return;
                }
            }
        });
        results
    }

    /// Abort the in-progress multipart uploads exactly at `path`
    pub fn delete_multipart(&self, path: &str) -> Result<Results<()>> {
        self.abort_uploads(path, true)
    }

    /// Abort every in-progress multipart upload whose path starts with `path`
    pub fn delete_multipart_via_recursively(&self, path: &str) -> Result<Results<()>> {
        self.abort_uploads(path, false)
    }

    fn abort_uploads(&self, path: &str, exact: bool) -> Result<Results<()>> {
        let multiparter = self.backend.require_multipart()?.clone();
        let storage = self.storage();
        let pool = self.pool.clone();
        let path = path.to_string();
        let (tx, results) = channel(RESULT_DEPTH);

        tokio::spawn(async move {
            let mut stream = match storage.list(&path, ListMode::Part).await {
                Ok(stream) => stream,
                Err(e) => {
                    tx.err(e.context("list multipart", &path)).await;
                    return;
                }
            };

            let token = pool.token().child_token();
            let mut handles = Vec::new();
            while let Some(item) = stream.next().await {
                let object = match item {
                    Ok(object) => object,
                    Err(e) => {
                        tx.err(e.context("list multipart", &path)).await;
                        break;
                    }
                };
                if exact && object.path != path {
                    continue;
                }
                let Some(session) = object.session() else {
                    continue;
                };

                let multiparter = multiparter.clone();
                let sender = tx.clone();
                let task = async move {
                    let result = multiparter
                        .abort_multipart(&session)
                        .await
                        .map_err(|e| e.context("abort multipart", &session.path));
                    if result.is_ok() {
                        tracing::debug!(path = %session.path, id = %session.multipart_id, "multipart upload aborted");
                    }
                    sender.send(result).await;
                };
                match pool.submit(&token, task).await {
                    Ok(handle) => handles.push(handle),
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
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::error::Error;
    use crate::memory::MemoryStorage;
    use crate::operations::single::SingleOperator;

    fn operator() -> (Arc<MemoryStorage>, SingleOperator) {
        let (mem, backend) = MemoryStorage::new("m").into_backend();
        let op = SingleOperator::new(backend).with_workers(2).unwrap();
        (mem, op)
    }

    #[tokio::test]
    async fn test_delete_recursively_removes_subtree() {
        let (mem, op) = operator();
        mem.insert("a/b.txt", "b");
        mem.insert("a/sub/c.txt", "c");
        mem.insert("a/sub/deep/d.txt", "d");
        mem.insert("keep.txt", "k");

        let (done, errors) = op.delete_recursively("a").partition().await;
        assert!(errors.is_empty(), "{errors:?}");
        // three files, two sub-directories and the root
        assert_eq!(done.len(), 6);
        assert_eq!(mem.keys(), vec!["keep.txt"]);
    }

    #[tokio::test]
    async fn test_delete_multipart_exact() {
        let (mem, op) = operator();
        let target = mem.start_upload("big.bin");
        let other = mem.start_upload("big.bin.2");

        op.delete_multipart("big.bin").unwrap().finish().await.unwrap();

        assert_eq!(mem.aborted(), vec![target]);
        assert_eq!(mem.uploads(), vec![("big.bin.2".to_string(), other)]);
    }

    #[tokio::test]
    async fn test_delete_multipart_by_prefix() {
        let (mem, op) = operator();
        mem.start_upload("backups/a.tar");
        mem.start_upload("backups/b.tar");
        mem.start_upload("other.tar");

        let (done, errors) = op
            .delete_multipart_via_recursively("backups/")
            .unwrap()
            .partition()
            .await;
        assert!(errors.is_empty());
        assert_eq!(done.len(), 2);
        assert_eq!(mem.uploads().len(), 1);
        assert_eq!(mem.uploads()[0].0, "other.tar");
    }

    #[tokio::test]
    async fn test_delete_multipart_requires_capability() {
        let (_mem, backend) = MemoryStorage::new("m").into_basic_backend();
        let op = SingleOperator::new(backend);
        let err = op.delete_multipart("x").err().unwrap();
        assert!(matches!(err, Error::UnsupportedFeature(_)));
    }
}
