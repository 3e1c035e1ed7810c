//! One-way directory synchronization

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;

use crate::config::DEFAULT_MULTIPART_THRESHOLD_BYTES;
use crate::error::Result;
use crate::operations::dual::DualOperator;
use crate::operations::pool::join_all;
use crate::operations::result::{channel, ResultSender, Results, RESULT_DEPTH};
use crate::operations::single::SingleOperator;
use crate::path::dir_key;
use crate::traits::Object;

/// Policy for [`DualOperator::sync_dir`]
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Descend into sub-directories
    pub recursive: bool,
    /// Files at least this large go up in parts
    pub multipart_threshold: u64,
    /// Only update files the destination already has
    pub existing: bool,
    /// Skip files the destination already has
    pub ignore_existing: bool,
    /// Skip files whose destination copy is not older than the source
    pub update: bool,
    /// Delete destination files the source does not have
    pub remove: bool,
    /// Skip relative paths matching this pattern...
    pub exclude: Option<Regex>,
    /// ...unless they also match this one
    pub include: Option<Regex>,
    /// Several sources share one destination; destination paths keep the full
    /// source path instead of the path relative to the source directory
    pub multi_arg: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            recursive: false,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD_BYTES,
            existing: false,
            ignore_existing: false,
            update: false,
            remove: false,
            exclude: None,
            include: None,
            multi_arg: false,
        }
    }
}

impl SyncOptions {
    /// Whether `rel` is filtered out by the exclude/include pair
    pub fn is_filtered(&self, rel: &str) -> bool {
        match &self.exclude {
            Some(exclude) if exclude.is_match(rel) => {
                !self.include.as_ref().is_some_and(|include| include.is_match(rel))
            }
            _ => false,
        }
    }

    /// Whether `src` should be transferred given what the destination holds
    ///
    /// `existing` is `None` when the destination lacks the path, otherwise the
    /// destination copy's modification time if known.
    fn selects(&self, rel: &str, src: &Object, existing: Option<Option<jiff::Timestamp>>) -> bool {
        match existing {
            Some(dst_modified) => {
                if self.ignore_existing {
                    return false;
                }
                if self.update && !src.is_dir() {
                    if let (Some(src_modified), Some(dst_modified)) = (src.last_modified, dst_modified) {
                        if dst_modified >= src_modified {
                            return false;
                        }
                    }
                }
            }
            None if self.existing => return false,
            None => {}
        }
        !self.is_filtered(rel)
    }
}

/// One change made by a sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", content = "path", rename_all = "lowercase")]
pub enum SyncAction {
    /// File copied to the destination
    Copied(String),
    /// Destination-only file deleted
    Removed(String),
}

/// Destination files by path relative to `dir`
async fn inventory(
    dst: &SingleOperator,
    dir: &str,
    recursive: bool,
) -> Result<HashMap<String, Option<jiff::Timestamp>>> {
    let mut listing = if recursive {
        dst.list_recursively(dir)
    } else {
        dst.list(dir)
    };
    let mut files = HashMap::new();
    while let Some(item) = listing.recv().await {
        let object = match item {
            Ok(object) => object,
            // a destination that does not exist yet holds nothing
            Err(e) if e.is_not_found() => break,
            Err(e) => return Err(e),
        };
        if object.is_dir() {
            continue;
        }
        let rel = object.path.strip_prefix(dir).unwrap_or(&object.path);
        files.insert(rel.to_string(), object.last_modified);
    }
    Ok(files)
}

impl DualOperator {
    /// Make `dst_dir` reflect `src_dir` according to `opts`
    ///
    /// Every skip or filter decision is taken before any byte of a file moves.
    /// Destination-only files are removed after all copies finished, and only
    /// when the source listing completed.
    pub fn sync_dir(&self, src_dir: &str, dst_dir: &str, opts: SyncOptions) -> Results<SyncAction> {
        let (tx, results) = channel(RESULT_DEPTH);
        let this = self.clone();
        let src_dir = dir_key(src_dir);
        let dst_dir = dir_key(dst_dir);
        tokio::spawn(async move {
            this.run_sync(src_dir, dst_dir, opts, tx).await;
        });
        results
    }

    async fn run_sync(&self, src_dir: String, dst_dir: String, opts: SyncOptions, tx: ResultSender<SyncAction>) {
        if let Err(e) = self.ensure_outside(&src_dir, &dst_dir) {
            tx.err(e).await;
            return;
        }
        let dst = self.dst_operator();
        if let Err(e) = self.dst.storage().create_dir(&dst_dir).await {
            tx.err(e.context("create dir", &dst_dir)).await;
            return;
        }
        let mut remaining = match inventory(&dst, &dst_dir, opts.recursive).await {
            Ok(files) => files,
            Err(e) => {
                tx.err(e).await;
                return;
            }
        };

        let src = self.src_operator();
        let mut listing = if opts.recursive {
            src.list_recursively(&src_dir)
        } else {
            src.list(&src_dir)
        };
        let token = self.pool.token().child_token();
        let mut handles = Vec::new();
        let mut complete = true;

        while let Some(item) = listing.recv().await {
            let object = match item {
                Ok(object) => object,
                Err(e) => {
                    complete = false;
                    tx.err(e).await;
                    break;
                }
            };
            if object.is_dir() && !opts.recursive {
                continue;
            }

            let rel = object
                .path
                .strip_prefix(&src_dir)
                .unwrap_or(&object.path)
                .to_string();
            let dst_rel = if opts.multi_arg {
                object.path.clone()
            } else {
                rel.clone()
            };
            let existing = remaining.remove(&dst_rel);
            if !opts.selects(&rel, &object, existing) {
                tracing::debug!(path = %object.path, "skipped");
                continue;
            }

            let dst_path = format!("{dst_dir}{dst_rel}");
            if object.is_dir() {
                if let Err(e) = self.dst.storage().create_dir(&dst_path).await {
                    tx.err(e.context("create dir", &dst_path)).await;
                }
                continue;
            }

            let reported = if opts.multi_arg { object.path.clone() } else { rel };
            let scheduled = self
                .schedule_copy(
                    &token,
                    object.path.clone(),
                    dst_path,
                    object.size(),
                    opts.multipart_threshold,
                    &tx,
                    SyncAction::Copied(reported),
                )
                .await;
            match scheduled {
                Ok(Some(handle)) => handles.push(handle),
                Ok(None) => {}
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

        if !opts.remove {
            return;
        }
        if !complete {
            tracing::warn!(path = %dst_dir, "source listing incomplete, nothing removed");
            return;
        }
        let mut stale: Vec<String> = remaining.into_keys().collect();
        stale.sort();
        for rel in stale {
            let path = format!("{dst_dir}{rel}");
            let result = dst.delete(&path).await.map(|()| SyncAction::Removed(rel));
            if !tx.send(result).await {
                return;
            }
        }
    }
}
