//! Building blocks shared by the transfer operations
//!
//! [`pipe_through`] streams one source read into one destination write through
//! an in-process pipe. [`MultipartUpload`] drives one multipart session: parts
//! fan out through the worker pool, their outcomes funnel back through a
//! channel drained by a collector task, and completion only ever sees a sorted,
//! gap-free part list.

use std::future::Future;
use std::sync::Arc;

use tokio::io::DuplexStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::limit::{SpeedLimiter, Throttled};
use crate::operations::pool::{join_all, WorkerPool};
use crate::operations::result::{channel, ResultSender, Results, RESULT_DEPTH};
use crate::traits::{Backend, ByteRange, MultipartSession, Multiparter, Part, Storage};

/// Buffer between the reading and the writing half of a pipe
const PIPE_CAPACITY: usize = 256 * 1024;

/// Read and write limiters shared by every stream of one operator
#[derive(Debug, Clone, Default)]
pub(crate) struct Limits {
    pub(crate) read: Option<Arc<SpeedLimiter>>,
    pub(crate) write: Option<Arc<SpeedLimiter>>,
}

impl Limits {
    /// Build a limiter for an optional bytes-per-second rate
    pub(crate) fn limiter(rate: Option<u64>) -> Result<Option<Arc<SpeedLimiter>>> {
        rate.map(|r| SpeedLimiter::new(r).map(Arc::new)).transpose()
    }
}

fn is_broken_pipe(err: &Error) -> bool {
    matches!(err.root(), Error::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe)
}

/// Read `src_path` (or a range of it) into a pipe while `write` drains the
/// other end
///
/// The writing half of the pipe is dropped as soon as the read finishes, with
/// or without error, so `write` always sees end of input.
pub(crate) async fn pipe_through<T, F, Fut>(
    src: Arc<dyn Storage>,
    src_path: String,
    range: Option<ByteRange>,
    limits: &Limits,
    write: F,
) -> Result<T>
where
    F: FnOnce(Throttled<DuplexStream>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let (pipe_w, pipe_r) = tokio::io::duplex(PIPE_CAPACITY);
    let read_limit = limits.read.clone();

    let reader = async move {
        let mut pipe_w = Throttled::new(pipe_w, read_limit);
        src.read(&src_path, range, &mut pipe_w)
            .await
            .map_err(|e| e.context("read", &src_path))
    };
    let writer = write(Throttled::new(pipe_r, limits.write.clone()));

    match tokio::join!(reader, writer) {
        (Ok(_), Ok(value)) => Ok(value),
        (Ok(_), Err(e)) => Err(e),
        // the read only broke because the destination hung up first
        (Err(e), Err(w)) if is_broken_pipe(&e) => Err(w),
        (Err(e), _) => Err(e),
    }
}

struct Collected {
    parts: Vec<Part>,
    failure: Option<Error>,
}

async fn collect_parts(mut results: Results<Part>, token: CancellationToken) -> Collected {
    let mut parts = Vec::new();
    let mut failure = None;
    while let Some(result) = results.recv().await {
        match result {
            Ok(part) => parts.push(part),
            Err(e) => {
                if failure.is_none() {
                    // stop the siblings, the session is going to be aborted
                    token.cancel();
                    failure = Some(e);
                } else {
                    tracing::debug!(error = %e, "additional part failure");
                }
            }
        }
    }
    Collected { parts, failure }
}

/// One in-flight multipart session on a destination backend
pub(crate) struct MultipartUpload {
    multiparter: Arc<dyn Multiparter>,
    session: MultipartSession,
    pool: WorkerPool,
    token: CancellationToken,
    parts: ResultSender<Part>,
    collector: JoinHandle<Collected>,
    handles: Vec<JoinHandle<()>>,
    submitted: u32,
}

impl MultipartUpload {
    /// Open a session at `path`; fails fast when `dst` cannot do multipart
    pub(crate) async fn create(dst: &Backend, pool: &WorkerPool, path: &str) -> Result<Self> {
        let multiparter = dst.require_multipart()?.clone();
        let session = multiparter
            .create_multipart(path)
            .await
            .map_err(|e| e.context("create multipart", path))?;
        tracing::debug!(path, id = %session.multipart_id, "multipart session created");

        let token = pool.token().child_token();
        let (parts, results) = channel(RESULT_DEPTH);
        let collector = tokio::spawn(collect_parts(results, token.clone()));

        Ok(Self {
            multiparter,
            session,
            pool: pool.clone(),
            token,
            parts,
            collector,
            handles: Vec::new(),
            submitted: 0,
        })
    }

    /// Schedule part `index`; `write` builds the future that writes it
    ///
    /// Waits for a free worker. Fails with `Error::Cancelled` once a part failed.
    pub(crate) async fn submit<F, Fut>(&mut self, index: u32, write: F) -> Result<()>
    where
        F: FnOnce(Arc<dyn Multiparter>, MultipartSession) -> Fut,
        Fut: Future<Output = Result<Part>> + Send + 'static,
    {
        let part = write(self.multiparter.clone(), self.session.clone());
        let parts = self.parts.clone();
        let token = self.token.clone();
        let task = async move {
            let result = tokio::select! {
                _ = token.cancelled() => Err(Error::Cancelled),
                result = part => result,
            };
            parts
                .send(result.map_err(|e| Error::PartFailed {
                    index,
                    source: Box::new(e),
                }))
                .await;
        };

        let handle = self.pool.submit(&self.token, task).await?;
        self.handles.push(handle);
        self.submitted += 1;
        Ok(())
    }

    /// Wait for every part, then complete the session
    pub(crate) async fn finish(self) -> Result<()> {
        self.close(None).await
    }

    /// Wait for every part, then abort the session and report `err` unless a
    /// part failure came first
    pub(crate) async fn abort_with(self, err: Error) -> Result<()> {
        self.close(Some(err)).await
    }

    async fn close(self, early: Option<Error>) -> Result<()> {
        let Self {
            multiparter,
            session,
            token,
            parts,
            collector,
            handles,
            submitted,
            ..
        } = self;

        drop(parts);
        let panics = join_all(handles).await;
        let Collected {
            parts: mut written,
            failure,
        } = collector
            .await
            .map_err(|e| Error::General(format!("part collector failed: {e}")))?;

        if let Some(err) = failure.or(early).or_else(|| panics.into_iter().next()) {
            token.cancel();
            abort(&*multiparter, &session).await;
            return Err(err);
        }

        written.sort_by_key(|part| part.index);
        let gap_free = written
            .iter()
            .enumerate()
            .all(|(i, part)| part.index as usize == i);
        if !gap_free || written.len() != submitted as usize {
            abort(&*multiparter, &session).await;
            return Err(Error::MultipartIncomplete {
                expected: submitted,
                completed: written.len() as u32,
            });
        }

        multiparter
            .complete_multipart(&session, &written)
            .await
            .map_err(|e| e.context("complete multipart", &session.path))?;
        tracing::debug!(path = %session.path, parts = written.len(), "multipart session completed");
        Ok(())
    }
}

async fn abort(multiparter: &dyn Multiparter, session: &MultipartSession) {
    tracing::warn!(path = %session.path, id = %session.multipart_id, "aborting multipart session");
    if let Err(e) = multiparter.abort_multipart(session).await {
        tracing::warn!(path = %session.path, error = %e, "failed to abort multipart session");
    }
}
