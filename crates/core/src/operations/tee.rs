//! Writing standard input to a backend

use std::future::Future;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Result;
use crate::limit::Throttled;
use crate::operations::planner::{plan_part_size, DEFAULT_PART_SIZE};
use crate::operations::single::SingleOperator;
use crate::operations::transfer::MultipartUpload;

/// Read up to `size` bytes, stopping early only at end of input
async fn read_chunk<R>(input: &mut R, size: u64) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = Vec::new();
    (&mut *input).take(size).read_to_end(&mut chunk).await?;
    Ok(chunk)
}

impl SingleOperator {
    /// Write everything read from `input` to `path`
    ///
    /// `expected_size` picks the chunk size. Input that fits in one chunk is
    /// written directly; anything longer goes up as a multipart upload, one
    /// part per chunk, so the whole input is never held in memory.
    pub async fn tee_run_via_pipe<R>(&self, path: &str, input: &mut R, expected_size: u64) -> Result<u64>
    where
        R: AsyncRead + Send + Unpin + ?Sized,
    {
        if !self.backend.capabilities().multipart {
            tracing::debug!(path, "backend lacks multipart, buffering input");
            let data = read_chunk(input, u64::MAX).await?;
            return self.write_buffer(path, data).await;
        }

        let limits = self.backend.metadata().multipart;
        let part_size = match plan_part_size(&limits, expected_size)? {
            0 => DEFAULT_PART_SIZE,
            planned => planned,
        }
        .max(limits.min_part_size.unwrap_or(1));

        let first = read_chunk(input, part_size).await?;
        if (first.len() as u64) < part_size {
            return self.write_buffer(path, first).await;
        }
        let second = read_chunk(input, part_size).await?;
        if second.is_empty() {
            return self.write_buffer(path, first).await;
        }

        tracing::debug!(path, part_size, "input exceeds one chunk, switching to multipart");
        let mut upload = MultipartUpload::create(&self.backend, &self.pool, path).await?;
        let mut total = 0u64;
        let mut index = 0u32;
        let mut chunk = first;
        let mut next = Some(second);

        loop {
            let size = chunk.len() as u64;
            total += size;
            let write_limit = self.limits.write.clone();
            let submitted = upload
                .submit(index, move |mp, session| async move {
                    let mut r = Throttled::new(&chunk[..], write_limit);
                    mp.write_multipart(&session, &mut r, size, index).await
                })
                .await;
            if let Err(e) = submitted {
                return upload.abort_with(e).await.map(|()| total);
            }
            index += 1;

            chunk = match next.take() {
                Some(chunk) => chunk,
                None => match read_chunk(input, part_size).await {
                    Ok(chunk) if chunk.is_empty() => break,
                    Ok(chunk) => chunk,
                    Err(e) => return upload.abort_with(e).await.map(|()| total),
                },
            };
        }

        upload.finish().await?;
        tracing::info!(path, bytes = total, parts = index, "input written");
        Ok(total)
    }

    /// Echo `input` line by line into `echo` while collecting it, until end of
    /// input or until `shutdown` resolves, then write what was collected
    pub async fn tee_run<R, W, S>(
        &self,
        path: &str,
        mut input: R,
        echo: &mut W,
        expected_size: u64,
        shutdown: S,
    ) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut collected = Vec::new();
        let mut line = Vec::new();

        loop {
            line.clear();
            let read = tokio::select! {
                _ = &mut shutdown => {
                    tracing::debug!(path, "interrupted, flushing collected input");
                    // a partially read line stays in the buffer
                    collected.extend_from_slice(&line);
                    break;
                }
                read = input.read_until(b'\n', &mut line) => read?,
            };
            if read == 0 {
                break;
            }
            echo.write_all(&line).await?;
            echo.flush().await?;
            collected.extend_from_slice(&line);
        }

        self.tee_run_via_pipe(path, &mut &collected[..], expected_size)
            .await
    }

    async fn write_buffer(&self, path: &str, data: Vec<u8>) -> Result<u64> {
        let size = data.len() as u64;
        let mut r = Throttled::new(&data[..], self.limits.write.clone());
        self.backend
            .storage()
            .write(path, &mut r, size)
            .await
            .map_err(|e| e.context("write", path))
    }
}
