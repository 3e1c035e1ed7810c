//! Read/write speed limiting
//!
//! A token bucket refilled at `rate` bytes per second that holds at most one
//! second worth of tokens. Streams pay for what they moved after each chunk;
//! when the bucket runs dry the next chunk waits until the debt is repaid.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{ready, Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

use crate::error::{Error, Result};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

/// Token bucket shared by every stream of one direction
#[derive(Debug)]
pub struct SpeedLimiter {
    rate: f64,
    bucket: Mutex<Bucket>,
}

impl SpeedLimiter {
    /// Limit to `bytes_per_sec`
    pub fn new(bytes_per_sec: u64) -> Result<Self> {
        if bytes_per_sec == 0 {
            return Err(Error::Config("speed limit must be positive".into()));
        }
        let rate = bytes_per_sec as f64;
        Ok(Self {
            rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                updated: Instant::now(),
            }),
        })
    }

    /// Take `n` tokens and return how long the caller must wait before moving
    /// more data
    pub fn reserve(&self, n: u64) -> Duration {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.updated).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.rate);
        bucket.updated = now;
        bucket.tokens -= n as f64;

        if bucket.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-bucket.tokens / self.rate)
        }
    }
}

/// Reader or writer throttled by an optional [`SpeedLimiter`]
#[derive(Debug)]
pub struct Throttled<T> {
    inner: T,
    limiter: Option<Arc<SpeedLimiter>>,
    delay: Option<Pin<Box<Sleep>>>,
}

impl<T> Throttled<T> {
    pub fn new(inner: T, limiter: Option<Arc<SpeedLimiter>>) -> Self {
        Self {
            inner,
            limiter,
            delay: None,
        }
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    fn poll_delay(&mut self, cx: &mut Context<'_>) -> Poll<()> {
        if let Some(delay) = self.delay.as_mut() {
            ready!(delay.as_mut().poll(cx));
            self.delay = None;
        }
        Poll::Ready(())
    }

    fn charge(&mut self, n: usize) {
        if let Some(limiter) = &self.limiter {
            let delay = limiter.reserve(n as u64);
            if !delay.is_zero() {
                self.delay = Some(Box::pin(tokio::time::sleep(delay)));
            }
        }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Throttled<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_delay(cx));

        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.charge(buf.filled().len() - before);
        Poll::Ready(Ok(()))
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Throttled<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_delay(cx));

        let n = ready!(Pin::new(&mut this.inner).poll_write(cx, buf))?;
        this.charge(n);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
