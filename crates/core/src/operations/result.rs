//! Result channel protocol
//!
//! Every asynchronous operation hands its caller a [`Results`] receiver. The
//! producing task owns the only sender; the channel closes when the producer
//! and every worker holding a clone of the sender have finished.

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::traits::{Object, Part};

/// Outcome of a task that produces nothing on success
pub type EmptyResult = Result<()>;
/// Outcome carrying an object
pub type ObjectResult = Result<Object>;
/// Outcome of one multipart part write
pub type PartResult = Result<Part>;

/// Channel depth for transfer and delete outcomes
pub(crate) const RESULT_DEPTH: usize = 4;
/// Channel depth for listings
pub(crate) const LIST_DEPTH: usize = 16;

pub(crate) fn channel<T>(depth: usize) -> (ResultSender<T>, Results<T>) {
    let (tx, rx) = mpsc::channel(depth);
    (ResultSender { tx }, Results { rx })
}

/// Sending half held by producers and workers
#[derive(Debug)]
pub(crate) struct ResultSender<T> {
    tx: mpsc::Sender<Result<T>>,
}

impl<T> Clone for ResultSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> ResultSender<T> {
    /// Deliver one result; `false` once the consumer is gone
    pub(crate) async fn send(&self, result: Result<T>) -> bool {
        self.tx.send(result).await.is_ok()
    }

    pub(crate) async fn ok(&self, value: T) -> bool {
        self.send(Ok(value)).await
    }

    pub(crate) async fn err(&self, error: Error) -> bool {
        self.send(Err(error)).await
    }

    /// Whether the consumer dropped its receiver
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of an operation's result channel
///
/// Drain it until `recv` returns `None`; the operation is only finished then.
#[derive(Debug)]
pub struct Results<T> {
    rx: mpsc::Receiver<Result<T>>,
}

impl<T> Results<T> {
    /// Receive the next result, `None` once the producer is done
    pub async fn recv(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    /// Drain every result, keeping successes and errors apart
    pub async fn partition(mut self) -> (Vec<T>, Vec<Error>) {
        let mut values = Vec::new();
        let mut errors = Vec::new();
        while let Some(result) = self.rx.recv().await {
            match result {
                Ok(v) => values.push(v),
                Err(e) => errors.push(e),
            }
        }
        (values, errors)
    }

    /// Drain every result and return the errors
    pub async fn errors(self) -> Vec<Error> {
        self.partition().await.1
    }

    /// Drain every result; the first error wins, but only after the channel
    /// closed, so no sibling work is left running
    pub async fn finish(self) -> Result<()> {
        match self.errors().await.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drain every result into a vector, failing with the first error
    pub async fn collect(self) -> Result<Vec<T>> {
        let (values, errors) = self.partition().await;
        match errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }
}
