//! Ordered async task queue
//!
//! A single worker owns the state and runs submitted tasks strictly in
//! submission order, one at a time. Every mutation of reporter state goes
//! through here, which is what keeps the meta-step stack and the correlation
//! table consistent without locks.

use futures::future::BoxFuture;
use stepmirror_common::{Error, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// A unit of work run against the queue's state
pub type Task<S> = Box<dyn for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send>;

enum Message<S> {
    Run(Task<S>),
    Close,
}

/// Submitting side of the queue
pub struct TaskQueueTx<S> {
    tx: mpsc::UnboundedSender<Message<S>>,
}

impl<S> Clone for TaskQueueTx<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> TaskQueueTx<S> {
    /// Enqueue a task without waiting for it
    pub fn submit<F>(&self, task: F) -> Result<()>
    where
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, ()> + Send + 'static,
    {
        self.tx
            .send(Message::Run(Box::new(task)))
            .map_err(|_| Error::QueueClosed)
    }

    /// Enqueue a task and wait for its output
    pub async fn call<F, T>(&self, task: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut S) -> BoxFuture<'a, T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        self.submit(move |state: &mut S| {
            Box::pin(async move {
                let output = task(state).await;
                let _ = reply.send(output);
            })
        })?;
        rx.await.map_err(|_| Error::QueueClosed)
    }

    /// Stop the worker once everything already submitted has run
    pub fn close(&self) {
        let _ = self.tx.send(Message::Close);
    }
}

/// Spawn the worker and return its submitting side
///
/// The join handle yields the state back after [`TaskQueueTx::close`].
pub fn spawn<S: Send + 'static>(state: S) -> (TaskQueueTx<S>, JoinHandle<S>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message<S>>();

    let worker = tokio::spawn(async move {
        let mut state = state;
        let mut executed = 0u64;
        while let Some(message) = rx.recv().await {
            match message {
                Message::Run(task) => {
                    task(&mut state).await;
                    executed += 1;
                }
                Message::Close => break,
            }
        }
        debug!(executed, "task queue drained");
        state
    });

    (TaskQueueTx { tx }, worker)
}
