//! Unbounded multi-producer/multi-consumer work queue.
//!
//! Both halves are cheap to clone. Every item is delivered to exactly one
//! receiver. The queue reports end-of-stream once every [`WorkSender`] has
//! been dropped and the buffered items are drained, which is how a stage
//! tells the next one that no more work is coming.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::QueueError;

/// Create a connected sender/receiver pair.
pub fn work_queue<T>() -> (WorkSender<T>, WorkReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        WorkSender { inner: tx },
        WorkReceiver {
            inner: Arc::new(Mutex::new(rx)),
        },
    )
}

/// Producer half. Sending never blocks.
#[derive(Debug)]
pub struct WorkSender<T> {
    inner: mpsc::UnboundedSender<T>,
}

impl<T> WorkSender<T> {
    /// Enqueue an item. Fails only when every receiver is gone.
    pub fn send(&self, item: T) -> Result<(), QueueError> {
        self.inner.send(item).map_err(|_| QueueError::Closed)
    }
}

impl<T> Clone for WorkSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Consumer half. Clones share one underlying receiver, so concurrent
/// consumers split the work rather than each seeing every item.
#[derive(Debug)]
pub struct WorkReceiver<T> {
    inner: Arc<Mutex<mpsc::UnboundedReceiver<T>>>,
}

impl<T> WorkReceiver<T> {
    /// Wait for the next item. `None` means the queue is closed and drained.
    pub async fn recv(&self) -> Option<T> {
        self.inner.lock().await.recv().await
    }
}

impl<T> Clone for WorkReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
