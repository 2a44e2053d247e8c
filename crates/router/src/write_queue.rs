//! Bounded shadow-write queue with a single delivery worker.
//!
//! Producers hand a [`WriteElement`] to [`WriteQueue`]; one long-lived task
//! spawned by [`spawn_write_queue_worker`] drains it strictly in arrival
//! order, one element at a time. Delivery is at-most-once: a failed write is
//! logged and dropped, never retried or requeued.

use crate::backend::Backends;
use pstore_common::{Code, Operation, ShadowWriteOutcome, StoreError, Value, WriteRequest};
use pstore_metrics::MetricsRecorder;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

/// One pending shadow write for a specific named backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteElement {
    pub key: String,
    pub value: Value,
    /// Backend name the write is destined for.
    pub target: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("write queue is full")]
    Full,
    #[error("write queue worker has stopped")]
    Closed,
    #[error("no write queue configured")]
    NotConfigured,
}

/// Producer handle. Cheap to clone; the channel closes once every handle
/// is dropped, which stops the worker.
#[derive(Clone)]
pub struct WriteQueue {
    tx: mpsc::Sender<WriteElement>,
    metrics: Arc<dyn MetricsRecorder>,
}

/// Consumer end, handed to [`spawn_write_queue_worker`].
#[derive(Debug)]
pub struct WriteQueueReceiver {
    rx: mpsc::Receiver<WriteElement>,
}

impl std::fmt::Debug for WriteQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteQueue")
            .field("depth", &self.depth())
            .field("capacity", &self.capacity())
            .finish()
    }
}

impl WriteQueue {
    /// Create a queue holding at most `capacity` (min 1) pending elements.
    pub fn bounded(
        capacity: usize,
        metrics: Arc<dyn MetricsRecorder>,
    ) -> (WriteQueue, WriteQueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (WriteQueue { tx, metrics }, WriteQueueReceiver { rx })
    }

    /// Enqueue, waiting for space when the queue is full.
    pub async fn enqueue(&self, element: WriteElement) -> Result<(), QueueError> {
        self.tx
            .send(element)
            .await
            .map_err(|_| QueueError::Closed)?;
        self.metrics.record_queue_depth(self.depth());
        Ok(())
    }

    /// Enqueue without waiting.
    pub fn try_enqueue(&self, element: WriteElement) -> Result<(), QueueError> {
        match self.tx.try_send(element) {
            Ok(()) => {
                self.metrics.record_queue_depth(self.depth());
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => Err(QueueError::Full),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(QueueError::Closed),
        }
    }

    /// Elements waiting for the worker.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[cfg(test)]
impl WriteQueueReceiver {
    pub(crate) fn recv_now(&mut self) -> Option<WriteElement> {
        self.rx.try_recv().ok()
    }
}

/// Configuration for the write-queue worker.
#[derive(Debug, Clone)]
pub struct WriteQueueConfig {
    /// Per-element deadline, independent of whoever enqueued it.
    pub delivery_timeout: Duration,
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self {
            delivery_timeout: Duration::from_secs(60),
        }
    }
}

/// Spawn the single consumer. It exits once every [`WriteQueue`] handle
/// has been dropped and the backlog is drained.
///
/// Returns a `JoinHandle` for the spawned task.
#[allow(clippy::needless_pass_by_value)] // config is moved into the spawned task
pub fn spawn_write_queue_worker(
    backends: Backends,
    receiver: WriteQueueReceiver,
    metrics: Arc<dyn MetricsRecorder>,
    config: WriteQueueConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = receiver.rx;
        while let Some(element) = rx.recv().await {
            metrics.record_queue_depth(rx.len());
            deliver(&backends, metrics.as_ref(), &element, config.delivery_timeout).await;
        }
        tracing::info!("write queue closed, worker exiting");
    })
}

/// Deliver one element to the backend named by its target.
pub async fn deliver(
    backends: &Backends,
    metrics: &dyn MetricsRecorder,
    element: &WriteElement,
    timeout: Duration,
) -> ShadowWriteOutcome {
    let Some(backend) = backends.find(&element.target) else {
        tracing::warn!(
            "dropping side write for '{}': no backend named '{}'",
            element.key,
            element.target
        );
        metrics.record_shadow_write(&element.target, ShadowWriteOutcome::Dropped);
        return ShadowWriteOutcome::Dropped;
    };

    let req = WriteRequest {
        key: element.key.clone(),
        value: element.value.clone(),
    };
    let start = Instant::now();
    let result = match tokio::time::timeout(timeout, backend.write(&req)).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::DeadlineExceeded(format!(
            "side write exceeded {:?}",
            timeout
        ))),
    };
    metrics.record_call(
        Operation::Write,
        backend.name(),
        Code::of(&result),
        start.elapsed(),
    );

    let outcome = match result {
        Ok(resp) => {
            tracing::info!(
                "side write ({}, {}) -> ok at {}",
                element.target,
                element.key,
                resp.timestamp
            );
            ShadowWriteOutcome::Delivered
        }
        Err(e) => {
            tracing::warn!("side write ({}, {}) -> {}", element.target, element.key, e);
            ShadowWriteOutcome::Failed
        }
    };
    metrics.record_shadow_write(&element.target, outcome);
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
