//! Fixed-size worker pool over a bounded queue
//!
//! The executor submits every task unit here, so the worker count is the
//! hard ceiling on concurrently running capability invocations.
//! Workers are spawned lazily on first submit; constructing a pool does not
//! need a running Tokio runtime.

use crate::error::PoolError;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type Job = BoxFuture<'static, ()>;

/// Pool statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Configured worker count
    pub workers: usize,
    /// Jobs accepted into the queue
    pub submitted: usize,
    /// Jobs finished (including ones that panicked)
    pub completed: usize,
    /// Jobs currently running
    pub active: usize,
    /// Highest observed `active`
    pub peak_active: usize,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl Counters {
    fn started(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn finished(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct PoolState {
    sender: Option<mpsc::Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
    closed: bool,
}

/// Bounded worker pool
pub struct WorkerPool {
    workers: usize,
    queue_depth: usize,
    state: Mutex<PoolState>,
    counters: Arc<Counters>,
}

impl WorkerPool {
    /// Create a pool of `workers` consuming a queue of `queue_depth` jobs
    #[must_use]
    pub fn new(workers: usize, queue_depth: usize) -> Self {
        Self {
            workers: workers.max(1),
            queue_depth: queue_depth.max(1),
            state: Mutex::new(PoolState::default()),
            counters: Arc::new(Counters::default()),
        }
    }

    #[inline]
    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Enqueue a unit of work, waiting for queue space if necessary
    ///
    /// # Errors
    /// `PoolError::ShutDown` once [`WorkerPool::shutdown`] has been called
    pub async fn submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let sender = self.sender()?;
        sender
            .send(job.boxed())
            .await
            .map_err(|_| PoolError::ShutDown)?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Enqueue a unit of work and get a receiver for its output. The
    /// receiver errors if the job panics or is never run.
    ///
    /// # Errors
    /// `PoolError::ShutDown` once the pool is shut down
    pub async fn run<F, T>(&self, job: F) -> Result<oneshot::Receiver<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(async move {
            let _ = tx.send(job.await);
        })
        .await?;
        Ok(rx)
    }

    /// Stop accepting work and wait for queued and in-flight jobs to finish
    pub async fn shutdown(&self) {
        let handles = {
            let mut state = self.state.lock();
            state.closed = true;
            state.sender = None;
            std::mem::take(&mut state.handles)
        };
        tracing::debug!(workers = handles.len(), "shutting down worker pool");
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "worker terminated abnormally");
            }
        }
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.state.lock().closed
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            active: self.counters.active.load(Ordering::SeqCst),
            peak_active: self.counters.peak_active.load(Ordering::SeqCst),
        }
    }

    fn sender(&self) -> Result<mpsc::Sender<Job>, PoolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(PoolError::ShutDown);
        }
        if let Some(sender) = &state.sender {
            return Ok(sender.clone());
        }

        let (tx, rx) = mpsc::channel::<Job>(self.queue_depth);
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        state.handles = (0..self.workers)
            .map(|id| tokio::spawn(worker(id, Arc::clone(&queue), Arc::clone(&self.counters))))
            .collect();
        state.sender = Some(tx.clone());
        tracing::debug!(workers = self.workers, queue_depth = self.queue_depth, "started worker pool");
        Ok(tx)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(10, 20)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("queue_depth", &self.queue_depth)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Worker loop (runs in a separate tokio task)
async fn worker(
    id: usize,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    counters: Arc<Counters>,
) {
    loop {
        let job = queue.lock().await.recv().await;
        let Some(job) = job else {
            break;
        };
        counters.started();
        if AssertUnwindSafe(job).catch_unwind().await.is_err() {
            tracing::error!(worker = id, "job panicked");
        }
        counters.finished();
    }
}
