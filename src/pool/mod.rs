//! Bounded pools of isolated workers.
//!
//! A [`WorkerPool`] serves exactly one batch: it is opened, fed submissions,
//! closed, and joined. Every submission gets a fresh worker that handles that
//! one unit of work and is then discarded, so no state leaks between tasks.
//!
//! ## Lifecycle
//! ```text
//! open(capacity) ──► Open ──close()──► Draining ──join()──► Closed
//!                     │                   │
//!                  submit()         in-flight work finishes
//!                                   (or terminate() drops it)
//! ```
//!
//! ## Rules
//! - `submit()` never blocks; the worker waits for a free slot on its own.
//! - A worker that panics, fails or is terminated only affects its own slot.
//! - Workers may open further pools and await them ([`WorkerInfo::may_spawn_pools`]).
//! - Dropping a pool that was not joined terminates its in-flight work.
//!
//! ## Example
//! ```
//! use batch_harvest::{Task, TaskArgs, TaskError, Work, WorkerPool};
//! use futures::future::BoxFuture;
//! use serde_json::{Value, json};
//!
//! fn double(args: TaskArgs) -> BoxFuture<'static, Result<Value, TaskError>> {
//!     Box::pin(async move {
//!         let n: i64 = args.get(0)?;
//!         Ok(json!(n * 2))
//!     })
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = WorkerPool::open(2, "doubler")?;
//! let pending = pool.submit(Task::new("double", Work::Async(double)).with_args(TaskArgs::new().arg(21)))?;
//! assert_eq!(pending.await?, json!(42));
//! pool.join().await;
//! # Ok(())
//! # }
//! ```

mod worker;

pub use worker::{WorkerInfo, WorkerKind, current_worker};
pub(crate) use worker::panic_message;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, warn};

use crate::config::PoolConfig;
use crate::error::{PoolError, TaskError};
use crate::task::{Task, TaskArgs, Work};
use worker::{host_in_task, host_on_thread};

/// Process-wide pool id sequence.
static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a pool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting submissions
    Open,
    /// No longer accepting submissions; work still in flight
    Draining,
    /// No longer accepting submissions and no worker is alive
    Closed,
}

/// Fixed-capacity pool of isolated, single-use workers
#[derive(Debug)]
pub struct WorkerPool {
    id: u64,
    label: String,
    capacity: usize,
    kind: WorkerKind,
    depth: u32,
    slots: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    next_slot: AtomicU64,
}

impl WorkerPool {
    /// Opens a pool of `capacity` task workers tagged with `label`.
    pub fn open(capacity: usize, label: impl Into<String>) -> Result<Self, PoolError> {
        Self::open_with(capacity, label, WorkerKind::Task)
    }

    /// Opens a pool with an explicit worker isolation kind.
    ///
    /// # Errors
    /// - [`PoolError::ZeroCapacity`] if `capacity` is 0
    /// - [`PoolError::NoRuntime`] if called outside a Tokio runtime
    pub fn open_with(
        capacity: usize,
        label: impl Into<String>,
        kind: WorkerKind,
    ) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::ZeroCapacity);
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(PoolError::NoRuntime);
        }

        let depth = current_worker().map_or(0, |w| w.depth + 1);
        let pool = Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            label: label.into(),
            capacity,
            kind,
            depth,
            slots: Arc::new(Semaphore::new(capacity)),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            next_slot: AtomicU64::new(0),
        };
        debug!(
            pool = pool.id,
            label = %pool.label,
            capacity,
            kind = ?kind,
            depth,
            "pool opened"
        );
        Ok(pool)
    }

    /// Opens a pool from the `pool` section of a [`Config`](crate::Config).
    pub fn from_config(config: &PoolConfig) -> Result<Self, PoolError> {
        Self::open_with(config.size, config.label.clone(), config.worker_kind)
    }

    /// Submits one task without blocking and returns a handle to its result.
    ///
    /// The task's deadline and fallback are not applied here; use
    /// [`TaskHandle`](crate::TaskHandle) for deadline semantics.
    pub fn submit(&self, task: Task) -> Result<Pending<Value>, PoolError> {
        let Task { work, args, .. } = task;
        self.spawn_worker(work.call(args))
    }

    /// Runs one work function over many argument sets.
    ///
    /// Results come back in the order of `args_list`, whatever order the
    /// workers finish in.
    pub async fn map(
        &self,
        work: Work,
        args_list: Vec<TaskArgs>,
    ) -> Result<Vec<Result<Value, TaskError>>, PoolError> {
        let mut pending = Vec::with_capacity(args_list.len());
        for args in args_list {
            pending.push(self.spawn_worker(work.call(args))?);
        }

        let mut results = Vec::with_capacity(pending.len());
        for p in pending {
            results.push(p.await);
        }
        Ok(results)
    }

    /// Hosts an arbitrary future in a fresh worker of this pool.
    pub(crate) fn spawn_worker<F, T>(&self, work: F) -> Result<Pending<T>, PoolError>
    where
        F: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Send + 'static,
    {
        if self.tracker.is_closed() {
            return Err(PoolError::Closed {
                label: self.label.clone(),
            });
        }

        let info = WorkerInfo {
            label: self.label.clone(),
            pool_id: self.id,
            slot: self.next_slot.fetch_add(1, Ordering::Relaxed),
            depth: self.depth,
        };
        let span = tracing::debug_span!(
            "worker",
            label = %info.label,
            pool = info.pool_id,
            slot = info.slot,
            depth = info.depth
        );
        let token = self.cancel.child_token();
        let worker_token = token.clone();
        let slots = Arc::clone(&self.slots);
        let kind = self.kind;

        let join = self.tracker.spawn(
            async move {
                let _permit = tokio::select! {
                    biased;
                    _ = worker_token.cancelled() => return Err(TaskError::Terminated),
                    permit = slots.acquire_owned() => {
                        permit.map_err(|_| TaskError::Terminated)?
                    }
                };
                debug!("worker started");
                let out = match kind {
                    WorkerKind::Task => host_in_task(info, worker_token, work).await,
                    WorkerKind::Thread => host_on_thread(info, worker_token, work).await,
                };
                if let Err(e) = &out {
                    debug!(error = %e, "worker finished with error");
                }
                out
            }
            .instrument(span),
        );

        Ok(Pending { join, token })
    }

    /// Stops accepting submissions. In-flight work keeps running.
    pub fn close(&self) {
        if !self.tracker.is_closed() {
            debug!(pool = self.id, label = %self.label, "pool draining");
        }
        self.tracker.close();
    }

    /// Stops accepting submissions and terminates every in-flight worker.
    pub fn terminate(&self) {
        if !self.tracker.is_empty() {
            warn!(
                pool = self.id,
                label = %self.label,
                live = self.tracker.len(),
                "terminating in-flight workers"
            );
        }
        self.tracker.close();
        self.cancel.cancel();
    }

    /// Closes the pool and waits until every worker has been reclaimed.
    pub async fn join(self) {
        self.close();
        self.tracker.wait().await;
        debug!(pool = self.id, label = %self.label, "pool closed");
    }

    /// Current lifecycle state
    pub fn state(&self) -> PoolState {
        match (self.tracker.is_closed(), self.tracker.is_empty()) {
            (false, _) => PoolState::Open,
            (true, false) => PoolState::Draining,
            (true, true) => PoolState::Closed,
        }
    }

    /// Number of workers that have been submitted and not yet reclaimed
    pub fn live_workers(&self) -> usize {
        self.tracker.len()
    }

    /// Maximum number of concurrently running workers
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Label attached to every worker
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Process-unique pool id
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Worker isolation kind
    pub fn kind(&self) -> WorkerKind {
        self.kind
    }

    /// Nesting depth (0 when opened outside any worker)
    pub fn depth(&self) -> u32 {
        self.depth
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.tracker.is_empty() {
            self.terminate();
        }
        self.tracker.close();
    }
}

/// Handle to one submitted unit of work.
///
/// Awaiting it yields the work's result. Dropping it detaches the worker
/// without terminating it.
#[derive(Debug)]
pub struct Pending<T> {
    join: JoinHandle<Result<T, TaskError>>,
    token: CancellationToken,
}

impl<T> Pending<T> {
    /// Non-blocking completion check
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Terminates this worker only
    pub fn terminate(&self) {
        self.token.cancel();
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        Pin::new(&mut this.join).poll(cx).map(|res| match res {
            Ok(out) => out,
            Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(&*e.into_panic()))),
            Err(_) => Err(TaskError::Terminated),
        })
    }
}
