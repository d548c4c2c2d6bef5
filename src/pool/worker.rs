//! Worker bodies: how one unit of work is hosted, isolated and terminated.
//!
//! ```text
//! WorkerKind::Task                      WorkerKind::Thread
//!   tracked tokio task                    tracked tokio task
//!     └─► select!                           └─► spawn OS thread "<label>-<slot>"
//!           ├─ token.cancelled()                  │     └─► current-thread runtime
//!           └─ catch_unwind(work)                 │           └─► host_in_task(work)
//!                                                 └─► select! { token, oneshot result }
//! ```
//!
//! Termination drops the work future at its next await point. Blocking code
//! cannot be interrupted; its slot is released immediately and the thread is
//! left to finish on its own.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{PoolError, TaskError};

tokio::task_local! {
    static CURRENT_WORKER: WorkerInfo;
}

/// Isolation used for each worker of a pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// A tokio task on the shared runtime
    #[default]
    Task,
    /// A dedicated OS thread running its own current-thread runtime
    Thread,
}

/// Identity of the worker executing the current unit of work
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerInfo {
    /// Caller-supplied pool label
    pub label: String,
    /// Process-unique id of the owning pool
    pub pool_id: u64,
    /// Submission sequence number within the pool
    pub slot: u64,
    /// Nesting depth of the owning pool (0 = opened outside any worker)
    pub depth: u32,
}

impl WorkerInfo {
    /// Workers may always open and await further pools.
    pub fn may_spawn_pools(&self) -> bool {
        true
    }

    /// Name given to the worker's OS thread
    pub fn thread_name(&self) -> String {
        format!("{}-{}", self.label, self.slot)
    }
}

/// Returns the worker executing the current future, if any.
///
/// Only visible from inside work submitted to a [`WorkerPool`](super::WorkerPool);
/// tasks spawned with `tokio::spawn` from within the work do not inherit it.
pub fn current_worker() -> Option<WorkerInfo> {
    CURRENT_WORKER.try_with(Clone::clone).ok()
}

/// Runs `work` as the current worker until it finishes or `token` fires.
pub(crate) async fn host_in_task<F, T>(
    info: WorkerInfo,
    token: CancellationToken,
    work: F,
) -> Result<T, TaskError>
where
    F: Future<Output = Result<T, TaskError>> + Send + 'static,
    T: Send + 'static,
{
    let guarded = CURRENT_WORKER.scope(info, AssertUnwindSafe(work).catch_unwind());

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(TaskError::Terminated),
        res = guarded => match res {
            Ok(out) => out,
            Err(payload) => Err(TaskError::Panicked(panic_message(&*payload))),
        },
    }
}

/// Runs `work` on a dedicated OS thread with its own runtime.
pub(crate) async fn host_on_thread<F, T>(
    info: WorkerInfo,
    token: CancellationToken,
    work: F,
) -> Result<T, TaskError>
where
    F: Future<Output = Result<T, TaskError>> + Send + 'static,
    T: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let thread_token = token.clone();
    let span = tracing::Span::current();

    std::thread::Builder::new()
        .name(info.thread_name())
        .spawn(move || {
            let _entered = span.entered();
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    tracing::error!(error = %e, "worker runtime could not be built");
                    let _ = tx.send(Err(TaskError::from(PoolError::Runtime(e))));
                    return;
                }
            };
            let out = rt.block_on(host_in_task(info, thread_token, work));
            let _ = tx.send(out);
            rt.shutdown_background();
        })
        .map_err(|e| TaskError::from(PoolError::Spawn(e)))?;

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(TaskError::Terminated),
        res = rx => res.unwrap_or(Err(TaskError::WorkerLost)),
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
