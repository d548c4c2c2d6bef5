//! Order-preserving fan-out of independent tasks over one bounded pool.
//!
//! ```text
//! run(tasks) ──► outer WorkerPool(pool_size)
//!                  ├─ slot 0 ──► TaskHandle(tasks[0]) ──► inner 1-worker pool
//!                  ├─ slot 1 ──► TaskHandle(tasks[1]) ──► inner 1-worker pool
//!                  └─ ...
//!                collect in submission order ──► BatchReport
//! ```
//!
//! Each task honors its own deadline and fallback through [`TaskHandle`]; a
//! failed or timed-out task occupies one outer slot until it resolves and
//! never aborts its siblings. Only pool resource failures end the batch early.

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::Config;
use crate::error::{Error, PoolError, Result, TaskError};
use crate::pool::{WorkerKind, WorkerPool};
use crate::task::{Task, TaskHandle, TaskOutcome};
use crate::types::{Event, EventSender, TaskStatus};

/// Per-task results of one batch, indexed by submission order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchReport {
    /// Value of task `i` (returned value or adopted fallback)
    pub results: Vec<Option<Value>>,
    /// One-line error description of task `i`, if it failed
    pub errors: Vec<Option<String>>,
    /// Terminal status of task `i`
    pub statuses: Vec<TaskStatus>,
    /// Wall time task `i` spent executing
    pub elapsed: Vec<Duration>,
}

impl BatchReport {
    fn with_capacity(n: usize) -> Self {
        Self {
            results: Vec::with_capacity(n),
            errors: Vec::with_capacity(n),
            statuses: Vec::with_capacity(n),
            elapsed: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, outcome: TaskOutcome, elapsed: Duration) {
        self.statuses.push(outcome.status());
        let (value, error) = outcome.into_parts();
        self.results.push(value);
        self.errors.push(error);
        self.elapsed.push(elapsed);
    }

    /// Number of tasks in the batch
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    /// True for an empty batch
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    /// Count of tasks that ended with `status`
    pub fn count(&self, status: TaskStatus) -> usize {
        self.statuses.iter().filter(|s| **s == status).count()
    }

    /// Splits into the parallel `(results, errors)` sequences.
    pub fn into_parts(self) -> (Vec<Option<Value>>, Vec<Option<String>>) {
        (self.results, self.errors)
    }
}

/// Runs batches of tasks over a fresh bounded pool per batch
#[derive(Debug)]
pub struct BulkExecutor {
    pool_size: usize,
    label: String,
    kind: WorkerKind,
    events: EventSender,
}

impl BulkExecutor {
    /// Executor with `pool_size` concurrent slots and task workers
    ///
    /// A zero `pool_size` is rejected when [`run`](Self::run) opens the pool.
    pub fn new(pool_size: usize) -> Self {
        Self {
            pool_size,
            label: "batch".to_string(),
            kind: WorkerKind::Task,
            events: EventSender::new(1024),
        }
    }

    /// Executor configured from the `pool` section and event capacity
    pub fn from_config(config: &Config) -> Self {
        Self {
            pool_size: config.pool.size,
            label: config.pool.label.clone(),
            kind: config.pool.worker_kind,
            events: EventSender::new(config.event_capacity),
        }
    }

    /// Label for the outer pool's workers.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Isolation used for each task's own worker.
    pub fn with_worker_kind(mut self, kind: WorkerKind) -> Self {
        self.kind = kind;
        self
    }

    /// Subscribe to batch and task events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Pool capacity used by each batch
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Runs every task and returns their results in submission order.
    ///
    /// # Errors
    /// - [`Error::Pool`] if the pool cannot be opened, or if a worker could
    ///   not be started for lack of resources. The pool is terminated and
    ///   joined before the error is returned.
    pub async fn run(&self, tasks: Vec<Task>) -> Result<BatchReport> {
        let total = tasks.len();
        let pool = WorkerPool::open(self.pool_size, self.label.clone())?;
        info!(
            tasks = total,
            pool_size = self.pool_size,
            label = %self.label,
            "starting batch"
        );
        self.events.emit(Event::BatchStarted {
            tasks: total,
            pool_size: self.pool_size,
        });

        let mut pending = Vec::with_capacity(total);
        for (index, task) in tasks.into_iter().enumerate() {
            let events = self.events.clone();
            let kind = self.kind;
            match pool.spawn_worker(run_one(index, task, kind, events)) {
                Ok(p) => pending.push(p),
                Err(e) => {
                    error!(error = %e, index, "could not submit task, aborting batch");
                    pool.terminate();
                    pool.join().await;
                    return Err(Error::Pool(e));
                }
            }
        }
        pool.close();

        let mut report = BatchReport::with_capacity(total);
        for (index, p) in pending.into_iter().enumerate() {
            let (outcome, elapsed) = match p.await {
                Ok(done) => done,
                // The outer worker itself failed; attribute it to this task
                Err(e) => (TaskOutcome::Failed(e), Duration::ZERO),
            };
            if let TaskOutcome::Failed(e) = &outcome {
                if e.is_resource_failure() {
                    error!(error = %e, index, "worker resources exhausted, aborting batch");
                    pool.terminate();
                    pool.join().await;
                    return Err(Error::Pool(PoolError::Exhausted(e.to_string())));
                }
            }
            report.push(outcome, elapsed);
        }
        pool.join().await;

        let completed = report.count(TaskStatus::Completed);
        let failed = report.count(TaskStatus::Failed);
        let timed_out = report.count(TaskStatus::TimedOut);
        info!(completed, failed, timed_out, "batch finished");
        self.events.emit(Event::BatchFinished {
            completed,
            failed,
            timed_out,
        });

        Ok(report)
    }
}

/// Body of one outer worker: run the task through its own handle.
async fn run_one(
    index: usize,
    task: Task,
    kind: WorkerKind,
    events: EventSender,
) -> std::result::Result<(TaskOutcome, Duration), TaskError> {
    let label = task.label.clone();
    let has_fallback = task.fallback.is_some();
    events.emit(Event::TaskStarted {
        index,
        label: label.clone(),
    });

    let started = Instant::now();
    let mut handle = TaskHandle::with_worker_kind(task, kind);
    let outcome = handle.execute().await.clone();
    let elapsed = started.elapsed();

    let event = match &outcome {
        TaskOutcome::Completed(_) => Event::TaskCompleted {
            index,
            label,
            elapsed_ms: elapsed.as_millis() as u64,
        },
        TaskOutcome::Failed(e) => Event::TaskFailed {
            index,
            label,
            error: e.describe(),
        },
        TaskOutcome::TimedOut { .. } => Event::TaskTimedOut {
            index,
            label,
            fallback_used: has_fallback,
        },
    };
    events.emit(event);

    Ok((outcome, elapsed))
}
