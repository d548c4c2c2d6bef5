//! Deadline-bounded execution of one task on its own single-worker pool

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::pool::{WorkerKind, WorkerPool};
use crate::task::{Task, TaskOutcome};

/// Executes one [`Task`] in isolation, at most once
///
/// ```
/// use std::time::Duration;
/// use batch_harvest::{Task, TaskHandle, TaskStatus, TaskArgs, Work, WorkFuture};
/// use serde_json::json;
///
/// fn slow(_: TaskArgs) -> WorkFuture {
///     Box::pin(async {
///         tokio::time::sleep(Duration::from_secs(60)).await;
///         Ok(json!("late"))
///     })
/// }
///
/// # #[tokio::main]
/// # async fn main() {
/// let task = Task::new("slow", Work::Async(slow))
///     .with_deadline(Duration::from_millis(50))
///     .with_fallback("X");
/// let mut handle = TaskHandle::new(task);
///
/// let outcome = handle.execute().await;
/// assert_eq!(outcome.status(), TaskStatus::TimedOut);
/// assert_eq!(outcome.value(), Some(&json!("X")));
/// assert!(handle.done());
/// # }
/// ```
#[derive(Debug)]
pub struct TaskHandle {
    task: Task,
    kind: WorkerKind,
    done: bool,
    outcome: Option<TaskOutcome>,
    elapsed: Duration,
}

impl TaskHandle {
    /// Wraps `task` for execution on a task worker.
    pub fn new(task: Task) -> Self {
        Self::with_worker_kind(task, WorkerKind::Task)
    }

    /// Wraps `task` for execution on a worker of the given kind.
    pub fn with_worker_kind(task: Task, kind: WorkerKind) -> Self {
        Self {
            task,
            kind,
            done: false,
            outcome: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Runs the task and returns its outcome.
    ///
    /// The worker's pool is joined on every path, so when this returns no
    /// worker of the task is still tracked. Calling it again returns the
    /// recorded outcome without running the task a second time.
    pub async fn execute(&mut self) -> &TaskOutcome {
        let outcome = match self.outcome.take() {
            Some(recorded) => recorded,
            None => {
                let started = Instant::now();
                let outcome = self.run_once().await;
                self.elapsed = started.elapsed();
                self.done = true;
                outcome
            }
        };
        self.outcome.insert(outcome)
    }

    async fn run_once(&self) -> TaskOutcome {
        let pool = match WorkerPool::open_with(1, self.task.label.clone(), self.kind) {
            Ok(pool) => pool,
            Err(e) => return TaskOutcome::Failed(e.into()),
        };
        let mut pending = match pool.spawn_worker(self.task.work.call(self.task.args.clone())) {
            Ok(pending) => pending,
            Err(e) => {
                pool.join().await;
                return TaskOutcome::Failed(e.into());
            }
        };
        pool.close();

        let result = match self.task.deadline {
            None => pending.await,
            Some(deadline) => match tokio::time::timeout(deadline, &mut pending).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        label = %self.task.label,
                        deadline_ms = deadline.as_millis() as u64,
                        fallback = self.task.fallback.is_some(),
                        "task exceeded its deadline, terminating worker"
                    );
                    pool.terminate();
                    pool.join().await;
                    return TaskOutcome::TimedOut {
                        fallback: self.task.fallback.clone(),
                    };
                }
            },
        };

        let outcome = match result {
            Ok(value) => TaskOutcome::Completed(value),
            Err(e) => {
                debug!(label = %self.task.label, error = %e, kind = e.as_label(), "task failed");
                pool.terminate();
                TaskOutcome::Failed(e)
            }
        };
        pool.join().await;
        outcome
    }

    /// True once [`execute`](Self::execute) has returned
    pub fn done(&self) -> bool {
        self.done
    }

    /// Recorded outcome, if the task has been executed
    pub fn outcome(&self) -> Option<&TaskOutcome> {
        self.outcome.as_ref()
    }

    /// Consumes the handle, returning the recorded outcome
    pub fn into_outcome(self) -> Option<TaskOutcome> {
        self.outcome
    }

    /// Wall time spent in the last execution
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// The wrapped task
    pub fn task(&self) -> &Task {
        &self.task
    }
}
