//! Units of work and their isolated, deadline-bounded execution.
//!
//! A [`Task`] is a plain function reference ([`Work`]) plus plain-data
//! [`TaskArgs`], an optional deadline and an optional fallback value.
//! [`TaskHandle::execute`] runs it on a dedicated single-worker pool and
//! records a [`TaskOutcome`].

mod args;
mod handle;

pub use args::TaskArgs;
pub use handle::TaskHandle;

use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::config::TaskConfig;
use crate::error::TaskError;
use crate::pool::panic_message;
use crate::types::TaskStatus;

/// Future returned by asynchronous work functions
pub type WorkFuture = BoxFuture<'static, Result<Value, TaskError>>;

/// A self-contained work function
///
/// Only `fn` pointers are accepted, so work cannot capture references to the
/// submitter's state; everything it needs arrives through [`TaskArgs`].
#[derive(Clone, Copy, Debug)]
pub enum Work {
    /// Async function polled inside the worker
    Async(fn(TaskArgs) -> WorkFuture),
    /// Blocking function run on the worker's blocking thread pool
    Blocking(fn(TaskArgs) -> Result<Value, TaskError>),
}

impl Work {
    /// Builds the future that performs this work with `args`.
    ///
    /// Nothing runs until the returned future is polled.
    pub fn call(self, args: TaskArgs) -> WorkFuture {
        match self {
            Work::Async(f) => Box::pin(async move { f(args).await }),
            Work::Blocking(f) => Box::pin(async move {
                match tokio::task::spawn_blocking(move || f(args)).await {
                    Ok(out) => out,
                    Err(e) if e.is_panic() => {
                        Err(TaskError::Panicked(panic_message(&*e.into_panic())))
                    }
                    Err(_) => Err(TaskError::Terminated),
                }
            }),
        }
    }
}

/// One unit of work submitted for isolated execution
#[derive(Clone, Debug)]
pub struct Task {
    /// Label attached to the task's worker
    pub label: String,
    /// Work function
    pub work: Work,
    /// Arguments passed to the work function
    pub args: TaskArgs,
    /// Maximum wait before the worker is terminated (None = unbounded)
    pub deadline: Option<Duration>,
    /// Value adopted if the deadline elapses
    pub fallback: Option<Value>,
}

impl Task {
    /// New task with no arguments, no deadline and no fallback
    pub fn new(label: impl Into<String>, work: Work) -> Self {
        Self {
            label: label.into(),
            work,
            args: TaskArgs::default(),
            deadline: None,
            fallback: None,
        }
    }

    /// Replaces the argument list.
    pub fn with_args(mut self, args: TaskArgs) -> Self {
        self.args = args;
        self
    }

    /// Sets the deadline. A zero duration is ignored.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        if !deadline.is_zero() {
            self.deadline = Some(deadline);
        }
        self
    }

    /// Sets the value adopted on timeout.
    pub fn with_fallback(mut self, fallback: impl Into<Value>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Fills the deadline and fallback from `defaults` where they are unset.
    pub fn with_defaults(mut self, defaults: &TaskConfig) -> Self {
        if self.deadline.is_none() {
            self.deadline = defaults.deadline.filter(|d| !d.is_zero());
        }
        if self.fallback.is_none() {
            self.fallback = defaults.fallback.clone();
        }
        self
    }
}

/// Terminal result of one task
#[derive(Clone, Debug, PartialEq)]
pub enum TaskOutcome {
    /// The work returned a value before its deadline
    Completed(Value),
    /// The work failed; the value is unset
    Failed(TaskError),
    /// The deadline elapsed and the worker was terminated
    TimedOut {
        /// The fallback, if one was configured
        fallback: Option<Value>,
    },
}

impl TaskOutcome {
    /// The task's value: the returned value, or the adopted fallback
    pub fn value(&self) -> Option<&Value> {
        match self {
            TaskOutcome::Completed(v) => Some(v),
            TaskOutcome::TimedOut { fallback } => fallback.as_ref(),
            TaskOutcome::Failed(_) => None,
        }
    }

    /// One-line error description; set only for failed tasks
    pub fn error(&self) -> Option<String> {
        match self {
            TaskOutcome::Failed(e) => Some(e.describe()),
            _ => None,
        }
    }

    /// Explicit terminal status
    pub fn status(&self) -> TaskStatus {
        match self {
            TaskOutcome::Completed(_) => TaskStatus::Completed,
            TaskOutcome::Failed(_) => TaskStatus::Failed,
            TaskOutcome::TimedOut { .. } => TaskStatus::TimedOut,
        }
    }

    /// Splits into the `(value, error)` pair; never both set.
    pub fn into_parts(self) -> (Option<Value>, Option<String>) {
        match self {
            TaskOutcome::Completed(v) => (Some(v), None),
            TaskOutcome::TimedOut { fallback } => (fallback, None),
            TaskOutcome::Failed(e) => (None, Some(e.describe())),
        }
    }
}
