//! Error types for batch-harvest
//!
//! This module provides the error taxonomy for the library:
//! - [`Error`] - crate-level error returned by fallible constructors and batch runs
//! - [`PoolError`] - worker pool lifecycle and resource failures (fatal to a batch)
//! - [`TaskError`] - failures of a single unit of work (attached to that task only)
//! - [`FetchError`] - failures of one fetch attempt, classified as transient or generic
//!
//! Task and fetch failures surface as values (error strings and null markers).
//! Only configuration mistakes and pool resource exhaustion reach the caller
//! as `Err`.

use crate::retry::{Classify, FailureClass};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for batch-harvest operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for batch-harvest
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pool.size")
        key: Option<String>,
    },

    /// Worker pool failure
    #[error("pool error: {0}")]
    Pool(#[from] PoolError),

    /// An extraction pattern failed to compile
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// HTTP client could not be constructed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error (reading configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Worker pool lifecycle and resource errors
///
/// A pool error means the batch cannot be trusted to have run every task, so
/// callers treat it as fatal to that batch rather than as a per-task failure.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is draining or closed and no longer accepts submissions
    #[error("pool {label} is no longer accepting work")]
    Closed {
        /// Label of the pool that rejected the submission
        label: String,
    },

    /// A pool must have at least one worker slot
    #[error("pool capacity must be at least 1")]
    ZeroCapacity,

    /// An OS thread for a worker could not be spawned
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// A worker runtime could not be built
    #[error("failed to build worker runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// Pools must be opened from within a Tokio runtime
    #[error("no Tokio runtime is available to host workers")]
    NoRuntime,

    /// A worker slot failed for lack of resources while the batch was running
    #[error("worker resources exhausted: {0}")]
    Exhausted(String),
}

/// Errors produced by a single unit of work
///
/// Every variant renders to the one-line string stored in a task's error slot.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TaskError {
    /// The work function returned an error
    #[error("execution failed: {0}")]
    Failed(String),

    /// An argument could not be read as the type the work function expected
    #[error("bad argument {name}: {reason}")]
    BadArgument {
        /// Positional index or keyword name of the argument
        name: String,
        /// Why the argument was rejected
        reason: String,
    },

    /// The work function panicked
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// The worker was terminated before the work finished
    #[error("worker terminated")]
    Terminated,

    /// The task exceeded its deadline
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// The worker could not be started (resource exhaustion)
    #[error("worker could not be started: {0}")]
    WorkerSpawn(String),

    /// The worker vanished without reporting a result
    #[error("worker lost before reporting a result")]
    WorkerLost,
}

impl TaskError {
    /// Convenience constructor for [`TaskError::Failed`]
    pub fn failed(message: impl Into<String>) -> Self {
        TaskError::Failed(message.into())
    }

    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Failed(_) => "task_failed",
            TaskError::BadArgument { .. } => "bad_argument",
            TaskError::Panicked(_) => "task_panicked",
            TaskError::Terminated => "task_terminated",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::WorkerSpawn(_) => "worker_spawn_failed",
            TaskError::WorkerLost => "worker_lost",
        }
    }

    /// Renders the error as the one-line `"<label>: <message>"` description
    /// stored in a task's error slot.
    ///
    /// # Example
    /// ```
    /// use batch_harvest::TaskError;
    ///
    /// let err = TaskError::failed("division by zero");
    /// assert_eq!(err.describe(), "task_failed: execution failed: division by zero");
    /// ```
    pub fn describe(&self) -> String {
        format!("{}: {}", self.as_label(), self)
    }

    /// Returns true when the failure indicates resource exhaustion in the
    /// pool rather than a problem with the work itself.
    pub fn is_resource_failure(&self) -> bool {
        matches!(self, TaskError::WorkerSpawn(_))
    }
}

impl From<PoolError> for TaskError {
    fn from(e: PoolError) -> Self {
        TaskError::WorkerSpawn(e.to_string())
    }
}

/// Errors from a single fetch attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP transport error (timeouts, refused connections, TLS, body reads)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The URL could not be parsed
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The document could not be decoded as text (raised by non-HTTP sources)
    #[error("decode error: {0}")]
    Decode(String),

    /// Read timed out (raised by non-HTTP sources)
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Connection could not be established (raised by non-HTTP sources)
    #[error("connection failed: {0}")]
    Connection(String),

    /// Any other failure
    #[error("{0}")]
    Other(String),
}

impl Classify for FetchError {
    fn class(&self) -> FailureClass {
        match self {
            // Only read timeouts and connection failures are transient
            FetchError::Network(e) if e.is_timeout() || e.is_connect() => FailureClass::Transient,
            FetchError::TimedOut(_) | FetchError::Connection(_) => FailureClass::Transient,
            FetchError::Network(_)
            | FetchError::InvalidUrl(_)
            | FetchError::Decode(_)
            | FetchError::Other(_) => FailureClass::Generic,
        }
    }
}
