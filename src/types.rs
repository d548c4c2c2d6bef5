//! Core types and events

use crate::retry::FailureClass;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Terminal status of one task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// The work returned a value before its deadline
    Completed,
    /// The work returned an error, panicked, or its worker was lost
    Failed,
    /// The deadline elapsed and the worker was terminated
    TimedOut,
}

/// Event emitted while running batches and fetches
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A batch was submitted to a fresh pool
    BatchStarted {
        /// Number of tasks in the batch
        tasks: usize,
        /// Capacity of the pool serving the batch
        pool_size: usize,
    },

    /// A task acquired a worker slot and started executing
    TaskStarted {
        /// Submission index within the batch
        index: usize,
        /// Task label
        label: String,
    },

    /// A task returned a value
    TaskCompleted {
        /// Submission index within the batch
        index: usize,
        /// Task label
        label: String,
        /// Wall time spent in the worker, in milliseconds
        elapsed_ms: u64,
    },

    /// A task failed
    TaskFailed {
        /// Submission index within the batch
        index: usize,
        /// Task label
        label: String,
        /// One-line error description
        error: String,
    },

    /// A task exceeded its deadline
    TaskTimedOut {
        /// Submission index within the batch
        index: usize,
        /// Task label
        label: String,
        /// Whether a fallback value was adopted
        fallback_used: bool,
    },

    /// Every task in the batch reached a terminal status
    BatchFinished {
        /// Tasks that completed
        completed: usize,
        /// Tasks that failed
        failed: usize,
        /// Tasks that timed out
        timed_out: usize,
    },

    /// A fetch attempt failed and will be retried
    FetchRetrying {
        /// Requested URL
        url: String,
        /// Retry class of the failure
        class: FailureClass,
        /// Attempt number that failed (1-based)
        attempt: u32,
        /// Delay before the next attempt, in milliseconds
        delay_ms: u64,
        /// Failure description
        error: String,
    },

    /// A fetch produced a document and extraction ran
    FetchSucceeded {
        /// Requested URL
        url: String,
        /// Attempts made (1-based)
        attempts: u32,
    },

    /// A fetch gave up and returned an all-null result
    FetchExhausted {
        /// Requested URL
        url: String,
        /// Attempts made (1-based)
        attempts: u32,
        /// Last failure description
        error: String,
    },
}

/// Fire-and-forget event publisher shared by executors and fetchers
#[derive(Clone, Debug)]
pub(crate) struct EventSender {
    tx: broadcast::Sender<Event>,
}

impl EventSender {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishing never blocks; the event is dropped if nobody listens.
    pub(crate) fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
