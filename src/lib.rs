//! # batch-harvest
//!
//! Resilient building blocks for batch jobs that fan work out over isolated
//! workers and scrape fields from unreliable web sources.
//!
//! ## Design Philosophy
//!
//! batch-harvest is designed to be:
//! - **Isolated** - Every unit of work gets its own single-use worker
//! - **Bounded** - Pools cap concurrency, deadlines cap waiting
//! - **Non-throwing** - Task and fetch failures come back as values
//! - **Nestable** - Any worker may open and await further pools
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use batch_harvest::{BulkExecutor, FetchRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let executor = BulkExecutor::new(8);
//!
//!     // Subscribe to events
//!     let mut events = executor.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let tasks = ["AAPL", "MSFT"]
//!         .iter()
//!         .map(|ticker| {
//!             FetchRequest::new(
//!                 format!("https://quotes.example.com/{ticker}"),
//!                 [r"Beta</td><td>([\d.]+)"],
//!             )
//!             .into_task(format!("beta-{ticker}"))
//!             .map(|task| task.with_deadline(Duration::from_secs(120)))
//!         })
//!         .collect::<Result<Vec<_>, _>>()?;
//!
//!     let (results, errors) = executor.run(tasks).await?.into_parts();
//!     println!("{results:?} {errors:?}");
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Order-preserving batch execution
pub mod bulk;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Retrying fetch and pattern extraction
pub mod fetcher;
/// Isolated worker pools
pub mod pool;
/// Retry classification and fixed-delay scheduling
pub mod retry;
/// Units of work and deadline-bounded execution
pub mod task;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use bulk::{BatchReport, BulkExecutor};
pub use config::{Config, FetchConfig, PoolConfig, TaskConfig};
pub use error::{Error, FetchError, PoolError, Result, TaskError};
pub use fetcher::{
    ExtractMode, FetchReport, FetchRequest, FetchSpec, FetchState, Field, HttpSource,
    RetryingFetcher, Source, fetch_work,
};
pub use pool::{Pending, PoolState, WorkerInfo, WorkerKind, WorkerPool, current_worker};
pub use retry::{FailureClass, RetryPolicy};
pub use task::{Task, TaskArgs, TaskHandle, TaskOutcome, Work, WorkFuture};
pub use types::{Event, TaskStatus};
