//! Configuration types for batch-harvest
//!
//! A [`Config`] mirrors the options document a batch job reads at start-up.
//! Every field has a default, so an empty JSON object is a valid config:
//!
//! ```
//! use batch_harvest::Config;
//!
//! let config = Config::from_json_str("{}").unwrap();
//! assert_eq!(config.pool.size, 4);
//! assert!(config.fetch.max_transient_retries.is_none());
//! ```

use crate::error::{Error, Result};
use crate::pool::WorkerKind;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Worker pool settings used by [`BulkExecutor`](crate::BulkExecutor)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of concurrently running workers (default: 4)
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// Label attached to every worker for observability (default: "batch")
    #[serde(default = "default_pool_label")]
    pub label: String,

    /// Isolation used for each worker (default: task)
    #[serde(default)]
    pub worker_kind: WorkerKind,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            label: default_pool_label(),
            worker_kind: WorkerKind::default(),
        }
    }
}

/// Defaults applied to tasks built with [`Task::with_defaults`](crate::Task::with_defaults)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Default deadline in seconds, fractions allowed (None = wait until completion)
    #[serde(default, with = "optional_duration_serde")]
    pub deadline: Option<Duration>,

    /// Default value adopted when a task exceeds its deadline
    #[serde(default)]
    pub fallback: Option<serde_json::Value>,
}

/// Fetch and retry settings used by [`RetryingFetcher`](crate::RetryingFetcher)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Request timeout in seconds, fractions allowed (default: 30)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Delay before each retry in seconds, fractions allowed (default: 1)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub delay: Duration,

    /// Generic failures tolerated before giving up, first attempt included (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Ceiling on transient retries (default: None = unbounded)
    #[serde(default)]
    pub max_transient_retries: Option<u32>,

    /// Verify server TLS certificates (default: false)
    #[serde(default)]
    pub verify_tls: bool,

    /// Randomize retry delays (default: false)
    #[serde(default)]
    pub jitter: bool,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            delay: default_retry_delay(),
            max_retries: default_max_retries(),
            max_transient_retries: None,
            verify_tls: false,
            jitter: false,
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    /// Retry policy described by this section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: self.delay,
            max_retries: self.max_retries,
            max_transient_retries: self.max_transient_retries,
            jitter: self.jitter,
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Worker pool settings
    #[serde(default)]
    pub pool: PoolConfig,

    /// Task defaults
    #[serde(default)]
    pub task: TaskConfig,

    /// Fetch and retry settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Capacity of the event broadcast channel (default: 1024)
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Config {
    /// Parse and validate a configuration from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Reject settings that cannot produce a working batch
    pub fn validate(&self) -> Result<()> {
        if self.pool.size == 0 {
            return Err(Error::Config {
                message: "pool size must be at least 1".to_string(),
                key: Some("pool.size".to_string()),
            });
        }
        if self.fetch.timeout.is_zero() {
            return Err(Error::Config {
                message: "fetch timeout must be positive".to_string(),
                key: Some("fetch.timeout".to_string()),
            });
        }
        if self.task.deadline.is_some_and(|d| d.is_zero()) {
            return Err(Error::Config {
                message: "task deadline must be positive when set".to_string(),
                key: Some("task.deadline".to_string()),
            });
        }
        Ok(())
    }
}

fn default_pool_size() -> usize {
    4
}

fn default_pool_label() -> String {
    "batch".into()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_retries() -> u32 {
    3
}

fn default_user_agent() -> String {
    concat!("batch-harvest/", env!("CARGO_PKG_VERSION")).into()
}

fn default_event_capacity() -> usize {
    1024
}

// Duration serialization helper, fractional seconds
mod duration_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs_f64()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Option::<f64>::deserialize(deserializer)?
            .map(Duration::try_from_secs_f64)
            .transpose()
            .map_err(D::Error::custom)
    }
}
