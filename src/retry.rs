//! Retry classification and fixed-delay scheduling
//!
//! Failures are split into two classes:
//! - **Transient** (read timeouts, connection failures): retried after the fixed
//!   delay without touching the bounded counter. Unbounded unless
//!   [`RetryPolicy::max_transient_retries`] sets a ceiling.
//! - **Generic** (anything else): each one increments the bounded counter; once
//!   it reaches [`RetryPolicy::max_retries`] the caller gives up.
//!
//! # Example
//!
//! ```
//! use batch_harvest::retry::{Decision, FailureClass, RetryBudget, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy {
//!     delay: Duration::from_millis(10),
//!     max_retries: 2,
//!     max_transient_retries: None,
//!     jitter: false,
//! };
//! let mut budget = RetryBudget::new(&policy);
//!
//! // Transient failures never consume the bounded budget
//! for _ in 0..100 {
//!     assert!(matches!(budget.record(FailureClass::Transient), Decision::RetryAfter(_)));
//! }
//! assert!(matches!(budget.record(FailureClass::Generic), Decision::RetryAfter(_)));
//! assert_eq!(budget.record(FailureClass::Generic), Decision::GiveUp);
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Retry class of a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Retryable I/O condition (timeout, connection failure)
    Transient,
    /// Any other failure; consumes the bounded retry budget
    Generic,
}

/// Trait for errors that can be classified into a [`FailureClass`]
pub trait Classify {
    /// Returns the retry class of this error
    fn class(&self) -> FailureClass;
}

/// Fixed-delay retry policy
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Delay before every retry
    pub delay: Duration,
    /// Number of generic failures after which the caller gives up
    ///
    /// The count includes the first attempt, so `1` means a single attempt
    /// and no retry. `0` behaves like `1`.
    pub max_retries: u32,
    /// Optional ceiling on transient retries (`None` = unbounded)
    pub max_transient_retries: Option<u32>,
    /// Randomize each delay between `delay` and `2 * delay`
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_retries: 3,
            max_transient_retries: None,
            jitter: false,
        }
    }
}

/// What to do after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Sleep for the given duration, then try again
    RetryAfter(Duration),
    /// Stop retrying
    GiveUp,
}

/// Mutable retry counters for one operation
#[derive(Debug)]
pub struct RetryBudget<'a> {
    policy: &'a RetryPolicy,
    generic: u32,
    transient: u32,
}

impl<'a> RetryBudget<'a> {
    /// Starts a fresh budget for one operation
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            generic: 0,
            transient: 0,
        }
    }

    /// Records a failure of the given class and decides whether to retry
    pub fn record(&mut self, class: FailureClass) -> Decision {
        match class {
            FailureClass::Transient => {
                self.transient = self.transient.saturating_add(1);
                let capped = self
                    .policy
                    .max_transient_retries
                    .is_some_and(|cap| self.transient > cap);
                if capped {
                    return Decision::GiveUp;
                }
            }
            FailureClass::Generic => {
                self.generic = self.generic.saturating_add(1);
                if self.generic >= self.policy.max_retries {
                    return Decision::GiveUp;
                }
            }
        }
        Decision::RetryAfter(self.next_delay())
    }

    /// Generic failures recorded so far
    pub fn generic_failures(&self) -> u32 {
        self.generic
    }

    /// Transient failures recorded so far
    pub fn transient_failures(&self) -> u32 {
        self.transient
    }

    fn next_delay(&self) -> Duration {
        if self.policy.jitter {
            add_jitter(self.policy.delay)
        } else {
            self.policy.delay
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
