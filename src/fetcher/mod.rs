//! Retrying document fetcher with pattern extraction.
//!
//! ```text
//!            ┌──────────── delay ◄─── RetryingTransient ◄─┐ timeout / connect
//!            ▼                                            │
//! start ─► Fetching ──── document ───► Succeeded ─────────┼──► fields
//!            ▲                                            │
//!            └──────────── delay ◄─── RetryingBounded ◄───┘ any other error
//!                                          │
//!                                   budget spent ──► ExhaustedRetries ──► all nulls
//! ```
//!
//! A fetch never fails: the result always has one entry per pattern, and
//! every entry is null when the document could not be retrieved or the
//! extraction could not be completed.

mod extract;
mod source;

pub use extract::{ExtractMode, Field};
pub use source::{HttpSource, Source};

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::config::FetchConfig;
use crate::error::{Result, TaskError};
use crate::retry::{Classify, Decision, FailureClass, RetryBudget, RetryPolicy};
use crate::task::{Task, TaskArgs, Work, WorkFuture};
use crate::types::{Event, EventSender};

/// What to fetch-and-extract, and how hard to try
#[derive(Clone, Debug)]
pub struct FetchSpec {
    patterns: Vec<Regex>,
    timeout: Duration,
    retry: RetryPolicy,
    verify_tls: bool,
    mode: ExtractMode,
    groups: Option<Vec<usize>>,
    user_agent: String,
}

impl FetchSpec {
    /// Compiles `patterns` with default fetch settings.
    ///
    /// # Errors
    /// [`Error::Pattern`](crate::Error::Pattern) if any pattern is invalid.
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_config(patterns, &FetchConfig::default())
    }

    /// Compiles `patterns` with settings from a `fetch` config section.
    ///
    /// Zero timeout, delay or retry bound fall back to the defaults, as with
    /// the setters.
    pub fn from_config<I, S>(patterns: I, config: &FetchConfig) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let defaults = FetchConfig::default();
        let spec = Self {
            patterns: compile(patterns)?,
            timeout: defaults.timeout,
            retry: defaults.retry_policy(),
            verify_tls: config.verify_tls,
            mode: ExtractMode::FirstMatch,
            groups: None,
            user_agent: config.user_agent.clone(),
        };
        Ok(spec
            .with_timeout(config.timeout)
            .with_delay(config.delay)
            .with_max_retries(config.max_retries)
            .with_max_transient_retries(config.max_transient_retries)
            .with_jitter(config.jitter))
    }

    /// Replaces the pattern list. On error the previous patterns are kept.
    pub fn set_patterns<I, S>(&mut self, patterns: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.patterns = compile(patterns)?;
        Ok(())
    }

    /// Request timeout. Zero is ignored.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.timeout = timeout;
        }
        self
    }

    /// Delay before every retry. Zero is ignored.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        if !delay.is_zero() {
            self.retry.delay = delay;
        }
        self
    }

    /// Generic failures tolerated, first attempt included. Zero is ignored.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        if max_retries > 0 {
            self.retry.max_retries = max_retries;
        }
        self
    }

    /// Caps transient retries (`None` = unbounded).
    pub fn with_max_transient_retries(mut self, cap: Option<u32>) -> Self {
        self.retry.max_transient_retries = cap;
        self
    }

    /// Randomizes retry delays between `delay` and `2 * delay`.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.retry.jitter = jitter;
        self
    }

    /// Whether server certificates are verified.
    pub fn with_verify_tls(mut self, verify: bool) -> Self {
        self.verify_tls = verify;
        self
    }

    /// Extraction mode.
    pub fn with_mode(mut self, mode: ExtractMode) -> Self {
        self.mode = mode;
        self
    }

    /// Shorthand for [`ExtractMode::FindAll`].
    pub fn find_all(self) -> Self {
        self.with_mode(ExtractMode::FindAll)
    }

    /// Capture groups returned in first-match mode. An empty selector
    /// clears it.
    pub fn with_groups(mut self, groups: impl Into<Vec<usize>>) -> Self {
        let groups = groups.into();
        self.groups = (!groups.is_empty()).then_some(groups);
        self
    }

    /// Compiled patterns
    pub fn patterns(&self) -> &[Regex] {
        &self.patterns
    }

    /// Number of entries in every fetch result
    pub fn arity(&self) -> usize {
        self.patterns.len()
    }

    /// Request timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Retry policy
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Certificate verification flag
    pub fn verify_tls(&self) -> bool {
        self.verify_tls
    }

    /// Extraction mode
    pub fn mode(&self) -> ExtractMode {
        self.mode
    }

    /// Capture-group selector
    pub fn groups(&self) -> Option<&[usize]> {
        self.groups.as_deref()
    }
}

fn record(trail: &mut Vec<FetchState>, state: FetchState) {
    if trail.len() == TRAIL_LIMIT {
        trail.remove(0);
    }
    trail.push(state);
}

fn compile<I, S>(patterns: I) -> Result<Vec<Regex>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    patterns
        .into_iter()
        .map(|p| Regex::new(p.as_ref()).map_err(Into::into))
        .collect()
}

/// States a fetch passes through
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchState {
    /// Requesting the document
    Fetching,
    /// Waiting after a timeout or connection failure
    RetryingTransient,
    /// Waiting after any other failure
    RetryingBounded,
    /// A document was retrieved and extraction ran (possibly degraded)
    Succeeded,
    /// The retry budget ran out; every field is null
    ExhaustedRetries,
}

/// Most recent states kept in [`FetchReport::trail`]
pub const TRAIL_LIMIT: usize = 64;

/// Result of one fetch together with how it got there
#[derive(Clone, Debug, PartialEq)]
pub struct FetchReport {
    /// One entry per pattern
    pub fields: Vec<Option<Field>>,
    /// Requests made
    pub attempts: u32,
    /// States visited, in order. Long outages keep only the last
    /// [`TRAIL_LIMIT`] entries.
    pub trail: Vec<FetchState>,
}

impl FetchReport {
    /// Final state of the fetch
    pub fn state(&self) -> FetchState {
        self.trail
            .last()
            .copied()
            .unwrap_or(FetchState::Fetching)
    }
}

/// Fetches documents and extracts fields, retrying on failure
pub struct RetryingFetcher<S = HttpSource> {
    spec: FetchSpec,
    source: S,
    events: EventSender,
}

impl RetryingFetcher<HttpSource> {
    /// Fetcher over HTTP using the spec's timeout and certificate settings.
    ///
    /// # Errors
    /// [`Error::Network`](crate::Error::Network) if the HTTP client cannot be built.
    pub fn new(spec: FetchSpec) -> Result<Self> {
        let source = HttpSource::new(spec.timeout, spec.verify_tls, &spec.user_agent)?;
        Ok(Self::with_source(spec, source))
    }
}

impl<S: Source> RetryingFetcher<S> {
    /// Fetcher over a custom source
    pub fn with_source(spec: FetchSpec, source: S) -> Self {
        Self {
            spec,
            source,
            events: EventSender::new(1024),
        }
    }

    /// The fetch settings
    pub fn spec(&self) -> &FetchSpec {
        &self.spec
    }

    /// Subscribe to retry and completion events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Fetches `url` and extracts one entry per pattern. Never fails.
    pub async fn fetch(&self, url: &str) -> Vec<Option<Field>> {
        self.fetch_report(url).await.fields
    }

    /// Like [`fetch`](Self::fetch), also reporting attempts and visited states.
    pub async fn fetch_report(&self, url: &str) -> FetchReport {
        let mut budget = RetryBudget::new(&self.spec.retry);
        let mut trail = Vec::with_capacity(TRAIL_LIMIT);
        let mut attempts: u32 = 0;

        loop {
            record(&mut trail, FetchState::Fetching);
            attempts += 1;

            let err = match self.source.get(url).await {
                Ok(doc) => {
                    let fields = self.extract(url, &doc);
                    record(&mut trail, FetchState::Succeeded);
                    debug!(url, attempts, "fetch succeeded");
                    self.events.emit(Event::FetchSucceeded {
                        url: url.to_string(),
                        attempts,
                    });
                    return FetchReport {
                        fields,
                        attempts,
                        trail,
                    };
                }
                Err(e) => e,
            };

            let class = err.class();
            match budget.record(class) {
                Decision::RetryAfter(delay) => {
                    record(
                        &mut trail,
                        match class {
                            FailureClass::Transient => FetchState::RetryingTransient,
                            FailureClass::Generic => FetchState::RetryingBounded,
                        },
                    );
                    warn!(
                        url,
                        attempt = attempts,
                        class = ?class,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "fetch failed, retrying"
                    );
                    self.events.emit(Event::FetchRetrying {
                        url: url.to_string(),
                        class,
                        attempt: attempts,
                        delay_ms: delay.as_millis() as u64,
                        error: err.to_string(),
                    });
                    tokio::time::sleep(delay).await;
                }
                Decision::GiveUp => {
                    record(&mut trail, FetchState::ExhaustedRetries);
                    error!(
                        url,
                        attempts,
                        generic = budget.generic_failures(),
                        transient = budget.transient_failures(),
                        error = %err,
                        "fetch retries exhausted"
                    );
                    self.events.emit(Event::FetchExhausted {
                        url: url.to_string(),
                        attempts,
                        error: err.to_string(),
                    });
                    return FetchReport {
                        fields: vec![None; self.spec.arity()],
                        attempts,
                        trail,
                    };
                }
            }
        }
    }

    fn extract(&self, url: &str, doc: &str) -> Vec<Option<Field>> {
        match extract::extract(
            doc,
            &self.spec.patterns,
            self.spec.mode,
            self.spec.groups(),
        ) {
            Ok(fields) => fields,
            Err(e) => {
                debug!(url, error = %e, "extraction failed, nulling every field");
                vec![None; self.spec.arity()]
            }
        }
    }
}

impl<S> std::fmt::Debug for RetryingFetcher<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingFetcher")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Plain-data description of one fetch, runnable as a pool [`Task`]
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FetchRequest {
    /// Document URL
    pub url: String,
    /// Extraction patterns
    pub patterns: Vec<String>,
    /// Use find-all extraction
    #[serde(default)]
    pub find_all: bool,
    /// Capture-group selector for first-match extraction
    #[serde(default)]
    pub groups: Option<Vec<usize>>,
    /// Fetch and retry settings
    #[serde(default)]
    pub config: FetchConfig,
}

impl FetchRequest {
    /// Request with default settings
    pub fn new<S: Into<String>>(url: impl Into<String>, patterns: impl IntoIterator<Item = S>) -> Self {
        Self {
            url: url.into(),
            patterns: patterns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Builds the fetch settings described by this request.
    pub fn spec(&self) -> Result<FetchSpec> {
        let spec = FetchSpec::from_config(&self.patterns, &self.config)?
            .with_mode(if self.find_all {
                ExtractMode::FindAll
            } else {
                ExtractMode::FirstMatch
            });
        Ok(match &self.groups {
            Some(groups) => spec.with_groups(groups.clone()),
            None => spec,
        })
    }

    /// Wraps the request as a task whose value is the JSON field list.
    pub fn into_task(self, label: impl Into<String>) -> Result<Task> {
        let args = serde_json::to_value(&self)?;
        Ok(Task::new(label, Work::Async(fetch_work)).with_args(TaskArgs::new().arg(args)))
    }
}

/// Work function that runs a [`FetchRequest`] passed as the first argument.
pub fn fetch_work(args: TaskArgs) -> WorkFuture {
    Box::pin(async move {
        let request: FetchRequest = args.get(0)?;
        let spec = request
            .spec()
            .map_err(|e| TaskError::failed(e.to_string()))?;
        let fetcher = RetryingFetcher::new(spec).map_err(|e| TaskError::failed(e.to_string()))?;
        let fields = fetcher.fetch(&request.url).await;
        serde_json::to_value(fields).map_err(|e| TaskError::failed(e.to_string()))
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
