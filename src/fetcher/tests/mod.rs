use super::*;
use crate::error::{Error, FetchError};
use crate::{BulkExecutor, TaskHandle, TaskOutcome, TaskStatus};
use async_trait::async_trait;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Source that replays a script of responses, repeating the last one
struct ScriptedSource {
    script: Mutex<VecDeque<std::result::Result<String, FetchError>>>,
    last: fn() -> std::result::Result<String, FetchError>,
    calls: AtomicU32,
}

impl ScriptedSource {
    fn new(
        script: Vec<std::result::Result<String, FetchError>>,
        last: fn() -> std::result::Result<String, FetchError>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last,
            calls: AtomicU32::new(0),
        }
    }

    fn always(last: fn() -> std::result::Result<String, FetchError>) -> Self {
        Self::new(Vec::new(), last)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    async fn get(&self, _url: &str) -> std::result::Result<String, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(self.last)
    }
}

fn malformed() -> std::result::Result<String, FetchError> {
    Err(FetchError::Other("malformed response".into()))
}

fn refused() -> std::result::Result<String, FetchError> {
    Err(FetchError::Connection("connection refused".into()))
}

fn quote_page() -> std::result::Result<String, FetchError> {
    Ok("<td>Price</td><td>187.44</td><td>Volume</td><td>51,200</td>".into())
}

fn fast_spec(patterns: &[&str]) -> FetchSpec {
    FetchSpec::new(patterns.iter().copied())
        .unwrap()
        .with_delay(Duration::from_millis(5))
}

#[tokio::test]
async fn generic_failures_exhaust_to_nulls() {
    let spec = fast_spec(&["a", "b", "c"]).with_max_retries(1);
    let fetcher = RetryingFetcher::with_source(spec, ScriptedSource::always(malformed));

    let report = fetcher.fetch_report("http://quotes.invalid/AAPL").await;

    assert_eq!(report.fields, vec![None, None, None]);
    assert_eq!(report.attempts, 1);
    assert_eq!(
        report.trail,
        vec![FetchState::Fetching, FetchState::ExhaustedRetries]
    );
}

#[tokio::test]
async fn generic_failures_are_retried_up_to_the_bound() {
    let spec = fast_spec(&["x"]).with_max_retries(3);
    let source = ScriptedSource::always(malformed);
    let fetcher = RetryingFetcher::with_source(spec, source);

    let report = fetcher.fetch_report("http://quotes.invalid/").await;

    assert_eq!(report.attempts, 3);
    assert_eq!(fetcher.source.calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        report
            .trail
            .iter()
            .filter(|s| **s == FetchState::RetryingBounded)
            .count(),
        2
    );
    assert_eq!(report.state(), FetchState::ExhaustedRetries);
}

#[tokio::test]
async fn transient_failures_do_not_consume_the_bound() {
    let spec = fast_spec(&[r"<td>Price</td><td>([\d.]+)</td>"])
        .with_groups(vec![1])
        .with_max_retries(1);
    let source = ScriptedSource::new(vec![refused(), refused(), refused()], quote_page);
    let fetcher = RetryingFetcher::with_source(spec, source);

    let report = fetcher.fetch_report("http://quotes.invalid/").await;

    assert_eq!(report.fields, vec![Some(Field::Text("187.44".into()))]);
    assert_eq!(report.attempts, 4);
    assert_eq!(
        report.trail,
        vec![
            FetchState::Fetching,
            FetchState::RetryingTransient,
            FetchState::Fetching,
            FetchState::RetryingTransient,
            FetchState::Fetching,
            FetchState::RetryingTransient,
            FetchState::Fetching,
            FetchState::Succeeded,
        ]
    );
}

#[tokio::test]
async fn transient_cap_ends_in_exhaustion() {
    let spec = fast_spec(&["a", "b"]).with_max_transient_retries(Some(2));
    let fetcher = RetryingFetcher::with_source(spec, ScriptedSource::always(refused));

    let report = fetcher.fetch_report("http://quotes.invalid/").await;

    assert_eq!(report.fields, vec![None, None]);
    assert_eq!(report.attempts, 3);
    assert_eq!(report.state(), FetchState::ExhaustedRetries);
}

#[tokio::test]
async fn generic_then_success_recovers() {
    let spec = fast_spec(&[r"Volume</td><td>([\d,]+)"])
        .with_groups(vec![1])
        .with_max_retries(2);
    let source = ScriptedSource::new(vec![malformed()], quote_page);
    let fetcher = RetryingFetcher::with_source(spec, source);

    let fields = fetcher.fetch("http://quotes.invalid/").await;

    assert_eq!(fields, vec![Some(Field::Text("51,200".into()))]);
}

#[tokio::test]
async fn failed_extraction_nulls_every_pattern() {
    let spec = fast_spec(&[r"Price</td><td>([\d.]+)", r"Dividend</td><td>([\d.]+)"]);
    let fetcher = RetryingFetcher::with_source(spec, ScriptedSource::always(quote_page));

    let report = fetcher.fetch_report("http://quotes.invalid/").await;

    // Extraction failures are not retried
    assert_eq!(report.fields, vec![None, None]);
    assert_eq!(report.attempts, 1);
    assert_eq!(report.state(), FetchState::Succeeded);
}

#[tokio::test]
async fn retry_events_are_published() {
    let spec = fast_spec(&["x"]).with_max_retries(2);
    let fetcher = RetryingFetcher::with_source(spec, ScriptedSource::always(malformed));
    let mut rx = fetcher.subscribe();

    fetcher.fetch("http://quotes.invalid/").await;

    match rx.try_recv().unwrap() {
        Event::FetchRetrying {
            attempt, class, ..
        } => {
            assert_eq!(attempt, 1);
            assert_eq!(class, FailureClass::Generic);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(matches!(
        rx.try_recv().unwrap(),
        Event::FetchExhausted { attempts: 2, .. }
    ));
}

#[tokio::test]
async fn long_outage_keeps_a_bounded_trail() {
    let spec = FetchSpec::new(["a"])
        .unwrap()
        .with_delay(Duration::from_millis(1))
        .with_max_transient_retries(Some(100));
    let fetcher = RetryingFetcher::with_source(spec, ScriptedSource::always(refused));

    let report = fetcher.fetch_report("http://quotes.invalid/").await;

    assert_eq!(report.attempts, 101);
    assert_eq!(report.trail.len(), TRAIL_LIMIT);
    assert_eq!(report.state(), FetchState::ExhaustedRetries);
    assert_eq!(report.trail[TRAIL_LIMIT - 2], FetchState::Fetching);
}

#[test]
fn setters_ignore_non_positive_values() {
    let spec = FetchSpec::new(["a"])
        .unwrap()
        .with_timeout(Duration::from_secs(10))
        .with_timeout(Duration::ZERO)
        .with_delay(Duration::from_secs(2))
        .with_delay(Duration::ZERO)
        .with_max_retries(5)
        .with_max_retries(0);

    assert_eq!(spec.timeout(), Duration::from_secs(10));
    assert_eq!(spec.retry_policy().delay, Duration::from_secs(2));
    assert_eq!(spec.retry_policy().max_retries, 5);
}

#[test]
fn empty_group_selector_clears_groups() {
    let spec = FetchSpec::new(["(a)"]).unwrap().with_groups(vec![1]);
    assert_eq!(spec.groups(), Some(&[1][..]));

    let spec = spec.with_groups(Vec::new());
    assert!(spec.groups().is_none());
}

#[test]
fn invalid_pattern_is_rejected() {
    let err = FetchSpec::new(["(unclosed"]).unwrap_err();
    assert!(matches!(err, Error::Pattern(_)));

    let mut spec = FetchSpec::new(["ok"]).unwrap();
    assert!(spec.set_patterns(["[bad"]).is_err());
    assert_eq!(spec.patterns()[0].as_str(), "ok");
}

#[test]
fn spec_follows_fetch_config() {
    let config = FetchConfig {
        timeout: Duration::from_secs(7),
        verify_tls: true,
        max_transient_retries: Some(4),
        ..FetchConfig::default()
    };

    let spec = FetchSpec::from_config(["a"], &config).unwrap();

    assert_eq!(spec.timeout(), Duration::from_secs(7));
    assert!(spec.verify_tls());
    assert_eq!(spec.retry_policy().max_transient_retries, Some(4));
    assert_eq!(spec.mode(), ExtractMode::FirstMatch);
}

#[test]
fn zero_config_durations_fall_back_to_defaults() {
    let request: FetchRequest = serde_json::from_str(
        r#"{"url": "http://quotes.invalid/", "patterns": ["a"], "config": {"timeout": 0, "delay": 0, "max_retries": 0}}"#,
    )
    .unwrap();

    let spec = request.spec().unwrap();
    let defaults = FetchConfig::default();

    assert_eq!(spec.timeout(), defaults.timeout);
    assert_eq!(spec.retry_policy().delay, defaults.delay);
    assert_eq!(spec.retry_policy().max_retries, defaults.max_retries);
}

#[tokio::test]
async fn sub_second_request_settings_survive_task_args() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("Beta: 1.21")
                .set_delay(Duration::from_millis(50)),
        )
        .mount(&mock_server)
        .await;

    let mut request = FetchRequest::new(mock_server.uri(), [r"Beta: ([\d.]+)"]);
    request.groups = Some(vec![1]);
    request.config.timeout = Duration::from_millis(800);
    request.config.delay = Duration::from_millis(200);

    let args: FetchRequest = serde_json::from_value(serde_json::to_value(&request).unwrap()).unwrap();
    assert_eq!(args.spec().unwrap().timeout(), Duration::from_millis(800));
    assert_eq!(args.spec().unwrap().retry_policy().delay, Duration::from_millis(200));

    let task = request
        .into_task("beta")
        .unwrap()
        .with_deadline(Duration::from_secs(3));
    let mut handle = TaskHandle::new(task);

    assert_eq!(
        handle.execute().await,
        &TaskOutcome::Completed(json!(["1.21"]))
    );
}

#[tokio::test]
async fn http_body_is_decoded_with_its_charset() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            b"Beta: 1.21 Caf\xE9".to_vec(),
            "text/html; charset=iso-8859-1",
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let spec = FetchSpec::new([r"Beta: ([\d.]+)", r"(Caf.)"])
        .unwrap()
        .with_groups(vec![1]);
    let fetcher = RetryingFetcher::new(spec).unwrap();

    let report = fetcher.fetch_report(&mock_server.uri()).await;

    assert_eq!(report.attempts, 1);
    assert_eq!(
        report.fields,
        vec![
            Some(Field::Text("1.21".into())),
            Some(Field::Text("Café".into())),
        ]
    );
}

#[tokio::test]
async fn http_find_all() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/doc"))
        .respond_with(ResponseTemplate::new(200).set_body_string("aaa bbb aa"))
        .mount(&mock_server)
        .await;

    let fetcher = RetryingFetcher::new(FetchSpec::new(["a+"]).unwrap().find_all()).unwrap();
    let fields = fetcher.fetch(&format!("{}/doc", mock_server.uri())).await;

    assert_eq!(serde_json::to_value(&fields).unwrap(), json!([["aaa", "aa"]]));
}

#[tokio::test]
async fn http_first_match_with_group_selector() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/range"))
        .respond_with(ResponseTemplate::new(200).set_body_string("12-34"))
        .mount(&mock_server)
        .await;

    let spec = FetchSpec::new([r"(\d+)-(\d+)"]).unwrap().with_groups(vec![1]);
    let fetcher = RetryingFetcher::new(spec).unwrap();
    let fields = fetcher.fetch(&format!("{}/range", mock_server.uri())).await;

    assert_eq!(serde_json::to_value(&fields).unwrap(), json!(["12"]));
}

#[tokio::test]
async fn http_error_status_is_still_a_document() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance until 06:00"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let spec = FetchSpec::new([r"until (\d\d:\d\d)"]).unwrap().with_groups(vec![1]);
    let fetcher = RetryingFetcher::new(spec).unwrap();
    let fields = fetcher.fetch(&mock_server.uri()).await;

    assert_eq!(fields, vec![Some(Field::Text("06:00".into()))]);
}

#[tokio::test]
async fn http_slow_response_is_transient() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&mock_server)
        .await;

    let spec = fast_spec(&["late"])
        .with_timeout(Duration::from_millis(100))
        .with_max_retries(1)
        .with_max_transient_retries(Some(1));
    let fetcher = RetryingFetcher::new(spec).unwrap();

    let report = fetcher.fetch_report(&mock_server.uri()).await;

    assert_eq!(report.fields, vec![None]);
    assert_eq!(report.attempts, 2);
    assert!(report.trail.contains(&FetchState::RetryingTransient));
    assert!(!report.trail.contains(&FetchState::RetryingBounded));
}

#[tokio::test]
async fn http_invalid_url_is_generic() {
    let spec = fast_spec(&["a", "b"]).with_max_retries(2);
    let fetcher = RetryingFetcher::new(spec).unwrap();

    let report = fetcher.fetch_report("not a url").await;

    assert_eq!(report.fields, vec![None, None]);
    assert_eq!(report.attempts, 2);
    assert!(report.trail.contains(&FetchState::RetryingBounded));
}

#[tokio::test]
async fn fetch_requests_run_as_batch_tasks() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/AAPL"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Beta: 1.21"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/MSFT"))
        .respond_with(ResponseTemplate::new(200).set_body_string("Beta: 0.93"))
        .mount(&mock_server)
        .await;

    let tasks = ["AAPL", "MSFT"]
        .iter()
        .map(|ticker| {
            let mut request = FetchRequest::new(
                format!("{}/{ticker}", mock_server.uri()),
                [r"Beta: ([\d.]+)"],
            );
            request.groups = Some(vec![1]);
            request.into_task(format!("beta-{ticker}")).unwrap()
        })
        .collect();

    let report = BulkExecutor::new(2).run(tasks).await.unwrap();

    assert_eq!(
        report.results,
        vec![Some(json!(["1.21"])), Some(json!(["0.93"]))]
    );
    assert_eq!(
        report.statuses,
        vec![TaskStatus::Completed, TaskStatus::Completed]
    );
}
