//! Work functions and documents shared by integration tests

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use batch_harvest::{
    BulkExecutor, Task, TaskArgs, TaskError, Work, WorkFuture, current_worker,
};
use serde_json::{Value, json};

/// Quote page served by mock servers
pub const QUOTE_PAGE: &str = r#"<table>
  <tr><td>Price</td><td>187.44</td></tr>
  <tr><td>Beta</td><td>1.21</td></tr>
  <tr><td>Dividend</td><td>0.96</td></tr>
</table>"#;

/// Live drop guards created by [`sleep_with_guard`], one counter per test
pub static LIVE_GUARDS: [AtomicUsize; 4] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];

/// Keeps `LIVE_GUARDS[counter]` incremented while alive
pub struct LiveGuard {
    counter: usize,
}

impl LiveGuard {
    pub fn new(counter: usize) -> Self {
        LIVE_GUARDS[counter].fetch_add(1, Ordering::SeqCst);
        LiveGuard { counter }
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        LIVE_GUARDS[self.counter].fetch_sub(1, Ordering::SeqCst);
    }
}

/// Number of live guards on `counter`
pub fn live_guards(counter: usize) -> usize {
    LIVE_GUARDS[counter].load(Ordering::SeqCst)
}

/// Sleeps for `args[0]` seconds holding a [`LiveGuard`] on the `counter`
/// keyword (default 0), then returns "woke"
pub fn sleep_with_guard(args: TaskArgs) -> WorkFuture {
    Box::pin(async move {
        let secs: u64 = args.get(0)?;
        let counter: usize = args.named_opt("counter")?.unwrap_or(0);
        let _guard = LiveGuard::new(counter % LIVE_GUARDS.len());
        tokio::time::sleep(Duration::from_secs(secs)).await;
        Ok(json!("woke"))
    })
}

/// Returns `args[0] * 10`
pub fn times_ten(args: TaskArgs) -> WorkFuture {
    Box::pin(async move {
        let n: i64 = args.get(0)?;
        Ok(json!(n * 10))
    })
}

/// Fails for every input
pub fn always_fails(args: TaskArgs) -> WorkFuture {
    Box::pin(async move {
        let ticker: String = args.get(0)?;
        Err(TaskError::failed(format!("no price history for {ticker}")))
    })
}

/// Runs `times_ten` over `args[0]..args[1]` on a nested executor
pub fn nested_batch(args: TaskArgs) -> WorkFuture {
    Box::pin(async move {
        let from: i64 = args.get(0)?;
        let to: i64 = args.get(1)?;
        let outer = current_worker().ok_or_else(|| TaskError::failed("not in a worker"))?;

        let tasks = (from..to)
            .map(|n| Task::new(format!("inner-{n}"), Work::Async(times_ten)).with_args(TaskArgs::new().arg(n)))
            .collect();
        let report = BulkExecutor::new(2)
            .with_label("inner")
            .run(tasks)
            .await
            .map_err(|e| TaskError::failed(e.to_string()))?;

        let values: Vec<Value> = report.results.into_iter().map(|v| v.unwrap_or(Value::Null)).collect();
        Ok(json!({"outer_depth": outer.depth, "values": values}))
    })
}

/// Reports the depth of the pool the work runs in
pub fn report_depth(_: TaskArgs) -> WorkFuture {
    Box::pin(async {
        let info = current_worker().ok_or_else(|| TaskError::failed("not in a worker"))?;
        Ok(json!(info.depth))
    })
}

/// Runs [`report_depth`] inside a nested executor
pub fn nested_depth(_: TaskArgs) -> WorkFuture {
    Box::pin(async {
        let report = BulkExecutor::new(1)
            .run(vec![Task::new("depth", Work::Async(report_depth))])
            .await
            .map_err(|e| TaskError::failed(e.to_string()))?;
        Ok(report.results.into_iter().next().flatten().unwrap_or(Value::Null))
    })
}

/// Task running [`times_ten`] on `n`
pub fn times_ten_task(n: i64) -> Task {
    Task::new(format!("times-ten-{n}"), Work::Async(times_ten)).with_args(TaskArgs::new().arg(n))
}
