use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::*;
use crate::capability::{
    Capability, CapabilityError, CapabilityRegistry, RawRecord, RecordStream, ScrapeContext,
};
use crate::config::RetryConfig;
use crate::engine::{ErrorKind, ExecutionEngine, ExecutionStatus};
use crate::history::RunHistory;
use crate::ledger::{ProgressLedger, TaskSpec, TaskStatus};
use crate::registry::Job;
use crate::scheduler::StaticProbe;
use crate::store::MemoryStore;

/// Fails the first `failures` scrapes, then yields two records.
struct Flaky {
    failures: usize,
    calls: AtomicUsize,
}

impl Flaky {
    fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Capability for Flaky {
    fn scrape(&self, _ctx: &ScrapeContext) -> Result<RecordStream, CapabilityError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            let items = vec![Err(CapabilityError::Fetch(format!("upstream 503 on call {n}")))];
            return Ok(Box::new(items.into_iter()));
        }
        Ok(Box::new(
            vec![Ok(RawRecord::from("one")), Ok(RawRecord::from("two"))].into_iter(),
        ))
    }
}

/// Yields `count` bare names, sleeping `gap` before each.
struct Trickle {
    count: usize,
    gap: Duration,
}

impl Capability for Trickle {
    fn scrape(&self, _ctx: &ScrapeContext) -> Result<RecordStream, CapabilityError> {
        let gap = self.gap;
        Ok(Box::new((0..self.count).map(move |i| {
            std::thread::sleep(gap);
            Ok(RawRecord::from(format!("item-{i}").as_str()))
        })))
    }

    fn expected_records(&self) -> Option<usize> {
        Some(self.count)
    }
}

fn setup(cap: Arc<dyn Capability>, retry: RetryConfig) -> (Arc<ProgressLedger>, RetrySupervisor) {
    let registry = CapabilityRegistry::without_builtins().with("flaky", cap);
    let engine = Arc::new(ExecutionEngine::new(
        Arc::new(registry),
        Arc::new(StaticProbe::idle()),
    ));
    let ledger = Arc::new(ProgressLedger::new(Arc::new(MemoryStore::new())));
    ledger.start_operation("retry-test");
    ledger.add_region("r", "Region").unwrap();
    let supervisor = RetrySupervisor::new(engine, Arc::clone(&ledger), retry);
    (ledger, supervisor)
}

fn job(id: &str, capability: &str, max_retries: u32, delay: Duration) -> Job {
    let mut job = Job::new(id, capability);
    job.max_retries = max_retries;
    job.retry_delay = delay;
    job.timeout = Duration::from_secs(5);
    job
}

fn register(ledger: &ProgressLedger, job: &Job) {
    ledger.add_task(TaskSpec::job(&job.id, &job.name, "r")).unwrap();
}

#[tokio::test]
async fn always_failing_job_uses_every_retry() {
    let cap = Flaky::new(usize::MAX);
    let (ledger, supervisor) = setup(cap.clone(), RetryConfig::default());
    let job = job("a", "flaky", 3, Duration::from_millis(5));
    register(&ledger, &job);

    let record = supervisor.run_with_retry(&job).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.retry_count, 3);
    assert_eq!(record.error_kind(), Some(ErrorKind::Capability));
    assert_eq!(cap.calls(), 4);

    let task = ledger.task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("503"));
}

#[tokio::test]
async fn succeeds_after_transient_failures() {
    let cap = Flaky::new(2);
    let (ledger, supervisor) = setup(cap.clone(), RetryConfig::default());
    let job = job("a", "flaky", 3, Duration::from_millis(5));
    register(&ledger, &job);

    let run = supervisor
        .run_with_retry_collect(&job, &RunOptions::default())
        .await;
    assert_eq!(run.record.status, ExecutionStatus::Success);
    assert_eq!(run.record.retry_count, 2);
    assert_eq!(run.records.len(), 2);
    assert_eq!(cap.calls(), 3);
    assert_eq!(ledger.task("a").unwrap().status, TaskStatus::Completed);
    assert_eq!(ledger.task("a").unwrap().progress, 100.0);
}

#[tokio::test]
async fn zero_retries_means_single_attempt() {
    let cap = Flaky::new(1);
    let (ledger, supervisor) = setup(cap.clone(), RetryConfig::default());
    let job = job("a", "flaky", 0, Duration::from_millis(5));
    register(&ledger, &job);
    let record = supervisor.run_with_retry(&job).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.retry_count, 0);
    assert_eq!(cap.calls(), 1);
}

#[tokio::test]
async fn override_replaces_job_retries() {
    let cap = Flaky::new(usize::MAX);
    let (ledger, supervisor) = setup(cap.clone(), RetryConfig::default());
    let job = job("a", "flaky", 5, Duration::from_millis(1));
    register(&ledger, &job);
    let opts = RunOptions {
        max_retries: Some(1),
        ..RunOptions::default()
    };
    let run = supervisor.run_with_retry_collect(&job, &opts).await;
    assert_eq!(run.record.retry_count, 1);
    assert_eq!(cap.calls(), 2);
}

#[tokio::test]
async fn cancel_while_waiting_is_cancelled_not_failed() {
    let cap = Flaky::new(usize::MAX);
    let (ledger, supervisor) = setup(cap.clone(), RetryConfig::default());
    let job = job("a", "flaky", 3, Duration::from_secs(30));
    register(&ledger, &job);

    let opts = RunOptions::default();
    let cancel = opts.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    });
    let run = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.run_with_retry_collect(&job, &opts),
    )
    .await
    .unwrap();
    assert_eq!(run.record.status, ExecutionStatus::Cancelled);
    assert_eq!(run.record.retry_count, 0);
    assert_eq!(cap.calls(), 1);
}

#[tokio::test]
async fn structural_failures_fast_fail_when_enabled() {
    let retry = RetryConfig {
        fast_fail_structural: true,
        ..RetryConfig::default()
    };
    let (ledger, supervisor) = setup(Flaky::new(0), retry);
    let job = job("ghost", "not-registered", 3, Duration::from_millis(1));
    register(&ledger, &job);
    let record = supervisor.run_with_retry(&job).await;
    assert_eq!(record.status, ExecutionStatus::Failed);
    assert_eq!(record.error_kind(), Some(ErrorKind::Structural));
    assert_eq!(record.retry_count, 0);
}

#[tokio::test]
async fn structural_failures_retry_by_default() {
    let (ledger, supervisor) = setup(Flaky::new(0), RetryConfig::default());
    let job = job("ghost", "not-registered", 2, Duration::from_millis(1));
    register(&ledger, &job);
    let record = supervisor.run_with_retry(&job).await;
    assert_eq!(record.retry_count, 2);
}

#[tokio::test]
async fn skipped_task_yields_skipped_record() {
    let cap = Flaky::new(0);
    let (ledger, supervisor) = setup(cap.clone(), RetryConfig::default());
    let job = job("a", "flaky", 3, Duration::from_millis(1));
    register(&ledger, &job);
    ledger.skip_task("a").unwrap();
    let record = supervisor.run_with_retry(&job).await;
    assert_eq!(record.status, ExecutionStatus::Skipped);
    assert_eq!(cap.calls(), 0);
}

#[tokio::test]
async fn paused_ledger_holds_attempts_until_resumed() {
    let cap = Flaky::new(0);
    let (ledger, supervisor) = setup(cap.clone(), RetryConfig::default());
    let job = job("a", "flaky", 0, Duration::from_millis(1));
    register(&ledger, &job);
    ledger.pause_operation().unwrap();

    let supervisor = Arc::new(supervisor);
    let runner = {
        let supervisor = Arc::clone(&supervisor);
        let job = job.clone();
        tokio::spawn(async move { supervisor.run_with_retry(&job).await })
    };
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(cap.calls(), 0);

    ledger.resume_operation().unwrap();
    let record = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(cap.calls(), 1);
}

#[tokio::test]
async fn every_attempt_lands_in_history() {
    let cap = Flaky::new(1);
    let (ledger, supervisor) = setup(cap, RetryConfig::default());
    let history = RunHistory::open_memory().await.unwrap();
    let supervisor = supervisor.with_history(history.clone());
    let job = job("a", "flaky", 2, Duration::from_millis(1));
    register(&ledger, &job);

    let run = supervisor
        .run_with_retry_collect(&job, &RunOptions::default())
        .await;
    assert!(run.history_id.is_some());
    let rows = history.recent(10).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].record.status, ExecutionStatus::Success);
    assert_eq!(rows[0].record.retry_count, 1);
    assert_eq!(rows[1].record.status, ExecutionStatus::Failed);
    assert_eq!(rows[1].record.retry_count, 0);
}

#[tokio::test]
async fn attempt_finishing_during_pause_still_completes_task() {
    let cap = Arc::new(Trickle {
        count: 6,
        gap: Duration::from_millis(50),
    });
    let (ledger, supervisor) = setup(cap, RetryConfig::default());
    let job = job("a", "flaky", 0, Duration::from_millis(1));
    register(&ledger, &job);

    let supervisor = Arc::new(supervisor);
    let runner = {
        let supervisor = Arc::clone(&supervisor);
        let job = job.clone();
        tokio::spawn(async move { supervisor.run_with_retry(&job).await })
    };
    tokio::time::sleep(Duration::from_millis(120)).await;
    ledger.pause_operation().unwrap();
    assert_eq!(ledger.task("a").unwrap().status, TaskStatus::Paused);

    let record = tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ExecutionStatus::Success);
    assert_eq!(record.records_collected, 6);
    assert_eq!(ledger.task("a").unwrap().status, TaskStatus::Completed);

    ledger.resume_operation().unwrap();
    let task = ledger.task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100.0);
    assert_eq!(ledger.region("r").unwrap().status, TaskStatus::Completed);
    assert_eq!(ledger.get_progress_summary().percent, 100.0);
}
