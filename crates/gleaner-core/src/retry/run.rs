//! Retry loop: run one job until it succeeds, retries run out, or the
//! operator stops it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use super::classify::failure_kind;
use super::policy::{RetryDecision, RetryPolicy};
use crate::capability::Record;
use crate::clock::unix_millis;
use crate::config::RetryConfig;
use crate::engine::{
    AttemptContext, AttemptOutcome, ErrorKind, ExecutionEngine, ExecutionRecord, JobError,
    ProgressFn,
};
use crate::history::RunHistory;
use crate::ledger::ProgressLedger;
use crate::registry::Job;
use crate::signal::link;

/// Extra time granted past the attempt deadline before the attempt is abandoned.
pub const DEADLINE_GRACE: Duration = Duration::from_secs(5);
const PAUSE_POLL: Duration = Duration::from_millis(100);

/// Per-dispatch overrides.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Replaces the job's own `max_retries`.
    pub max_retries: Option<u32>,
    pub sample_cap: Option<usize>,
    /// Batch or phase token; cancelling it stops the job.
    pub cancel: CancellationToken,
}

/// Final record of a supervised job plus what it collected.
#[derive(Debug, Clone)]
pub struct SupervisedRun {
    pub record: ExecutionRecord,
    pub records: Vec<Record>,
    /// Row of the final attempt in the run history, when one was written.
    pub history_id: Option<i64>,
}

impl SupervisedRun {
    fn bare(record: ExecutionRecord) -> Self {
        Self {
            record,
            records: Vec::new(),
            history_id: None,
        }
    }
}

pub struct RetrySupervisor {
    engine: Arc<ExecutionEngine>,
    ledger: Arc<ProgressLedger>,
    retry: RetryConfig,
    history: Option<RunHistory>,
}

impl RetrySupervisor {
    pub fn new(engine: Arc<ExecutionEngine>, ledger: Arc<ProgressLedger>, retry: RetryConfig) -> Self {
        Self {
            engine,
            ledger,
            retry,
            history: None,
        }
    }

    /// Append every attempt to `history`.
    pub fn with_history(mut self, history: RunHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn ledger(&self) -> &Arc<ProgressLedger> {
        &self.ledger
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    pub fn history(&self) -> Option<&RunHistory> {
        self.history.as_ref()
    }

    pub async fn run_with_retry(&self, job: &Job) -> ExecutionRecord {
        self.run_with_retry_collect(job, &RunOptions::default())
            .await
            .record
    }

    /// Run `job` with retries. Exactly one record comes back, describing the
    /// last attempt; `retry_count` is the number of retries made.
    pub async fn run_with_retry_collect(&self, job: &Job, opts: &RunOptions) -> SupervisedRun {
        let mut policy = RetryPolicy::for_job(job, &self.retry);
        if let Some(n) = opts.max_retries {
            policy.max_retries = n;
        }
        let task_token = self.ledger.task_token(&job.id);
        let linked = link(&opts.cancel, &task_token);
        let cancel = linked.token().clone();
        let started_at = unix_millis();
        let mut retries = 0u32;

        loop {
            if cancel.is_cancelled() || self.ledger.should_skip(&job.id) {
                return SupervisedRun::bare(self.stopped(job, started_at, retries, "before attempt"));
            }
            if !self.wait_while_paused(&cancel).await {
                return SupervisedRun::bare(self.stopped(job, started_at, retries, "while paused"));
            }
            if let Err(e) = self.ledger.start_task(&job.id) {
                tracing::debug!(job_id = %job.id, error = %e, "ledger start_task");
            }

            let outcome = self.attempt(job, &cancel, opts.sample_cap, retries).await;
            let history_id = self.write_history(&outcome.record).await;
            let AttemptOutcome { record, records } = outcome;

            let kind = match failure_kind(&record) {
                None => {
                    if let Err(e) = self.ledger.complete_task(&job.id, true, None) {
                        tracing::debug!(job_id = %job.id, error = %e, "ledger complete_task");
                    }
                    tracing::info!(
                        job_id = %job.id,
                        retries,
                        collected = record.records_collected,
                        "job succeeded"
                    );
                    return SupervisedRun {
                        record,
                        records,
                        history_id,
                    };
                }
                Some(ErrorKind::Cancelled) => {
                    let record = if self.ledger.should_skip(&job.id) {
                        ExecutionRecord::skipped(&job.id, started_at, retries)
                    } else {
                        record
                    };
                    return SupervisedRun {
                        record,
                        records: Vec::new(),
                        history_id,
                    };
                }
                Some(kind) => kind,
            };

            match policy.decide(retries, kind) {
                RetryDecision::NoRetry => {
                    let message = record.error_message();
                    if let Err(e) = self.ledger.complete_task(&job.id, false, message.clone()) {
                        tracing::debug!(job_id = %job.id, error = %e, "ledger complete_task");
                    }
                    tracing::warn!(
                        job_id = %job.id,
                        retries,
                        error = message.as_deref().unwrap_or("unknown"),
                        "job failed"
                    );
                    return SupervisedRun {
                        record,
                        records: Vec::new(),
                        history_id,
                    };
                }
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        job_id = %job.id,
                        attempt = retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = record.error_message().as_deref().unwrap_or("unknown"),
                        "attempt failed; retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return SupervisedRun::bare(
                                self.stopped(job, started_at, retries, "while waiting to retry"),
                            );
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    retries += 1;
                }
            }
        }
    }

    /// Block while the ledger is paused. Returns false if cancelled meanwhile.
    async fn wait_while_paused(&self, cancel: &CancellationToken) -> bool {
        while self.ledger.should_pause() {
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(PAUSE_POLL) => {}
            }
        }
        !cancel.is_cancelled()
    }

    /// Record for a job stopped outside an attempt: skipped when the ledger says so.
    fn stopped(&self, job: &Job, started_at: i64, retries: u32, when: &str) -> ExecutionRecord {
        let record = if self.ledger.should_skip(&job.id) {
            ExecutionRecord::skipped(&job.id, started_at, retries)
        } else {
            ExecutionRecord::cancelled(&job.id, started_at, retries, &format!("cancelled {when}"))
        };
        record.with_resources(self.engine.resource_snapshot())
    }

    async fn attempt(
        &self,
        job: &Job,
        cancel: &CancellationToken,
        sample_cap: Option<usize>,
        retries: u32,
    ) -> AttemptOutcome {
        let timeout = job.deadline();
        let attempt_token = cancel.child_token();
        let ctx = AttemptContext {
            cancel: attempt_token.clone(),
            deadline: Instant::now() + timeout,
            sample_cap,
            retry_count: retries,
            progress: Some(self.progress_reporter(&job.id)),
        };
        let engine = Arc::clone(&self.engine);
        let owned = job.clone();
        let started_at = unix_millis();
        let handle = tokio::task::spawn_blocking(move || engine.run_attempt(&owned, &ctx));

        let failed = |err: JobError| AttemptOutcome {
            record: ExecutionRecord::failed(&job.id, started_at, retries, err)
                .with_resources(self.engine.resource_snapshot()),
            records: Vec::new(),
        };
        match tokio::time::timeout(timeout + DEADLINE_GRACE, handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(join_err)) => {
                tracing::error!(job_id = %job.id, error = %join_err, "capability panicked");
                failed(JobError::new(
                    ErrorKind::Structural,
                    format!("capability panicked: {join_err}"),
                ))
            }
            Err(_) => {
                // The blocking call is stuck; signal it and let it finish in the background.
                attempt_token.cancel();
                tracing::warn!(job_id = %job.id, "attempt abandoned past its deadline");
                failed(JobError::new(
                    ErrorKind::Timeout,
                    format!("attempt did not return within {timeout:?}"),
                ))
            }
        }
    }

    fn progress_reporter(&self, job_id: &str) -> ProgressFn {
        let ledger = Arc::clone(&self.ledger);
        let id = job_id.to_string();
        Arc::new(move |collected, expected| {
            let result = match expected {
                Some(total) if total > 0 => {
                    // 100 is reserved for completion.
                    let pct = (collected as f64 * 100.0 / total as f64).min(99.0);
                    let step = format!("{collected}/{total} records");
                    ledger.update_task_progress(&id, pct, Some(step.as_str()))
                }
                _ => ledger.update_task_step(&id, &format!("{collected} records")),
            };
            if let Err(e) = result {
                tracing::debug!(job_id = %id, error = %e, "progress not recorded");
            }
        })
    }

    async fn write_history(&self, record: &ExecutionRecord) -> Option<i64> {
        let history = self.history.as_ref()?;
        match history.record(record).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(job_id = %record.job_id, error = %e, "write run history failed");
                None
            }
        }
    }
}
