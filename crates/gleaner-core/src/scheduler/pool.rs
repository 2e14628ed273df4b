//! Bounded fork-join dispatch of one batch of jobs.
//!
//! Keeps up to `workers` supervised jobs running at once; when one finishes,
//! the next queued job (highest priority first) is started until the queue is
//! empty. The whole batch runs under an aggregate deadline: when it expires
//! the batch token is cancelled, in-flight workers are detached, and every job
//! that has not reported is recorded as a timeout failure.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::probe::SystemProbe;
use super::sizing::{optimal_workers, WorkerBounds};
use super::slots::WorkerSlots;
use crate::clock::unix_millis;
use crate::config::GleanerConfig;
use crate::engine::{ErrorKind, ExecutionRecord, JobError};
use crate::ledger::TaskSpec;
use crate::registry::Job;
use crate::retry::{RetrySupervisor, RunOptions, SupervisedRun};
use crate::sink::InsertionSink;

/// Per-dispatch overrides.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Upper cap on workers (never below the configured minimum).
    pub max_workers: Option<usize>,
    /// Replaces each job's `max_retries`.
    pub max_retries: Option<u32>,
    pub sample_cap: Option<usize>,
    /// Parent token; cancelling it stops the whole batch.
    pub cancel: CancellationToken,
    /// When set, a ledger region with this code and one task per job are
    /// registered before dispatch.
    pub region: Option<String>,
}

/// What one dispatch produced.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    /// One record per job, in completion order.
    pub records: Vec<ExecutionRecord>,
    pub workers: usize,
    /// Highest number of jobs observed running at once.
    pub peak_concurrency: usize,
    pub timed_out: bool,
}

#[derive(Default)]
struct Collected {
    records: Vec<ExecutionRecord>,
    reported: HashSet<String>,
    closed: bool,
}

pub struct WorkerPool {
    supervisor: Arc<RetrySupervisor>,
    probe: Arc<dyn SystemProbe>,
    bounds: WorkerBounds,
    aggregate_timeout: Duration,
    sink: Option<Arc<dyn InsertionSink>>,
}

impl WorkerPool {
    pub fn new(
        supervisor: Arc<RetrySupervisor>,
        probe: Arc<dyn SystemProbe>,
        cfg: &GleanerConfig,
    ) -> Self {
        let (min, max) = cfg.worker_bounds();
        Self {
            supervisor,
            probe,
            bounds: WorkerBounds::new(min, max),
            aggregate_timeout: cfg.aggregate_timeout(),
            sink: None,
        }
    }

    pub fn with_bounds(mut self, bounds: WorkerBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_aggregate_timeout(mut self, timeout: Duration) -> Self {
        self.aggregate_timeout = timeout;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn InsertionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn supervisor(&self) -> &Arc<RetrySupervisor> {
        &self.supervisor
    }

    pub fn bounds(&self) -> WorkerBounds {
        self.bounds
    }

    /// Worker count for `jobs` under the current load.
    pub fn workers_for(&self, jobs: &[Job], cap: Option<usize>) -> usize {
        optimal_workers(jobs, self.probe.snapshot(), self.bounds, cap)
    }

    /// Run a category's jobs, tracked in a ledger region named after the category.
    pub async fn run_category(&self, jobs: Vec<Job>) -> Vec<ExecutionRecord> {
        let region = jobs
            .first()
            .map(|j| j.category.clone())
            .unwrap_or_else(|| "default".to_string());
        let opts = DispatchOptions {
            region: Some(region),
            ..DispatchOptions::default()
        };
        self.run_category_with(jobs, opts).await
    }

    pub async fn run_category_with(&self, jobs: Vec<Job>, opts: DispatchOptions) -> Vec<ExecutionRecord> {
        self.dispatch(jobs, opts).await.records
    }

    pub async fn dispatch(&self, mut jobs: Vec<Job>, opts: DispatchOptions) -> DispatchReport {
        if jobs.is_empty() {
            return DispatchReport {
                records: Vec::new(),
                workers: 0,
                peak_concurrency: 0,
                timed_out: false,
            };
        }
        // Stable: equal priorities keep registry order.
        jobs.sort_by(|a, b| b.priority.cmp(&a.priority));
        if let Some(region) = &opts.region {
            self.register(region, &jobs);
        }

        let workers = self.workers_for(&jobs, opts.max_workers);
        let slots = Arc::new(WorkerSlots::new(workers));
        let batch = opts.cancel.child_token();
        let collected = Arc::new(Mutex::new(Collected::default()));
        let run_opts = RunOptions {
            max_retries: opts.max_retries,
            sample_cap: opts.sample_cap,
            cancel: batch.clone(),
        };
        tracing::info!(
            jobs = jobs.len(),
            workers,
            region = opts.region.as_deref().unwrap_or("-"),
            "dispatching batch"
        );

        let all_ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
        let mut queue: VecDeque<Job> = jobs.into();
        let mut join_set = JoinSet::new();
        let deadline = tokio::time::Instant::now() + self.aggregate_timeout;
        let mut timed_out = false;

        loop {
            while !queue.is_empty() {
                let Some(slot) = slots.try_acquire() else {
                    break;
                };
                let Some(job) = queue.pop_front() else {
                    break;
                };
                let supervisor = Arc::clone(&self.supervisor);
                let sink = self.sink.clone();
                let collected = Arc::clone(&collected);
                let run_opts = run_opts.clone();
                join_set.spawn(async move {
                    let _slot = slot;
                    let run = supervisor.run_with_retry_collect(&job, &run_opts).await;
                    let record = insert_records(&supervisor, sink, &job, run).await;
                    let mut c = collected.lock().unwrap_or_else(PoisonError::into_inner);
                    if !c.closed {
                        c.reported.insert(job.id.clone());
                        c.records.push(record);
                    }
                });
            }

            if join_set.is_empty() {
                break;
            }

            tokio::select! {
                res = join_set.join_next() => match res {
                    Some(Ok(())) => {}
                    Some(Err(e)) => tracing::error!(error = %e, "worker task failed"),
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline) => {
                    timed_out = true;
                    break;
                }
            }
        }

        let mut c = collected.lock().unwrap_or_else(PoisonError::into_inner);
        c.closed = true;
        if timed_out {
            batch.cancel();
            join_set.detach_all();
        }
        let missing: Vec<String> = all_ids
            .iter()
            .filter(|id| !c.reported.contains(*id))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let (kind, message) = if timed_out {
                tracing::warn!(
                    unfinished = missing.len(),
                    timeout_secs = self.aggregate_timeout.as_secs(),
                    "batch deadline reached"
                );
                (
                    ErrorKind::Timeout,
                    format!(
                        "batch deadline of {:?} reached before the job finished",
                        self.aggregate_timeout
                    ),
                )
            } else {
                tracing::error!(unreported = missing.len(), "workers ended without a record");
                (
                    ErrorKind::Structural,
                    "worker ended without reporting a result".to_string(),
                )
            };
            let now = unix_millis();
            for id in missing {
                self.fail_in_ledger(&id, &message);
                c.records.push(ExecutionRecord::failed(
                    &id,
                    now,
                    0,
                    JobError::new(kind, message.clone()),
                ));
            }
        }
        let records = std::mem::take(&mut c.records);
        DispatchReport {
            records,
            workers,
            peak_concurrency: slots.peak(),
            timed_out,
        }
    }

    fn register(&self, region: &str, jobs: &[Job]) {
        let ledger = self.supervisor.ledger();
        if let Err(e) = ledger.add_region(region, region) {
            tracing::debug!(region, error = %e, "ledger add_region");
            return;
        }
        for job in jobs {
            let spec = TaskSpec::job(&job.id, &job.name, region)
                .with_metadata("capability", &job.capability)
                .with_metadata("size", job.size.as_str());
            if let Err(e) = ledger.add_task(spec) {
                tracing::debug!(job_id = %job.id, error = %e, "ledger add_task");
            }
        }
    }

    fn fail_in_ledger(&self, id: &str, message: &str) {
        let ledger = self.supervisor.ledger();
        // Jobs that never started still move through running to failed.
        if let Err(e) = ledger.start_task(id) {
            tracing::debug!(job_id = id, error = %e, "ledger start_task");
        }
        if let Err(e) = ledger.complete_task(id, false, Some(message.to_string())) {
            tracing::debug!(job_id = id, error = %e, "ledger complete_task");
        }
    }
}

/// Hand a successful job's records to the sink; returns the final record.
async fn insert_records(
    supervisor: &RetrySupervisor,
    sink: Option<Arc<dyn InsertionSink>>,
    job: &Job,
    run: SupervisedRun,
) -> ExecutionRecord {
    let SupervisedRun {
        record,
        records,
        history_id,
    } = run;
    let Some(sink) = sink.filter(|_| record.is_success()) else {
        return record;
    };
    let owned = job.clone();
    let inserted = tokio::task::spawn_blocking(move || sink.insert(&owned, &records)).await;
    match inserted {
        Ok(Ok(n)) => {
            if let (Some(history), Some(id)) = (supervisor.history(), history_id) {
                if let Err(e) = history.set_inserted(id, n).await {
                    tracing::warn!(job_id = %job.id, error = %e, "update run history failed");
                }
            }
            record.with_inserted(n)
        }
        Ok(Err(e)) => {
            tracing::warn!(job_id = %job.id, error = %e, "insertion sink failed");
            record
        }
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "insertion sink panicked");
            record
        }
    }
}
