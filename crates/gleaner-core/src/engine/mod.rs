//! Execution engine: runs one attempt of one job.
//!
//! Pulls the capability's record stream one element at a time, checking the
//! cancellation token, the attempt deadline and the optional sample cap before
//! each pull. Each yielded value is normalized; per-record shape problems are
//! repaired in place and never fail the job. Only structural problems (no
//! capability, target refused to start) and stream errors do.
//!
//! The engine is synchronous and may block inside the capability; async
//! callers run it through `spawn_blocking`. It never touches ledger state
//! directly, it reports progress through the optional callback.

mod normalize;
mod record;

pub use normalize::{normalize, Normalized};
pub use record::{ErrorKind, ExecutionRecord, ExecutionStatus, JobError, ResourceSnapshot};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::capability::{CapabilityError, CapabilityRegistry, Record, ScrapeContext};
use crate::clock::unix_millis;
use crate::registry::Job;
use crate::scheduler::SystemProbe;

/// Report progress every this many records.
const PROGRESS_EVERY: usize = 10;

/// Progress callback: `(records_collected, expected_records)`.
pub type ProgressFn = Arc<dyn Fn(usize, Option<usize>) + Send + Sync>;

/// Per-attempt signals and limits.
#[derive(Clone)]
pub struct AttemptContext {
    pub cancel: CancellationToken,
    pub deadline: Instant,
    pub sample_cap: Option<usize>,
    /// Retries made before this attempt; copied onto the record.
    pub retry_count: u32,
    pub progress: Option<ProgressFn>,
}

impl AttemptContext {
    /// Context with a fresh token and a deadline `timeout` from now.
    pub fn new(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Instant::now() + timeout,
            sample_cap: None,
            retry_count: 0,
            progress: None,
        }
    }
}

/// Result of one attempt: the record plus the normalized records it collected.
#[derive(Debug, Clone)]
pub struct AttemptOutcome {
    pub record: ExecutionRecord,
    pub records: Vec<Record>,
}

/// `(records, status, error)` view of an attempt.
#[derive(Debug, Clone)]
pub struct EngineOutcome {
    pub records: Vec<Record>,
    pub status: ExecutionStatus,
    pub error: Option<JobError>,
}

pub struct ExecutionEngine {
    capabilities: Arc<CapabilityRegistry>,
    probe: Arc<dyn SystemProbe>,
}

impl ExecutionEngine {
    pub fn new(capabilities: Arc<CapabilityRegistry>, probe: Arc<dyn SystemProbe>) -> Self {
        Self {
            capabilities,
            probe,
        }
    }

    /// Current machine load, for records built outside the engine.
    pub fn resource_snapshot(&self) -> Option<ResourceSnapshot> {
        self.probe.snapshot()
    }

    /// Run `job` once with its own size-scaled deadline, stopping after `sample_cap` records.
    pub fn run(&self, job: &Job, sample_cap: Option<usize>) -> EngineOutcome {
        let mut ctx = AttemptContext::new(job.deadline());
        ctx.sample_cap = sample_cap;
        let outcome = self.run_attempt(job, &ctx);
        EngineOutcome {
            status: outcome.record.status,
            error: outcome.record.error,
            records: outcome.records,
        }
    }

    pub fn run_attempt(&self, job: &Job, ctx: &AttemptContext) -> AttemptOutcome {
        let started_at = unix_millis();
        let outcome = self.collect(job, ctx, started_at);
        let resources = self.probe.snapshot();
        AttemptOutcome {
            record: outcome.record.with_resources(resources),
            records: outcome.records,
        }
    }

    fn collect(&self, job: &Job, ctx: &AttemptContext, started_at: i64) -> AttemptOutcome {
        let fail = |err: JobError| AttemptOutcome {
            record: ExecutionRecord::failed(&job.id, started_at, ctx.retry_count, err),
            records: Vec::new(),
        };

        let capability = match self.capabilities.resolve(&job.capability) {
            Ok(c) => c,
            Err(e) => return fail(JobError::new(e.kind(), e.to_string())),
        };

        let scrape_ctx = ScrapeContext::new(ctx.cancel.clone(), ctx.deadline);
        let mut stream = match capability.scrape(&scrape_ctx) {
            Ok(s) => s,
            Err(CapabilityError::Cancelled) => {
                return AttemptOutcome {
                    record: ExecutionRecord::cancelled(
                        &job.id,
                        started_at,
                        ctx.retry_count,
                        "cancelled before first record",
                    ),
                    records: Vec::new(),
                };
            }
            // Anything refusing to start is structural, whatever the variant.
            Err(e) => return fail(JobError::new(ErrorKind::Structural, e.to_string())),
        };

        let expected = match (capability.expected_records(), ctx.sample_cap) {
            (Some(e), Some(cap)) => Some(e.min(cap)),
            (e, cap) => e.or(cap),
        };
        let mut records: Vec<Record> = Vec::new();
        let mut repaired = 0u64;

        let stop: Option<AttemptOutcome> = loop {
            if ctx.cancel.is_cancelled() {
                break Some(AttemptOutcome {
                    record: ExecutionRecord::cancelled(
                        &job.id,
                        started_at,
                        ctx.retry_count,
                        "cancelled between records",
                    ),
                    records: Vec::new(),
                });
            }
            if Instant::now() >= ctx.deadline {
                break Some(fail(JobError::new(
                    ErrorKind::Timeout,
                    format!(
                        "deadline of {:?} reached after {} records",
                        job.deadline(),
                        records.len()
                    ),
                )));
            }
            if ctx.sample_cap.is_some_and(|cap| records.len() >= cap) {
                tracing::debug!(job_id = %job.id, cap = records.len(), "sample cap reached");
                break None;
            }
            match stream.next() {
                None => break None,
                Some(Ok(raw)) => {
                    let n = normalize(raw);
                    if n.repaired {
                        repaired += 1;
                    }
                    records.push(n.record);
                    if records.len() % PROGRESS_EVERY == 0 {
                        if let Some(progress) = &ctx.progress {
                            progress(records.len(), expected);
                        }
                    }
                }
                Some(Err(CapabilityError::Cancelled)) => {
                    break Some(AttemptOutcome {
                        record: ExecutionRecord::cancelled(
                            &job.id,
                            started_at,
                            ctx.retry_count,
                            "capability observed cancellation",
                        ),
                        records: Vec::new(),
                    });
                }
                Some(Err(e)) => {
                    tracing::warn!(job_id = %job.id, error = %e, "record stream failed");
                    break Some(fail(JobError::new(e.kind(), e.to_string())));
                }
            }
        };
        if let Some(outcome) = stop {
            return outcome;
        }

        if let Some(progress) = &ctx.progress {
            progress(records.len(), expected);
        }

        if !capability.validate(&records) {
            return fail(JobError::new(
                ErrorKind::Validation,
                format!("capability rejected {} collected records", records.len()),
            ));
        }

        let mut record = ExecutionRecord::success(&job.id, started_at, ctx.retry_count);
        record.records_collected = records.len() as u64;
        record.records_repaired = repaired;
        AttemptOutcome { record, records }
    }
}
