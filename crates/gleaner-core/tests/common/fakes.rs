//! Scripted capabilities and a fully wired stack over in-memory or temp-dir state.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gleaner_core::capability::{
    Capability, CapabilityError, CapabilityRegistry, RawRecord, RecordStream, ScrapeContext,
};
use gleaner_core::config::{GleanerConfig, RetryConfig};
use gleaner_core::engine::ExecutionEngine;
use gleaner_core::history::RunHistory;
use gleaner_core::ledger::ProgressLedger;
use gleaner_core::phase::{PhaseController, PhasePlan};
use gleaner_core::registry::JobRegistry;
use gleaner_core::retry::RetrySupervisor;
use gleaner_core::scheduler::{StaticProbe, SystemProbe, WorkerPool};
use gleaner_core::sink::JsonLinesSink;
use gleaner_core::store::StateStore;

/// Yields the same bare identifier `count` times.
pub struct BareStrings {
    pub value: &'static str,
    pub count: usize,
}

impl Capability for BareStrings {
    fn scrape(&self, _ctx: &ScrapeContext) -> Result<RecordStream, CapabilityError> {
        let value = self.value;
        Ok(Box::new((0..self.count).map(move |_| Ok(RawRecord::from(value)))))
    }
}

/// Fails the first `failures` scrapes, then yields `records` identifiers.
pub struct FailThenSucceed {
    pub failures: usize,
    pub records: usize,
    pub calls: AtomicUsize,
}

impl FailThenSucceed {
    pub fn new(failures: usize, records: usize) -> Arc<Self> {
        Arc::new(Self {
            failures,
            records,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Capability for FailThenSucceed {
    fn scrape(&self, _ctx: &ScrapeContext) -> Result<RecordStream, CapabilityError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(CapabilityError::Fetch(format!("attempt {} refused", call + 1)));
        }
        Ok(Box::new(
            (0..self.records).map(|i| Ok(RawRecord::Identifier(format!("item-{i}")))),
        ))
    }
}

/// Yields `count` identifiers, sleeping `delay` before each.
pub struct Slow {
    pub count: usize,
    pub delay: Duration,
}

impl Capability for Slow {
    fn scrape(&self, _ctx: &ScrapeContext) -> Result<RecordStream, CapabilityError> {
        let delay = self.delay;
        Ok(Box::new((0..self.count).map(move |i| {
            std::thread::sleep(delay);
            Ok(RawRecord::Identifier(format!("slow-{i}")))
        })))
    }
}

/// Retry settings that keep tests fast.
pub fn quick_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 0,
        retry_delay_secs: 0.01,
        max_delay_secs: 1,
        fast_fail_structural: false,
    }
}

/// Config whose job defaults keep tests fast.
pub fn quick_config() -> GleanerConfig {
    GleanerConfig {
        min_workers: 1,
        max_workers: 4,
        job_timeout_secs: 10,
        retry: Some(quick_retry()),
        ..GleanerConfig::default()
    }
}

pub struct Stack {
    pub ledger: Arc<ProgressLedger>,
    pub pool: Arc<WorkerPool>,
    pub history: RunHistory,
}

/// Engine, ledger, supervisor (with history) and pool over `store`, writing
/// collected records under `out`.
pub async fn stack(
    capabilities: CapabilityRegistry,
    store: Arc<dyn StateStore>,
    out: &Path,
    cfg: &GleanerConfig,
) -> Stack {
    let probe: Arc<dyn SystemProbe> = Arc::new(StaticProbe::new(30.0, 40.0));
    let engine = Arc::new(ExecutionEngine::new(Arc::new(capabilities), Arc::clone(&probe)));
    let ledger = Arc::new(ProgressLedger::from_config(store, cfg));
    let history = RunHistory::open_memory().await.unwrap();
    let supervisor = Arc::new(
        RetrySupervisor::new(engine, Arc::clone(&ledger), cfg.retry_or_default())
            .with_history(history.clone()),
    );
    let pool = WorkerPool::new(supervisor, probe, cfg)
        .with_sink(Arc::new(JsonLinesSink::new(out)));
    Stack {
        ledger,
        pool: Arc::new(pool),
        history,
    }
}

/// Phase controller over `stack`, with jobs and phases parsed from one jobs file.
pub fn controller(
    jobs_toml: &str,
    cfg: &GleanerConfig,
    stack: &Stack,
    store: Arc<dyn StateStore>,
) -> PhaseController {
    let registry = Arc::new(JobRegistry::from_toml_str(jobs_toml, cfg).unwrap());
    let plan = PhasePlan::from_toml_str(jobs_toml).unwrap();
    PhaseController::new(plan, registry, Arc::clone(&stack.pool), store)
}
