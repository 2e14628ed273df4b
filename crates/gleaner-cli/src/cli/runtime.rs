//! Wires the core components for one CLI invocation.

use anyhow::{Context, Result};
use gleaner_core::capability::CapabilityRegistry;
use gleaner_core::config::{self, GleanerConfig};
use gleaner_core::engine::ExecutionEngine;
use gleaner_core::history::RunHistory;
use gleaner_core::ledger::ProgressLedger;
use gleaner_core::phase::{PhaseController, PhasePlan};
use gleaner_core::registry::JobRegistry;
use gleaner_core::retry::RetrySupervisor;
use gleaner_core::scheduler::{SysinfoProbe, SystemProbe, WorkerPool};
use gleaner_core::sink::JsonLinesSink;
use gleaner_core::store::{JsonFileStore, StateStore};
use std::path::PathBuf;
use std::sync::Arc;

pub struct Runtime {
    pub registry: Arc<JobRegistry>,
    pub plan: PhasePlan,
    pub store: Arc<dyn StateStore>,
    pub ledger: Arc<ProgressLedger>,
    pub history: RunHistory,
    pub pool: Arc<WorkerPool>,
}

impl Runtime {
    /// Load jobs and phases, open the state store and run history, and build the pool.
    pub async fn build(cfg: &GleanerConfig) -> Result<Self> {
        let jobs_path = cfg.jobs_file_path()?;
        let registry = Arc::new(
            JobRegistry::load_from_path(&jobs_path, cfg)
                .with_context(|| format!("load jobs from {}", jobs_path.display()))?,
        );
        let plan = PhasePlan::load_from_path(&jobs_path)
            .with_context(|| format!("load phase plan from {}", jobs_path.display()))?;
        tracing::debug!(jobs = registry.len(), phases = plan.len(), "definitions loaded");

        let store: Arc<dyn StateStore> = Arc::new(JsonFileStore::open_default()?);
        let ledger = Arc::new(ProgressLedger::from_config(Arc::clone(&store), cfg));
        let history = RunHistory::open_default().await?;

        let probe: Arc<dyn SystemProbe> = Arc::new(SysinfoProbe::new());
        let engine = Arc::new(ExecutionEngine::new(
            Arc::new(CapabilityRegistry::new()),
            Arc::clone(&probe),
        ));
        let supervisor = Arc::new(
            RetrySupervisor::new(engine, Arc::clone(&ledger), cfg.retry_or_default())
                .with_history(history.clone()),
        );
        let sink = JsonLinesSink::new(cfg.output_dir_path()?);
        let pool = Arc::new(WorkerPool::new(supervisor, probe, cfg).with_sink(Arc::new(sink)));

        Ok(Self {
            registry,
            plan,
            store,
            ledger,
            history,
            pool,
        })
    }

    pub fn controller(&self) -> PhaseController {
        PhaseController::new(
            self.plan.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.pool),
            Arc::clone(&self.store),
        )
    }
}

pub fn control_socket_path() -> Result<PathBuf> {
    Ok(config::state_dir()?.join("control.sock"))
}
