//! Phase controller: runs the plan phase by phase under one loading session.
//!
//! The controller owns the session. It registers each phase with the ledger
//! on entry, dispatches the phase's jobs through the worker pool, evaluates
//! the phase checks and advances. Operator signals arrive through
//! `pause_loading`, `resume_loading`, `skip_phase` and `cancel_loading`, which
//! may be called from another task while a phase runs.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::error::PhaseError;
use super::plan::{Phase, PhaseJobs, PhasePlan};
use super::session::{LoadingSession, Strategy};
use crate::clock::unix_millis;
use crate::engine::ExecutionRecord;
use crate::ledger::{LedgerError, ProgressLedger, ProgressSummary, TaskSpec, TaskStatus, TaskType};
use crate::registry::{Job, JobRegistry, Priority, SizeClass};
use crate::scheduler::{DispatchOptions, WorkerPool};
use crate::store::{StateStore, StoreError};

/// Store key of the session document.
pub const SESSION_KEY: &str = "session";
/// Ledger operation name used for phased loading.
pub const LOAD_OPERATION: &str = "load";

/// Result of one `run_next_phase` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseOutcome {
    /// The phase passed its checks (or was skipped); more phases remain.
    Completed { phase: String },
    /// The last phase completed; the session is gone.
    Finished,
    /// Checks failed; the same phase runs again next time.
    Failed { phase: String, reason: String },
    /// Paused before or during the phase.
    Paused { phase: String },
    Cancelled,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub session: LoadingSession,
    pub current_phase_key: Option<String>,
    pub total_phases: usize,
    pub progress: ProgressSummary,
}

#[derive(Debug, Clone, Serialize)]
pub enum LoadingStatus {
    NoSession,
    Active(Box<SessionStatus>),
}

#[derive(Debug, Clone, Serialize)]
pub struct JobPreview {
    pub id: String,
    pub name: String,
    pub capability: String,
    pub size: SizeClass,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhasePreview {
    pub key: String,
    pub name: String,
    pub order: usize,
    pub estimated_minutes: u32,
    pub depends_on: Vec<String>,
    /// `None` when there is no session to check against.
    pub dependencies_met: Option<bool>,
    pub completed: bool,
    pub workers: usize,
    pub jobs: Vec<JobPreview>,
    /// Ledger status of the phase region, when it has been entered.
    pub status: Option<TaskStatus>,
}

#[derive(Default)]
struct ControllerState {
    session: Option<LoadingSession>,
    /// Token of the phase currently being dispatched.
    phase_token: Option<CancellationToken>,
    /// Set when a skip ended the rollout; consumed by the in-flight run.
    finished_by_skip: bool,
}

impl ControllerState {
    /// Outcome for a run that finds its session gone.
    fn ended(&mut self) -> PhaseOutcome {
        if std::mem::take(&mut self.finished_by_skip) {
            PhaseOutcome::Finished
        } else {
            PhaseOutcome::Cancelled
        }
    }
}

pub struct PhaseController {
    plan: PhasePlan,
    registry: Arc<JobRegistry>,
    pool: Arc<WorkerPool>,
    ledger: Arc<ProgressLedger>,
    store: Arc<dyn StateStore>,
    state: Mutex<ControllerState>,
}

impl PhaseController {
    pub fn new(
        plan: PhasePlan,
        registry: Arc<JobRegistry>,
        pool: Arc<WorkerPool>,
        store: Arc<dyn StateStore>,
    ) -> Self {
        let ledger = Arc::clone(pool.supervisor().ledger());
        Self {
            plan,
            registry,
            pool,
            ledger,
            store,
            state: Mutex::new(ControllerState::default()),
        }
    }

    pub fn plan(&self) -> &PhasePlan {
        &self.plan
    }

    pub fn ledger(&self) -> &Arc<ProgressLedger> {
        &self.ledger
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, session: &LoadingSession) {
        let doc = match serde_json::to_value(session) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "serialize session failed");
                return;
            }
        };
        if let Err(e) = self.store.save(SESSION_KEY, &doc) {
            tracing::warn!(error = %e, "persist session failed; continuing in memory");
        }
    }

    fn forget_session(&self) {
        if let Err(e) = self.store.remove(SESSION_KEY) {
            tracing::warn!(error = %e, "remove session document failed");
        }
    }

    /// Begin a new rollout at the first phase.
    pub fn start_phased_loading(
        &self,
        strategy: Strategy,
        manual_controls: bool,
    ) -> Result<LoadingSession, PhaseError> {
        let mut state = self.lock();
        if state.session.is_some() {
            return Err(PhaseError::AlreadyActive);
        }
        let session = LoadingSession::new(strategy, manual_controls);
        state.finished_by_skip = false;
        self.ledger.start_operation(LOAD_OPERATION);
        self.persist(&session);
        tracing::info!(session = %session.id, strategy = %strategy, phases = self.plan.len(), "phased loading started");
        state.session = Some(session.clone());
        Ok(session)
    }

    /// Pick up a persisted session. A corrupt document counts as no session
    /// and is removed; any other read failure leaves the document in place.
    pub fn restore_session(&self) -> Option<LoadingSession> {
        let doc = match self.store.load(SESSION_KEY) {
            Ok(Some(doc)) => doc,
            Ok(None) => return None,
            Err(e @ StoreError::Corrupt { .. }) => {
                tracing::warn!(error = %e, "discarding corrupt session document");
                self.forget_session();
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "load session failed; treating as no session");
                return None;
            }
        };
        let session: LoadingSession = match serde_json::from_value(doc) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "discarding corrupt session document");
                self.forget_session();
                return None;
            }
        };
        if !self.ledger.restore(LOAD_OPERATION) {
            self.ledger.start_operation(LOAD_OPERATION);
            if session.is_paused() {
                if let Err(e) = self.ledger.pause_operation() {
                    tracing::debug!(error = %e, "ledger pause");
                }
            }
        }
        tracing::info!(session = %session.id, phase = session.current_phase, "session restored");
        let mut state = self.lock();
        state.finished_by_skip = false;
        state.session = Some(session.clone());
        Some(session)
    }

    pub fn session(&self) -> Option<LoadingSession> {
        self.lock().session.clone()
    }

    /// Run the current phase once.
    pub async fn run_next_phase(&self) -> Result<PhaseOutcome, PhaseError> {
        let (index, session) = {
            let state = self.lock();
            let session = state.session.clone().ok_or(PhaseError::NoSession)?;
            if state.phase_token.is_some() {
                return Err(PhaseError::PhaseRunning);
            }
            (session.current_phase, session)
        };
        let Some(phase) = self.plan.get(index).cloned() else {
            self.finish();
            return Ok(PhaseOutcome::Finished);
        };
        if session.is_paused() {
            return Ok(PhaseOutcome::Paused { phase: phase.key });
        }
        let missing: Vec<String> = phase
            .depends_on
            .iter()
            .filter(|d| !session.has_completed(d))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(PhaseError::DependencyNotMet {
                phase: phase.key,
                missing,
            });
        }
        let mut jobs = self.resolve_jobs(&phase)?;
        if phase.resume_skips_completed && !session.completed_jobs.is_empty() {
            jobs.retain(|j| !session.completed_jobs.contains(&j.id));
        }

        let token = self.ledger.cancellation_token().child_token();
        {
            let mut state = self.lock();
            // Re-check: a pause or cancel may have landed since the snapshot above.
            match &state.session {
                None => return Ok(state.ended()),
                Some(s) if s.is_paused() => return Ok(PhaseOutcome::Paused { phase: phase.key }),
                Some(_) => {}
            }
            state.phase_token = Some(token.clone());
        }
        self.enter(&phase, &jobs);
        tracing::info!(phase = %phase.key, jobs = jobs.len(), "phase started");

        let opts = DispatchOptions {
            max_workers: Some(self.worker_cap(&phase, session.strategy)),
            max_retries: phase.retry_attempts,
            sample_cap: None,
            cancel: token,
            region: None,
        };
        let report = self.pool.dispatch(jobs, opts).await;

        let (outcome, cooldown) = self.settle(index, &phase, &report.records);
        if let Some(delay) = cooldown {
            self.cooldown(delay).await;
        }
        Ok(outcome)
    }

    /// Fold a finished dispatch into the session. Returns the outcome and the
    /// cooldown to observe before the next phase.
    fn settle(
        &self,
        index: usize,
        phase: &Phase,
        records: &[ExecutionRecord],
    ) -> (PhaseOutcome, Option<Duration>) {
        let mut state = self.lock();
        state.phase_token = None;
        if state.session.is_none() {
            return (state.ended(), None);
        }
        let Some(session) = state.session.as_mut() else {
            return (PhaseOutcome::Cancelled, None);
        };
        if self.ledger.should_cancel() {
            return (PhaseOutcome::Cancelled, None);
        }
        let key = phase.key.clone();
        if session.current_phase != index {
            // Skipped while running.
            return (PhaseOutcome::Completed { phase: key }, None);
        }
        if session.is_paused() {
            for record in records.iter().filter(|r| r.is_success()) {
                if !session.completed_jobs.contains(&record.job_id) {
                    session.completed_jobs.push(record.job_id.clone());
                }
            }
            self.persist(session);
            tracing::info!(phase = %key, "phase interrupted by pause");
            return (PhaseOutcome::Paused { phase: key }, None);
        }

        match phase.evaluate(records) {
            Ok(()) => {
                self.complete_phase_task(phase, true, None);
                session.advance(&key);
                session.last_error = None;
                if session.current_phase >= self.plan.len() {
                    state.session = None;
                    self.forget_session();
                    tracing::info!(phase = %key, "final phase completed; session finished");
                    return (PhaseOutcome::Finished, None);
                }
                self.persist(session);
                tracing::info!(phase = %key, "phase completed");
                let cooldown = session.strategy.scale_cooldown(phase.cooldown);
                (PhaseOutcome::Completed { phase: key }, Some(cooldown))
            }
            Err(reason) => {
                self.complete_phase_task(phase, false, Some(reason.clone()));
                session.error_count += 1;
                session.last_error = Some(format!("{key}: {reason}"));
                self.persist(session);
                tracing::warn!(phase = %key, reason = %reason, "phase failed");
                (PhaseOutcome::Failed { phase: key, reason }, None)
            }
        }
    }

    /// Run phases until the plan finishes or something stops it.
    pub async fn run_to_completion(&self) -> Result<PhaseOutcome, PhaseError> {
        loop {
            match self.run_next_phase().await? {
                PhaseOutcome::Completed { .. } => continue,
                other => return Ok(other),
            }
        }
    }

    pub fn get_current_status(&self) -> LoadingStatus {
        let Some(session) = self.session() else {
            return LoadingStatus::NoSession;
        };
        LoadingStatus::Active(Box::new(SessionStatus {
            current_phase_key: self.plan.get(session.current_phase).map(|p| p.key.clone()),
            total_phases: self.plan.len(),
            progress: self.ledger.get_progress_summary(),
            session,
        }))
    }

    /// Stop the running phase; `resume_loading` lets the next run re-enter it.
    pub fn pause_loading(&self) -> Result<(), PhaseError> {
        let mut state = self.lock();
        let session = state.session.as_mut().ok_or(PhaseError::NoSession)?;
        if session.is_paused() {
            return Ok(());
        }
        session.paused_at = Some(unix_millis());
        self.persist(session);
        if let Err(e) = self.ledger.pause_operation() {
            tracing::debug!(error = %e, "ledger pause");
        }
        if let Some(token) = &state.phase_token {
            token.cancel();
        }
        tracing::info!("loading paused");
        Ok(())
    }

    pub fn resume_loading(&self) -> Result<(), PhaseError> {
        let mut state = self.lock();
        let session = state.session.as_mut().ok_or(PhaseError::NoSession)?;
        if !session.is_paused() {
            return Ok(());
        }
        session.paused_at = None;
        self.persist(session);
        if let Err(e) = self.ledger.resume_operation() {
            tracing::debug!(error = %e, "ledger resume");
        }
        tracing::info!("loading resumed");
        Ok(())
    }

    /// Mark the current phase complete without running it. Returns its key.
    pub fn skip_phase(&self) -> Result<String, PhaseError> {
        let mut state = self.lock();
        let session = state.session.as_mut().ok_or(PhaseError::NoSession)?;
        if !session.manual_controls {
            return Err(PhaseError::ManualControlsDisabled);
        }
        let phase = self
            .plan
            .get(session.current_phase)
            .ok_or_else(|| PhaseError::UnknownPhase(format!("#{}", session.current_phase + 1)))?;
        if let Err(e) = self.register_phase(phase, 0) {
            tracing::debug!(phase = %phase.key, error = %e, "ledger register phase");
        }
        if let Err(e) = self.ledger.skip_region(&phase.key) {
            tracing::debug!(phase = %phase.key, error = %e, "ledger skip_region");
        }
        session.advance(&phase.key);
        let finished = session.current_phase >= self.plan.len();
        if let Some(token) = &state.phase_token {
            token.cancel();
        }
        tracing::info!(phase = %phase.key, "phase skipped");
        let key = phase.key.clone();
        if finished {
            state.session = None;
            state.finished_by_skip = true;
            self.forget_session();
        } else if let Some(session) = &state.session {
            self.persist(session);
        }
        Ok(key)
    }

    /// Abandon the rollout. Safe to call with no session.
    pub fn cancel_loading(&self) {
        let mut state = self.lock();
        let had_session = state.session.take().is_some();
        state.finished_by_skip = false;
        if let Some(token) = state.phase_token.take() {
            token.cancel();
        }
        if let Err(e) = self.ledger.cancel_operation() {
            tracing::debug!(error = %e, "ledger cancel");
        }
        self.forget_session();
        if had_session {
            tracing::info!("loading cancelled");
        }
    }

    pub fn get_phase_preview(&self, key: &str) -> Result<PhasePreview, PhaseError> {
        let phase = self
            .plan
            .by_key(key)
            .ok_or_else(|| PhaseError::UnknownPhase(key.to_string()))?;
        let jobs = self.resolve_jobs(phase)?;
        let session = self.session();
        let strategy = session.as_ref().map(|s| s.strategy).unwrap_or_default();
        let workers = if jobs.is_empty() {
            0
        } else {
            self.pool.workers_for(&jobs, Some(self.worker_cap(phase, strategy)))
        };
        Ok(PhasePreview {
            key: phase.key.clone(),
            name: phase.name.clone(),
            order: phase.order,
            estimated_minutes: phase.estimated_minutes,
            depends_on: phase.depends_on.clone(),
            dependencies_met: session
                .as_ref()
                .map(|s| phase.depends_on.iter().all(|d| s.has_completed(d))),
            completed: session.as_ref().is_some_and(|s| s.has_completed(&phase.key)),
            workers,
            jobs: jobs
                .iter()
                .map(|j| JobPreview {
                    id: j.id.clone(),
                    name: j.name.clone(),
                    capability: j.capability.clone(),
                    size: j.size,
                    priority: j.priority,
                })
                .collect(),
            status: self.ledger.region(&phase.key).map(|r| r.status),
        })
    }

    fn resolve_jobs(&self, phase: &Phase) -> Result<Vec<Job>, PhaseError> {
        match &phase.jobs {
            PhaseJobs::Listed(ids) => ids
                .iter()
                .map(|id| {
                    self.registry
                        .get(id)
                        .cloned()
                        .ok_or_else(|| PhaseError::UnknownJob {
                            phase: phase.key.clone(),
                            job: id.clone(),
                        })
                })
                .filter(|j| j.as_ref().map_or(true, |j| j.enabled))
                .collect(),
            PhaseJobs::Select(selector) => Ok(self.registry.select(selector)),
        }
    }

    fn worker_cap(&self, phase: &Phase, strategy: Strategy) -> usize {
        let base = phase.max_concurrency.unwrap_or(self.pool.bounds().max);
        strategy.scale_workers(base)
    }

    /// Register the phase region and its phase task.
    fn register_phase(&self, phase: &Phase, jobs: usize) -> Result<(), LedgerError> {
        self.ledger.add_region(&phase.key, &phase.name)?;
        let spec = TaskSpec::new(phase.task_id(), TaskType::Phase, &phase.name, &phase.key)
            .with_total_steps(jobs as u32)
            .with_metadata("order", phase.order.to_string());
        self.ledger.add_task(spec)
    }

    /// Register the phase, start its phase task and add one task per job.
    fn enter(&self, phase: &Phase, jobs: &[Job]) {
        let ledger = &self.ledger;
        if let Err(e) = self.register_phase(phase, jobs.len()) {
            tracing::debug!(phase = %phase.key, error = %e, "ledger register phase");
            return;
        }
        if let Err(e) = ledger.start_task(&phase.task_id()) {
            tracing::debug!(phase = %phase.key, error = %e, "ledger start_task");
        }
        for job in jobs {
            let spec = TaskSpec::job(&job.id, &job.name, &phase.key)
                .with_metadata("capability", &job.capability)
                .with_metadata("size", job.size.as_str());
            if let Err(e) = ledger.add_task(spec) {
                tracing::debug!(job_id = %job.id, error = %e, "ledger add_task");
            }
        }
    }

    fn complete_phase_task(&self, phase: &Phase, success: bool, error: Option<String>) {
        if let Err(e) = self.ledger.complete_task(&phase.task_id(), success, error) {
            tracing::debug!(phase = %phase.key, error = %e, "ledger complete phase task");
        }
    }

    fn finish(&self) {
        self.lock().session = None;
        self.forget_session();
    }

    async fn cooldown(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }
        let cancel = self.ledger.cancellation_token();
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
