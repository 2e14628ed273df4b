//! Progress ledger: operation -> region -> task state.
//!
//! The ledger is the only owner of task and region state. Workers report into
//! it and poll it for operator signals (pause, skip, cancel). Every mutation
//! happens under one mutex; region aggregates are recomputed inside the same
//! critical section as the child change, and the document is persisted there
//! too (on every status change, and when progress crosses a multiple of the
//! persist step).
//!
//! The same signals are exposed as cancellation tokens: the root token is
//! cancelled by `cancel_operation`, and each task token (a child of the root)
//! additionally by `skip_task`/`skip_region`.

mod error;
mod persist;
mod state;
mod summary;
mod types;

pub use error::LedgerError;
pub use summary::{estimate_remaining, DetailedStatus, ProgressSummary, RegionStatus};
pub use types::{derive_region_status, Operation, Region, Task, TaskSpec, TaskStatus, TaskType};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;

use crate::clock::unix_millis;
use crate::config::GleanerConfig;
use crate::store::StateStore;
use state::LedgerState;

pub type OperationId = String;

const DEFAULT_PERSIST_STEP: f64 = 5.0;

struct Inner {
    state: LedgerState,
    key: Option<String>,
    root: CancellationToken,
    task_tokens: HashMap<String, CancellationToken>,
    /// Progress value at the last persist, per task.
    persisted: HashMap<String, f64>,
}

impl Inner {
    fn empty() -> Self {
        Self {
            state: LedgerState::default(),
            key: None,
            root: CancellationToken::new(),
            task_tokens: HashMap::new(),
            persisted: HashMap::new(),
        }
    }

    fn load(state: LedgerState, key: String) -> Self {
        let root = CancellationToken::new();
        if state.operation.as_ref().is_some_and(|op| op.cancelled) {
            root.cancel();
        }
        let persisted = state
            .tasks
            .values()
            .map(|t| (t.id.clone(), t.progress))
            .collect();
        Self {
            state,
            key: Some(key),
            root,
            task_tokens: HashMap::new(),
            persisted,
        }
    }
}

pub struct ProgressLedger {
    inner: Mutex<Inner>,
    store: Arc<dyn StateStore>,
    persist_step: f64,
}

impl ProgressLedger {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            inner: Mutex::new(Inner::empty()),
            store,
            persist_step: DEFAULT_PERSIST_STEP,
        }
    }

    pub fn from_config(store: Arc<dyn StateStore>, cfg: &GleanerConfig) -> Self {
        Self::new(store).with_persist_step(cfg.persist_step_percent)
    }

    /// Persist running progress each time it crosses a multiple of `step` percent.
    pub fn with_persist_step(mut self, step: f64) -> Self {
        self.persist_step = if step.is_finite() && step > 0.0 {
            step
        } else {
            DEFAULT_PERSIST_STEP
        };
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, inner: &Inner) {
        if let Some(key) = &inner.key {
            persist::save(self.store.as_ref(), key, &inner.state);
        }
    }

    /// Replace in-memory state with a fresh operation persisted under `ledger/<name>`.
    pub fn start_operation(&self, name: &str) -> OperationId {
        let id = format!("{name}-{}", unix_millis());
        let operation = Operation {
            id: id.clone(),
            name: name.to_string(),
            started_at: unix_millis(),
            ended_at: None,
            paused: false,
            cancelled: false,
        };
        let mut inner = self.lock();
        // Anything still holding the previous tokens must stop.
        inner.root.cancel();
        *inner = Inner::load(LedgerState::fresh(operation), persist::key_for(name));
        self.persist(&inner);
        tracing::info!(operation = name, id = %id, "operation started");
        id
    }

    /// Load a persisted operation. Returns false when none exists or it was corrupt.
    pub fn restore(&self, name: &str) -> bool {
        let key = persist::key_for(name);
        let Some(mut state) = persist::load(self.store.as_ref(), &key) else {
            return false;
        };
        state.settle_after_restore();
        let mut inner = self.lock();
        inner.root.cancel();
        *inner = Inner::load(state, key);
        tracing::info!(operation = name, "operation restored");
        true
    }

    /// Delete the persisted document of the current operation.
    pub fn forget(&self) {
        let inner = self.lock();
        if let Some(key) = &inner.key {
            if let Err(e) = self.store.remove(key) {
                tracing::warn!(key = %key, error = %e, "remove ledger document failed");
            }
        }
    }

    pub fn operation(&self) -> Option<Operation> {
        self.lock().state.operation.clone()
    }

    pub fn add_region(&self, code: &str, name: &str) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        inner.state.add_region(code, name)?;
        self.persist(&inner);
        Ok(())
    }

    /// Register a task; an existing task that is not running goes back to pending.
    pub fn add_task(&self, spec: TaskSpec) -> Result<(), LedgerError> {
        let id = spec.id.clone();
        let mut inner = self.lock();
        if inner.state.add_task(spec)? {
            // A reset task gets a fresh token; the old one may have been skipped.
            if let Some(old) = inner.task_tokens.remove(&id) {
                old.cancel();
            }
            inner.persisted.insert(id, 0.0);
            self.persist(&inner);
        }
        Ok(())
    }

    pub fn task(&self, id: &str) -> Option<Task> {
        self.lock().state.tasks.get(id).cloned()
    }

    pub fn region(&self, code: &str) -> Option<Region> {
        self.lock().state.region(code).cloned()
    }

    pub fn start_task(&self, id: &str) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.state.start_task(id)? {
            self.persist(&inner);
        }
        Ok(())
    }

    /// Raise an in-flight task's progress (clamped to [0, 100]; lower values are ignored).
    pub fn update_task_progress(
        &self,
        id: &str,
        percent: f64,
        step: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let (_, current) = inner.state.set_progress(id, percent, step)?;
        self.persist_if_crossed(&mut inner, id, current);
        Ok(())
    }

    pub fn update_task_step(&self, id: &str, step: &str) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let (_, current) = inner.state.set_step(id, step)?;
        self.persist_if_crossed(&mut inner, id, current);
        Ok(())
    }

    fn persist_if_crossed(&self, inner: &mut Inner, id: &str, current: f64) {
        let last = inner.persisted.get(id).copied().unwrap_or(0.0);
        let step = self.persist_step;
        if (current / step).floor() > (last / step).floor() {
            inner.persisted.insert(id.to_string(), current);
            self.persist(inner);
        }
    }

    pub fn complete_task(
        &self,
        id: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        inner.state.complete_task(id, success, error)?;
        if let Some(progress) = inner.state.tasks.get(id).map(|t| t.progress) {
            inner.persisted.insert(id.to_string(), progress);
        }
        self.persist(&inner);
        Ok(())
    }

    /// Skip one task; its token is cancelled so in-flight work stops.
    pub fn skip_task(&self, id: &str) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.state.skip_task(id)? {
            if let Some(token) = inner.task_tokens.get(id) {
                token.cancel();
            }
            self.persist(&inner);
            tracing::info!(task = id, "task skipped");
        }
        Ok(())
    }

    pub fn skip_region(&self, code: &str) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        let skipped = inner.state.skip_region(code)?;
        for id in &skipped {
            if let Some(token) = inner.task_tokens.get(id) {
                token.cancel();
            }
        }
        self.persist(&inner);
        tracing::info!(region = code, tasks = skipped.len(), "region skipped");
        Ok(())
    }

    /// Running tasks become paused; workers wait until resumed.
    pub fn pause_operation(&self) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.state.pause_all()? {
            self.persist(&inner);
            tracing::info!("operation paused");
        }
        Ok(())
    }

    pub fn resume_operation(&self) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.state.resume_all()? {
            self.persist(&inner);
            tracing::info!("operation resumed");
        }
        Ok(())
    }

    /// Cancel every non-terminal task and the root token.
    pub fn cancel_operation(&self) -> Result<(), LedgerError> {
        let mut inner = self.lock();
        if inner.state.cancel_all()? {
            inner.root.cancel();
            self.persist(&inner);
            tracing::info!("operation cancelled");
        }
        Ok(())
    }

    pub fn should_pause(&self) -> bool {
        self.lock().state.operation.as_ref().is_some_and(|op| op.paused)
    }

    pub fn should_cancel(&self) -> bool {
        let inner = self.lock();
        inner.root.is_cancelled() || inner.state.operation.as_ref().is_some_and(|op| op.cancelled)
    }

    pub fn should_skip(&self, id: &str) -> bool {
        self.lock()
            .state
            .tasks
            .get(id)
            .is_some_and(|t| t.status == TaskStatus::Skipped)
    }

    /// Cancelled when the operation is cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.lock().root.clone()
    }

    /// Cancelled when the operation is cancelled or this task is skipped.
    pub fn task_token(&self, id: &str) -> CancellationToken {
        let mut inner = self.lock();
        let skipped = inner
            .state
            .tasks
            .get(id)
            .is_some_and(|t| t.status == TaskStatus::Skipped);
        let root = inner.root.clone();
        let token = inner
            .task_tokens
            .entry(id.to_string())
            .or_insert_with(|| root.child_token())
            .clone();
        if skipped {
            token.cancel();
        }
        token
    }

    pub fn get_progress_summary(&self) -> ProgressSummary {
        summary::summarize(&self.lock().state)
    }

    pub fn get_detailed_status(&self) -> DetailedStatus {
        summary::detail(&self.lock().state)
    }
}

#[cfg(test)]
mod tests;
