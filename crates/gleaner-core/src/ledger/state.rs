//! Pure state transitions over operation, regions and tasks. No I/O here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{derive_region_status, Operation, Region, Task, TaskSpec, TaskStatus};
use super::LedgerError;
use crate::clock::unix_millis;

/// Everything that is persisted for one operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(super) struct LedgerState {
    #[serde(default = "default_version")]
    pub version: u8,
    pub operation: Option<Operation>,
    pub regions: Vec<Region>,
    pub tasks: BTreeMap<String, Task>,
}

fn default_version() -> u8 {
    1
}

/// Running, or running work held by a paused operation.
fn in_flight(task: &Task) -> bool {
    matches!(task.status, TaskStatus::Running | TaskStatus::Paused)
}

fn invalid(task: &Task, action: &'static str) -> LedgerError {
    LedgerError::InvalidTransition {
        id: task.id.clone(),
        from: task.status,
        action,
    }
}

impl LedgerState {
    pub fn fresh(operation: Operation) -> Self {
        Self {
            version: 1,
            operation: Some(operation),
            regions: Vec::new(),
            tasks: BTreeMap::new(),
        }
    }

    fn operation_mut(&mut self) -> Result<&mut Operation, LedgerError> {
        self.operation.as_mut().ok_or(LedgerError::NoOperation)
    }

    pub fn region(&self, code: &str) -> Option<&Region> {
        self.regions.iter().find(|r| r.code == code)
    }

    fn region_mut(&mut self, code: &str) -> Option<&mut Region> {
        self.regions.iter_mut().find(|r| r.code == code)
    }

    fn task_mut(&mut self, id: &str) -> Result<&mut Task, LedgerError> {
        self.tasks
            .get_mut(id)
            .ok_or_else(|| LedgerError::UnknownTask(id.to_string()))
    }

    /// Recompute a region's derived status and progress from its members.
    pub fn recompute(&mut self, code: &str) {
        let Some(idx) = self.regions.iter().position(|r| r.code == code) else {
            return;
        };
        let (statuses, progress): (Vec<TaskStatus>, Vec<f64>) = self.regions[idx]
            .tasks
            .iter()
            .filter_map(|id| self.tasks.get(id))
            .map(|t| (t.status, t.progress))
            .unzip();
        let region = &mut self.regions[idx];
        region.status = derive_region_status(&statuses);
        region.progress = if progress.is_empty() {
            0.0
        } else {
            progress.iter().sum::<f64>() / progress.len() as f64
        };
    }

    fn recompute_all(&mut self) {
        let codes: Vec<String> = self.regions.iter().map(|r| r.code.clone()).collect();
        for code in codes {
            self.recompute(&code);
        }
    }

    pub fn add_region(&mut self, code: &str, name: &str) -> Result<(), LedgerError> {
        self.operation_mut()?;
        match self.region_mut(code) {
            Some(region) => region.name = name.to_string(),
            None => self.regions.push(Region::new(code, name)),
        }
        Ok(())
    }

    /// Register a task. An existing task that is not running is reset to pending.
    /// Returns whether anything changed.
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<bool, LedgerError> {
        self.operation_mut()?;
        if self.region(&spec.region).is_none() {
            return Err(LedgerError::UnknownRegion(spec.region));
        }
        let region_code = spec.region.clone();
        let id = spec.id.clone();
        let previous_region = match self.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => return Ok(false),
            Some(task) => {
                let old = task.region.clone();
                task.reset(spec);
                Some(old)
            }
            None => {
                self.tasks.insert(id.clone(), Task::from_spec(spec));
                None
            }
        };
        if let Some(old) = previous_region.filter(|old| *old != region_code) {
            if let Some(r) = self.region_mut(&old) {
                r.tasks.retain(|t| *t != id);
            }
            self.recompute(&old);
        }
        if let Some(region) = self.region_mut(&region_code) {
            if !region.tasks.contains(&id) {
                region.tasks.push(id);
            }
        }
        self.recompute(&region_code);
        Ok(true)
    }

    /// Pending -> running. Starting a running task is a no-op.
    pub fn start_task(&mut self, id: &str) -> Result<bool, LedgerError> {
        let task = self.task_mut(id)?;
        match task.status {
            TaskStatus::Running => return Ok(false),
            TaskStatus::Pending => {
                task.status = TaskStatus::Running;
                task.started_at.get_or_insert_with(unix_millis);
            }
            _ => return Err(invalid(task, "start")),
        }
        let region = task.region.clone();
        self.recompute(&region);
        Ok(true)
    }

    /// Raise an in-flight task's progress. Lower values keep the current one.
    /// Returns `(previous, current)`.
    pub fn set_progress(
        &mut self,
        id: &str,
        percent: f64,
        step: Option<&str>,
    ) -> Result<(f64, f64), LedgerError> {
        let task = self.task_mut(id)?;
        if !in_flight(task) {
            return Err(invalid(task, "update progress"));
        }
        let previous = task.progress;
        let clamped = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
        if clamped > previous {
            task.progress = clamped;
        }
        if let Some(step) = step {
            task.current_step = Some(step.to_string());
        }
        let current = task.progress;
        let region = task.region.clone();
        self.recompute(&region);
        Ok((previous, current))
    }

    /// Record a finished step; with `total_steps` known this also moves progress.
    pub fn set_step(&mut self, id: &str, step: &str) -> Result<(f64, f64), LedgerError> {
        let task = self.task_mut(id)?;
        if !in_flight(task) {
            return Err(invalid(task, "update step"));
        }
        let previous = task.progress;
        task.current_step = Some(step.to_string());
        task.steps_completed = task.steps_completed.saturating_add(1);
        if let Some(total) = task.total_steps.filter(|t| *t > 0) {
            let pct = (f64::from(task.steps_completed) * 100.0 / f64::from(total)).min(100.0);
            task.progress = task.progress.max(pct);
        }
        let current = task.progress;
        let region = task.region.clone();
        self.recompute(&region);
        Ok((previous, current))
    }

    /// Running or paused -> completed (progress 100) or failed. An attempt that
    /// was already in flight when the operation paused still lands here.
    pub fn complete_task(
        &mut self,
        id: &str,
        success: bool,
        error: Option<String>,
    ) -> Result<(), LedgerError> {
        let task = self.task_mut(id)?;
        if !in_flight(task) {
            return Err(invalid(task, if success { "complete" } else { "fail" }));
        }
        if success {
            task.status = TaskStatus::Completed;
            task.progress = 100.0;
            task.error = None;
        } else {
            task.status = TaskStatus::Failed;
            task.error = error;
        }
        task.ended_at = Some(unix_millis());
        let region = task.region.clone();
        self.recompute(&region);
        Ok(())
    }

    /// Pending, running or paused -> skipped. Returns whether the task changed.
    pub fn skip_task(&mut self, id: &str) -> Result<bool, LedgerError> {
        let task = self.task_mut(id)?;
        match task.status {
            TaskStatus::Skipped => return Ok(false),
            TaskStatus::Pending | TaskStatus::Running | TaskStatus::Paused => {
                task.status = TaskStatus::Skipped;
                task.ended_at = Some(unix_millis());
            }
            _ => return Err(invalid(task, "skip")),
        }
        let region = task.region.clone();
        self.recompute(&region);
        Ok(true)
    }

    /// Skip every non-terminal member of a region; returns the ids skipped.
    pub fn skip_region(&mut self, code: &str) -> Result<Vec<String>, LedgerError> {
        let members = self
            .region(code)
            .ok_or_else(|| LedgerError::UnknownRegion(code.to_string()))?
            .tasks
            .clone();
        let now = unix_millis();
        let mut skipped = Vec::new();
        for id in members {
            if let Some(task) = self.tasks.get_mut(&id) {
                if !task.status.is_terminal() {
                    task.status = TaskStatus::Skipped;
                    task.ended_at = Some(now);
                    skipped.push(id);
                }
            }
        }
        self.recompute(code);
        Ok(skipped)
    }

    pub fn pause_all(&mut self) -> Result<bool, LedgerError> {
        let op = self.operation_mut()?;
        if op.paused || op.cancelled {
            return Ok(false);
        }
        op.paused = true;
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Paused;
            }
        }
        self.recompute_all();
        Ok(true)
    }

    pub fn resume_all(&mut self) -> Result<bool, LedgerError> {
        let op = self.operation_mut()?;
        if !op.paused {
            return Ok(false);
        }
        op.paused = false;
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Paused {
                task.status = TaskStatus::Running;
            }
        }
        self.recompute_all();
        Ok(true)
    }

    pub fn cancel_all(&mut self) -> Result<bool, LedgerError> {
        let now = unix_millis();
        let op = self.operation_mut()?;
        if op.cancelled {
            return Ok(false);
        }
        op.cancelled = true;
        op.paused = false;
        op.ended_at = Some(now);
        for task in self.tasks.values_mut() {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Cancelled;
                task.ended_at = Some(now);
            }
        }
        self.recompute_all();
        Ok(true)
    }

    /// After loading from disk nothing is actually running any more.
    pub fn settle_after_restore(&mut self) {
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Running {
                task.status = TaskStatus::Pending;
            }
        }
        self.recompute_all();
    }
}
