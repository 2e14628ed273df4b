use serde::Serialize;

use super::state::LedgerState;
use super::types::{derive_region_status, Task, TaskStatus};
use crate::clock::unix_millis;

/// Operation-level view: counts, percent and a linear ETA.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSummary {
    pub operation_id: Option<String>,
    pub operation: Option<String>,
    pub status: TaskStatus,
    pub total_tasks: usize,
    pub pending: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    /// Mean of task progress, in [0, 100].
    pub percent: f64,
    pub elapsed_secs: f64,
    /// `elapsed * (100 - pct) / pct`; `None` until some progress exists.
    pub eta_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionStatus {
    pub code: String,
    pub name: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedStatus {
    pub summary: ProgressSummary,
    pub regions: Vec<RegionStatus>,
}

/// Linear extrapolation of the remaining time.
pub fn estimate_remaining(elapsed_secs: f64, percent: f64) -> Option<f64> {
    if percent <= 0.0 {
        return None;
    }
    if percent >= 100.0 {
        return Some(0.0);
    }
    Some(elapsed_secs * (100.0 - percent) / percent)
}

pub(super) fn summarize(state: &LedgerState) -> ProgressSummary {
    let mut summary = ProgressSummary {
        operation_id: state.operation.as_ref().map(|o| o.id.clone()),
        operation: state.operation.as_ref().map(|o| o.name.clone()),
        status: TaskStatus::Pending,
        total_tasks: state.tasks.len(),
        pending: 0,
        running: 0,
        paused: 0,
        completed: 0,
        skipped: 0,
        failed: 0,
        cancelled: 0,
        percent: 0.0,
        elapsed_secs: 0.0,
        eta_secs: None,
    };
    let mut statuses = Vec::with_capacity(state.tasks.len());
    let mut total_progress = 0.0;
    for task in state.tasks.values() {
        statuses.push(task.status);
        total_progress += task.progress;
        match task.status {
            TaskStatus::Pending => summary.pending += 1,
            TaskStatus::Running => summary.running += 1,
            TaskStatus::Paused => summary.paused += 1,
            TaskStatus::Completed => summary.completed += 1,
            TaskStatus::Skipped => summary.skipped += 1,
            TaskStatus::Failed => summary.failed += 1,
            TaskStatus::Cancelled => summary.cancelled += 1,
        }
    }
    if !state.tasks.is_empty() {
        summary.percent = total_progress / state.tasks.len() as f64;
    }

    if let Some(op) = &state.operation {
        let end = op.ended_at.unwrap_or_else(unix_millis);
        summary.elapsed_secs = end.saturating_sub(op.started_at).max(0) as f64 / 1000.0;
        summary.status = if op.cancelled {
            TaskStatus::Cancelled
        } else if op.paused {
            TaskStatus::Paused
        } else {
            derive_region_status(&statuses)
        };
    }
    summary.eta_secs = estimate_remaining(summary.elapsed_secs, summary.percent);
    summary
}

pub(super) fn detail(state: &LedgerState) -> DetailedStatus {
    let regions = state
        .regions
        .iter()
        .map(|r| RegionStatus {
            code: r.code.clone(),
            name: r.name.clone(),
            status: r.status,
            progress: r.progress,
            tasks: r
                .tasks
                .iter()
                .filter_map(|id| state.tasks.get(id).cloned())
                .collect(),
        })
        .collect();
    DetailedStatus {
        summary: summarize(state),
        regions,
    }
}
