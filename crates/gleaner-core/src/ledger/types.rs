use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Paused,
    Skipped,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Completed, failed, skipped and cancelled tasks never change again
    /// (until re-registered).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped | TaskStatus::Cancelled
        )
    }

    /// Counts toward region completion.
    pub fn is_done(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Paused => "paused",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Operation,
    Phase,
    Job,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub name: String,
    pub region: String,
    pub status: TaskStatus,
    /// Percent in [0, 100].
    pub progress: f64,
    #[serde(default)]
    pub current_step: Option<String>,
    #[serde(default)]
    pub steps_completed: u32,
    #[serde(default)]
    pub total_steps: Option<u32>,
    /// Unix millis.
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Task {
    pub(super) fn from_spec(spec: TaskSpec) -> Self {
        Self {
            id: spec.id,
            task_type: spec.task_type,
            name: spec.name,
            region: spec.region,
            status: TaskStatus::Pending,
            progress: 0.0,
            current_step: None,
            steps_completed: 0,
            total_steps: spec.total_steps,
            started_at: None,
            ended_at: None,
            error: None,
            metadata: spec.metadata,
        }
    }

    /// Back to a fresh pending task, keeping identity and registration data.
    pub(super) fn reset(&mut self, spec: TaskSpec) {
        *self = Task::from_spec(spec);
    }
}

/// What a caller supplies to register a task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSpec {
    pub id: String,
    pub task_type: TaskType,
    pub name: String,
    pub region: String,
    pub total_steps: Option<u32>,
    pub metadata: BTreeMap<String, String>,
}

impl TaskSpec {
    pub fn new(
        id: impl Into<String>,
        task_type: TaskType,
        name: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            task_type,
            name: name.into(),
            region: region.into(),
            total_steps: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn job(id: impl Into<String>, name: impl Into<String>, region: impl Into<String>) -> Self {
        Self::new(id, TaskType::Job, name, region)
    }

    pub fn with_total_steps(mut self, steps: u32) -> Self {
        self.total_steps = Some(steps);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A group of tasks; status and progress are derived from its members.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub code: String,
    pub name: String,
    pub status: TaskStatus,
    pub progress: f64,
    /// Member task ids in registration order.
    pub tasks: Vec<String>,
}

impl Region {
    pub(super) fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            status: TaskStatus::Pending,
            progress: 0.0,
            tasks: Vec::new(),
        }
    }
}

/// Derive a region's status from its member statuses.
///
/// COMPLETED exactly when every member is completed or skipped; an empty
/// region stays PENDING.
pub fn derive_region_status(members: &[TaskStatus]) -> TaskStatus {
    if members.is_empty() {
        return TaskStatus::Pending;
    }
    if members.iter().all(|s| s.is_done()) {
        return TaskStatus::Completed;
    }
    if members.contains(&TaskStatus::Running) {
        return TaskStatus::Running;
    }
    if members.contains(&TaskStatus::Paused) {
        return TaskStatus::Paused;
    }
    if members.iter().all(|s| *s == TaskStatus::Pending) {
        return TaskStatus::Pending;
    }
    if members.iter().all(|s| s.is_terminal()) {
        if members.contains(&TaskStatus::Failed) {
            return TaskStatus::Failed;
        }
        return TaskStatus::Cancelled;
    }
    TaskStatus::Running
}

/// Identity and control flags of the tracked operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: String,
    pub name: String,
    pub started_at: i64,
    #[serde(default)]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub cancelled: bool,
}
