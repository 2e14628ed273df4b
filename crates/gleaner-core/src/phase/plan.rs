//! Static phase plan: ordered, dependency-gated groups of jobs.
//!
//! Phases come from the `[[phase]]` tables of `jobs.toml`:
//!
//! ```toml
//! [[phase]]
//! key = "core"
//! jobs = ["catalog", "prices"]
//! estimated_minutes = 20
//!
//! [[phase]]
//! key = "long-tail"
//! select = { category = "vendors", min_priority = "normal" }
//! depends_on = ["core"]
//! cooldown_secs = 30
//! checks = { min_success_ratio = 0.9 }
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::{ExecutionRecord, ExecutionStatus};
use crate::registry::JobSelector;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("read phase plan {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse phase plan: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate phase key: {0}")]
    DuplicatePhase(String),
    #[error("phase {phase}: dependency '{dependency}' is not an earlier phase")]
    InvalidDependency { phase: String, dependency: String },
    #[error("phase {0}: give exactly one of `jobs` or `select`")]
    JobSource(String),
    #[error("phase {phase}: cooldown_secs out of range (got {value})")]
    InvalidCooldown { phase: String, value: f64 },
}

/// Which jobs a phase runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseJobs {
    /// Explicit job ids.
    Listed(Vec<String>),
    /// Resolved against the registry when the phase starts.
    Select(JobSelector),
}

/// Gate evaluated over a phase's records; every check must pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PhaseCheck {
    AllSucceeded,
    MaxFailures(usize),
    MinSuccessRatio(f64),
    MinRecords(u64),
}

impl PhaseCheck {
    /// `Err(reason)` when `records` do not satisfy the check.
    pub fn evaluate(&self, records: &[ExecutionRecord]) -> Result<(), String> {
        let counted: Vec<&ExecutionRecord> = records
            .iter()
            .filter(|r| r.status != ExecutionStatus::Skipped)
            .collect();
        let succeeded = counted.iter().filter(|r| r.is_success()).count();
        let failed = counted.len() - succeeded;
        match *self {
            PhaseCheck::AllSucceeded if failed > 0 => {
                Err(format!("{failed} of {} jobs did not succeed", counted.len()))
            }
            PhaseCheck::MaxFailures(max) if failed > max => {
                Err(format!("{failed} failures exceed the limit of {max}"))
            }
            PhaseCheck::MinSuccessRatio(min) if !counted.is_empty() => {
                let ratio = succeeded as f64 / counted.len() as f64;
                if ratio + f64::EPSILON < min {
                    Err(format!("success ratio {ratio:.2} below {min:.2}"))
                } else {
                    Ok(())
                }
            }
            PhaseCheck::MinRecords(min) => {
                let total: u64 = records.iter().map(|r| r.records_collected).sum();
                if total < min {
                    Err(format!("{total} records collected, need {min}"))
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub key: String,
    pub name: String,
    /// 1-based position in the plan.
    pub order: usize,
    pub jobs: PhaseJobs,
    pub estimated_minutes: u32,
    /// Worker cap before strategy scaling.
    pub max_concurrency: Option<usize>,
    /// Replaces each job's `max_retries` inside this phase.
    pub retry_attempts: Option<u32>,
    /// Pause after the phase completes, before strategy scaling.
    pub cooldown: Duration,
    pub depends_on: Vec<String>,
    /// Empty means every job must succeed.
    pub checks: Vec<PhaseCheck>,
    /// On re-entry after a pause, skip jobs that already succeeded.
    pub resume_skips_completed: bool,
}

impl Phase {
    pub fn new(key: impl Into<String>, jobs: PhaseJobs) -> Self {
        let key = key.into();
        Self {
            name: key.clone(),
            key,
            order: 0,
            jobs,
            estimated_minutes: 0,
            max_concurrency: None,
            retry_attempts: None,
            cooldown: Duration::ZERO,
            depends_on: Vec::new(),
            checks: Vec::new(),
            resume_skips_completed: false,
        }
    }

    pub fn depends_on(mut self, key: impl Into<String>) -> Self {
        self.depends_on.push(key.into());
        self
    }

    pub fn with_check(mut self, check: PhaseCheck) -> Self {
        self.checks.push(check);
        self
    }

    /// Ledger task id of the phase itself.
    pub fn task_id(&self) -> String {
        format!("phase:{}", self.key)
    }

    /// `Err(reason)` for the first failed check.
    pub fn evaluate(&self, records: &[ExecutionRecord]) -> Result<(), String> {
        if self.checks.is_empty() {
            return PhaseCheck::AllSucceeded.evaluate(records);
        }
        self.checks.iter().try_for_each(|c| c.evaluate(records))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PhasePlan {
    phases: Vec<Phase>,
}

impl PhasePlan {
    /// Validate and number `phases` in the given order.
    pub fn new(mut phases: Vec<Phase>) -> Result<Self, PlanError> {
        let mut seen = HashSet::new();
        for (idx, phase) in phases.iter_mut().enumerate() {
            for dep in &phase.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(PlanError::InvalidDependency {
                        phase: phase.key.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            if !seen.insert(phase.key.clone()) {
                return Err(PlanError::DuplicatePhase(phase.key.clone()));
            }
            phase.order = idx + 1;
        }
        Ok(Self { phases })
    }

    /// Parse the `[[phase]]` tables of a jobs file; other tables are ignored.
    pub fn from_toml_str(text: &str) -> Result<Self, PlanError> {
        let file: PlanFile = toml::from_str(text)?;
        let phases = file
            .phase
            .into_iter()
            .map(PhaseEntry::into_phase)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(phases)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, PlanError> {
        let text = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Phase> {
        self.phases.get(index)
    }

    pub fn position(&self, key: &str) -> Option<usize> {
        self.phases.iter().position(|p| p.key == key)
    }

    pub fn by_key(&self, key: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.key == key)
    }
}

#[derive(Debug, Default, Deserialize)]
struct PlanFile {
    #[serde(default)]
    phase: Vec<PhaseEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct ChecksEntry {
    #[serde(default)]
    all_succeeded: bool,
    max_failures: Option<usize>,
    min_success_ratio: Option<f64>,
    min_records: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PhaseEntry {
    key: String,
    name: Option<String>,
    jobs: Option<Vec<String>>,
    select: Option<JobSelector>,
    #[serde(default)]
    estimated_minutes: u32,
    max_concurrency: Option<usize>,
    retry_attempts: Option<u32>,
    #[serde(default)]
    cooldown_secs: f64,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    checks: ChecksEntry,
    #[serde(default)]
    resume_skips_completed: bool,
}

impl PhaseEntry {
    fn into_phase(self) -> Result<Phase, PlanError> {
        let jobs = match (self.jobs, self.select) {
            (Some(ids), None) => PhaseJobs::Listed(ids),
            (None, Some(sel)) => PhaseJobs::Select(sel),
            _ => return Err(PlanError::JobSource(self.key)),
        };
        let Ok(cooldown) = Duration::try_from_secs_f64(self.cooldown_secs.max(0.0)) else {
            return Err(PlanError::InvalidCooldown {
                phase: self.key,
                value: self.cooldown_secs,
            });
        };
        let mut checks = Vec::new();
        if self.checks.all_succeeded {
            checks.push(PhaseCheck::AllSucceeded);
        }
        if let Some(n) = self.checks.max_failures {
            checks.push(PhaseCheck::MaxFailures(n));
        }
        if let Some(r) = self.checks.min_success_ratio {
            checks.push(PhaseCheck::MinSuccessRatio(r));
        }
        if let Some(n) = self.checks.min_records {
            checks.push(PhaseCheck::MinRecords(n));
        }
        Ok(Phase {
            name: self.name.unwrap_or_else(|| self.key.clone()),
            key: self.key,
            order: 0,
            jobs,
            estimated_minutes: self.estimated_minutes,
            max_concurrency: self.max_concurrency.map(|n| n.max(1)),
            retry_attempts: self.retry_attempts,
            cooldown,
            depends_on: self.depends_on,
            checks,
            resume_skips_completed: self.resume_skips_completed,
        })
    }
}
