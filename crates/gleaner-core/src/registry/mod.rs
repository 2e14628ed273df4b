//! Job descriptor registry.
//!
//! The registry is the static list of collection jobs loaded from `jobs.toml`:
//! each job names a capability handle plus its priority, schedule, retry policy
//! and size class. Jobs are immutable once loaded; the scheduler and the phase
//! controller receive clones.

mod job;
mod load;
mod select;

pub use job::{Job, Priority, Schedule, SizeClass};
pub use select::JobSelector;

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use crate::config::GleanerConfig;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("read jobs file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse jobs file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate job id '{0}'")]
    DuplicateId(String),
    #[error("invalid job '{id}': {reason}")]
    Invalid { id: String, reason: String },
}

/// Ordered, id-indexed set of jobs.
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    jobs: Vec<Job>,
    index: HashMap<String, usize>,
}

impl JobRegistry {
    /// Build a registry, rejecting duplicate ids, blank ids and blank capability handles.
    pub fn new(jobs: Vec<Job>) -> Result<Self, RegistryError> {
        let mut index = HashMap::with_capacity(jobs.len());
        for (i, job) in jobs.iter().enumerate() {
            if job.id.trim().is_empty() {
                return Err(RegistryError::Invalid {
                    id: job.id.clone(),
                    reason: "id must not be empty".to_string(),
                });
            }
            if job.capability.trim().is_empty() {
                return Err(RegistryError::Invalid {
                    id: job.id.clone(),
                    reason: "capability handle must not be empty".to_string(),
                });
            }
            if index.insert(job.id.clone(), i).is_some() {
                return Err(RegistryError::DuplicateId(job.id.clone()));
            }
        }
        Ok(Self { jobs, index })
    }

    pub fn from_toml_str(text: &str, cfg: &GleanerConfig) -> Result<Self, RegistryError> {
        Self::new(load::parse_jobs(text, cfg)?)
    }

    pub fn load_from_path(path: &Path, cfg: &GleanerConfig) -> Result<Self, RegistryError> {
        let text = load::read_jobs_file(path)?;
        Self::from_toml_str(&text, cfg)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Job> {
        self.index.get(id).map(|&i| &self.jobs[i])
    }

    /// All jobs in declaration order, disabled ones included.
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn enabled(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(|j| j.enabled)
    }

    /// Enabled jobs of one category, in declaration order.
    pub fn by_category(&self, category: &str) -> Vec<Job> {
        self.select(&JobSelector::category(category))
    }

    /// Sorted distinct categories of enabled jobs.
    pub fn categories(&self) -> Vec<String> {
        self.enabled()
            .map(|j| j.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn select(&self, selector: &JobSelector) -> Vec<Job> {
        self.jobs
            .iter()
            .filter(|j| selector.matches(j))
            .cloned()
            .collect()
    }

    /// Enabled jobs whose schedule has elapsed at `now` (unix seconds).
    /// `last_success` maps job id to the unix time of its last successful run.
    pub fn due(&self, now: i64, last_success: &HashMap<String, i64>) -> Vec<&Job> {
        self.enabled()
            .filter(|j| j.schedule.is_due(last_success.get(&j.id).copied(), now))
            .collect()
    }
}
