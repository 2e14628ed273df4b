//! `jobs.toml` parsing: `[defaults]` plus `[[job]]` tables.
//!
//! Unset job fields fall back to `[defaults]`, then to the global config. Other
//! top-level tables (e.g. `[[phase]]`) are ignored here.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::config::GleanerConfig;
use crate::retry::BackoffKind;

use super::job::{Job, Priority, Schedule, SizeClass};
use super::RegistryError;

#[derive(Debug, Default, Deserialize)]
struct JobDefaults {
    category: Option<String>,
    size: Option<SizeClass>,
    priority: Option<Priority>,
    schedule: Option<Schedule>,
    max_retries: Option<u32>,
    retry_delay_secs: Option<f64>,
    backoff: Option<BackoffKind>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JobEntry {
    id: String,
    name: Option<String>,
    capability: String,
    category: Option<String>,
    size: Option<SizeClass>,
    priority: Option<Priority>,
    schedule: Option<Schedule>,
    max_retries: Option<u32>,
    retry_delay_secs: Option<f64>,
    backoff: Option<BackoffKind>,
    timeout_secs: Option<u64>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct JobsFile {
    #[serde(default)]
    defaults: JobDefaults,
    #[serde(default)]
    job: Vec<JobEntry>,
}

impl JobEntry {
    fn resolve(self, d: &JobDefaults, cfg: &GleanerConfig) -> Result<Job, RegistryError> {
        let retry = cfg.retry_or_default();
        let delay_secs = self
            .retry_delay_secs
            .or(d.retry_delay_secs)
            .unwrap_or(retry.retry_delay_secs);
        if delay_secs < 0.0 {
            return Err(RegistryError::Invalid {
                id: self.id,
                reason: format!("retry_delay_secs must be >= 0 (got {})", delay_secs),
            });
        }
        let Ok(retry_delay) = Duration::try_from_secs_f64(delay_secs) else {
            return Err(RegistryError::Invalid {
                id: self.id,
                reason: format!("retry_delay_secs out of range (got {})", delay_secs),
            });
        };
        let timeout_secs = self
            .timeout_secs
            .or(d.timeout_secs)
            .unwrap_or(cfg.job_timeout_secs);
        if timeout_secs == 0 {
            return Err(RegistryError::Invalid {
                id: self.id,
                reason: "timeout_secs must be positive".to_string(),
            });
        }
        Ok(Job {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            capability: self.capability,
            category: self
                .category
                .or_else(|| d.category.clone())
                .unwrap_or_else(|| "default".to_string()),
            size: self.size.or(d.size).unwrap_or_default(),
            priority: self.priority.or(d.priority).unwrap_or_default(),
            schedule: self.schedule.or(d.schedule).unwrap_or_default(),
            max_retries: self
                .max_retries
                .or(d.max_retries)
                .unwrap_or(retry.max_retries),
            retry_delay,
            backoff: self.backoff.or(d.backoff).unwrap_or_default(),
            timeout: Duration::from_secs(timeout_secs),
            enabled: self.enabled,
            id: self.id,
        })
    }
}

/// Parse job descriptors from TOML text.
pub(super) fn parse_jobs(text: &str, cfg: &GleanerConfig) -> Result<Vec<Job>, RegistryError> {
    let file: JobsFile = toml::from_str(text)?;
    file.job
        .into_iter()
        .map(|entry| entry.resolve(&file.defaults, cfg))
        .collect()
}

pub(super) fn read_jobs_file(path: &Path) -> Result<String, RegistryError> {
    std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })
}
