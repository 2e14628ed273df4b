use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Retry defaults applied to jobs that do not declare their own (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Base delay in seconds between attempts (e.g. 0.25 = 250ms).
    pub retry_delay_secs: f64,
    /// Upper bound on exponential/jittered backoff, in seconds.
    pub max_delay_secs: u64,
    /// Stop retrying when the capability cannot be resolved or refuses to start.
    #[serde(default)]
    pub fast_fail_structural: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 5.0,
            max_delay_secs: 300,
            fast_fail_structural: false,
        }
    }
}

impl RetryConfig {
    /// Base delay; values too large to represent fall back to `max_delay`.
    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay_secs.max(0.0))
            .unwrap_or_else(|_| self.max_delay())
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_secs(self.max_delay_secs)
    }
}

/// Global configuration loaded from `~/.config/gleaner/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GleanerConfig {
    /// Lower bound on concurrently running jobs for a non-empty batch.
    pub min_workers: usize,
    /// Upper bound on concurrently running jobs.
    pub max_workers: usize,
    /// Default per-attempt deadline in seconds, before size-class scaling.
    pub job_timeout_secs: u64,
    /// Deadline in seconds for a whole category/phase batch.
    pub aggregate_timeout_secs: u64,
    /// Persist a running task each time its progress crosses a multiple of this percentage.
    pub persist_step_percent: f64,
    /// Optional retry defaults; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Job and phase definitions; defaults to `~/.config/gleaner/jobs.toml`.
    #[serde(default)]
    pub jobs_file: Option<PathBuf>,
    /// Where the JSON-lines insertion sink writes records; defaults to `~/.local/share/gleaner/records`.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
}

impl Default for GleanerConfig {
    fn default() -> Self {
        Self {
            min_workers: 2,
            max_workers: 8,
            job_timeout_secs: 300,
            aggregate_timeout_secs: 3600,
            persist_step_percent: 5.0,
            retry: None,
            jobs_file: None,
            output_dir: None,
        }
    }
}

impl GleanerConfig {
    /// Retry defaults, falling back to built-ins when the section is absent.
    pub fn retry_or_default(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs.max(1))
    }

    pub fn aggregate_timeout(&self) -> Duration {
        Duration::from_secs(self.aggregate_timeout_secs.max(1))
    }

    /// Effective `(min_workers, max_workers)` with `min <= max` and both at least 1.
    pub fn worker_bounds(&self) -> (usize, usize) {
        let min = self.min_workers.max(1);
        (min, self.max_workers.max(min))
    }

    /// Jobs file path: the configured one or `~/.config/gleaner/jobs.toml`.
    pub fn jobs_file_path(&self) -> Result<PathBuf> {
        if let Some(p) = &self.jobs_file {
            return Ok(p.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("gleaner")?;
        Ok(xdg_dirs.get_config_home().join("gleaner").join("jobs.toml"))
    }

    /// Reject values that parse as TOML but cannot drive the runtime.
    pub fn validate(&self) -> Result<()> {
        if let Some(retry) = &self.retry {
            let delay = retry.retry_delay_secs;
            if delay < 0.0 || Duration::try_from_secs_f64(delay).is_err() {
                anyhow::bail!("retry.retry_delay_secs out of range (got {delay})");
            }
        }
        let step = self.persist_step_percent;
        if !(step > 0.0 && step <= 100.0) {
            anyhow::bail!("persist_step_percent must be in (0, 100] (got {step})");
        }
        Ok(())
    }

    /// Output directory for the JSON-lines sink.
    pub fn output_dir_path(&self) -> Result<PathBuf> {
        if let Some(p) = &self.output_dir {
            return Ok(p.clone());
        }
        let xdg_dirs = xdg::BaseDirectories::with_prefix("gleaner")?;
        Ok(xdg_dirs.get_data_home().join("gleaner").join("records"))
    }
}

/// State directory: `~/.local/state/gleaner` (ledger/session documents, history DB, control socket).
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("gleaner")?;
    Ok(xdg_dirs.get_state_home().join("gleaner"))
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("gleaner")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<GleanerConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = GleanerConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: GleanerConfig = toml::from_str(&data)?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}
