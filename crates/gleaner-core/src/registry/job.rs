//! Job descriptor and its policy enums.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::BackoffKind;

/// Rough cost of one run; drives pool sizing and deadline scaling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeClass {
    Small,
    #[default]
    Medium,
    Large,
}

impl SizeClass {
    /// Multiplier applied to a job's timeout to get its individual deadline.
    pub fn deadline_factor(self) -> u32 {
        match self {
            SizeClass::Small => 1,
            SizeClass::Medium => 2,
            SizeClass::Large => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Large => "large",
        }
    }
}

/// Dispatch priority; higher runs first within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        }
    }
}

/// How often a job should be collected.
///
/// Written in `jobs.toml` as `"manual"`, `"hourly"`, `"daily"`, `"weekly"` or
/// `"every <n><s|m|h|d>"` (e.g. `"every 90m"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Schedule {
    #[default]
    Manual,
    Hourly,
    Daily,
    Weekly,
    Every(Duration),
}

impl Schedule {
    /// Interval between runs; `None` for manual jobs.
    pub fn period(self) -> Option<Duration> {
        match self {
            Schedule::Manual => None,
            Schedule::Hourly => Some(Duration::from_secs(3600)),
            Schedule::Daily => Some(Duration::from_secs(86_400)),
            Schedule::Weekly => Some(Duration::from_secs(7 * 86_400)),
            Schedule::Every(d) => Some(d),
        }
    }

    /// Whether a run is due at `now` (unix seconds) given the last successful run.
    /// Manual jobs are never due; scheduled jobs that never ran always are.
    pub fn is_due(self, last_success: Option<i64>, now: i64) -> bool {
        let Some(period) = self.period() else {
            return false;
        };
        match last_success {
            None => true,
            Some(last) => now.saturating_sub(last) >= period.as_secs() as i64,
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Manual => write!(f, "manual"),
            Schedule::Hourly => write!(f, "hourly"),
            Schedule::Daily => write!(f, "daily"),
            Schedule::Weekly => write!(f, "weekly"),
            Schedule::Every(d) => {
                let secs = d.as_secs();
                if secs % 86_400 == 0 {
                    write!(f, "every {}d", secs / 86_400)
                } else if secs % 3600 == 0 {
                    write!(f, "every {}h", secs / 3600)
                } else if secs % 60 == 0 {
                    write!(f, "every {}m", secs / 60)
                } else {
                    write!(f, "every {}s", secs)
                }
            }
        }
    }
}

impl FromStr for Schedule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "manual" | "" => return Ok(Schedule::Manual),
            "hourly" => return Ok(Schedule::Hourly),
            "daily" => return Ok(Schedule::Daily),
            "weekly" => return Ok(Schedule::Weekly),
            _ => {}
        }
        let Some(spec) = s.strip_prefix("every") else {
            return Err(format!("unknown schedule '{}'", s));
        };
        let spec = spec.trim();
        let split = spec
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(spec.len());
        let (num, unit) = spec.split_at(split);
        let n: u64 = num
            .parse()
            .map_err(|_| format!("bad schedule interval '{}'", spec))?;
        if n == 0 {
            return Err("schedule interval must be positive".to_string());
        }
        let unit_secs: u64 = match unit.trim() {
            "s" | "" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86_400,
            other => return Err(format!("unknown schedule unit '{}'", other)),
        };
        let secs = n
            .checked_mul(unit_secs)
            .filter(|s| i64::try_from(*s).is_ok())
            .ok_or_else(|| format!("schedule interval '{}' is too large", spec))?;
        Ok(Schedule::Every(Duration::from_secs(secs)))
    }
}

impl TryFrom<String> for Schedule {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Schedule> for String {
    fn from(s: Schedule) -> Self {
        s.to_string()
    }
}

/// A declared unit of recurring collection work. Immutable after load.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: String,
    pub name: String,
    /// Handle resolved by the `CapabilityRegistry` (registered name, `file:` path or URL).
    pub capability: String,
    pub category: String,
    pub size: SizeClass,
    pub priority: Priority,
    pub schedule: Schedule,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub backoff: BackoffKind,
    /// Base per-attempt timeout, scaled by size class for the individual deadline.
    pub timeout: Duration,
    pub enabled: bool,
}

impl Job {
    /// Minimal enabled job with default policy; used by tests and ad-hoc runs.
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            capability: capability.into(),
            category: "default".to_string(),
            size: SizeClass::default(),
            priority: Priority::default(),
            schedule: Schedule::default(),
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            backoff: BackoffKind::default(),
            timeout: Duration::from_secs(300),
            enabled: true,
        }
    }

    /// Individual deadline for one attempt: `timeout` scaled by size class.
    pub fn deadline(&self) -> Duration {
        self.timeout.saturating_mul(self.size.deadline_factor())
    }
}
