//! The loading session: progress through the phase plan for one rollout.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::unix_millis;

/// Pacing of a rollout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Conservative,
    #[default]
    Balanced,
    Aggressive,
}

impl Strategy {
    pub fn cooldown_multiplier(self) -> f64 {
        match self {
            Strategy::Conservative => 2.0,
            Strategy::Balanced => 1.0,
            Strategy::Aggressive => 0.5,
        }
    }

    pub fn worker_multiplier(self) -> f64 {
        match self {
            Strategy::Conservative => 0.5,
            Strategy::Balanced => 1.0,
            Strategy::Aggressive => 1.5,
        }
    }

    pub fn scale_cooldown(self, base: Duration) -> Duration {
        base.mul_f64(self.cooldown_multiplier())
    }

    /// Scaled worker cap, at least 1.
    pub fn scale_workers(self, base: usize) -> usize {
        ((base as f64 * self.worker_multiplier()).round() as usize).max(1)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Conservative => "conservative",
            Strategy::Balanced => "balanced",
            Strategy::Aggressive => "aggressive",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "conservative" => Ok(Strategy::Conservative),
            "balanced" => Ok(Strategy::Balanced),
            "aggressive" => Ok(Strategy::Aggressive),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadingSession {
    pub id: String,
    pub strategy: Strategy,
    /// Index into the plan of the next phase to run.
    pub current_phase: usize,
    pub phases_completed: Vec<String>,
    /// Unix millis.
    pub started_at: i64,
    #[serde(default)]
    pub paused_at: Option<i64>,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub manual_controls: bool,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Jobs that already succeeded in an interrupted run of the current phase.
    #[serde(default)]
    pub completed_jobs: Vec<String>,
}

impl LoadingSession {
    pub fn new(strategy: Strategy, manual_controls: bool) -> Self {
        let now = unix_millis();
        Self {
            id: format!("load-{now}"),
            strategy,
            current_phase: 0,
            phases_completed: Vec::new(),
            started_at: now,
            paused_at: None,
            error_count: 0,
            manual_controls,
            last_error: None,
            completed_jobs: Vec::new(),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused_at.is_some()
    }

    pub fn has_completed(&self, key: &str) -> bool {
        self.phases_completed.iter().any(|k| k == key)
    }

    /// Record `key` as done and move to the next phase.
    pub(super) fn advance(&mut self, key: &str) {
        if !self.has_completed(key) {
            self.phases_completed.push(key.to_string());
        }
        self.current_phase += 1;
        self.completed_jobs.clear();
    }
}
