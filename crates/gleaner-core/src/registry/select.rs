//! Lazy job selection for dynamically-populated phases.

use serde::{Deserialize, Serialize};

use super::job::{Job, Priority, SizeClass};

/// Filter over enabled registry jobs. Empty selector matches every enabled job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSelector {
    #[serde(default)]
    pub category: Option<String>,
    /// Only jobs at or above this priority.
    #[serde(default)]
    pub min_priority: Option<Priority>,
    #[serde(default)]
    pub size: Option<SizeClass>,
    /// Only jobs whose id starts with this prefix.
    #[serde(default)]
    pub id_prefix: Option<String>,
}

impl JobSelector {
    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, job: &Job) -> bool {
        if !job.enabled {
            return false;
        }
        if let Some(c) = &self.category {
            if &job.category != c {
                return false;
            }
        }
        if let Some(p) = self.min_priority {
            if job.priority < p {
                return false;
            }
        }
        if let Some(s) = self.size {
            if job.size != s {
                return false;
            }
        }
        if let Some(prefix) = &self.id_prefix {
            if !job.id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }
}
