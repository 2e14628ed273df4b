//! Execution records: the immutable outcome of one attempt to run a job.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::clock::unix_millis;

/// Final status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
    /// Stopped by an operator cancel or by the batch; not a defect.
    Cancelled,
    /// The ledger task was skipped.
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "success" => ExecutionStatus::Success,
            "cancelled" => ExecutionStatus::Cancelled,
            "skipped" => ExecutionStatus::Skipped,
            _ => ExecutionStatus::Failed,
        }
    }
}

/// Failure taxonomy carried on failed records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Capability unresolvable, target unloadable, no extractor, capability panic.
    Structural,
    /// Transport or upstream failure while streaming records.
    Capability,
    /// The capability rejected the collected batch.
    Validation,
    /// Individual or aggregate deadline expired.
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Structural => "structural",
            ErrorKind::Capability => "capability",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "structural" => ErrorKind::Structural,
            "capability" => ErrorKind::Capability,
            "validation" => ErrorKind::Validation,
            "timeout" => ErrorKind::Timeout,
            "cancelled" => ErrorKind::Cancelled,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// CPU and memory utilisation in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

impl ResourceSnapshot {
    /// The busier of the two resources.
    pub fn utilization(&self) -> f32 {
        self.cpu_percent.max(self.memory_percent)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub job_id: String,
    pub status: ExecutionStatus,
    /// Unix millis.
    pub started_at: i64,
    /// Unix millis.
    pub ended_at: i64,
    pub records_collected: u64,
    /// Records that needed a sentinel substituted for a malformed field.
    pub records_repaired: u64,
    /// Set by the caller after handing records to the insertion sink.
    pub records_inserted: u64,
    pub error: Option<JobError>,
    /// Retries made before this attempt (attempt number - 1).
    pub retry_count: u32,
    pub resources: Option<ResourceSnapshot>,
}

impl ExecutionRecord {
    fn ended(job_id: &str, status: ExecutionStatus, started_at: i64, retry_count: u32) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            started_at,
            ended_at: unix_millis().max(started_at),
            records_collected: 0,
            records_repaired: 0,
            records_inserted: 0,
            error: None,
            retry_count,
            resources: None,
        }
    }

    pub fn success(job_id: &str, started_at: i64, retry_count: u32) -> Self {
        Self::ended(job_id, ExecutionStatus::Success, started_at, retry_count)
    }

    pub fn failed(job_id: &str, started_at: i64, retry_count: u32, error: JobError) -> Self {
        Self {
            error: Some(error),
            ..Self::ended(job_id, ExecutionStatus::Failed, started_at, retry_count)
        }
    }

    pub fn cancelled(job_id: &str, started_at: i64, retry_count: u32, reason: &str) -> Self {
        Self {
            error: Some(JobError::new(ErrorKind::Cancelled, reason)),
            ..Self::ended(job_id, ExecutionStatus::Cancelled, started_at, retry_count)
        }
    }

    pub fn skipped(job_id: &str, started_at: i64, retry_count: u32) -> Self {
        Self::ended(job_id, ExecutionStatus::Skipped, started_at, retry_count)
    }

    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Success
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }

    pub fn duration_ms(&self) -> i64 {
        self.ended_at.saturating_sub(self.started_at)
    }

    /// Copy of this record with the insertion count filled in.
    pub fn with_inserted(&self, inserted: u64) -> Self {
        Self {
            records_inserted: inserted,
            ..self.clone()
        }
    }

    pub fn with_resources(self, resources: Option<ResourceSnapshot>) -> Self {
        Self { resources, ..self }
    }
}
