use crate::engine::ExecutionRecord;

/// One row of the `executions` table.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: i64,
    pub record: ExecutionRecord,
}

/// Aggregate counters for one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobCounters {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub records_collected: u64,
    pub records_inserted: u64,
    /// `ended_at` of the last successful attempt (unix millis).
    pub last_success: Option<i64>,
}
