//! Run history (SQLite via sqlx).
//!
//! Every execution attempt is appended to the `executions` table, so the
//! operator can see what ran, how often it was retried and why it failed.
//! Schedules use the last successful run per job to decide what is due.

mod db;
mod read;
mod types;
mod write;

pub use db::RunHistory;
pub use types::{HistoryEntry, JobCounters};

#[cfg(test)]
mod tests;
