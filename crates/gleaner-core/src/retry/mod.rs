//! Retry supervision.
//!
//! Wraps one job with bounded retries and a per-job backoff, classifies the
//! outcome and reports it into the ledger. Failure kinds decide whether
//! another attempt is worth making.

mod classify;
mod policy;
mod run;

pub use classify::{failure_kind, is_retryable};
pub use policy::{BackoffKind, RetryDecision, RetryPolicy};
pub use run::{RetrySupervisor, RunOptions, SupervisedRun, DEADLINE_GRACE};

#[cfg(test)]
mod tests;
