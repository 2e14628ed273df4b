//! Worker pool scheduler.
//!
//! Sizes a bounded pool from the batch's size mix and the live machine load,
//! dispatches jobs through the retry supervisor, and collects one record per
//! job under per-job and aggregate deadlines.

mod pool;
mod probe;
mod sizing;
mod slots;

pub use pool::{DispatchOptions, DispatchReport, WorkerPool};
pub use probe::{StaticProbe, SysinfoProbe, SystemProbe};
pub use sizing::{
    optimal_workers, WorkerBounds, HIGH_LOAD_PENALTY, HIGH_LOAD_THRESHOLD, LARGE_JOB_CAP,
    LOW_LOAD_BONUS, LOW_LOAD_THRESHOLD,
};
pub use slots::{SlotGuard, WorkerSlots};
