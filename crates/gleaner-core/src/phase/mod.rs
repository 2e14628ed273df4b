//! Phased loading: run the job registry in ordered, dependency-gated phases.

mod controller;
mod error;
mod plan;
mod session;

pub use controller::{
    JobPreview, LoadingStatus, PhaseController, PhaseOutcome, PhasePreview, SessionStatus,
    LOAD_OPERATION, SESSION_KEY,
};
pub use error::PhaseError;
pub use plan::{Phase, PhaseCheck, PhaseJobs, PhasePlan, PlanError};
pub use session::{LoadingSession, Strategy};
