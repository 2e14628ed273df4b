/// Errors returned by the phase controller's operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PhaseError {
    #[error("no loading session")]
    NoSession,
    #[error("a loading session is already active")]
    AlreadyActive,
    #[error("phase {phase} is waiting on: {}", missing.join(", "))]
    DependencyNotMet { phase: String, missing: Vec<String> },
    #[error("manual controls are disabled for this session")]
    ManualControlsDisabled,
    #[error("unknown phase: {0}")]
    UnknownPhase(String),
    #[error("phase {phase}: unknown job '{job}'")]
    UnknownJob { phase: String, job: String },
    #[error("a phase is already running")]
    PhaseRunning,
}
