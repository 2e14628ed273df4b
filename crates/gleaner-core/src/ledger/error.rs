use thiserror::Error;

use super::TaskStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("no operation started")]
    NoOperation,
    #[error("unknown task: {0}")]
    UnknownTask(String),
    #[error("unknown region: {0}")]
    UnknownRegion(String),
    #[error("task {id}: cannot {action} while {from}")]
    InvalidTransition {
        id: String,
        from: TaskStatus,
        action: &'static str,
    },
}
