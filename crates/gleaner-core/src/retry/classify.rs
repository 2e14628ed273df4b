//! Which failure kinds are worth another attempt.

use crate::engine::{ErrorKind, ExecutionRecord, ExecutionStatus};

/// Whether a failure of `kind` may be retried.
///
/// Cancellation is never retried. Structural failures are retried unless
/// `fast_fail_structural` is set; everything else is transient as far as the
/// supervisor can tell.
pub fn is_retryable(kind: ErrorKind, fast_fail_structural: bool) -> bool {
    match kind {
        ErrorKind::Cancelled => false,
        ErrorKind::Structural => !fast_fail_structural,
        ErrorKind::Capability | ErrorKind::Validation | ErrorKind::Timeout => true,
    }
}

/// Failure kind of a finished attempt, or `None` when nothing failed.
pub fn failure_kind(record: &ExecutionRecord) -> Option<ErrorKind> {
    match record.status {
        ExecutionStatus::Failed => Some(record.error_kind().unwrap_or(ErrorKind::Capability)),
        ExecutionStatus::Cancelled => Some(ErrorKind::Cancelled),
        ExecutionStatus::Success | ExecutionStatus::Skipped => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::JobError;

    #[test]
    fn cancelled_and_structural() {
        assert!(!is_retryable(ErrorKind::Cancelled, false));
        assert!(is_retryable(ErrorKind::Structural, false));
        assert!(!is_retryable(ErrorKind::Structural, true));
        assert!(is_retryable(ErrorKind::Timeout, true));
    }

    #[test]
    fn failure_kind_of_records() {
        let ok = ExecutionRecord::success("a", 0, 0);
        assert_eq!(failure_kind(&ok), None);
        let bad = ExecutionRecord::failed("a", 0, 0, JobError::new(ErrorKind::Validation, "x"));
        assert_eq!(failure_kind(&bad), Some(ErrorKind::Validation));
        let stopped = ExecutionRecord::cancelled("a", 0, 0, "stop");
        assert_eq!(failure_kind(&stopped), Some(ErrorKind::Cancelled));
    }
}
