//! Wall-clock helpers shared by the ledger, the session and execution records.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix milliseconds.
pub(crate) fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Current time as Unix seconds (schedule and history timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    unix_millis() / 1000
}
