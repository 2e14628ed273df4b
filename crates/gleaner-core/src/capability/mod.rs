//! Collection capabilities: the narrow interface a target implements.
//!
//! A capability produces a lazy, finite, non-restartable stream of record-like
//! values and may veto the collected batch through `validate`. The core never
//! inspects how a capability fetches its data. Values come back as a tagged
//! [`RawRecord`]; the engine normalizes each variant into a [`Record`].

mod file;
mod http;
mod record;
mod registry;

pub use file::JsonLinesFile;
pub use http::HttpJson;
pub use record::{RawRecord, Record};
pub use registry::CapabilityRegistry;

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::engine::ErrorKind;

/// Lazy record sequence produced by one `scrape()` call.
pub type RecordStream = Box<dyn Iterator<Item = Result<RawRecord, CapabilityError>> + Send>;

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    /// No capability is registered for the handle and no built-in matches it.
    #[error("no capability for handle '{0}'")]
    Unresolved(String),
    /// The target cannot be loaded or has no extractor.
    #[error("target unavailable: {0}")]
    Unavailable(String),
    /// Transport or upstream failure while producing records.
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("cancelled")]
    Cancelled,
}

impl CapabilityError {
    /// How a failure of this kind is reported on the execution record.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CapabilityError::Unresolved(_) | CapabilityError::Unavailable(_) => {
                ErrorKind::Structural
            }
            CapabilityError::Fetch(_) | CapabilityError::Io(_) => ErrorKind::Capability,
            CapabilityError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Signals a capability should honour while producing records: blocking calls
/// should be bounded by `remaining()` and abandoned once `is_cancelled()`.
#[derive(Debug, Clone)]
pub struct ScrapeContext {
    pub cancel: CancellationToken,
    pub deadline: Instant,
}

impl ScrapeContext {
    pub fn new(cancel: CancellationToken, deadline: Instant) -> Self {
        Self { cancel, deadline }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Time left before the attempt deadline (zero once passed).
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A collection target.
pub trait Capability: Send + Sync {
    /// Start producing records. Errors here are structural: the target could not be loaded.
    fn scrape(&self, ctx: &ScrapeContext) -> Result<RecordStream, CapabilityError>;

    /// Accept or reject the collected batch.
    fn validate(&self, _records: &[Record]) -> bool {
        true
    }

    /// Expected number of records, when known up front (drives percent progress).
    fn expected_records(&self) -> Option<usize> {
        None
    }
}
