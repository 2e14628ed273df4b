//! Persistence sink for ledger and session documents.
//!
//! Documents are small JSON values keyed by a short string (`ledger/<operation>`,
//! `session`). "Not found" is a normal answer, not an error. Callers in the core
//! treat every `StoreError` as non-fatal: they log it and keep their in-memory
//! state authoritative.

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use serde_json::Value;

/// Errors returned by a [`StateStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("state store I/O for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    /// The stored bytes are not a JSON document.
    #[error("corrupt state document '{key}': {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Read/write structured documents keyed by name.
pub trait StateStore: Send + Sync {
    /// Load a document. `Ok(None)` when the key was never written or has been removed.
    fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Replace the document stored under `key`.
    fn save(&self, key: &str, doc: &Value) -> Result<(), StoreError>;

    /// Delete a document. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}
