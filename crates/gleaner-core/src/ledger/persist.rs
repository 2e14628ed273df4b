//! Save and restore ledger documents through a `StateStore`.
//!
//! Failures never reach the caller: I/O problems are logged and the
//! in-memory state stays authoritative; a corrupt document is removed.

use crate::store::{StateStore, StoreError};

use super::state::LedgerState;

pub(super) fn key_for(name: &str) -> String {
    format!("ledger/{name}")
}

pub(super) fn save(store: &dyn StateStore, key: &str, state: &LedgerState) {
    let doc = match serde_json::to_value(state) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(key, error = %e, "serialize ledger failed");
            return;
        }
    };
    if let Err(e) = store.save(key, &doc) {
        tracing::warn!(key, error = %e, "persist ledger failed; continuing in memory");
    }
}

pub(super) fn load(store: &dyn StateStore, key: &str) -> Option<LedgerState> {
    let doc = match store.load(key) {
        Ok(Some(doc)) => doc,
        Ok(None) => return None,
        Err(StoreError::Corrupt { .. }) => {
            discard(store, key);
            return None;
        }
        Err(e) => {
            tracing::warn!(key, error = %e, "load ledger failed");
            return None;
        }
    };
    match serde_json::from_value::<LedgerState>(doc) {
        Ok(state) if state.operation.is_some() => Some(state),
        Ok(_) => {
            discard(store, key);
            None
        }
        Err(e) => {
            tracing::warn!(key, error = %e, "ledger document has unexpected shape");
            discard(store, key);
            None
        }
    }
}

fn discard(store: &dyn StateStore, key: &str) {
    tracing::warn!(key, "discarding corrupt ledger document");
    if let Err(e) = store.remove(key) {
        tracing::warn!(key, error = %e, "remove corrupt ledger document failed");
    }
}
