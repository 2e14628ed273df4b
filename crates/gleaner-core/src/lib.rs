
pub mod config;
pub mod logging;

pub mod capability;
pub mod engine;
pub mod history;
pub mod ledger;
pub mod phase;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod store;

pub(crate) mod clock;
pub(crate) mod signal;
