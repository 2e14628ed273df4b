//! CLI command handlers, one file per command.

mod history;
mod jobs;
mod load;
mod run;
mod status;

pub use history::run_history;
pub use jobs::run_jobs;
pub use load::run_load;
pub use run::run_category;
pub use status::run_status;
