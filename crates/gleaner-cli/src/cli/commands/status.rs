//! `gleaner status [operation]` – detailed ledger status of an operation.

use anyhow::Result;
use gleaner_core::ledger::ProgressLedger;
use gleaner_core::phase::LOAD_OPERATION;
use gleaner_core::store::JsonFileStore;
use std::sync::Arc;

pub fn run_status(operation: Option<&str>) -> Result<()> {
    let name = operation.unwrap_or(LOAD_OPERATION);
    let ledger = ProgressLedger::new(Arc::new(JsonFileStore::open_default()?));
    if !ledger.restore(name) {
        println!("No operation named '{}'.", name);
        return Ok(());
    }
    let status = ledger.get_detailed_status();
    let summary = &status.summary;
    println!(
        "{}: {} at {:.1}% ({} of {} tasks done, {} failed)",
        name,
        summary.status.as_str(),
        summary.percent,
        summary.completed + summary.skipped,
        summary.total_tasks,
        summary.failed
    );
    if let Some(eta) = summary.eta_secs {
        println!("ETA: {:.0}s", eta);
    }
    println!();
    println!("{:<24} {:<10} {:>8} {:>6}", "REGION", "STATUS", "PROGRESS", "TASKS");
    for region in &status.regions {
        println!(
            "{:<24} {:<10} {:>7.1}% {:>6}",
            region.code,
            region.status.as_str(),
            region.progress,
            region.tasks.len()
        );
    }
    Ok(())
}
