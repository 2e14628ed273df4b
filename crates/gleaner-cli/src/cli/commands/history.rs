//! `gleaner history` – recent execution attempts.

use anyhow::Result;
use gleaner_core::history::RunHistory;

pub async fn run_history(limit: u32) -> Result<()> {
    let history = RunHistory::open_default().await?;
    let entries = history.recent(limit).await?;
    if entries.is_empty() {
        println!("No executions recorded.");
        return Ok(());
    }
    println!(
        "{:<6} {:<24} {:<10} {:>9} {:>9} {:>7} {:>9} {}",
        "ID", "JOB", "STATUS", "COLLECTED", "INSERTED", "RETRY", "SECONDS", "ERROR"
    );
    for entry in entries {
        let r = &entry.record;
        let secs = (r.ended_at - r.started_at).max(0) as f64 / 1000.0;
        println!(
            "{:<6} {:<24} {:<10} {:>9} {:>9} {:>7} {:>9.1} {}",
            entry.id,
            r.job_id,
            r.status.as_str(),
            r.records_collected,
            r.records_inserted,
            r.retry_count,
            secs,
            r.error_message().unwrap_or_default()
        );
    }
    Ok(())
}
