//! `gleaner run <category>` – run one category through the worker pool.

use anyhow::{bail, Result};
use gleaner_core::config::GleanerConfig;
use gleaner_core::engine::ExecutionStatus;
use gleaner_core::scheduler::DispatchOptions;

use crate::cli::runtime::Runtime;

pub async fn run_category(cfg: &GleanerConfig, category: &str, sample: Option<usize>) -> Result<()> {
    let rt = Runtime::build(cfg).await?;
    let jobs = rt.registry.by_category(category);
    if jobs.is_empty() {
        bail!("no enabled jobs in category '{}'", category);
    }
    rt.ledger.start_operation(&format!("run-{category}"));
    let opts = DispatchOptions {
        sample_cap: sample,
        region: Some(category.to_string()),
        ..DispatchOptions::default()
    };
    let cancel = opts.cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupted; stopping jobs");
            cancel.cancel();
        }
    });
    let report = rt.pool.dispatch(jobs, opts).await;
    ctrl_c.abort();

    println!(
        "{:<24} {:<10} {:>9} {:>9} {:>8} {}",
        "JOB", "STATUS", "COLLECTED", "INSERTED", "RETRIES", "ERROR"
    );
    for r in &report.records {
        println!(
            "{:<24} {:<10} {:>9} {:>9} {:>8} {}",
            r.job_id,
            r.status.as_str(),
            r.records_collected,
            r.records_inserted,
            r.retry_count,
            r.error_message().unwrap_or_default()
        );
    }
    let failed = report
        .records
        .iter()
        .filter(|r| r.status == ExecutionStatus::Failed)
        .count();
    tracing::info!(
        category,
        jobs = report.records.len(),
        failed,
        workers = report.workers,
        "category run finished"
    );
    if report.timed_out {
        println!("Batch deadline reached; unfinished jobs were reported as timeouts.");
    }
    Ok(())
}
