//! `gleaner jobs` – list registered jobs.

use anyhow::{Context, Result};
use gleaner_core::config::GleanerConfig;
use gleaner_core::history::RunHistory;
use gleaner_core::registry::{Job, JobRegistry};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

pub async fn run_jobs(cfg: &GleanerConfig, category: Option<&str>, due: bool) -> Result<()> {
    let path = cfg.jobs_file_path()?;
    let registry = JobRegistry::load_from_path(&path, cfg)
        .with_context(|| format!("load jobs from {}", path.display()))?;

    let mut jobs: Vec<&Job> = if due {
        let history = RunHistory::open_default().await?;
        // History stores millis; schedules compare seconds.
        let last: HashMap<String, i64> = history
            .last_success_by_job()
            .await?
            .into_iter()
            .map(|(id, ms)| (id, ms / 1000))
            .collect();
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs() as i64;
        registry.due(now, &last)
    } else {
        registry.jobs().iter().collect()
    };
    if let Some(category) = category {
        jobs.retain(|j| j.category == category);
    }

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    println!(
        "{:<24} {:<14} {:<7} {:<9} {:<12} {}",
        "ID", "CATEGORY", "SIZE", "PRIORITY", "SCHEDULE", "CAPABILITY"
    );
    for j in jobs {
        let id = if j.enabled {
            j.id.clone()
        } else {
            format!("{} (off)", j.id)
        };
        println!(
            "{:<24} {:<14} {:<7} {:<9} {:<12} {}",
            id,
            j.category,
            j.size.as_str(),
            j.priority.as_str(),
            j.schedule.to_string(),
            j.capability
        );
    }
    Ok(())
}
