use super::*;
use crate::engine::{ErrorKind, ExecutionRecord, ExecutionStatus, JobError, ResourceSnapshot};

fn success(job: &str, started: i64, collected: u64) -> ExecutionRecord {
    let mut r = ExecutionRecord::success(job, started, 0);
    r.ended_at = started + 1_000;
    r.records_collected = collected;
    r
}

#[tokio::test]
async fn record_and_read_back() {
    let history = RunHistory::open_memory().await.unwrap();
    let mut rec = ExecutionRecord::failed(
        "catalog",
        1_000,
        2,
        JobError::new(ErrorKind::Timeout, "deadline reached"),
    );
    rec.resources = Some(ResourceSnapshot {
        cpu_percent: 12.5,
        memory_percent: 40.0,
    });
    let id = history.record(&rec).await.unwrap();
    assert!(id > 0);

    let recent = history.recent(10).await.unwrap();
    assert_eq!(recent.len(), 1);
    let back = &recent[0].record;
    assert_eq!(back.job_id, "catalog");
    assert_eq!(back.status, ExecutionStatus::Failed);
    assert_eq!(back.retry_count, 2);
    assert_eq!(back.error_kind(), Some(ErrorKind::Timeout));
    assert_eq!(back.resources.unwrap().cpu_percent, 12.5);
}

#[tokio::test]
async fn recent_is_newest_first_and_limited() {
    let history = RunHistory::open_memory().await.unwrap();
    for i in 0..5 {
        history.record(&success(&format!("job-{i}"), i * 10, 1)).await.unwrap();
    }
    let recent = history.recent(3).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].record.job_id, "job-4");
    assert_eq!(recent[2].record.job_id, "job-2");
}

#[tokio::test]
async fn counters_and_inserted_updates() {
    let history = RunHistory::open_memory().await.unwrap();
    let first = history
        .record(&ExecutionRecord::failed(
            "a",
            0,
            0,
            JobError::new(ErrorKind::Capability, "reset"),
        ))
        .await
        .unwrap();
    let second = history.record(&success("a", 5_000, 7)).await.unwrap();
    history.record(&success("b", 0, 3)).await.unwrap();
    history.set_inserted(second, 6).await.unwrap();
    assert!(first < second);

    let counters = history.job_counters("a").await.unwrap();
    assert_eq!(counters.attempts, 2);
    assert_eq!(counters.successes, 1);
    assert_eq!(counters.failures, 1);
    assert_eq!(counters.records_collected, 7);
    assert_eq!(counters.records_inserted, 6);
    assert_eq!(counters.last_success, Some(6_000));

    let none = history.job_counters("missing").await.unwrap();
    assert_eq!(none, JobCounters::default());
}

#[tokio::test]
async fn last_success_per_job() {
    let history = RunHistory::open_memory().await.unwrap();
    history.record(&success("a", 0, 1)).await.unwrap();
    history.record(&success("a", 10_000, 1)).await.unwrap();
    history
        .record(&ExecutionRecord::cancelled("b", 0, 0, "stop"))
        .await
        .unwrap();
    let map = history.last_success_by_job().await.unwrap();
    assert_eq!(map.get("a"), Some(&11_000));
    assert!(!map.contains_key("b"));
}

#[tokio::test]
async fn open_at_creates_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested dir").join("history.db");
    let history = RunHistory::open_at(&path).await.unwrap();
    history.record(&success("a", 0, 1)).await.unwrap();
    assert!(path.exists());
}
