use super::*;
use crate::store::MemoryStore;

fn ledger() -> (Arc<MemoryStore>, ProgressLedger) {
    let store = Arc::new(MemoryStore::new());
    let ledger = ProgressLedger::new(store.clone());
    ledger.start_operation("nightly");
    ledger.add_region("r1", "Region one").unwrap();
    (store, ledger)
}

fn add_job(ledger: &ProgressLedger, id: &str) {
    ledger.add_task(TaskSpec::job(id, id, "r1")).unwrap();
}

#[test]
fn mutations_before_start_are_rejected() {
    let ledger = ProgressLedger::new(Arc::new(MemoryStore::new()));
    assert_eq!(ledger.add_region("r", "R"), Err(LedgerError::NoOperation));
    assert_eq!(ledger.pause_operation(), Err(LedgerError::NoOperation));
}

#[test]
fn unknown_task_and_region() {
    let (_, ledger) = ledger();
    assert_eq!(
        ledger.start_task("nope"),
        Err(LedgerError::UnknownTask("nope".into()))
    );
    assert_eq!(
        ledger.add_task(TaskSpec::job("a", "a", "missing")),
        Err(LedgerError::UnknownRegion("missing".into()))
    );
    assert_eq!(
        ledger.skip_region("missing"),
        Err(LedgerError::UnknownRegion("missing".into()))
    );
}

#[test]
fn progress_is_monotonic_and_clamped() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    ledger.start_task("a").unwrap();

    let mut last = 0.0;
    for value in [10.0, 5.0, 40.0, -3.0, 39.0, 250.0, 80.0, f64::NAN] {
        ledger.update_task_progress("a", value, None).unwrap();
        let p = ledger.task("a").unwrap().progress;
        assert!(p >= last, "progress went down: {last} -> {p}");
        assert!((0.0..=100.0).contains(&p));
        last = p;
    }
    assert_eq!(last, 100.0);
}

#[test]
fn progress_requires_running_task() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    assert!(matches!(
        ledger.update_task_progress("a", 10.0, None),
        Err(LedgerError::InvalidTransition { .. })
    ));
}

#[test]
fn complete_success_sets_full_progress() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    ledger.start_task("a").unwrap();
    ledger.update_task_progress("a", 30.0, Some("page 3")).unwrap();
    ledger.complete_task("a", true, None).unwrap();
    let task = ledger.task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100.0);
    assert!(task.ended_at.is_some());
}

#[test]
fn complete_failure_keeps_progress_and_error() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    ledger.start_task("a").unwrap();
    ledger.update_task_progress("a", 30.0, None).unwrap();
    ledger
        .complete_task("a", false, Some("capability: boom".into()))
        .unwrap();
    let task = ledger.task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.progress, 30.0);
    assert_eq!(task.error.as_deref(), Some("capability: boom"));
}

#[test]
fn terminal_states_are_final() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    ledger.start_task("a").unwrap();
    ledger.complete_task("a", true, None).unwrap();
    assert!(ledger.start_task("a").is_err());
    assert!(ledger.skip_task("a").is_err());
    assert!(ledger.complete_task("a", false, None).is_err());
    assert_eq!(ledger.task("a").unwrap().status, TaskStatus::Completed);
}

#[test]
fn completing_pending_task_is_invalid() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    assert!(matches!(
        ledger.complete_task("a", true, None),
        Err(LedgerError::InvalidTransition {
            from: TaskStatus::Pending,
            ..
        })
    ));
}

#[test]
fn re_registering_resets_non_running_task() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    ledger.start_task("a").unwrap();
    ledger.complete_task("a", false, Some("x".into())).unwrap();
    add_job(&ledger, "a");
    let task = ledger.task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.progress, 0.0);
    assert!(task.error.is_none());
    assert_eq!(ledger.region("r1").unwrap().tasks, vec!["a".to_string()]);
}

#[test]
fn re_registering_running_task_is_noop() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    ledger.start_task("a").unwrap();
    ledger.update_task_progress("a", 50.0, None).unwrap();
    add_job(&ledger, "a");
    let task = ledger.task("a").unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.progress, 50.0);
}

#[test]
fn region_completed_iff_all_members_done() {
    use TaskStatus::*;
    let all = [Pending, Running, Completed, Paused, Skipped, Failed, Cancelled];
    for a in all {
        for b in all {
            for c in all {
                let members = [a, b, c];
                let done = members.iter().all(|s| matches!(s, Completed | Skipped));
                assert_eq!(
                    derive_region_status(&members) == Completed,
                    done,
                    "{members:?}"
                );
            }
        }
    }
    assert_eq!(derive_region_status(&[]), Pending);
}

#[test]
fn region_status_follows_members() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    add_job(&ledger, "b");
    assert_eq!(ledger.region("r1").unwrap().status, TaskStatus::Pending);

    ledger.start_task("a").unwrap();
    assert_eq!(ledger.region("r1").unwrap().status, TaskStatus::Running);

    ledger.complete_task("a", true, None).unwrap();
    ledger.skip_task("b").unwrap();
    let region = ledger.region("r1").unwrap();
    assert_eq!(region.status, TaskStatus::Completed);
    assert_eq!(region.progress, 50.0);
}

#[test]
fn skip_region_skips_open_tasks_and_cancels_tokens() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    add_job(&ledger, "b");
    ledger.start_task("a").unwrap();
    ledger.complete_task("a", true, None).unwrap();
    let token = ledger.task_token("b");
    ledger.skip_region("r1").unwrap();
    assert!(token.is_cancelled());
    assert!(ledger.should_skip("b"));
    assert!(!ledger.should_skip("a"));
    assert_eq!(ledger.region("r1").unwrap().status, TaskStatus::Completed);
}

#[test]
fn pause_and_resume_move_running_tasks() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    add_job(&ledger, "b");
    ledger.start_task("a").unwrap();
    ledger.pause_operation().unwrap();
    assert!(ledger.should_pause());
    assert_eq!(ledger.task("a").unwrap().status, TaskStatus::Paused);
    assert_eq!(ledger.task("b").unwrap().status, TaskStatus::Pending);
    assert!(ledger.start_task("a").is_err());

    ledger.resume_operation().unwrap();
    assert!(!ledger.should_pause());
    assert_eq!(ledger.task("a").unwrap().status, TaskStatus::Running);
}

#[test]
fn paused_task_accepts_progress_and_completion() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    add_job(&ledger, "b");
    ledger.start_task("a").unwrap();
    ledger.start_task("b").unwrap();
    ledger.pause_operation().unwrap();

    ledger.update_task_progress("a", 60.0, Some("6/10 records")).unwrap();
    assert_eq!(ledger.task("a").unwrap().progress, 60.0);
    ledger.complete_task("a", true, None).unwrap();
    ledger.complete_task("b", false, Some("upstream 503".into())).unwrap();

    ledger.resume_operation().unwrap();
    let a = ledger.task("a").unwrap();
    assert_eq!(a.status, TaskStatus::Completed);
    assert_eq!(a.progress, 100.0);
    assert_eq!(ledger.task("b").unwrap().status, TaskStatus::Failed);
}

#[test]
fn cancel_marks_open_tasks_and_root_token() {
    let (_, ledger) = ledger();
    add_job(&ledger, "a");
    add_job(&ledger, "b");
    ledger.start_task("a").unwrap();
    ledger.complete_task("a", true, None).unwrap();
    let root = ledger.cancellation_token();
    let task = ledger.task_token("b");
    ledger.cancel_operation().unwrap();
    assert!(ledger.should_cancel());
    assert!(root.is_cancelled());
    assert!(task.is_cancelled());
    assert_eq!(ledger.task("a").unwrap().status, TaskStatus::Completed);
    assert_eq!(ledger.task("b").unwrap().status, TaskStatus::Cancelled);
    assert_eq!(ledger.get_progress_summary().status, TaskStatus::Cancelled);
}

#[test]
fn summary_mean_and_eta() {
    let (_, ledger) = ledger();
    for id in ["a", "b", "c", "d"] {
        add_job(&ledger, id);
    }
    ledger.start_task("a").unwrap();
    ledger.complete_task("a", true, None).unwrap();
    ledger.start_task("b").unwrap();
    ledger.update_task_progress("b", 60.0, None).unwrap();

    let summary = ledger.get_progress_summary();
    assert_eq!(summary.total_tasks, 4);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.running, 1);
    assert_eq!(summary.pending, 2);
    assert!((summary.percent - 40.0).abs() < 1e-9);
    let eta = summary.eta_secs.unwrap();
    assert!((eta - summary.elapsed_secs * 1.5).abs() < 1e-6);

    let detail = ledger.get_detailed_status();
    assert_eq!(detail.regions.len(), 1);
    assert_eq!(detail.regions[0].tasks.len(), 4);
}

#[test]
fn steps_drive_progress_when_total_known() {
    let (_, ledger) = ledger();
    ledger
        .add_task(TaskSpec::job("a", "a", "r1").with_total_steps(4))
        .unwrap();
    ledger.start_task("a").unwrap();
    ledger.update_task_step("a", "fetch index").unwrap();
    ledger.update_task_step("a", "fetch page 1").unwrap();
    let task = ledger.task("a").unwrap();
    assert_eq!(task.steps_completed, 2);
    assert_eq!(task.progress, 50.0);
    assert_eq!(task.current_step.as_deref(), Some("fetch page 1"));
}

#[test]
fn persistence_is_throttled_by_step() {
    let (store, ledger) = ledger();
    add_job(&ledger, "a");
    ledger.start_task("a").unwrap();
    let before = store.write_count();

    // 1..=4 stay below the first 5% boundary.
    for p in 1..=4 {
        ledger.update_task_progress("a", p as f64, None).unwrap();
    }
    assert_eq!(store.write_count(), before);

    ledger.update_task_progress("a", 5.0, None).unwrap();
    assert_eq!(store.write_count(), before + 1);
    ledger.update_task_progress("a", 7.5, None).unwrap();
    assert_eq!(store.write_count(), before + 1);
    ledger.update_task_progress("a", 23.0, None).unwrap();
    assert_eq!(store.write_count(), before + 2);

    ledger.complete_task("a", true, None).unwrap();
    assert_eq!(store.write_count(), before + 3);
}

#[test]
fn failing_store_keeps_memory_state() {
    let (store, ledger) = ledger();
    store.set_fail_writes(true);
    add_job(&ledger, "a");
    ledger.start_task("a").unwrap();
    ledger.complete_task("a", true, None).unwrap();
    assert_eq!(ledger.task("a").unwrap().status, TaskStatus::Completed);
}

#[test]
fn restore_round_trip_settles_running_tasks() {
    let (store, ledger) = ledger();
    add_job(&ledger, "a");
    add_job(&ledger, "b");
    ledger.start_task("a").unwrap();
    ledger.complete_task("a", true, None).unwrap();
    ledger.start_task("b").unwrap();

    let other = ProgressLedger::new(store.clone());
    assert!(other.restore("nightly"));
    assert_eq!(other.task("a").unwrap().status, TaskStatus::Completed);
    assert_eq!(other.task("b").unwrap().status, TaskStatus::Pending);
    assert_eq!(other.operation().unwrap().name, "nightly");
}

#[test]
fn corrupt_document_is_discarded() {
    let store = Arc::new(MemoryStore::new());
    store.insert_raw("ledger/broken", serde_json::json!({"operation": 17}));
    let ledger = ProgressLedger::new(store.clone());
    assert!(!ledger.restore("broken"));
    assert!(!store.contains("ledger/broken"));
    assert!(!ledger.restore("never-written"));
}
