//! Integration tests for the job store: acquisition, outcomes, retries,
//! reclamation and the dead letter queue.

mod helpers;

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;

use queuectl_core::error::ErrorKind;
use queuectl_database::JobRepository;
use queuectl_entity::job::{JobSpec, JobState};
use queuectl_entity::settings::SettingKey;

const STALE: Duration = Duration::from_secs(300);

/// Stored timestamps are truncated to microseconds.
fn micro() -> chrono::Duration {
    chrono::Duration::microseconds(1)
}

#[tokio::test]
async fn test_enqueue_defaults_and_duplicate_id() {
    let store = helpers::TestStore::new().await;

    let job = store
        .jobs
        .enqueue(&JobSpec::new("sleep 2").with_id("job1"))
        .await
        .expect("enqueue");
    assert_eq!(job.id, "job1");
    assert_eq!(job.state, JobState::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(job.max_retries, 3);
    assert!(job.run_at.is_none());
    assert!(!job.is_locked());

    let err = store
        .jobs
        .enqueue(&JobSpec::new("echo again").with_id("job1"))
        .await
        .expect_err("duplicate id");
    assert_eq!(err.kind, ErrorKind::Conflict);
    assert_eq!(store.job("job1").await.command, "sleep 2");

    store.settings.set(SettingKey::MaxRetries, 5).await.expect("set");
    let generated = store.jobs.enqueue(&JobSpec::new("true")).await.expect("enqueue");
    assert_eq!(generated.max_retries, 5);
    assert!(!generated.id.is_empty());

    let explicit = store
        .jobs
        .enqueue(&JobSpec::new("true").with_max_retries(0))
        .await
        .expect("enqueue");
    assert_eq!(explicit.max_retries, 0);
}

#[tokio::test]
async fn test_enqueue_rejects_invalid_spec() {
    let store = helpers::TestStore::new().await;

    let err = store
        .jobs
        .enqueue(&JobSpec::new("  "))
        .await
        .expect_err("blank command");
    assert_eq!(err.kind, ErrorKind::Validation);

    let err = store
        .jobs
        .enqueue(&JobSpec::new("true").with_timeout(0))
        .await
        .expect_err("zero timeout");
    assert_eq!(err.kind, ErrorKind::Validation);

    assert_eq!(store.jobs.stats().await.expect("stats").total(), 0);
}

#[tokio::test]
async fn test_acquire_is_fifo_without_contention() {
    let store = helpers::TestStore::new().await;
    for id in ["a", "b", "c"] {
        store
            .jobs
            .enqueue(&JobSpec::new("true").with_id(id))
            .await
            .expect("enqueue");
    }

    for expected in ["a", "b", "c"] {
        let job = store
            .jobs
            .acquire("worker-1", STALE)
            .await
            .expect("acquire")
            .expect("job available");
        assert_eq!(job.id, expected);
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.locked_by.as_deref(), Some("worker-1"));
        assert!(job.locked_at.is_some());
    }

    assert!(store.jobs.acquire("worker-1", STALE).await.expect("acquire").is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_acquisition_under_contention() {
    const JOBS: usize = 40;
    const WORKERS: usize = 6;

    let store = helpers::TestStore::new().await;
    for i in 0..JOBS {
        store
            .jobs
            .enqueue(&JobSpec::new("true").with_id(format!("job-{i:02}")))
            .await
            .expect("enqueue");
    }

    let mut handles = Vec::new();
    for w in 0..WORKERS {
        let db = store.reopen().await;
        handles.push(tokio::spawn(async move {
            let jobs = JobRepository::new(db.pool().clone());
            let worker_id = format!("worker-{w}");
            let mut acquired = Vec::new();
            loop {
                match jobs.acquire(&worker_id, STALE).await {
                    Ok(Some(job)) => {
                        assert_eq!(job.locked_by.as_deref(), Some(worker_id.as_str()));
                        acquired.push(job.id);
                    }
                    Ok(None) => {
                        let left = jobs.count_by_state(JobState::Pending).await.expect("count");
                        if left == 0 {
                            break;
                        }
                    }
                    Err(e) if e.is_retryable() => tokio::task::yield_now().await,
                    Err(e) => panic!("acquire failed: {e}"),
                }
            }
            db.close().await;
            acquired
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.expect("join") {
            assert!(seen.insert(id.clone()), "job {id} acquired twice");
        }
    }

    assert_eq!(seen.len(), JOBS);
    assert_eq!(
        store.jobs.count_by_state(JobState::Processing).await.expect("count"),
        JOBS as i64
    );
}

#[tokio::test]
async fn test_backoff_schedule_then_dead() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("false").with_id("flaky").with_max_retries(3))
        .await
        .expect("enqueue");

    for (attempt, delay) in [(1, 2), (2, 4), (3, 8)] {
        let job = store
            .jobs
            .acquire("worker-1", STALE)
            .await
            .expect("acquire")
            .expect("job due");
        assert_eq!(job.id, "flaky");

        let before = Utc::now();
        let failed = store
            .jobs
            .report_failure("flaky", "worker-1", "Exit code 1", None)
            .await
            .expect("report failure");
        let after = Utc::now();

        assert_eq!(failed.state, JobState::Pending);
        assert_eq!(failed.attempts, attempt);
        assert_eq!(failed.error.as_deref(), Some("Exit code 1"));
        assert!(failed.locked_by.is_none());
        assert!(failed.locked_at.is_none());

        let run_at = failed.run_at.expect("retry scheduled");
        let delay = chrono::Duration::seconds(delay);
        assert!(run_at >= before + delay - micro() && run_at <= after + delay, "attempt {attempt}");

        assert!(store.jobs.acquire("worker-1", STALE).await.expect("acquire").is_none());
        store.make_due("flaky").await;
    }

    store.jobs.acquire("worker-1", STALE).await.expect("acquire").expect("job due");
    let dead = store
        .jobs
        .report_failure("flaky", "worker-1", "Exit code 1", Some("last output"))
        .await
        .expect("report failure");
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 4);
    assert!(dead.run_at.is_none());
    assert!(dead.locked_by.is_none());
    assert_eq!(dead.output.as_deref(), Some("last output"));
}

#[tokio::test]
async fn test_backoff_base_is_read_at_decision_time() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("false").with_id("j").with_max_retries(5))
        .await
        .expect("enqueue");

    store.jobs.acquire("w", STALE).await.expect("acquire").expect("job");
    store.settings.set(SettingKey::BackoffBase, 3).await.expect("set");

    let before = Utc::now();
    let failed = store.jobs.report_failure("j", "w", "boom", None).await.expect("fail");
    let run_at = failed.run_at.expect("scheduled");
    assert!(run_at >= before + chrono::Duration::seconds(3) - micro());
    assert!(run_at < before + chrono::Duration::seconds(5));
}

#[tokio::test]
async fn test_terminal_jobs_are_immutable() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("true").with_id("done"))
        .await
        .expect("enqueue");
    store
        .jobs
        .enqueue(&JobSpec::new("false").with_id("gone").with_max_retries(0))
        .await
        .expect("enqueue");

    store.jobs.acquire("w", STALE).await.expect("acquire").expect("done");
    let completed = store.jobs.report_success("done", "w", Some("ok\n")).await.expect("success");
    assert_eq!(completed.state, JobState::Completed);
    assert_eq!(completed.output.as_deref(), Some("ok\n"));
    assert!(completed.locked_by.is_none());

    store.jobs.acquire("w", STALE).await.expect("acquire").expect("gone");
    let dead = store.jobs.report_failure("gone", "w", "Exit code 1", None).await.expect("fail");
    assert_eq!(dead.state, JobState::Dead);

    for id in ["done", "gone"] {
        let err = store.jobs.report_success(id, "w", None).await.expect_err("terminal");
        assert_eq!(err.kind, ErrorKind::InvalidState, "{id}");
        let err = store.jobs.report_failure(id, "w", "late", None).await.expect_err("terminal");
        assert_eq!(err.kind, ErrorKind::InvalidState, "{id}");
    }

    assert_eq!(store.job("done").await, completed);
    assert_eq!(store.job("gone").await, dead);

    let err = store.jobs.dlq_retry("done").await.expect_err("not dead");
    assert_eq!(err.kind, ErrorKind::InvalidState);

    let err = store.jobs.report_success("missing", "w", None).await.expect_err("unknown");
    assert_eq!(err.kind, ErrorKind::NotFound);
    let err = store.jobs.report_failure("missing", "w", "x", None).await.expect_err("unknown");
    assert_eq!(err.kind, ErrorKind::NotFound);
    let err = store.jobs.dlq_retry("missing").await.expect_err("unknown");
    assert_eq!(err.kind, ErrorKind::NotFound);
}

#[tokio::test]
async fn test_reporting_requires_processing() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("true").with_id("waiting"))
        .await
        .expect("enqueue");

    let err = store.jobs.report_success("waiting", "w", None).await.expect_err("pending");
    assert_eq!(err.kind, ErrorKind::InvalidState);
    let err = store.jobs.report_failure("waiting", "w", "x", None).await.expect_err("pending");
    assert_eq!(err.kind, ErrorKind::InvalidState);
    assert_eq!(store.job("waiting").await.attempts, 0);
}

#[tokio::test]
async fn test_stale_lock_reclamation_keeps_attempts() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("true").with_id("stuck").with_max_retries(3))
        .await
        .expect("enqueue");

    // One charged failure first, so an unchanged count is meaningful.
    store.jobs.acquire("worker-a", STALE).await.expect("acquire").expect("job");
    store.jobs.report_failure("stuck", "worker-a", "Exit code 1", None).await.expect("fail");
    store.make_due("stuck").await;

    let held = store.jobs.acquire("worker-a", STALE).await.expect("acquire").expect("job");
    assert_eq!(held.attempts, 1);

    assert_eq!(store.jobs.reclaim_stale_locks(STALE).await.expect("reclaim"), 0);
    assert!(store.jobs.acquire("worker-b", STALE).await.expect("acquire").is_none());

    store
        .backdate("stuck", "locked_at", Duration::from_secs(600))
        .await;
    assert_eq!(store.jobs.reclaim_stale_locks(STALE).await.expect("reclaim"), 1);

    let reclaimed = store.job("stuck").await;
    assert_eq!(reclaimed.state, JobState::Pending);
    assert_eq!(reclaimed.attempts, 1);
    assert!(reclaimed.locked_by.is_none());
    assert!(reclaimed.locked_at.is_none());

    let again = store.jobs.acquire("worker-b", STALE).await.expect("acquire").expect("job");
    assert_eq!(again.id, "stuck");
    assert_eq!(again.locked_by.as_deref(), Some("worker-b"));
    assert_eq!(again.attempts, 1);
}

#[tokio::test]
async fn test_acquire_reclaims_abandoned_jobs() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("true").with_id("orphan"))
        .await
        .expect("enqueue");

    store.jobs.acquire("crashed", STALE).await.expect("acquire").expect("job");
    store
        .backdate("orphan", "locked_at", Duration::from_secs(600))
        .await;

    let job = store.jobs.acquire("rescuer", STALE).await.expect("acquire").expect("job");
    assert_eq!(job.id, "orphan");
    assert_eq!(job.locked_by.as_deref(), Some("rescuer"));
    assert_eq!(job.attempts, 0);
}

#[tokio::test]
async fn test_outcome_from_previous_holder_is_rejected() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("sleep 600").with_id("long"))
        .await
        .expect("enqueue");

    store.jobs.acquire("worker-a", STALE).await.expect("acquire").expect("job");
    store
        .backdate("long", "locked_at", Duration::from_secs(600))
        .await;
    let taken = store.jobs.acquire("worker-b", STALE).await.expect("acquire").expect("job");
    assert_eq!(taken.locked_by.as_deref(), Some("worker-b"));

    let err = store
        .jobs
        .report_failure("long", "worker-a", "Exit code 1", None)
        .await
        .expect_err("lock moved to worker-b");
    assert_eq!(err.kind, ErrorKind::InvalidState);
    let err = store
        .jobs
        .report_success("long", "worker-a", Some("late"))
        .await
        .expect_err("lock moved to worker-b");
    assert_eq!(err.kind, ErrorKind::InvalidState);

    let held = store.job("long").await;
    assert_eq!(held.state, JobState::Processing);
    assert_eq!(held.locked_by.as_deref(), Some("worker-b"));
    assert_eq!(held.attempts, 0);
    assert!(store.jobs.acquire("worker-c", STALE).await.expect("acquire").is_none());

    let completed = store
        .jobs
        .report_success("long", "worker-b", Some("done"))
        .await
        .expect("holder reports");
    assert_eq!(completed.state, JobState::Completed);
    assert_eq!(completed.output.as_deref(), Some("done"));
}

#[tokio::test]
async fn test_dlq_round_trip_clears_error_and_output() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("false").with_id("x").with_max_retries(0))
        .await
        .expect("enqueue");

    store.jobs.acquire("w", STALE).await.expect("acquire").expect("job");
    let dead = store
        .jobs
        .report_failure("x", "w", "Exit code 1: boom", Some("partial"))
        .await
        .expect("fail");
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 1);

    let revived = store.jobs.dlq_retry("x").await.expect("dlq retry");
    assert_eq!(revived.state, JobState::Pending);
    assert_eq!(revived.attempts, 0);
    assert_eq!(revived.error, None);
    assert_eq!(revived.output, None);
    assert_eq!(revived.run_at, None);
    assert_eq!(revived.locked_by, None);
    assert_eq!(revived.locked_at, None);

    let err = store.jobs.dlq_retry("x").await.expect_err("no longer dead");
    assert_eq!(err.kind, ErrorKind::InvalidState);

    store.jobs.acquire("w", STALE).await.expect("acquire").expect("job");
    let completed = store.jobs.report_success("x", "w", None).await.expect("success");
    assert_eq!(completed.state, JobState::Completed);
}

#[tokio::test]
async fn test_scheduled_job_waits_for_run_at() {
    let store = helpers::TestStore::new().await;
    let run_at = Utc::now() + chrono::Duration::milliseconds(1500);
    store
        .jobs
        .enqueue(&JobSpec::new("true").with_id("later").with_run_at(run_at))
        .await
        .expect("enqueue");
    store
        .jobs
        .enqueue(&JobSpec::new("true").with_id("now"))
        .await
        .expect("enqueue");

    let first = store.jobs.acquire("w", STALE).await.expect("acquire").expect("job");
    assert_eq!(first.id, "now");
    assert!(store.jobs.acquire("w", STALE).await.expect("acquire").is_none());

    tokio::time::sleep(Duration::from_millis(1700)).await;
    assert!(Utc::now() >= run_at);

    let later = store.jobs.acquire("w", STALE).await.expect("acquire").expect("job");
    assert_eq!(later.id, "later");
}

#[tokio::test]
async fn test_list_stats_and_cleanup() {
    let store = helpers::TestStore::new().await;
    for id in ["old-done", "new-done", "old-dead", "waiting"] {
        store
            .jobs
            .enqueue(&JobSpec::new("true").with_id(id).with_max_retries(0))
            .await
            .expect("enqueue");
    }

    for _ in 0..2 {
        let job = store.jobs.acquire("w", STALE).await.expect("acquire").expect("job");
        store.jobs.report_success(&job.id, "w", None).await.expect("success");
    }
    let job = store.jobs.acquire("w", STALE).await.expect("acquire").expect("job");
    assert_eq!(job.id, "old-dead");
    store.jobs.report_failure(&job.id, "w", "boom", None).await.expect("fail");

    let stats = store.jobs.stats().await.expect("stats");
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.dead, 1);
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.total(), 4);

    let all = store.jobs.list(None, 10).await.expect("list");
    let ids: Vec<&str> = all.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, ["waiting", "old-dead", "new-done", "old-done"]);

    let dead = store.jobs.list(Some(JobState::Dead), 10).await.expect("list");
    assert_eq!(dead.len(), 1);
    assert_eq!(store.jobs.list(None, 2).await.expect("list").len(), 2);

    let week = Duration::from_secs(8 * 86_400);
    store.backdate("old-done", "updated_at", week).await;
    store.backdate("old-dead", "updated_at", week).await;
    let cutoff = Utc::now() - chrono::Duration::days(7);

    let deleted = store
        .jobs
        .cleanup(cutoff, &[JobState::Completed])
        .await
        .expect("cleanup");
    assert_eq!(deleted, 1);
    assert!(store.jobs.find_by_id("old-done").await.expect("find").is_none());
    assert!(store.jobs.find_by_id("old-dead").await.expect("find").is_some());

    let deleted = store
        .jobs
        .cleanup(cutoff, &[JobState::Completed, JobState::Dead])
        .await
        .expect("cleanup");
    assert_eq!(deleted, 1);

    let err = store
        .jobs
        .cleanup(cutoff, &[JobState::Pending])
        .await
        .expect_err("pending is not terminal");
    assert_eq!(err.kind, ErrorKind::Validation);
    assert_eq!(store.jobs.stats().await.expect("stats").total(), 2);
}
