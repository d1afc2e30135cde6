//! Integration tests for the worker loop running in-process against a real
//! store.

#![cfg(unix)]

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use queuectl_entity::job::{JobSpec, JobState};
use queuectl_worker::runner::{RunSummary, WorkerState};
use queuectl_worker::{JobQueue, WorkerRunner};

fn runner(store: &helpers::TestStore, worker_id: &str) -> WorkerRunner {
    let (jobs, workers) = helpers::repositories(&store.db);
    let config = helpers::fast_worker_config();
    let queue = Arc::new(JobQueue::new(jobs, workers, worker_id, config.stale_after()));
    WorkerRunner::new(queue, config)
}

#[tokio::test]
async fn test_runner_reports_success_and_failure() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("echo hello").with_id("ok"))
        .await
        .expect("enqueue");
    store
        .jobs
        .enqueue(&JobSpec::new("echo oops 1>&2; exit 2").with_id("bad").with_max_retries(0))
        .await
        .expect("enqueue");

    let worker = runner(&store, "worker-test");
    let (tx, rx) = watch::channel(false);

    let (summary, jobs) = tokio::join!(worker.run(rx), async {
        let jobs = store.wait_terminal(&["ok", "bad"], Duration::from_secs(10)).await;
        tx.send_replace(true);
        jobs
    });

    assert_eq!(
        summary,
        RunSummary {
            processed: 2,
            succeeded: 1,
            failed: 1
        }
    );

    let ok = &jobs[0];
    assert_eq!(ok.state, JobState::Completed);
    assert_eq!(ok.output.as_deref(), Some("hello\n"));
    assert_eq!(ok.attempts, 0);

    let bad = &jobs[1];
    assert_eq!(bad.state, JobState::Dead);
    assert_eq!(bad.error.as_deref(), Some("Exit code 2: oops"));
    assert_eq!(bad.output.as_deref(), Some("oops\n"));
    assert_eq!(bad.attempts, 1);

    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(store.workers.list().await.expect("list").is_empty());
}

#[tokio::test]
async fn test_failed_attempt_is_retried_later() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("exit 1").with_id("retry-me").with_max_retries(2))
        .await
        .expect("enqueue");

    let worker = runner(&store, "worker-test");
    let (tx, rx) = watch::channel(false);

    let (_, job) = tokio::join!(worker.run(rx), async {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        let job = loop {
            let job = store.job("retry-me").await;
            if job.attempts == 1 && job.state == JobState::Pending {
                break job;
            }
            assert!(tokio::time::Instant::now() < deadline, "no failure recorded");
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        tx.send_replace(true);
        job
    });

    assert_eq!(job.error.as_deref(), Some("Exit code 1"));
    assert!(job.run_at.is_some());
    assert!(job.locked_by.is_none());
}

#[tokio::test]
async fn test_timeout_kills_command_and_fails_job() {
    let store = helpers::TestStore::new().await;
    let marker = store.dir.path().join("finished");
    let pidfile = store.dir.path().join("sleeper.pid");
    store
        .jobs
        .enqueue(
            &JobSpec::new(format!(
                "sleep 3 & echo $! > {}; wait; touch {}",
                pidfile.display(),
                marker.display()
            ))
            .with_id("slow")
            .with_timeout(1)
            .with_max_retries(0),
        )
        .await
        .expect("enqueue");

    let worker = runner(&store, "worker-test");
    let (tx, rx) = watch::channel(false);

    let (_, jobs) = tokio::join!(worker.run(rx), async {
        let jobs = store.wait_terminal(&["slow"], Duration::from_secs(10)).await;
        tx.send_replace(true);
        jobs
    });

    let slow = &jobs[0];
    assert_eq!(slow.state, JobState::Dead);
    assert_eq!(slow.error.as_deref(), Some("Job timed out after 1 seconds"));

    let pid: u32 = std::fs::read_to_string(&pidfile)
        .expect("pid written")
        .trim()
        .parse()
        .expect("pid");
    assert!(!helpers::process_running(pid), "sleep {pid} outlived the timeout");

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(!marker.exists(), "command kept running after its timeout");
}

#[tokio::test]
async fn test_shutdown_finishes_current_job_first() {
    let store = helpers::TestStore::new().await;
    store
        .jobs
        .enqueue(&JobSpec::new("sleep 1; echo done").with_id("current"))
        .await
        .expect("enqueue");
    store
        .jobs
        .enqueue(&JobSpec::new("echo never").with_id("queued"))
        .await
        .expect("enqueue");

    let worker = runner(&store, "worker-test");
    let mut states = worker.watch_state();
    let (tx, rx) = watch::channel(false);

    let (summary, _) = tokio::join!(worker.run(rx), async {
        states
            .wait_for(|s| *s == WorkerState::Executing)
            .await
            .expect("worker reached executing");
        tx.send_replace(true);
    });

    assert_eq!(summary.processed, 1);

    let current = store.job("current").await;
    assert_eq!(current.state, JobState::Completed);
    assert_eq!(current.output.as_deref(), Some("done\n"));

    let queued = store.job("queued").await;
    assert_eq!(queued.state, JobState::Pending);
    assert!(queued.locked_by.is_none());
}

#[tokio::test]
async fn test_registry_stop_request_stops_idle_worker() {
    let store = helpers::TestStore::new().await;
    let worker = runner(&store, "worker-stop");
    let (_tx, rx) = watch::channel(false);

    let (summary, _) = tokio::join!(worker.run(rx), async {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.workers.list().await.expect("list").is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "worker never registered");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(store.workers.request_stop(None).await.expect("stop"), 1);
    });

    assert_eq!(summary, RunSummary::default());
    assert_eq!(worker.state(), WorkerState::Stopped);
    assert!(store.workers.list().await.expect("list").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_run_each_job_once() {
    const JOBS: usize = 24;

    let store = helpers::TestStore::new().await;
    let log = store.dir.path().join("executions.log");
    let mut ids = Vec::new();
    for i in 0..JOBS {
        let id = format!("job-{i:02}");
        store
            .jobs
            .enqueue(&JobSpec::new(format!("echo {id} >> {}", log.display())).with_id(&id))
            .await
            .expect("enqueue");
        ids.push(id);
    }

    let (tx, rx) = watch::channel(false);
    let mut handles = Vec::new();
    for w in 0..4 {
        let db = store.reopen().await;
        let rx = rx.clone();
        handles.push(tokio::spawn(async move {
            let (jobs, workers) = helpers::repositories(&db);
            let config = helpers::fast_worker_config();
            let queue = Arc::new(JobQueue::new(
                jobs,
                workers,
                format!("worker-{w}"),
                config.stale_after(),
            ));
            let summary = WorkerRunner::new(queue, config).run(rx).await;
            db.close().await;
            summary
        }));
    }

    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    store.wait_terminal(&id_refs, Duration::from_secs(30)).await;
    tx.send_replace(true);

    let mut processed = 0;
    for handle in handles {
        processed += handle.await.expect("join").processed;
    }
    assert_eq!(processed, JOBS as u64);

    let contents = std::fs::read_to_string(&log).expect("read log");
    let mut lines: Vec<&str> = contents.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, id_refs);
    assert_eq!(
        store.jobs.count_by_state(JobState::Completed).await.expect("count"),
        JOBS as i64
    );
}
