use objectdb_core::{
    Database, DbError, ExecutionMode, PoolConfig, StoreConfig, StorePool, WorkerPolicy,
    WorkerPoolConfig,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uuid::Uuid;

fn open_with(dir: &TempDir, workers: WorkerPoolConfig) -> Database {
    let db = Database::open(
        StoreConfig::embedded(dir.path().join("exec")),
        &PoolConfig::default().with_max_size(4),
        &workers,
    )
    .unwrap();
    db.execute(|dao| dao.create_table()).unwrap();
    db
}

fn open_policy(dir: &TempDir, policy: WorkerPolicy) -> Database {
    open_with(dir, WorkerPoolConfig::new(policy))
}

#[test]
fn every_policy_executes_deferred_work() {
    for policy in WorkerPolicy::ALL {
        let dir = tempfile::tempdir().unwrap();
        let db = open_policy(&dir, policy);
        let id = Uuid::new_v4();

        let execution = db.run(ExecutionMode::Async, move |dao| {
            dao.insert(id, "deferred")?;
            dao.list()
        });
        assert!(execution.is_pending());

        let records = execution.join().unwrap();
        assert_eq!(records.len(), 1, "policy {policy}");
        assert_eq!(records[0].id(), id);
    }
}

#[test]
fn sync_mode_runs_on_calling_thread() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Fixed);
    let caller = thread::current().id();

    let execution = db.run(ExecutionMode::Sync, |_dao| Ok(thread::current().id()));
    assert!(!execution.is_pending());
    assert_eq!(execution.join().unwrap(), caller);
}

#[test]
fn async_mode_runs_on_named_worker_threads() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_with(
        &dir,
        WorkerPoolConfig::new(WorkerPolicy::Elastic).with_thread_name("Objects IO"),
    );

    let name = db
        .submit(|_dao| Ok(thread::current().name().map(str::to_string)))
        .join()
        .unwrap()
        .unwrap();
    assert!(name.starts_with("Objects IO #"), "unexpected worker name {name}");
}

#[test]
fn deferred_failure_is_delivered_through_handle() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Fixed);
    let id = Uuid::new_v4();
    db.execute(move |dao| dao.insert(id, "first")).unwrap();

    let err = db
        .submit(move |dao| dao.insert(id, "second"))
        .join()
        .unwrap_err();
    assert!(err.is_constraint_violation(), "unexpected error: {err}");
}

#[test]
fn panicking_operation_reports_worker_lost() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Fixed);

    let err = db
        .submit(|_dao| -> Result<(), DbError> { panic!("boom") })
        .join()
        .unwrap_err();
    assert!(matches!(err, DbError::WorkerLost(_)), "unexpected error: {err}");

    // The pool keeps serving after a worker panic.
    let records = db.submit(|dao| dao.list()).join().unwrap();
    assert!(records.is_empty());
}

#[test]
fn single_policy_preserves_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Single);
    let seen = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = (0..20)
        .map(|n| {
            let seen = Arc::clone(&seen);
            db.submit(move |dao| {
                if n % 5 == 0 {
                    thread::sleep(Duration::from_millis(10));
                }
                dao.insert(Uuid::new_v4(), &n.to_string())?;
                seen.lock().unwrap().push(n);
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
}

#[test]
fn fixed_policy_runs_operations_in_parallel() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Fixed);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            db.submit(move |_dao| {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 2);
}

#[test]
fn shutdown_drains_in_flight_work_then_refuses_new_work() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Fixed);
    let id = Uuid::new_v4();

    let slow = db.submit(move |dao| {
        thread::sleep(Duration::from_millis(150));
        dao.insert(id, "drained")?;
        dao.list()
    });
    db.shutdown();

    let records = slow.join().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].text(), "drained");

    assert!(db.is_shutdown());
    assert!(db.pool_status().is_none());
    assert!(matches!(
        db.execute(|dao| dao.list()),
        Err(DbError::Unavailable(_))
    ));
    assert!(matches!(
        db.submit(|dao| dao.list()).join(),
        Err(DbError::Unavailable(_))
    ));

    db.shutdown();
}

#[test]
fn shutdown_waits_for_operations_submitted_from_other_threads() {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(open_policy(&dir, WorkerPolicy::Elastic));
    let finished = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let finished = Arc::clone(&finished);
            db.submit(move |dao| {
                thread::sleep(Duration::from_millis(50));
                dao.insert(Uuid::new_v4(), "x")?;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
        .collect();

    db.shutdown();
    assert_eq!(finished.load(Ordering::SeqCst), 4);
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn scheduled_policy_runs_delayed_work() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Scheduled);
    let id = Uuid::new_v4();
    let started_at = Instant::now();

    db.schedule(Duration::from_millis(60), move |dao| dao.insert(id, "later"))
        .join()
        .unwrap();

    assert!(started_at.elapsed() >= Duration::from_millis(60));
    let mapping = db.execute(|dao| dao.as_mapping()).unwrap();
    assert_eq!(mapping[&id], "later");
}

#[test]
fn non_scheduled_policies_reject_delayed_work() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Single);

    let err = db
        .schedule(Duration::from_millis(1), |dao| dao.list())
        .join()
        .unwrap_err();
    assert!(matches!(err, DbError::Config(_)));

    let err = db
        .schedule_repeating(Duration::from_millis(10), |_dao| Ok(()))
        .err()
        .unwrap();
    assert!(matches!(err, DbError::Config(_)));
}

#[test]
fn repeating_task_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Scheduled);
    let runs = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&runs);
    let task = db
        .schedule_repeating(Duration::from_millis(10), move |dao| {
            let run = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if run == 3 {
                return Err(DbError::InvalidArgument(format!("run {run} rejected")));
            }
            dao.insert(Uuid::new_v4(), &run.to_string())
        })
        .unwrap();

    let err = task.join().unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(message) if message.contains("run 3")));
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(db.execute(|dao| dao.list()).unwrap().len(), 2);
}

#[test]
fn cancelled_repeating_task_reports_worker_lost() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Scheduled);

    let task = db
        .schedule_repeating(Duration::from_secs(60), |_dao| Ok(()))
        .unwrap();
    assert!(!task.is_finished());
    task.cancel();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !task.is_finished() {
        assert!(Instant::now() < deadline, "cancelled task never finished");
        thread::sleep(Duration::from_millis(5));
    }
    assert!(matches!(task.join(), Err(DbError::WorkerLost(_))));
}

#[test]
fn repeating_period_must_be_positive() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Scheduled);

    let err = db
        .schedule_repeating(Duration::ZERO, |_dao| Ok(()))
        .err()
        .unwrap();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}

#[test]
fn database_can_be_built_over_an_existing_pool() {
    let dir = tempfile::tempdir().unwrap();
    let store = StoreConfig::embedded(dir.path().join("parts"));
    let pool = StorePool::open(&store, &PoolConfig::default().with_max_size(2)).unwrap();

    let db = Database::from_parts(
        store.clone(),
        pool.clone(),
        &WorkerPoolConfig::new(WorkerPolicy::Single),
    )
    .unwrap();
    assert_eq!(db.store(), &store);
    assert_eq!(db.policy(), WorkerPolicy::Single);

    let id = Uuid::new_v4();
    db.execute(|dao| dao.create_table()).unwrap();
    db.submit(move |dao| dao.insert(id, "shared")).join().unwrap();

    // The caller's pool handle sees the same store.
    let records = pool.with_dao(|dao| dao.list()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id(), id);
    db.shutdown();

    let err = Database::from_parts(
        store,
        pool,
        &WorkerPoolConfig::default().with_thread_name(""),
    )
    .err()
    .unwrap();
    assert!(matches!(err, DbError::Config(_)));
}

#[test]
fn invalid_configuration_fails_before_anything_runs() {
    let dir = tempfile::tempdir().unwrap();

    assert!(matches!(WorkerPolicy::from_id(7), Err(DbError::Config(_))));

    let err = Database::open(
        StoreConfig::embedded(dir.path().join("never")),
        &PoolConfig::default().with_max_size(0),
        &WorkerPoolConfig::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, DbError::Config(_)));
    assert!(!dir.path().join("never.db").exists());
}

#[tokio::test]
async fn async_result_can_be_awaited() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Fixed);
    let id = Uuid::new_v4();

    db.submit(move |dao| dao.insert(id, "awaited")).await.unwrap();
    let mapping = db
        .run(ExecutionMode::Async, |dao| dao.as_mapping())
        .into_async()
        .await
        .unwrap();
    assert_eq!(mapping[&id], "awaited");

    let ready = db
        .run(ExecutionMode::Sync, |dao| dao.list())
        .into_async()
        .await
        .unwrap();
    assert_eq!(ready.len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocking_wait_inside_multi_thread_runtime_returns_result() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Fixed);
    let id = Uuid::new_v4();

    db.with_execute(ExecutionMode::Async, move |dao| dao.insert(id, "blocking"))
        .unwrap();
    let records = db
        .with_execute(ExecutionMode::Async, |dao| dao.list())
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].text(), "blocking");
}

#[tokio::test]
async fn blocking_wait_on_current_thread_runtime_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let db = open_policy(&dir, WorkerPolicy::Fixed);

    let err = db
        .with_execute(ExecutionMode::Async, |dao| dao.list())
        .unwrap_err();
    assert!(matches!(err, DbError::WouldBlock(_)), "unexpected error: {err}");

    // Direct execution and awaiting stay available.
    assert!(db.with_execute(ExecutionMode::Sync, |dao| dao.list()).unwrap().is_empty());
    assert!(db.submit(|dao| dao.list()).await.unwrap().is_empty());
}
