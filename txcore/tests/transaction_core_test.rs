//! Integration tests for the transaction core
//!
//! Runs the retry, transaction, savepoint, batch and advisory lock paths
//! against the in-memory provider.

use futures::future::BoxFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use txcore::{
    execute_with_savepoint, is_retryable, AdvisoryLockManager, DbError, LockConfig,
    MemoryProvider, MemoryTransaction, RetryPolicy, SharedTransaction, TransactionManager,
    TransactionOptions, RETRYABLE_SQLSTATES,
};

fn setup() -> (Arc<MemoryProvider>, TransactionManager<MemoryProvider>) {
    let provider = Arc::new(MemoryProvider::new());
    (provider.clone(), TransactionManager::new(provider))
}

fn locks() -> AdvisoryLockManager<MemoryProvider> {
    AdvisoryLockManager::new(Arc::new(MemoryProvider::new()), LockConfig::default())
}

#[test]
fn classifier_covers_retryable_set_only() {
    for code in RETRYABLE_SQLSTATES {
        assert!(is_retryable(&DbError::with_code(*code, "transient")));
    }
    assert!(!is_retryable(&DbError::with_code("ZZ123", "made up")));
    assert!(!is_retryable(&DbError::Database {
        code: None,
        message: "no code".into(),
    }));
}

#[tokio::test(start_paused = true)]
async fn retry_stops_after_max_attempts() {
    let policy = RetryPolicy::new(3, Duration::from_millis(100)).unwrap();
    let calls = AtomicUsize::new(0);

    let result: Result<(), DbError> = policy
        .execute(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Err(DbError::with_code("40001", format!("conflict #{n}"))) }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result, Err(DbError::with_code("40001", "conflict #3")));
}

#[tokio::test(start_paused = true)]
async fn retry_gives_up_on_fatal_error() {
    let policy = RetryPolicy::default();
    let calls = AtomicUsize::new(0);

    let result: Result<(), DbError> = policy
        .execute(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(DbError::with_code("23505", "duplicate key")) }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(result.is_err());
}

#[tokio::test(start_paused = true)]
async fn retry_backoff_grows_within_jitter_bounds() {
    let policy = RetryPolicy::new(6, Duration::from_millis(100)).unwrap();
    let stamps = parking_lot::Mutex::new(Vec::new());

    let _: Result<(), DbError> = policy
        .execute(|| {
            stamps.lock().push(Instant::now());
            async { Err(DbError::with_code("40P01", "deadlock detected")) }
        })
        .await;

    let stamps = stamps.into_inner();
    assert_eq!(stamps.len(), 6);
    for (i, pair) in stamps.windows(2).enumerate() {
        let delay = pair[1] - pair[0];
        let floor = Duration::from_millis(100 * 2u64.pow(i as u32));
        let ceiling = floor.mul_f64(1.25);
        assert!(
            delay >= floor && delay <= ceiling,
            "retry {} slept {:?}, expected within [{:?}, {:?}]",
            i + 1,
            delay,
            floor,
            ceiling
        );
    }
}

#[tokio::test(start_paused = true)]
async fn retry_backoff_never_exceeds_cap() {
    let policy = RetryPolicy::new(9, Duration::from_millis(2000)).unwrap();
    let stamps = parking_lot::Mutex::new(Vec::new());

    let _: Result<(), DbError> = policy
        .execute(|| {
            stamps.lock().push(Instant::now());
            async { Err(DbError::with_code("53300", "too many connections")) }
        })
        .await;

    let stamps = stamps.into_inner();
    assert_eq!(stamps.len(), 9);
    let delays: Vec<Duration> = stamps.windows(2).map(|p| p[1] - p[0]).collect();
    assert!(delays.iter().all(|d| *d <= Duration::from_secs(10)));
    assert_eq!(delays.last().copied(), Some(Duration::from_secs(10)));
}

#[tokio::test]
async fn transaction_rolls_back_on_error() {
    let (provider, manager) = setup();

    let result = manager
        .execute_in_transaction(TransactionOptions::default(), |tx| {
            Box::pin(async move {
                tx.put("order:1", "pending");
                Err::<(), _>(DbError::with_code("23503", "foreign key violation"))
            })
        })
        .await;

    assert_eq!(
        result,
        Err(DbError::with_code("23503", "foreign key violation"))
    );
    assert!(provider.snapshot().is_empty());
    assert_eq!((provider.commits(), provider.rollbacks()), (0, 1));
}

#[tokio::test]
async fn transaction_commits_all_writes() {
    let (provider, manager) = setup();

    let written = manager
        .execute_in_transaction(TransactionOptions::default(), |tx| {
            Box::pin(async move {
                tx.put("order:1", "paid");
                tx.put("order:2", "paid");
                Ok::<_, DbError>(2)
            })
        })
        .await
        .unwrap();

    assert_eq!(written, 2);
    let table = provider.snapshot();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get("order:2").map(String::as_str), Some("paid"));
    assert_eq!((provider.commits(), provider.rollbacks()), (1, 0));
}

#[tokio::test]
async fn failed_begin_never_runs_work() {
    let (provider, manager) = setup();
    provider.fail_next_begin(DbError::with_code("08006", "connection failure"));
    let ran = Arc::new(AtomicUsize::new(0));

    let counter = ran.clone();
    let result = manager
        .execute_in_transaction(TransactionOptions::default(), move |_tx| {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, DbError>(())
            })
        })
        .await;

    assert_eq!(result, Err(DbError::with_code("08006", "connection failure")));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn savepoint_rollback_keeps_parent_writes() {
    let (provider, manager) = setup();

    manager
        .execute_in_transaction(TransactionOptions::default(), |tx| {
            Box::pin(async move {
                tx.put("invoice:7", "issued");

                let nested = execute_with_savepoint(tx, "audit", |tx| {
                    Box::pin(async move {
                        tx.put("audit:7", "written");
                        Err::<(), _>(DbError::with_code("23514", "check violation"))
                    })
                })
                .await;
                assert!(nested.is_err());
                assert_eq!(tx.get("audit:7"), None);
                assert!(tx.savepoints().is_empty());

                execute_with_savepoint(tx, "email", |tx| {
                    Box::pin(async move {
                        tx.put("email:7", "queued");
                        Ok::<_, DbError>(())
                    })
                })
                .await?;

                Ok::<_, DbError>(())
            })
        })
        .await
        .unwrap();

    let table = provider.snapshot();
    assert_eq!(table.get("invoice:7").map(String::as_str), Some("issued"));
    assert_eq!(table.get("email:7").map(String::as_str), Some("queued"));
    assert!(!table.contains_key("audit:7"));
}

#[tokio::test]
async fn savepoint_rejects_bad_names_before_touching_transaction() {
    let (_, manager) = setup();

    let result = manager
        .execute_in_transaction(TransactionOptions::default(), |tx| {
            Box::pin(async move {
                execute_with_savepoint(tx, "", |_tx| Box::pin(async { Ok::<_, DbError>(()) })).await
            })
        })
        .await;

    assert_eq!(result, Err(DbError::InvalidSavepointName(String::new())));
}

type BatchWork = Box<
    dyn for<'c> FnOnce(
            SharedTransaction<'c, MemoryTransaction>,
        ) -> BoxFuture<'c, Result<String, DbError>>
        + Send,
>;

// pins the closure to the higher-ranked signature before boxing
fn unit_of_work<F>(f: F) -> F
where
    F: for<'c> FnOnce(
            SharedTransaction<'c, MemoryTransaction>,
        ) -> BoxFuture<'c, Result<String, DbError>>
        + Send,
{
    f
}

fn batch_writer(key: &str, delay_ms: u64, fail: bool) -> BatchWork {
    let key = key.to_string();
    Box::new(unit_of_work(move |shared| {
        Box::pin(async move {
            sleep(Duration::from_millis(delay_ms)).await;
            shared.lock().await.put(&key, "written");
            if fail {
                Err(DbError::with_code("23505", format!("duplicate {key}")))
            } else {
                Ok(key)
            }
        })
    }))
}

#[tokio::test(start_paused = true)]
async fn batch_returns_results_in_input_order() {
    let (provider, manager) = setup();

    let started = Instant::now();
    let results = manager
        .execute_batch(
            TransactionOptions::default(),
            vec![
                batch_writer("a", 300, false),
                batch_writer("b", 100, false),
                batch_writer("c", 200, false),
            ],
        )
        .await
        .unwrap();

    assert_eq!(results, vec!["a", "b", "c"]);
    // units ran concurrently, not one after another
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(provider.snapshot().len(), 3);
    assert_eq!(manager.stats().batches, 1);
}

#[tokio::test(start_paused = true)]
async fn batch_failure_rolls_back_every_unit() {
    let (provider, manager) = setup();

    let result = manager
        .execute_batch(
            TransactionOptions::default(),
            vec![
                batch_writer("a", 10, false),
                batch_writer("b", 20, true),
                batch_writer("c", 5, false),
            ],
        )
        .await;

    assert_eq!(result, Err(DbError::with_code("23505", "duplicate b")));
    assert!(provider.snapshot().is_empty());
    assert_eq!((provider.commits(), provider.rollbacks()), (0, 1));
}

#[tokio::test(start_paused = true)]
async fn lock_holders_never_overlap() {
    let locks = locks();
    let inside = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..3 {
        let locks = locks.clone();
        let inside = inside.clone();
        let peak = peak.clone();
        handles.push(tokio::spawn(async move {
            locks
                .execute_with_lock(42, Duration::from_secs(5), || async move {
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(200)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, DbError>(())
                })
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(locks.stats().acquired, 3);
    assert_eq!(locks.stats().released, 3);
}

#[tokio::test(start_paused = true)]
async fn lock_waiter_times_out_without_running() {
    let locks = locks();
    let holder = {
        let locks = locks.clone();
        tokio::spawn(async move {
            locks
                .execute_with_lock(7, Duration::from_secs(1), || async {
                    sleep(Duration::from_secs(2)).await;
                    Ok::<_, DbError>(())
                })
                .await
        })
    };
    sleep(Duration::from_millis(50)).await;

    let ran = Arc::new(AtomicUsize::new(0));
    let counter = ran.clone();
    let result = locks
        .execute_with_lock(7, Duration::from_millis(300), || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, DbError>(())
        })
        .await;

    assert_eq!(
        result,
        Err(DbError::LockNotAcquired {
            lock_id: 7,
            timeout: Duration::from_millis(300),
        })
    );
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    holder.await.unwrap().unwrap();
}

#[tokio::test]
async fn lock_released_after_failing_work() {
    let locks = locks();

    let result = locks
        .execute_with_lock(99, Duration::from_secs(1), || async {
            Err::<(), _>(DbError::with_code("22012", "division by zero"))
        })
        .await;
    assert_eq!(result, Err(DbError::with_code("22012", "division by zero")));

    let token = locks
        .acquire_advisory_lock(99, Duration::ZERO)
        .await
        .unwrap()
        .expect("lock should be free right after the failed call");
    assert!(locks.release_advisory_lock(token).await.unwrap());
}
