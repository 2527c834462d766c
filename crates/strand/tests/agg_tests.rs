//! Aggregation-utility scenarios across both execution models

use std::thread;
use std::time::Duration;

use strand::{
    agg, gather_all, Future, FutureState, Scheduler, TaskError, ThreadPool,
};

#[test]
fn test_gather_all_over_pool_futures() {
    let pool = ThreadPool::with_workers(3);
    let futures: Vec<Future<u64>> = [30u64, 10, 20]
        .into_iter()
        .map(|ms| {
            pool.submit(move || {
                thread::sleep(Duration::from_millis(ms));
                Ok(ms)
            })
            .unwrap()
        })
        .collect();

    let all = gather_all(&futures);
    // Input order despite reversed completion order
    assert_eq!(all.wait().unwrap(), vec![30, 10, 20]);
}

#[test]
fn test_gather_all_failure_leaves_siblings_resolvable() {
    let pool = ThreadPool::with_workers(3);

    let ok_a = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(30));
            Ok(1)
        })
        .unwrap();
    let failing: Future<i32> = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(5));
            Err(TaskError::msg("second job failed"))
        })
        .unwrap();
    let ok_b = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(30));
            Ok(3)
        })
        .unwrap();

    let all = gather_all(&[ok_a.clone(), failing, ok_b.clone()]);
    assert!(matches!(all.wait(), Err(TaskError::Failed(_))));

    // The aggregate failed fast; the ok jobs were not cancelled
    assert_eq!(ok_a.wait().unwrap(), 1);
    assert_eq!(ok_b.wait().unwrap(), 3);
}

#[test]
fn test_as_completed_tracks_completion_order() {
    let pool = ThreadPool::with_workers(3);
    let futures: Vec<Future<u64>> = [30u64, 10, 20]
        .into_iter()
        .map(|ms| {
            pool.submit(move || {
                thread::sleep(Duration::from_millis(ms));
                Ok(ms)
            })
            .unwrap()
        })
        .collect();

    let order: Vec<u64> = agg::as_completed(&futures)
        .map(|f| f.value().unwrap())
        .collect();
    assert_eq!(order, vec![10, 20, 30]);
}

#[test]
fn test_wait_first_returns_on_earliest_completion() {
    let pool = ThreadPool::with_workers(3);
    let fast = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(5));
            Ok("fast")
        })
        .unwrap();
    let slow = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(100));
            Ok("slow")
        })
        .unwrap();

    let outcome = agg::wait_first(&[fast.clone(), slow.clone()]);
    assert!(outcome.done.iter().any(|f| f.id() == fast.id()));
    // The slow one keeps running and resolves on its own
    for f in &outcome.pending {
        assert!(!f.state().is_terminal());
    }
    assert_eq!(slow.wait().unwrap(), "slow");
}

#[test]
fn test_wait_all_blocks_until_everything_is_terminal() {
    let pool = ThreadPool::with_workers(2);
    let futures: Vec<Future<u64>> = (0..4)
        .map(|i| {
            pool.submit(move || {
                thread::sleep(Duration::from_millis(5 * (i + 1)));
                Ok(i)
            })
            .unwrap()
        })
        .collect();

    let outcome = agg::wait_all(&futures);
    assert_eq!(outcome.done.len(), 4);
    assert!(outcome.pending.is_empty());
    for f in &outcome.done {
        assert_eq!(f.state(), FutureState::Completed);
    }
}

#[test]
fn test_coop_gather_collects_in_spawn_order() {
    let scheduler = Scheduler::new();
    let handle = scheduler.handle();

    let values = scheduler
        .run(async move {
            let tasks: Vec<_> = [30u64, 10, 20]
                .into_iter()
                .map(|ms| {
                    let body_handle = handle.clone();
                    handle.spawn(async move {
                        body_handle.sleep(Duration::from_millis(ms)).await?;
                        Ok(ms)
                    })
                })
                .collect();
            agg::gather(&tasks).await
        })
        .unwrap();

    assert_eq!(values, vec![30, 10, 20]);
}

#[test]
fn test_coop_gather_propagates_the_first_failure() {
    let scheduler = Scheduler::new();
    let handle = scheduler.handle();

    let outcome = scheduler.run(async move {
        let slow_handle = handle.clone();
        let ok = handle.spawn(async move {
            slow_handle.sleep(Duration::from_millis(30)).await?;
            Ok(1)
        });
        let bad = handle.spawn(async move { Err::<i32, _>(TaskError::msg("spawned body failed")) });
        Ok(agg::gather(&[ok, bad]).await)
    });

    assert!(matches!(outcome.unwrap(), Err(TaskError::Failed(_))));
}

#[test]
fn test_gather_all_of_mixed_ready_and_pending() {
    let already_done = Future::pending();
    already_done.complete(1u8).unwrap();
    let pending = Future::pending();

    let all = gather_all(&[already_done, pending.clone()]);
    assert!(!all.is_done());

    pending.complete(2).unwrap();
    assert_eq!(all.wait().unwrap(), vec![1, 2]);
}
