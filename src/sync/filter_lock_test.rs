//! Unit tests for the filter lock

use super::filter_lock::*;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn test_single_worker_enters_immediately() {
    let lock = FilterLock::new(1, 0u32);
    {
        let mut guard = lock.lock_blocking(0);
        *guard += 1;
        assert_eq!(guard.worker(), 0);
    }
    assert_eq!(lock.into_inner(), 1);
}

#[test]
fn test_uncontended_acquire_does_not_poll() {
    let lock = FilterLock::new(4, ());
    for id in 0..4 {
        let _guard = lock.lock_blocking(id);
    }
    assert_eq!(lock.contended_polls(), 0);
}

#[test]
#[should_panic(expected = "out of range")]
fn test_worker_id_out_of_range_panics() {
    let lock = FilterLock::new(2, ());
    let _guard = lock.lock_blocking(2);
}

#[test]
fn test_reset_resizes_worker_set() {
    let mut lock = FilterLock::new(2, Vec::<usize>::new());
    assert_eq!(lock.workers(), 2);

    lock.reset(5);
    assert_eq!(lock.workers(), 5);
    assert_eq!(lock.contended_polls(), 0);

    lock.lock_blocking(4).push(4);
    lock.get_mut().push(0);
    assert_eq!(lock.into_inner(), vec![4, 0]);
}

#[test]
fn test_mutual_exclusion_with_random_delays() {
    for workers in [2usize, 3, 5, 8] {
        let lock = Arc::new(FilterLock::new(workers, 0usize));
        let occupancy = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let lock = Arc::clone(&lock);
                let occupancy = Arc::clone(&occupancy);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    let mut rng = rand::rng();
                    for _ in 0..200 {
                        let mut guard = lock.lock_blocking(id);
                        let inside = occupancy.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(inside, Ordering::SeqCst);
                        if rng.random_bool(0.1) {
                            thread::sleep(Duration::from_micros(rng.random_range(0..50)));
                        }
                        *guard += 1;
                        occupancy.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1, "workers = {}", workers);
        let lock = Arc::try_unwrap(lock).unwrap();
        assert_eq!(lock.into_inner(), workers * 200);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_lock_prevents_lost_updates() {
    let workers = 6;
    let lock = Arc::new(FilterLock::new(workers, 0usize));

    let handles: Vec<_> = (0..workers)
        .map(|id| {
            let lock = Arc::clone(&lock);
            tokio::spawn(async move {
                for _ in 0..100 {
                    let mut guard = lock.lock(id).await;
                    let seen = *guard;
                    // Give every other task a chance to run mid-update.
                    tokio::task::yield_now().await;
                    *guard = seen + 1;
                }
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let lock = Arc::try_unwrap(lock).unwrap();
    assert_eq!(lock.into_inner(), workers * 100);
}

#[test]
fn test_guard_released_when_critical_section_fails() {
    let lock = FilterLock::new(2, Vec::<u32>::new());

    let attempt = |value: u32| -> Result<(), String> {
        let mut guard = lock.lock_blocking(0);
        if value == 0 {
            return Err("zero rejected".to_string());
        }
        guard.push(value);
        Ok(())
    };

    assert!(attempt(0).is_err());
    assert!(attempt(7).is_ok());

    // Worker 1 would spin forever if worker 0 still held a level.
    lock.lock_blocking(1).push(8);
    assert_eq!(lock.into_inner(), vec![7, 8]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dropped_lock_future_withdraws_worker() {
    let lock = Arc::new(FilterLock::new(2, ()));
    let held = lock.lock(0).await;

    let contender = Arc::clone(&lock);
    let timed_out = tokio::time::timeout(Duration::from_millis(50), async move {
        let _guard = contender.lock(1).await;
    })
    .await;
    assert!(timed_out.is_err(), "worker 1 entered while worker 0 held the lock");
    assert!(lock.contended_polls() > 0);

    drop(held);

    let reacquired = tokio::time::timeout(Duration::from_secs(5), lock.lock(0)).await;
    assert!(reacquired.is_ok(), "abandoned worker 1 still blocks worker 0");
}

#[test]
fn test_debug_shows_worker_levels() {
    let lock = FilterLock::new(3, ());
    let rendered = format!("{:?}", lock);
    assert!(rendered.contains("workers: 3"));
    assert!(rendered.contains("[-1, -1, -1]"));
}
