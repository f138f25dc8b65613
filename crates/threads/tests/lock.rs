//! Integration tests for the blocking lock.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{boot, deterministic, Journal};
use threads::{Kernel, KernelConfig, KernelError, Lock};

#[test]
fn lock_provides_mutual_exclusion() -> Result<(), KernelError> {
    let kernel = boot()?;
    kernel.run(|kernel| {
        let lock = Lock::new(kernel);
        let inside = Arc::new(AtomicUsize::new(0));
        let most_inside = Arc::new(AtomicUsize::new(0));
        let counter = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::new();
        for n in 0..4u64 {
            let (lock, inside, most_inside, counter) = (
                lock.clone(),
                Arc::clone(&inside),
                Arc::clone(&most_inside),
                Arc::clone(&counter),
            );
            let worker = kernel.clone();
            workers.push(kernel.spawn(&format!("worker {n}"), move || {
                for round in 0..5u64 {
                    lock.acquire();
                    let now_inside = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    most_inside.fetch_max(now_inside, Ordering::SeqCst);

                    let seen = counter.load(Ordering::SeqCst);
                    if round % 2 == 0 {
                        worker.yield_now();
                    } else {
                        worker.alarm().wait_until(100 * (n + 1));
                    }
                    counter.store(seen + 1, Ordering::SeqCst);

                    inside.fetch_sub(1, Ordering::SeqCst);
                    lock.release();
                }
            })?);
        }
        for worker in &workers {
            worker.join();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 20);
        assert_eq!(most_inside.load(Ordering::SeqCst), 1);
        assert_eq!(lock.holder(), None);
        Ok(())
    })
}

#[test]
fn release_hands_the_lock_to_the_longest_waiter() -> Result<(), KernelError> {
    let kernel = Kernel::with_config(deterministic()).boot()?;
    kernel.run(|kernel| {
        let lock = Lock::new(kernel);
        let journal = Journal::new();

        lock.acquire();
        let mut waiters = Vec::new();
        for name in ["a", "b", "c"] {
            let (lock, entries) = (lock.clone(), journal.clone());
            waiters.push(kernel.spawn(name, move || {
                lock.acquire();
                entries.push(name);
                lock.release();
            })?);
        }

        kernel.yield_now();
        assert_eq!(lock.waiting_count(), 3);
        assert!(journal.entries().is_empty());

        lock.release();
        assert_eq!(lock.holder(), Some(waiters[0].id()));
        assert!(!lock.is_held_by_current_thread());

        for waiter in &waiters {
            waiter.join();
        }
        assert_eq!(journal.entries(), vec!["a", "b", "c"]);
        assert_eq!(lock.holder(), None);
        Ok(())
    })
}

#[test]
fn only_the_holder_sees_the_lock_as_held() -> Result<(), KernelError> {
    let kernel = Kernel::with_config(deterministic()).boot()?;
    kernel.run(|kernel| {
        let lock = Lock::new(kernel);
        assert!(!lock.is_held_by_current_thread());

        lock.acquire();
        assert!(lock.is_held_by_current_thread());

        let journal = Journal::new();
        let (observed, entries) = (lock.clone(), journal.clone());
        let observer = kernel.spawn("observer", move || {
            entries.push(observed.is_held_by_current_thread());
        })?;
        observer.join();
        assert_eq!(journal.entries(), vec![false]);

        lock.release();
        assert!(!lock.is_held_by_current_thread());
        Ok(())
    })
}

#[test]
#[should_panic(expected = "does not hold it")]
fn release_by_non_holder_is_fatal() {
    let kernel = boot().expect("boot kernel");
    kernel.run(|kernel| Lock::new(kernel).release());
}

#[test]
#[should_panic(expected = "acquired twice")]
fn reacquiring_a_held_lock_is_fatal() {
    let kernel = boot().expect("boot kernel");
    kernel.run(|kernel| {
        let lock = Lock::new(kernel);
        lock.acquire();
        lock.acquire();
    });
}

#[test]
fn lock_holds_under_dense_preemption() -> Result<(), KernelError> {
    for period in [15, 23, 37, 50] {
        let config = KernelConfig::builder().timer_period(period).build();
        let kernel = Kernel::with_config(config).boot()?;
        kernel.run(|kernel| {
            let lock = Lock::new(kernel);
            let inside = Arc::new(AtomicUsize::new(0));
            let overlaps = Arc::new(AtomicUsize::new(0));
            let counter = Arc::new(AtomicUsize::new(0));

            let mut workers = Vec::new();
            for n in 0..8u64 {
                let (lock, inside, overlaps, counter) = (
                    lock.clone(),
                    Arc::clone(&inside),
                    Arc::clone(&overlaps),
                    Arc::clone(&counter),
                );
                let alarm = kernel.alarm();
                workers.push(kernel.spawn(&format!("worker {n}"), move || {
                    for round in 0..10u64 {
                        lock.acquire();
                        if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        let seen = counter.load(Ordering::SeqCst);
                        if (n + round) % 3 == 0 {
                            alarm.wait_until(n * 7 + round);
                        }
                        counter.store(seen + 1, Ordering::SeqCst);
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lock.release();
                    }
                })?);
            }
            for worker in &workers {
                worker.join();
            }

            assert_eq!(overlaps.load(Ordering::SeqCst), 0, "period {period}");
            assert_eq!(counter.load(Ordering::SeqCst), 80, "period {period}");
            assert_eq!(lock.holder(), None);
            assert_eq!(lock.waiting_count(), 0);
            Ok::<(), KernelError>(())
        })?;
    }
    Ok(())
}
