//! Condition variables built on [`Lock`] and thread blocking.
//!
//! Sleeping releases the lock and blocks within one masked section, so a
//! wake issued after the lock is released can never be missed.

use std::sync::Arc;

use machine::InterruptGate;

use crate::lock::Lock;
use crate::queue::{FifoQueue, ThreadQueue};
use crate::sync::IrqMutex;

/// Condition variable bound to one lock. Clones share the same wait queue.
#[derive(Clone)]
pub struct Condition {
    lock: Lock,
    waiters: Arc<IrqMutex<FifoQueue>>,
}

impl Condition {
    pub fn new(lock: &Lock) -> Self {
        Self {
            lock: lock.clone(),
            waiters: Arc::new(IrqMutex::new(FifoQueue::new())),
        }
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Atomically releases the lock and blocks until woken, then reacquires
    /// the lock before returning.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the lock.
    pub fn sleep(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition sleep without holding its lock"
        );
        let kernel = self.lock.kernel();
        let interrupt = kernel.interrupt();
        let status = interrupt.disable();

        let current = kernel.current_id();
        self.waiters.lock(interrupt).wait_for_access(current);
        self.lock.release();
        kernel.sleep();

        interrupt.restore(status);
        self.lock.acquire();
    }

    /// Wakes the longest sleeping thread, if any.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the lock.
    pub fn wake(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition wake without holding its lock"
        );
        let kernel = self.lock.kernel();
        let interrupt = kernel.interrupt();
        let status = interrupt.disable();

        let next = self.waiters.lock(interrupt).next_thread();
        if let Some(thread) = next {
            kernel.ready_thread(thread);
        }

        interrupt.restore(status);
    }

    /// Wakes every sleeping thread.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the lock.
    pub fn wake_all(&self) {
        assert!(
            self.lock.is_held_by_current_thread(),
            "condition wake_all without holding its lock"
        );
        while self.waiting_count() > 0 {
            self.wake();
        }
    }

    /// Number of threads sleeping on this condition.
    pub fn waiting_count(&self) -> usize {
        self.waiters.read(|queue| queue.len())
    }
}
