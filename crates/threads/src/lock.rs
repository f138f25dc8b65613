//! Mutual exclusion lock.
//!
//! Ownership is handed directly to the longest waiting thread on release, so
//! a released lock never becomes free while threads are queued for it.

use std::sync::Arc;

use machine::InterruptGate;

use crate::kernel::Kernel;
use crate::queue::{FifoQueue, ThreadQueue};
use crate::sync::IrqMutex;
use crate::thread::ThreadId;

#[derive(Default)]
struct LockState {
    holder: Option<ThreadId>,
    waiters: FifoQueue,
}

/// Blocking, non-reentrant lock. Clones share the same lock.
#[derive(Clone)]
pub struct Lock {
    kernel: Kernel,
    state: Arc<IrqMutex<LockState>>,
}

impl Lock {
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            kernel: kernel.clone(),
            state: Arc::new(IrqMutex::new(LockState::default())),
        }
    }

    /// Acquires the lock, blocking until it is handed over.
    ///
    /// # Panics
    ///
    /// Panics if the current thread already holds the lock.
    pub fn acquire(&self) {
        assert!(
            !self.is_held_by_current_thread(),
            "lock acquired twice by the same thread"
        );

        let interrupt = self.kernel.interrupt();
        let status = interrupt.disable();

        let current = self.kernel.current_id();
        let contended = {
            let mut state = self.state.lock(interrupt);
            if state.holder.is_some() {
                state.waiters.wait_for_access(current);
                true
            } else {
                state.holder = Some(current);
                false
            }
        };
        if contended {
            self.kernel.sleep();
        }
        assert_eq!(self.holder(), Some(current), "lock handed to the wrong thread");

        interrupt.restore(status);
    }

    /// Releases the lock, handing it to the longest waiting thread.
    ///
    /// # Panics
    ///
    /// Panics if the current thread does not hold the lock.
    pub fn release(&self) {
        assert!(
            self.is_held_by_current_thread(),
            "lock released by a thread that does not hold it"
        );

        let interrupt = self.kernel.interrupt();
        let status = interrupt.disable();

        let next = {
            let mut state = self.state.lock(interrupt);
            let next = state.waiters.next_thread();
            state.holder = next;
            next
        };
        if let Some(next) = next {
            self.kernel.ready_thread(next);
        }

        interrupt.restore(status);
    }

    pub fn is_held_by_current_thread(&self) -> bool {
        let current = self.kernel.current_id();
        self.holder() == Some(current)
    }

    pub fn holder(&self) -> Option<ThreadId> {
        self.state.read(|state| state.holder)
    }

    /// Number of threads blocked in [`Lock::acquire`].
    pub fn waiting_count(&self) -> usize {
        self.state.read(|state| state.waiters.len())
    }

    pub(crate) fn kernel(&self) -> &Kernel {
        &self.kernel
    }
}
