//! Interior mutability for kernel bookkeeping.
//!
//! Kernel structures are protected by interrupt masking alone: only the
//! context holding the processor runs, and it cannot be preempted while
//! interrupts are disabled. [`IrqMutex`] provides the `Sync` storage Rust
//! requires for that state and checks the masking discipline on every
//! mutation. The inner lock is never contended.
//!
//! A guard must be dropped before anything that can switch contexts.

use machine::InterruptGate;
use parking_lot::{Mutex, MutexGuard};

pub(crate) struct IrqMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqMutex<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Borrows the protected value for mutation.
    ///
    /// # Panics
    ///
    /// Panics if interrupts are enabled.
    pub(crate) fn lock<'a>(&'a self, gate: &impl InterruptGate) -> MutexGuard<'a, T> {
        assert!(
            gate.is_disabled(),
            "kernel state modified with interrupts enabled"
        );
        self.inner.lock()
    }

    /// Reads the protected value. A single read is atomic with respect to the
    /// scheduler, so no masking is required.
    pub(crate) fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock())
    }
}
