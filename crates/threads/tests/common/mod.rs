//! Shared helpers for kernel integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use spy::MemoryBackend;
use threads::{Kernel, KernelConfig, KernelError};

/// Timer period long enough that no test is ever preempted by the alarm.
pub const QUIET_TIMER_PERIOD: u64 = 10_000_000;

/// Configuration without forced preemption, for tests that check ordering.
pub fn deterministic() -> KernelConfig {
    KernelConfig::builder()
        .timer_period(QUIET_TIMER_PERIOD)
        .build()
}

/// Boots a kernel with the default configuration.
pub fn boot() -> Result<Kernel, KernelError> {
    Kernel::builder().boot()
}

/// Boots a kernel that reports every record to an in-memory tracer.
pub fn boot_traced(config: KernelConfig) -> Result<(Kernel, MemoryBackend), KernelError> {
    let (hook, backend) = spy::memory_tracer();
    let kernel = Kernel::with_config(config).with_trace_hook(hook).boot()?;
    Ok((kernel, backend))
}

/// Append-only log shared between kernel threads.
#[derive(Clone, Default)]
pub struct Journal<T> {
    entries: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Journal<T> {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, entry: T) {
        self.entries.lock().push(entry);
    }

    pub fn entries(&self) -> Vec<T> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}
