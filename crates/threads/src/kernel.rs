//! Kernel context, configuration and bootstrap.

use std::sync::{Arc, Weak};

use log::{debug, info};
use machine::{
    Clock, Interrupt, InterruptGate, Machine, MachineConfig, MachineError, Stats, Tcb, Tick,
};
use parking_lot::MutexGuard;
use spy::TraceHook;
use thiserror::Error;

use crate::alarm::{Alarm, SleepRegistry};
use crate::queue::{FifoQueue, ThreadQueue};
use crate::scheduler::{SchedState, ThreadRecord};
use crate::sync::IrqMutex;
use crate::thread::{KThread, ThreadId};

/// Configuration for the kernel.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Name of the thread adopted from the booting host thread.
    pub main_name: &'static str,
    /// Name of the idle thread.
    pub idle_name: &'static str,
    /// Crash the machine when every thread is blocked and no alarm is pending.
    pub deadlock_detection: bool,
    pub machine: MachineConfig,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            main_name: "main",
            idle_name: "idle",
            deadlock_detection: true,
            machine: MachineConfig::default(),
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the name of the main thread.
    pub fn main_name(mut self, name: &'static str) -> Self {
        self.config.main_name = name;
        self
    }

    /// Sets the name of the idle thread.
    pub fn idle_name(mut self, name: &'static str) -> Self {
        self.config.idle_name = name;
        self
    }

    /// Enables or disables deadlock detection in the idle thread.
    pub fn deadlock_detection(mut self, enabled: bool) -> Self {
        self.config.deadlock_detection = enabled;
        self
    }

    /// Sets the configuration of the simulated machine.
    pub fn machine(mut self, machine: MachineConfig) -> Self {
        self.config.machine = machine;
        self
    }

    /// Sets the interval between timer interrupts.
    pub fn timer_period(mut self, ticks: Tick) -> Self {
        self.config.machine.timer_period = ticks;
        self
    }

    /// Builds the kernel configuration.
    pub fn build(self) -> KernelConfig {
        self.config
    }
}

/// Errors raised while booting the kernel or starting threads.
#[derive(Error, Debug)]
pub enum KernelError {
    #[error(transparent)]
    Machine(#[from] MachineError),
}

pub struct KernelBuilder {
    config: KernelConfig,
    trace: Option<TraceHook>,
    ready_queue: Option<Box<dyn ThreadQueue>>,
}

impl KernelBuilder {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            trace: None,
            ready_queue: None,
        }
    }

    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    /// Replaces the FIFO ready queue with another scheduling policy.
    pub fn with_ready_queue(mut self, queue: Box<dyn ThreadQueue>) -> Self {
        self.ready_queue = Some(queue);
        self
    }

    /// Powers on the machine and turns the calling host thread into the
    /// kernel's main thread. Installs the alarm and forks the idle thread.
    pub fn boot(self) -> Result<Kernel, KernelError> {
        let machine = Machine::new(self.config.machine.clone())?;
        let main = ThreadRecord::running(
            Arc::from(self.config.main_name),
            Tcb::adopt_current(&machine),
        );
        let ready = self
            .ready_queue
            .unwrap_or_else(|| Box::new(FifoQueue::new()));

        let kernel = Kernel {
            inner: Arc::new(Inner {
                machine,
                scheduler: IrqMutex::new(SchedState::new(main, ready)),
                sleepers: IrqMutex::new(SleepRegistry::default()),
                trace: self.trace,
                config: self.config,
            }),
        };

        Alarm::install(&kernel);
        kernel.create_idle_thread()?;
        kernel.interrupt().enable();

        info!(
            "kernel booted: timer period {} ticks, kernel tick {}",
            kernel.inner.config.machine.timer_period, kernel.inner.config.machine.kernel_tick
        );
        Ok(kernel)
    }
}

pub(crate) struct Inner {
    machine: Arc<Machine>,
    pub(crate) scheduler: IrqMutex<SchedState>,
    sleepers: IrqMutex<SleepRegistry>,
    trace: Option<TraceHook>,
    pub(crate) config: KernelConfig,
}

/// Handle to the kernel: the scheduler context shared by every thread.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<Inner>,
}

impl Kernel {
    /// Kernel builder with the default configuration.
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> KernelBuilder {
        KernelBuilder::new(config)
    }

    /// Runs `main` as the body of the main thread, then halts the machine.
    /// The machine also halts when `main` panics.
    pub fn run<F, R>(&self, main: F) -> R
    where
        F: FnOnce(&Kernel) -> R,
    {
        struct HaltOnExit<'a>(&'a Kernel);

        impl Drop for HaltOnExit<'_> {
            fn drop(&mut self) {
                self.0.halt();
            }
        }

        let _halt = HaltOnExit(self);
        main(self)
    }

    /// Stops the machine. Every other thread is abandoned.
    pub fn halt(&self) {
        if !self.inner.machine.is_halted() {
            debug!("Halting kernel at tick {}", self.now());
            self.inner.machine.halt();
        }
    }

    /// Creates, names and forks a thread running `target`.
    pub fn spawn<F>(&self, name: &str, target: F) -> Result<KThread, KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        let thread = KThread::with_target(self, target).named(name);
        thread.fork()?;
        Ok(thread)
    }

    pub fn alarm(&self) -> Alarm {
        Alarm::new(self.clone())
    }

    pub fn machine(&self) -> &Machine {
        &self.inner.machine
    }

    pub fn interrupt(&self) -> &Interrupt {
        self.inner.machine.interrupt()
    }

    pub fn config(&self) -> &KernelConfig {
        &self.inner.config
    }

    /// Current simulated time.
    pub fn now(&self) -> Tick {
        self.inner.machine.now()
    }

    pub fn stats(&self) -> Stats {
        self.inner.machine.stats()
    }

    pub(crate) fn sleepers(&self) -> MutexGuard<'_, SleepRegistry> {
        self.inner.sleepers.lock(self.interrupt())
    }

    pub(crate) fn pending_alarms(&self) -> usize {
        self.inner.sleepers.read(SleepRegistry::len)
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(inner: &Weak<Inner>) -> Option<Kernel> {
        inner.upgrade().map(|inner| Kernel { inner })
    }

    pub(crate) fn inner(&self) -> &Inner {
        &self.inner
    }

    /// Reports a record to the trace hook, if one is installed.
    pub(crate) fn emit(&self, record_type: u8, thread: ThreadId, argument: Option<Tick>) {
        if let Some(hook) = &self.inner.trace {
            let payload = spy::thread_payload(thread.0, argument);
            let _ = hook(record_type, &payload, Some(self.now()));
        }
    }
}
