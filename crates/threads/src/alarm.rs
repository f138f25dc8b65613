//! Timed sleep driven by the machine timer.
//!
//! Threads register a wake deadline and block. Every timer interrupt scans the
//! registry, readies each thread whose deadline has passed, and makes the
//! interrupted thread yield. A sleeper therefore resumes on the first timer
//! interrupt at or after its deadline, possibly up to one timer period late.

use log::debug;
use machine::{InterruptGate, Tick};
use spy::records;

use crate::kernel::Kernel;
use crate::thread::ThreadId;

#[derive(Debug, Clone, Copy)]
struct Sleeper {
    thread: ThreadId,
    deadline: Tick,
}

/// Threads waiting for a deadline, in registration order.
#[derive(Debug, Default)]
pub(crate) struct SleepRegistry {
    sleepers: Vec<Sleeper>,
}

impl SleepRegistry {
    fn insert(&mut self, thread: ThreadId, deadline: Tick) {
        assert!(
            !self.sleepers.iter().any(|sleeper| sleeper.thread == thread),
            "thread {thread} is already waiting on the alarm"
        );
        self.sleepers.push(Sleeper { thread, deadline });
    }

    /// Removes every sleeper whose deadline is at or before `now`.
    fn take_due(&mut self, now: Tick) -> Vec<ThreadId> {
        let mut due = Vec::new();
        self.sleepers.retain(|sleeper| {
            if sleeper.deadline <= now {
                due.push(sleeper.thread);
                false
            } else {
                true
            }
        });
        due
    }

    pub(crate) fn len(&self) -> usize {
        self.sleepers.len()
    }
}

/// Handle to the kernel alarm.
#[derive(Clone)]
pub struct Alarm {
    kernel: Kernel,
}

impl Alarm {
    pub(crate) fn new(kernel: Kernel) -> Self {
        Self { kernel }
    }

    /// Registers the alarm as the machine's timer interrupt handler.
    pub(crate) fn install(kernel: &Kernel) {
        let weak = kernel.downgrade();
        kernel.machine().timer().set_interrupt_handler(move || {
            if let Some(kernel) = Kernel::upgrade(&weak) {
                Alarm::new(kernel).timer_interrupt();
            }
        });
    }

    /// Blocks the current thread for at least `ticks` ticks.
    ///
    /// The thread wakes on the first timer interrupt at or after
    /// `now + ticks`. Waiting zero ticks still waits for the next interrupt.
    pub fn wait_until(&self, ticks: Tick) {
        let kernel = &self.kernel;
        let deadline = kernel.now().saturating_add(ticks);

        let interrupt = kernel.interrupt();
        let status = interrupt.disable();

        let current = kernel.current_id();
        debug!("Thread {current} waiting until tick {deadline}");
        kernel.sleepers().insert(current, deadline);
        kernel.set_wake_deadline(current, Some(deadline));
        kernel.emit(records::alarm::SLEEP, current, Some(deadline));
        kernel.sleep();

        interrupt.restore(status);
    }

    /// Number of threads waiting for their deadline.
    pub fn sleeping(&self) -> usize {
        self.kernel.pending_alarms()
    }

    /// Timer interrupt handler: wakes every due sleeper, then preempts the
    /// running thread.
    fn timer_interrupt(&self) {
        self.wake_due_threads();
        self.kernel.yield_now();
    }

    fn wake_due_threads(&self) {
        let kernel = &self.kernel;
        let interrupt = kernel.interrupt();
        let status = interrupt.disable();

        let now = kernel.now();
        let due = kernel.sleepers().take_due(now);
        for thread in due {
            debug!("Waking thread {thread} at tick {now}");
            kernel.set_wake_deadline(thread, None);
            kernel.emit(records::alarm::WAKE, thread, Some(now));
            kernel.ready_thread(thread);
        }

        interrupt.restore(status);
    }
}
