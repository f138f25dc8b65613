//! Simulated clock and periodic timer device.
//!
//! The clock only moves when the machine charges time to it: one kernel tick
//! per interrupt re-enable, or a jump to the next timer interrupt while the
//! processor idles. The timer raises its interrupt every `period` ticks and
//! invokes the registered handler with interrupts disabled.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::{Clock, Tick};

/// Handler invoked on every timer interrupt.
pub type TimerHandler = Arc<dyn Fn() + Send + Sync>;

/// Counters describing how simulated time was spent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    /// Current value of the clock.
    pub total_ticks: Tick,
    /// Ticks charged to interrupt re-enables.
    pub kernel_ticks: Tick,
    /// Ticks skipped while the processor idled.
    pub idle_ticks: Tick,
    /// Number of timer interrupts serviced.
    pub timer_interrupts: u64,
}

#[derive(Debug)]
struct TimerState {
    stats: Stats,
    next_interrupt: Tick,
}

/// Periodic timer device and the clock it drives.
pub struct Timer {
    period: Tick,
    state: Mutex<TimerState>,
    handler: Mutex<Option<TimerHandler>>,
}

impl Timer {
    pub(crate) fn new(period: Tick) -> Self {
        Self {
            period,
            state: Mutex::new(TimerState {
                stats: Stats::default(),
                next_interrupt: period,
            }),
            handler: Mutex::new(None),
        }
    }

    /// Registers the handler invoked on every timer interrupt, replacing any
    /// previous one.
    pub fn set_interrupt_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.handler.lock() = Some(Arc::new(handler));
    }

    /// Interval between two timer interrupts.
    pub fn period(&self) -> Tick {
        self.period
    }

    /// Tick at which the next timer interrupt is raised.
    pub fn next_interrupt(&self) -> Tick {
        self.state.lock().next_interrupt
    }

    /// Snapshot of the time accounting counters.
    pub fn stats(&self) -> Stats {
        self.state.lock().stats
    }

    /// Charges `ticks` of kernel time and returns the new clock value.
    pub(crate) fn advance(&self, ticks: Tick) -> Tick {
        let mut state = self.state.lock();
        state.stats.kernel_ticks = state.stats.kernel_ticks.saturating_add(ticks);
        state.stats.total_ticks = state.stats.total_ticks.saturating_add(ticks);
        state.stats.total_ticks
    }

    /// Jumps the clock forward to the next timer interrupt and returns the new
    /// clock value.
    pub(crate) fn skip_to_next_interrupt(&self) -> Tick {
        let mut state = self.state.lock();
        let now = state.stats.total_ticks;
        if state.next_interrupt > now {
            let skipped = state.next_interrupt - now;
            state.stats.idle_ticks = state.stats.idle_ticks.saturating_add(skipped);
            state.stats.total_ticks = state.next_interrupt;
        }
        state.stats.total_ticks
    }

    /// Returns the handler to run if the timer interrupt is due, scheduling
    /// the following interrupt one period from now.
    pub(crate) fn take_due(&self) -> Option<TimerHandler> {
        {
            let mut state = self.state.lock();
            let now = state.stats.total_ticks;
            if now < state.next_interrupt {
                return None;
            }
            state.next_interrupt = now.saturating_add(self.period);
            state.stats.timer_interrupts += 1;
            trace!(
                "timer interrupt #{} at tick {now}",
                state.stats.timer_interrupts
            );
        }
        self.handler.lock().clone()
    }
}

impl Clock for Timer {
    fn now(&self) -> Tick {
        self.state.lock().stats.total_ticks
    }
}
