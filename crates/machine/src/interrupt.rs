//! Interrupt controller of the simulated processor.
//!
//! Disabling interrupts is the only mutual exclusion the kernel relies on.
//! Callers save the previous state and restore it afterwards so masked
//! sections nest. Every transition from disabled to enabled charges one kernel
//! tick to the clock and services the timer interrupt if it became due.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::trace;

use crate::power::Power;
use crate::timer::Timer;
use crate::{InterruptGate, Tick};

/// Interrupt state saved by [`InterruptGate::disable`].
#[must_use = "the previous interrupt state must be restored"]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntStatus {
    Enabled,
    Disabled,
}

impl IntStatus {
    fn from_enabled(enabled: bool) -> Self {
        if enabled {
            IntStatus::Enabled
        } else {
            IntStatus::Disabled
        }
    }
}

/// Interrupt controller.
pub struct Interrupt {
    enabled: AtomicBool,
    kernel_tick: Tick,
    max_ticks: Option<Tick>,
    timer: Arc<Timer>,
    power: Arc<Power>,
}

impl Interrupt {
    pub(crate) fn new(
        kernel_tick: Tick,
        max_ticks: Option<Tick>,
        timer: Arc<Timer>,
        power: Arc<Power>,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(false),
            kernel_tick,
            max_ticks,
            timer,
            power,
        }
    }

    /// Waits for the next interrupt: the clock jumps to the next timer
    /// interrupt, which is then serviced.
    pub fn idle(&self) {
        let status = self.disable();
        let now = self.timer.skip_to_next_interrupt();
        self.check_tick_limit(now);
        self.check_if_due();
        self.restore(status);
    }

    fn set_status(&self, status: IntStatus) -> IntStatus {
        let enable = status == IntStatus::Enabled;
        let previous = IntStatus::from_enabled(self.enabled.swap(enable, Ordering::SeqCst));
        if previous == IntStatus::Disabled && enable {
            self.tick();
        }
        previous
    }

    fn tick(&self) {
        let now = self.timer.advance(self.kernel_tick);
        self.check_tick_limit(now);

        self.enabled.store(false, Ordering::SeqCst);
        self.check_if_due();
        self.enabled.store(true, Ordering::SeqCst);
    }

    fn check_if_due(&self) {
        if let Some(handler) = self.timer.take_due() {
            trace!("servicing timer interrupt");
            handler();
        }
    }

    fn check_tick_limit(&self, now: Tick) {
        if let Some(limit) = self.max_ticks {
            if now > limit {
                self.power
                    .crash(format!("tick limit of {limit} exceeded at tick {now}"));
            }
        }
    }
}

impl InterruptGate for Interrupt {
    fn disable(&self) -> IntStatus {
        self.set_status(IntStatus::Disabled)
    }

    fn enable(&self) {
        let _ = self.set_status(IntStatus::Enabled);
    }

    fn restore(&self, status: IntStatus) {
        let _ = self.set_status(status);
    }

    fn is_disabled(&self) -> bool {
        !self.enabled.load(Ordering::SeqCst)
    }
}
