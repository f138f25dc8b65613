//! Simulated single-core processor for the kernel thread library.
//!
//! The machine offers the narrow hardware interfaces the kernel is written
//! against:
//!
//! - [`Clock`]: monotonic tick counter, driven by the [`Timer`].
//! - [`InterruptGate`]: interrupt masking with save/restore tokens.
//! - [`Tcb`]: execution contexts with `start`, `context_switch` and `destroy`.
//!
//! Time is simulated. It advances by one kernel tick whenever interrupts are
//! re-enabled and jumps to the next timer interrupt while the processor idles,
//! so runs are reproducible and fast regardless of host speed.

use std::io;
use std::sync::Arc;

use thiserror::Error;

pub mod config;
pub mod interrupt;
mod power;
pub mod tcb;
pub mod timer;

pub use config::{MachineConfig, MachineConfigBuilder};
pub use interrupt::{IntStatus, Interrupt};
pub use tcb::Tcb;
pub use timer::{Stats, Timer, TimerHandler};

use power::Power;

/// Simulated time unit.
pub type Tick = u64;

/// Monotonic source of simulated time.
pub trait Clock {
    /// Current number of ticks since the machine was created.
    fn now(&self) -> Tick;
}

/// Interrupt masking. Masked sections nest by restoring the saved status.
pub trait InterruptGate {
    /// Disables interrupts and returns the previous status.
    fn disable(&self) -> IntStatus;
    /// Enables interrupts.
    fn enable(&self);
    /// Restores a status returned by [`InterruptGate::disable`].
    fn restore(&self, status: IntStatus);
    /// Whether interrupts are currently disabled.
    fn is_disabled(&self) -> bool;
}

/// Errors raised while configuring or driving the machine.
#[derive(Error, Debug)]
pub enum MachineError {
    #[error("invalid machine configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to spawn execution context: {0}")]
    Spawn(#[from] io::Error),
}

/// The simulated processor.
pub struct Machine {
    config: MachineConfig,
    interrupt: Interrupt,
    timer: Arc<Timer>,
    power: Arc<Power>,
}

impl Machine {
    /// Powers on a machine. Interrupts start disabled.
    pub fn new(config: MachineConfig) -> Result<Arc<Self>, MachineError> {
        config.validate()?;
        let power = Arc::new(Power::new());
        let timer = Arc::new(Timer::new(config.timer_period));
        let interrupt = Interrupt::new(
            config.kernel_tick,
            config.max_ticks,
            Arc::clone(&timer),
            Arc::clone(&power),
        );
        Ok(Arc::new(Self {
            config,
            interrupt,
            timer,
            power,
        }))
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn timer(&self) -> &Timer {
        &self.timer
    }

    pub fn stats(&self) -> Stats {
        self.timer.stats()
    }

    /// Stops the machine. Parked contexts unwind and their host threads exit.
    pub fn halt(&self) {
        self.power.halt();
    }

    pub fn is_halted(&self) -> bool {
        self.power.is_halted()
    }

    /// Records a fatal diagnostic, halts, and unwinds the calling context.
    /// The diagnostic is re-raised as a panic on the primary context.
    pub fn crash(&self, reason: impl Into<String>) -> ! {
        self.power.crash(reason.into())
    }

    pub(crate) fn power(&self) -> &Arc<Power> {
        &self.power
    }
}

impl Clock for Machine {
    fn now(&self) -> Tick {
        self.timer.now()
    }
}
