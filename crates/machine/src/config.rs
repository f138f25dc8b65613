//! Machine sizing and timing configuration.

use crate::{MachineError, Tick};

/// Clock advance charged to every interrupt re-enable.
pub const DEFAULT_KERNEL_TICK: Tick = 10;

/// Interval between two timer interrupts.
pub const DEFAULT_TIMER_PERIOD: Tick = 500;

/// Configuration for the simulated machine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MachineConfig {
    /// Ticks charged whenever interrupts go from disabled to enabled.
    pub kernel_tick: Tick,
    /// Ticks between two timer interrupts.
    pub timer_period: Tick,
    /// Crash the machine once the clock passes this tick.
    pub max_ticks: Option<Tick>,
    /// Host stack size for execution contexts, `None` keeps the platform default.
    pub stack_size: Option<usize>,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            kernel_tick: DEFAULT_KERNEL_TICK,
            timer_period: DEFAULT_TIMER_PERIOD,
            max_ticks: None,
            stack_size: None,
        }
    }
}

impl MachineConfig {
    /// Creates a new machine configuration builder.
    pub fn builder() -> MachineConfigBuilder {
        MachineConfigBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<(), MachineError> {
        if self.kernel_tick == 0 {
            return Err(MachineError::InvalidConfig("kernel_tick must be non-zero"));
        }
        if self.timer_period == 0 {
            return Err(MachineError::InvalidConfig("timer_period must be non-zero"));
        }
        if matches!(self.stack_size, Some(0)) {
            return Err(MachineError::InvalidConfig("stack_size must be non-zero"));
        }
        Ok(())
    }
}

/// Builder for ergonomic machine configuration construction.
#[derive(Debug, Clone, Default)]
pub struct MachineConfigBuilder {
    config: MachineConfig,
}

impl MachineConfigBuilder {
    /// Sets the clock advance charged to every interrupt re-enable.
    pub fn kernel_tick(mut self, ticks: Tick) -> Self {
        self.config.kernel_tick = ticks;
        self
    }

    /// Sets the interval between timer interrupts.
    pub fn timer_period(mut self, ticks: Tick) -> Self {
        self.config.timer_period = ticks;
        self
    }

    /// Crashes the machine when the clock passes `ticks`.
    pub fn max_ticks(mut self, ticks: Tick) -> Self {
        self.config.max_ticks = Some(ticks);
        self
    }

    /// Sets the host stack size of every execution context.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = Some(bytes);
        self
    }

    /// Builds the machine configuration.
    pub fn build(self) -> MachineConfig {
        self.config
    }
}
