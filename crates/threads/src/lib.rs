//! Cooperative kernel threads on a simulated single-core processor.
//!
//! The crate provides a thread scheduler and the synchronization primitives
//! built on top of it:
//!
//! - [`KThread`]: fork, join, yield, sleep, finish.
//! - [`Lock`]: blocking mutual exclusion with FIFO hand-off.
//! - [`Condition`]: condition variables bound to a [`Lock`].
//! - [`Alarm`]: timed sleep driven by the machine timer.
//! - [`Communicator`]: synchronous rendezvous between speakers and listeners.
//!
//! Mutual exclusion inside the kernel relies solely on disabling interrupts.
//! Exactly one thread runs at a time; when none is ready, the idle thread
//! waits for the next timer interrupt.
//!
//! ```no_run
//! use threads::{Kernel, KernelError};
//!
//! fn main() -> Result<(), KernelError> {
//!     let kernel = Kernel::builder().boot()?;
//!     kernel.run(|kernel| {
//!         let worker = kernel.spawn("worker", || println!("hello from a kernel thread"))?;
//!         worker.join();
//!         Ok(())
//!     })
//! }
//! ```

pub mod alarm;
pub mod communicator;
pub mod condition;
pub mod kernel;
pub mod lock;
pub mod queue;
mod scheduler;
mod sync;
pub mod thread;

pub use alarm::Alarm;
pub use communicator::Communicator;
pub use condition::Condition;
pub use kernel::{Kernel, KernelBuilder, KernelConfig, KernelConfigBuilder, KernelError};
pub use lock::Lock;
pub use queue::{FifoQueue, ThreadQueue};
pub use thread::{KThread, ThreadId, ThreadInfo, ThreadStatus};

pub use machine::{Clock, MachineConfig, Tick};
pub use spy::{records, TraceHook};
