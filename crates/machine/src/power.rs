//! Power state of the machine: halting and fault propagation.

use std::any::Any;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::warn;
use parking_lot::Mutex;

use crate::tcb::{Context, Tcb};

pub(crate) type Payload = Box<dyn Any + Send + 'static>;

/// Unwind payload that stops a parked context once the machine halts or the
/// context is destroyed. Never reported as a failure.
pub(crate) struct ContextExit;

pub(crate) struct Power {
    halted: AtomicBool,
    fault: Mutex<Option<Payload>>,
    contexts: Mutex<Vec<Weak<Context>>>,
}

impl Power {
    pub(crate) fn new() -> Self {
        Self {
            halted: AtomicBool::new(false),
            fault: Mutex::new(None),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub(crate) fn register(&self, context: &Arc<Context>) {
        let mut contexts = self.contexts.lock();
        contexts.retain(|weak| weak.strong_count() > 0);
        contexts.push(Arc::downgrade(context));
    }

    /// Stops the machine. Every parked context wakes up and unwinds.
    pub(crate) fn halt(&self) {
        if self.halted.swap(true, Ordering::SeqCst) {
            return;
        }
        let contexts: Vec<Arc<Context>> = self
            .contexts
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for context in contexts {
            context.wake_all();
        }
    }

    /// Records the first fault and halts. The primary context re-raises it.
    pub(crate) fn fault(&self, payload: Payload) {
        {
            let mut fault = self.fault.lock();
            if fault.is_none() {
                *fault = Some(payload);
            }
        }
        self.halt();
    }

    pub(crate) fn crash(&self, reason: String) -> ! {
        warn!("machine crashed: {reason}");
        self.fault(Box::new(reason));
        self.unwind(Tcb::current_is_primary())
    }

    /// Leaves the calling context after a halt.
    pub(crate) fn unwind(&self, primary: bool) -> ! {
        if primary {
            let fault = self.fault.lock().take();
            match fault {
                Some(payload) => panic::resume_unwind(payload),
                None => panic!("machine halted"),
            }
        }
        panic::resume_unwind(Box::new(ContextExit))
    }
}
