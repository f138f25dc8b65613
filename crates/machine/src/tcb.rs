//! Execution contexts (thread control blocks).
//!
//! Every context is backed by a host thread, but only the context holding the
//! baton executes; all others are parked on their condition variable. A
//! context switch hands the baton to the target and parks the caller until the
//! baton comes back. The bootstrap context is the host thread that created the
//! kernel, adopted with [`Tcb::adopt_current`].
//!
//! Parked contexts leave through an unwind when they are destroyed or when the
//! machine halts. A panic raised inside a context is recorded as the machine
//! fault and re-raised on the primary context.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use log::trace;
use parking_lot::{Condvar, Mutex};

use crate::power::{ContextExit, Power};
use crate::{Machine, MachineError};

thread_local! {
    static CURRENT: RefCell<Option<Tcb>> = const { RefCell::new(None) };
}

#[derive(Debug, Default)]
struct Turn {
    running: bool,
    started: bool,
    destroyed: bool,
}

pub(crate) struct Context {
    name: String,
    primary: bool,
    stack_size: Option<usize>,
    turn: Mutex<Turn>,
    wakeup: Condvar,
    power: Arc<Power>,
}

impl Context {
    pub(crate) fn wake_all(&self) {
        let _turn = self.turn.lock();
        self.wakeup.notify_all();
    }
}

/// Handle to an execution context.
#[derive(Clone)]
pub struct Tcb {
    inner: Arc<Context>,
}

impl Tcb {
    /// Turns the calling host thread into the running primary context.
    pub fn adopt_current(machine: &Machine) -> Tcb {
        let name = thread::current().name().unwrap_or("main").to_owned();
        let tcb = Self::with_context(machine, name, true);
        {
            let mut turn = tcb.inner.turn.lock();
            turn.started = true;
            turn.running = true;
        }
        CURRENT.with(|current| *current.borrow_mut() = Some(tcb.clone()));
        tcb
    }

    /// Allocates a context that runs nothing until [`Tcb::start`].
    pub fn new(machine: &Machine, name: impl Into<String>) -> Tcb {
        Self::with_context(machine, name.into(), false)
    }

    fn with_context(machine: &Machine, name: String, primary: bool) -> Tcb {
        let inner = Arc::new(Context {
            name,
            primary,
            stack_size: machine.config().stack_size,
            turn: Mutex::new(Turn::default()),
            wakeup: Condvar::new(),
            power: Arc::clone(machine.power()),
        });
        machine.power().register(&inner);
        Tcb { inner }
    }

    /// Context of the calling host thread, if it has one.
    pub fn current() -> Option<Tcb> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub(crate) fn current_is_primary() -> bool {
        CURRENT.with(|current| current.borrow().as_ref().map_or(true, |tcb| tcb.inner.primary))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_primary(&self) -> bool {
        self.inner.primary
    }

    pub fn is_current(&self) -> bool {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .map_or(false, |tcb| Arc::ptr_eq(&tcb.inner, &self.inner))
        })
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.turn.lock().destroyed
    }

    /// Creates the host thread for this context. `entry` runs once the context
    /// first receives the baton and must never return while holding it.
    pub fn start<F>(&self, entry: F) -> Result<(), MachineError>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut turn = self.inner.turn.lock();
            assert!(!turn.started, "context {} started twice", self.inner.name);
            turn.started = true;
        }

        let mut builder = thread::Builder::new().name(self.inner.name.clone());
        if let Some(size) = self.inner.stack_size {
            builder = builder.stack_size(size);
        }
        let tcb = self.clone();
        if let Err(err) = builder.spawn(move || tcb.thread_root(entry)) {
            // The context stays startable.
            self.inner.turn.lock().started = false;
            return Err(err.into());
        }
        Ok(())
    }

    fn thread_root<F>(self, entry: F)
    where
        F: FnOnce(),
    {
        CURRENT.with(|current| *current.borrow_mut() = Some(self.clone()));

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.wait_for_turn();
            entry();
        }));
        match outcome {
            Ok(()) => self.inner.power.fault(Box::new(format!(
                "execution context {} returned while running",
                self.inner.name
            ))),
            Err(payload) if payload.is::<ContextExit>() => {}
            Err(payload) => self.inner.power.fault(payload),
        }

        CURRENT.with(|current| current.borrow_mut().take());
    }

    /// Hands the baton from the calling context to this one and parks the
    /// caller until some context switches back to it.
    pub fn context_switch(&self) {
        let Some(current) = Tcb::current() else {
            panic!("context switch requested outside of an execution context");
        };
        if self.inner.power.is_halted() {
            current.inner.power.unwind(current.inner.primary);
        }
        if Arc::ptr_eq(&current.inner, &self.inner) {
            return;
        }

        trace!("context switch {} -> {}", current.inner.name, self.inner.name);
        current.inner.turn.lock().running = false;
        {
            let mut turn = self.inner.turn.lock();
            assert!(turn.started, "context {} was never started", self.inner.name);
            assert!(!turn.destroyed, "context {} was destroyed", self.inner.name);
            turn.running = true;
        }
        self.inner.wakeup.notify_all();

        current.wait_for_turn();
    }

    /// Reclaims a parked context. Its host thread unwinds and exits.
    pub fn destroy(&self) {
        {
            let mut turn = self.inner.turn.lock();
            assert!(!turn.running, "context {} destroyed while running", self.inner.name);
            turn.destroyed = true;
        }
        self.inner.wakeup.notify_all();
    }

    fn wait_for_turn(&self) {
        let mut turn = self.inner.turn.lock();
        loop {
            if self.inner.power.is_halted() || turn.destroyed {
                break;
            }
            if turn.running {
                return;
            }
            self.inner.wakeup.wait(&mut turn);
        }

        let destroyed = turn.destroyed && !self.inner.power.is_halted();
        drop(turn);
        if destroyed && self.inner.primary {
            panic!("primary execution context {} was destroyed", self.inner.name);
        }
        self.inner.power.unwind(self.inner.primary)
    }
}

impl PartialEq for Tcb {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Tcb {}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let turn = self.inner.turn.lock();
        f.debug_struct("Tcb")
            .field("name", &self.inner.name)
            .field("primary", &self.inner.primary)
            .field("running", &turn.running)
            .field("destroyed", &turn.destroyed)
            .finish()
    }
}
