//! Kernel threads.
//!
//! A [`KThread`] is a handle to a thread record owned by the [`Kernel`]. A
//! thread is created *new* with an optional target closure, becomes *ready*
//! when forked, and from then on alternates between *running*, *ready* and
//! *blocked* until its target returns and it is *finished*. The execution
//! context of a finished thread is reclaimed by the next thread to run.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use log::debug;
use machine::{InterruptGate, Tick};

use crate::kernel::{Kernel, KernelError};
use crate::scheduler::Runnable;

/// Unique thread identifier. Ids are assigned in creation order and never
/// reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Thread lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Created but not yet forked.
    New,
    /// Waiting in the ready queue.
    Ready,
    /// Owns the processor.
    Running,
    /// Waiting for another thread or the alarm to ready it.
    Blocked,
    /// Target returned; the thread never runs again.
    Finished,
}

impl fmt::Display for ThreadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ThreadStatus::New => "new",
            ThreadStatus::Ready => "ready",
            ThreadStatus::Running => "running",
            ThreadStatus::Blocked => "blocked",
            ThreadStatus::Finished => "finished",
        };
        f.write_str(text)
    }
}

/// Snapshot of one live thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: Arc<str>,
    pub status: ThreadStatus,
    pub wake_deadline: Option<Tick>,
    pub joiner: Option<ThreadId>,
}

/// Name given to threads that are never named.
pub const UNNAMED: &str = "(unnamed thread)";

/// Handle to a kernel thread.
#[derive(Clone)]
pub struct KThread {
    kernel: Kernel,
    id: ThreadId,
    name: Arc<str>,
}

impl KThread {
    /// Creates a new thread without a target. Set one with
    /// [`KThread::set_target`] before forking.
    pub fn new(kernel: &Kernel) -> Self {
        Self::create(kernel, None)
    }

    /// Creates a new thread that runs `target` once forked.
    pub fn with_target<F>(kernel: &Kernel, target: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::create(kernel, Some(Box::new(target)))
    }

    fn create(kernel: &Kernel, target: Option<Runnable>) -> Self {
        let name: Arc<str> = Arc::from(UNNAMED);
        let id = kernel.register_thread(Arc::clone(&name), target);
        Self {
            kernel: kernel.clone(),
            id,
            name,
        }
    }

    pub(crate) fn from_parts(kernel: Kernel, id: ThreadId, name: Arc<str>) -> Self {
        Self { kernel, id, name }
    }

    /// Sets the target of a thread that has not been forked yet.
    ///
    /// # Panics
    ///
    /// Panics if the thread was already forked.
    pub fn set_target<F>(self, target: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.kernel.with_new_thread(self.id, |record| {
            record.target = Some(Box::new(target));
        });
        self
    }

    /// Renames a thread that has not been forked yet.
    ///
    /// # Panics
    ///
    /// Panics if the thread was already forked.
    pub fn named(mut self, name: &str) -> Self {
        let name: Arc<str> = Arc::from(name);
        self.kernel.with_new_thread(self.id, |record| {
            record.name = Arc::clone(&name);
        });
        self.name = name;
        self
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ThreadStatus {
        self.kernel.status_of(self.id)
    }

    pub fn is_current(&self) -> bool {
        self.kernel.current_id() == self.id
    }

    /// Starts the thread: its target runs once the scheduler dispatches it.
    ///
    /// # Panics
    ///
    /// Panics if the thread is not new or has no target.
    pub fn fork(&self) -> Result<(), KernelError> {
        let interrupt = self.kernel.interrupt();
        let status = interrupt.disable();

        let tcb = self.kernel.context_for_fork(self.id);
        debug!("Forking thread: {self}");

        // The target stays in the thread record until the thread first runs,
        // so a thread whose context could not be started can be forked again.
        let kernel = self.kernel.clone();
        let id = self.id;
        if let Err(err) = tcb.start(move || kernel.run_thread(id)) {
            interrupt.restore(status);
            return Err(err.into());
        }
        self.kernel.ready_thread(self.id);

        interrupt.restore(status);
        Ok(())
    }

    /// Moves a new or blocked thread to the ready queue. Interrupts must be
    /// disabled.
    ///
    /// # Panics
    ///
    /// Panics if interrupts are enabled or the thread is already ready.
    pub fn ready(&self) {
        assert!(
            self.kernel.interrupt().is_disabled(),
            "ready requires interrupts to be disabled"
        );
        self.kernel.ready_thread(self.id);
    }

    /// Waits for this thread to finish. Returns immediately if it already has.
    ///
    /// Only one thread may wait on a given thread.
    ///
    /// # Panics
    ///
    /// Panics when a thread joins itself or when a second thread tries to
    /// join a thread that already has a joiner.
    pub fn join(&self) {
        debug!("Joining to thread: {}", self.name);
        assert!(!self.is_current(), "thread {self} cannot join itself");

        let interrupt = self.kernel.interrupt();
        let status = interrupt.disable();
        if self.kernel.register_joiner(self.id) {
            self.kernel.sleep();
        }
        interrupt.restore(status);
    }
}

impl PartialEq for KThread {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for KThread {}

impl PartialOrd for KThread {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for KThread {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for KThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) is {}", self.name, self.id, self.status())
    }
}

impl fmt::Debug for KThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KThread")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}
