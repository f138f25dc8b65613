//! Thread dispatching.
//!
//! All scheduler state lives in [`SchedState`] and is only modified with
//! interrupts disabled. Exactly one thread is running at any time; the idle
//! thread runs when the ready queue is empty and is never queued itself.
//! A finishing thread cannot reclaim its own execution context, so it leaves
//! itself in `to_be_destroyed` and the next dispatched thread destroys it.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, trace};
use machine::{InterruptGate, Tcb, Tick};
use parking_lot::MutexGuard;
use spy::records;

use crate::kernel::{Kernel, KernelError};
use crate::queue::ThreadQueue;
use crate::thread::{KThread, ThreadId, ThreadInfo, ThreadStatus};

/// Body of a thread, invoked once.
pub(crate) type Runnable = Box<dyn FnOnce() + Send>;

pub(crate) struct ThreadRecord {
    pub(crate) name: Arc<str>,
    pub(crate) status: ThreadStatus,
    pub(crate) tcb: Tcb,
    pub(crate) target: Option<Runnable>,
    pub(crate) joiner: Option<ThreadId>,
    pub(crate) wake_deadline: Option<Tick>,
}

impl ThreadRecord {
    fn new(name: Arc<str>, tcb: Tcb, target: Option<Runnable>) -> Self {
        Self {
            name,
            status: ThreadStatus::New,
            tcb,
            target,
            joiner: None,
            wake_deadline: None,
        }
    }

    /// Record for the thread that is already executing at boot.
    pub(crate) fn running(name: Arc<str>, tcb: Tcb) -> Self {
        Self {
            status: ThreadStatus::Running,
            ..Self::new(name, tcb, None)
        }
    }
}

pub(crate) struct SchedState {
    threads: BTreeMap<ThreadId, ThreadRecord>,
    ready: Box<dyn ThreadQueue>,
    current: ThreadId,
    idle: Option<ThreadId>,
    to_be_destroyed: Option<ThreadId>,
    next_id: u32,
}

impl SchedState {
    pub(crate) fn new(main: ThreadRecord, ready: Box<dyn ThreadQueue>) -> Self {
        let mut threads = BTreeMap::new();
        threads.insert(ThreadId(0), main);
        Self {
            threads,
            ready,
            current: ThreadId(0),
            idle: None,
            to_be_destroyed: None,
            next_id: 1,
        }
    }

    fn record(&self, id: ThreadId) -> &ThreadRecord {
        match self.threads.get(&id) {
            Some(record) => record,
            None => panic!("thread {id} does not exist"),
        }
    }

    fn record_mut(&mut self, id: ThreadId) -> &mut ThreadRecord {
        match self.threads.get_mut(&id) {
            Some(record) => record,
            None => panic!("thread {id} does not exist"),
        }
    }

    /// Destroyed threads leave the table, so an allocated id without a record
    /// belongs to a finished thread.
    fn status(&self, id: ThreadId) -> ThreadStatus {
        match self.threads.get(&id) {
            Some(record) => record.status,
            None if id.0 < self.next_id => ThreadStatus::Finished,
            None => panic!("thread {id} does not exist"),
        }
    }

    fn name(&self, id: ThreadId) -> Arc<str> {
        self.threads
            .get(&id)
            .map(|record| Arc::clone(&record.name))
            .unwrap_or_else(|| Arc::from("(destroyed thread)"))
    }
}

impl Kernel {
    fn state(&self) -> MutexGuard<'_, SchedState> {
        self.inner().scheduler.lock(self.interrupt())
    }

    fn read_state<R>(&self, f: impl FnOnce(&SchedState) -> R) -> R {
        self.inner().scheduler.read(f)
    }

    fn describe(&self, id: ThreadId) -> String {
        format!("{} ({id})", self.read_state(|state| state.name(id)))
    }

    pub(crate) fn current_id(&self) -> ThreadId {
        self.read_state(|state| state.current)
    }

    /// Handle to the thread that is running.
    pub fn current_thread(&self) -> KThread {
        let (id, name) = self.read_state(|state| (state.current, state.name(state.current)));
        KThread::from_parts(self.clone(), id, name)
    }

    /// Snapshot of every thread whose context has not been reclaimed yet.
    pub fn threads(&self) -> Vec<ThreadInfo> {
        self.read_state(|state| {
            state
                .threads
                .iter()
                .map(|(&id, record)| ThreadInfo {
                    id,
                    name: Arc::clone(&record.name),
                    status: record.status,
                    wake_deadline: record.wake_deadline,
                    joiner: record.joiner,
                })
                .collect()
        })
    }

    /// Number of threads waiting in the ready queue.
    pub fn ready_len(&self) -> usize {
        self.read_state(|state| state.ready.len())
    }

    pub(crate) fn status_of(&self, id: ThreadId) -> ThreadStatus {
        self.read_state(|state| state.status(id))
    }

    pub(crate) fn register_thread(&self, name: Arc<str>, target: Option<Runnable>) -> ThreadId {
        let interrupt = self.interrupt();
        let status = interrupt.disable();
        let id = {
            let mut state = self.state();
            let id = ThreadId(state.next_id);
            state.next_id += 1;
            let tcb = Tcb::new(self.machine(), format!("kthread-{}", id.0));
            state.threads.insert(id, ThreadRecord::new(name, tcb, target));
            id
        };
        interrupt.restore(status);
        id
    }

    pub(crate) fn with_new_thread(&self, id: ThreadId, f: impl FnOnce(&mut ThreadRecord)) {
        let interrupt = self.interrupt();
        let status = interrupt.disable();
        {
            let mut state = self.state();
            let record = state.record_mut(id);
            assert_eq!(
                record.status,
                ThreadStatus::New,
                "thread {id} was already forked"
            );
            f(record);
        }
        interrupt.restore(status);
    }

    pub(crate) fn context_for_fork(&self, id: ThreadId) -> Tcb {
        let state = self.state();
        let record = state.record(id);
        assert_eq!(
            record.status,
            ThreadStatus::New,
            "only a new thread can be forked"
        );
        assert!(record.target.is_some(), "thread {id} has no target to run");
        record.tcb.clone()
    }

    /// Records the current thread as the joiner of `id`. Returns whether the
    /// caller has to block.
    pub(crate) fn register_joiner(&self, id: ThreadId) -> bool {
        let mut state = self.state();
        let current = state.current;
        match state.threads.get_mut(&id) {
            None => false,
            Some(record) if record.status == ThreadStatus::Finished => false,
            Some(record) => {
                if let Some(joiner) = record.joiner {
                    panic!(
                        "thread {id} already has a joiner ({joiner}); only one thread may join it"
                    );
                }
                record.joiner = Some(current);
                true
            }
        }
    }

    pub(crate) fn set_wake_deadline(&self, id: ThreadId, deadline: Option<Tick>) {
        self.state().record_mut(id).wake_deadline = deadline;
    }

    /// Moves `id` to the ready state. The idle thread is never queued.
    pub(crate) fn ready_thread(&self, id: ThreadId) {
        {
            let mut state = self.state();
            let is_idle = state.idle == Some(id);
            let record = state.record_mut(id);
            assert_ne!(
                record.status,
                ThreadStatus::Ready,
                "thread {id} is already ready"
            );
            assert_ne!(
                record.status,
                ThreadStatus::Finished,
                "finished thread {id} cannot be readied"
            );
            record.status = ThreadStatus::Ready;
            if !is_idle {
                state.ready.wait_for_access(id);
            }
        }
        debug!("Ready thread: {}", self.describe(id));
        self.emit(records::thread::READY, id, None);
    }

    /// Gives up the processor if another thread is ready. The caller stays
    /// ready and runs again when the scheduler picks it.
    pub fn yield_now(&self) {
        let interrupt = self.interrupt();
        let status = interrupt.disable();

        let current = {
            let state = self.state();
            assert_eq!(
                state.record(state.current).status,
                ThreadStatus::Running,
                "only the running thread can yield"
            );
            state.current
        };
        debug!("Yielding thread: {}", self.describe(current));

        self.ready_thread(current);
        self.run_next_thread();

        interrupt.restore(status);
    }

    /// Blocks the current thread until another thread readies it.
    /// Interrupts must be disabled, and the caller must have arranged for
    /// someone to ready it.
    ///
    /// # Panics
    ///
    /// Panics if interrupts are enabled.
    pub fn sleep(&self) {
        assert!(
            self.interrupt().is_disabled(),
            "sleep requires interrupts to be disabled"
        );

        let (current, blocked) = {
            let mut state = self.state();
            let current = state.current;
            let record = state.record_mut(current);
            let blocked = record.status != ThreadStatus::Finished;
            if blocked {
                record.status = ThreadStatus::Blocked;
            }
            (current, blocked)
        };
        debug!("Sleeping thread: {}", self.describe(current));
        if blocked {
            self.emit(records::thread::BLOCKED, current, None);
        }

        self.run_next_thread();
    }

    /// Finishes the current thread. Its joiner, if any, becomes ready and the
    /// execution context is reclaimed by the next thread to run.
    ///
    /// # Panics
    ///
    /// Panics when called by the main or the idle thread.
    pub fn finish(&self) -> ! {
        let interrupt = self.interrupt();
        let _status = interrupt.disable();

        let (current, joiner) = {
            let mut state = self.state();
            let current = state.current;
            assert_ne!(state.idle, Some(current), "the idle thread cannot finish");
            assert!(
                state.to_be_destroyed.is_none(),
                "a finished thread is still waiting to be destroyed"
            );
            let record = state.record_mut(current);
            assert!(
                !record.tcb.is_primary(),
                "the main thread cannot finish; halt the kernel instead"
            );
            record.status = ThreadStatus::Finished;
            let joiner = record.joiner.take();
            state.to_be_destroyed = Some(current);
            (current, joiner)
        };
        debug!("Finishing thread: {}", self.describe(current));
        self.emit(records::thread::FINISHING, current, None);

        if let Some(joiner) = joiner {
            self.ready_thread(joiner);
        }
        self.sleep();
        unreachable!("finished thread {current} was dispatched again");
    }

    fn run_next_thread(&self) {
        let (next, idle) = {
            let mut state = self.state();
            match state.ready.next_thread() {
                Some(next) => (next, false),
                None => match state.idle {
                    Some(idle) => (idle, true),
                    None => panic!("no thread is ready to run"),
                },
            }
        };
        if idle {
            self.emit(records::thread::IDLE, next, None);
        }
        self.switch_to(next);
    }

    fn switch_to(&self, next: ThreadId) {
        let (previous, tcb) = {
            let mut state = self.state();
            let previous = state.current;
            state.current = next;
            (previous, state.record(next).tcb.clone())
        };
        trace!("Switching from {previous} to {next}");

        tcb.context_switch();

        self.restore_state();
    }

    /// Runs on every thread right after it receives the processor.
    fn restore_state(&self) {
        let (current, doomed) = {
            let mut state = self.state();
            let current = state.current;
            let record = state.record_mut(current);
            debug_assert!(
                record.tcb.is_current(),
                "thread {current} resumed on a foreign context"
            );
            record.status = ThreadStatus::Running;
            let doomed = state
                .to_be_destroyed
                .take()
                .and_then(|id| state.threads.remove(&id));
            (current, doomed)
        };
        self.emit(records::thread::RUNNING, current, None);

        if let Some(record) = doomed {
            trace!("Destroying context of {}", record.name);
            record.tcb.destroy();
        }
    }

    pub(crate) fn run_thread(&self, id: ThreadId) {
        let target = self.begin(id);
        target();
        self.finish();
    }

    /// First steps of a freshly dispatched thread. Returns its target.
    fn begin(&self, id: ThreadId) -> Runnable {
        debug!("Beginning thread: {}", self.describe(id));
        assert_eq!(self.current_id(), id, "thread {id} started out of turn");

        self.restore_state();
        let target = self.state().record_mut(id).target.take();
        self.interrupt().enable();

        match target {
            Some(target) => target,
            None => panic!("thread {id} has no target to run"),
        }
    }

    pub(crate) fn create_idle_thread(&self) -> Result<(), KernelError> {
        let kernel = self.clone();
        let idle = KThread::with_target(self, move || kernel.idle_loop())
            .named(self.inner().config.idle_name);

        let interrupt = self.interrupt();
        let status = interrupt.disable();
        self.state().idle = Some(idle.id());
        interrupt.restore(status);

        idle.fork()
    }

    fn idle_loop(&self) -> ! {
        loop {
            if self.inner().config.deadlock_detection {
                self.check_deadlock();
            }
            self.interrupt().idle();
            self.yield_now();
        }
    }

    /// With nothing ready and no alarm pending, no event can ever ready a
    /// thread again.
    fn check_deadlock(&self) {
        let interrupt = self.interrupt();
        let status = interrupt.disable();
        let stuck = self.state().ready.is_empty() && self.pending_alarms() == 0;
        interrupt.restore(status);

        if stuck {
            let blocked: Vec<String> = self
                .threads()
                .into_iter()
                .filter(|info| info.status == ThreadStatus::Blocked)
                .map(|info| format!("{} ({})", info.name, info.id))
                .collect();
            self.machine().crash(format!(
                "deadlock: every thread is blocked and no alarm is pending [{}]",
                blocked.join(", ")
            ));
        }
    }
}
