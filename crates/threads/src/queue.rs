//! Thread queues.
//!
//! The scheduler keeps its ready threads in a [`ThreadQueue`]; locks and
//! condition variables keep their waiters in a [`FifoQueue`]. Queues hold
//! thread ids only, never the threads themselves.

use std::collections::VecDeque;

use crate::thread::ThreadId;

/// Ordering policy for threads waiting for the processor.
pub trait ThreadQueue: Send {
    /// Adds a thread that is waiting for access.
    fn wait_for_access(&mut self, thread: ThreadId);

    /// Removes and returns the thread that should run next.
    fn next_thread(&mut self) -> Option<ThreadId>;

    /// Number of waiting threads.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `thread` is waiting in this queue.
    fn contains(&self, thread: ThreadId) -> bool;
}

/// First-in first-out queue, the default scheduling policy.
#[derive(Debug, Default, Clone)]
pub struct FifoQueue {
    threads: VecDeque<ThreadId>,
}

impl FifoQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ThreadQueue for FifoQueue {
    fn wait_for_access(&mut self, thread: ThreadId) {
        self.threads.push_back(thread);
    }

    fn next_thread(&mut self) -> Option<ThreadId> {
        self.threads.pop_front()
    }

    fn len(&self) -> usize {
        self.threads.len()
    }

    fn contains(&self, thread: ThreadId) -> bool {
        self.threads.contains(&thread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_releases_in_arrival_order() {
        let mut queue = FifoQueue::new();
        for id in [4, 2, 9] {
            queue.wait_for_access(ThreadId(id));
        }

        assert_eq!(queue.len(), 3);
        assert!(queue.contains(ThreadId(2)));
        assert_eq!(queue.next_thread(), Some(ThreadId(4)));
        assert_eq!(queue.next_thread(), Some(ThreadId(2)));
        assert_eq!(queue.next_thread(), Some(ThreadId(9)));
        assert_eq!(queue.next_thread(), None);
        assert!(queue.is_empty());
    }
}
