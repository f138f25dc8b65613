//! Synchronous rendezvous between speakers and listeners.
//!
//! Each `speak` is paired with exactly one `listen`. Pairing uses a signed
//! counter: positive while speakers wait for a partner, negative while
//! listeners do. A thread that finds a partner waiting issues the next pair
//! number to the waiting side; otherwise it waits until a pair number is
//! issued to its own side.
//!
//! Pairs exchange their word through a single slot, strictly in pair-number
//! order. The speaker of pair `k` fills the slot only while pair `k` is being
//! served and returns once its listener has emptied it; the listener of pair
//! `k` empties the slot only while pair `k` is being served. No word is ever
//! overwritten or read by another pair.

use std::collections::VecDeque;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::condition::Condition;
use crate::kernel::Kernel;
use crate::lock::Lock;

struct Exchange<T> {
    /// Speakers waiting for a partner minus listeners waiting for one.
    pairing: i64,
    next_pair: u64,
    speaker_pairs: VecDeque<u64>,
    listener_pairs: VecDeque<u64>,
    /// Pair currently allowed to use the slot.
    serving: u64,
    slot: Option<T>,
}

impl<T> Exchange<T> {
    fn issue_pair(&mut self) -> u64 {
        let pair = self.next_pair;
        self.next_pair += 1;
        pair
    }

    fn transmitted(&self) -> bool {
        self.slot.is_some()
    }
}

/// Rendezvous point for passing words between threads. Clones share the same
/// communicator.
pub struct Communicator<T = i32> {
    lock: Lock,
    speakers: Condition,
    listeners: Condition,
    handoff: Condition,
    exchange: Arc<Mutex<Exchange<T>>>,
}

impl<T> Clone for Communicator<T> {
    fn clone(&self) -> Self {
        Self {
            lock: self.lock.clone(),
            speakers: self.speakers.clone(),
            listeners: self.listeners.clone(),
            handoff: self.handoff.clone(),
            exchange: Arc::clone(&self.exchange),
        }
    }
}

impl<T: Send + 'static> Communicator<T> {
    pub fn new(kernel: &Kernel) -> Self {
        let lock = Lock::new(kernel);
        Self {
            speakers: Condition::new(&lock),
            listeners: Condition::new(&lock),
            handoff: Condition::new(&lock),
            lock,
            exchange: Arc::new(Mutex::new(Exchange {
                pairing: 0,
                next_pair: 0,
                speaker_pairs: VecDeque::new(),
                listener_pairs: VecDeque::new(),
                serving: 0,
                slot: None,
            })),
        }
    }

    /// Waits for a listener, then transfers `word` to it. Returns once the
    /// listener has received the word.
    pub fn speak(&self, word: T) {
        self.lock.acquire();

        let pair = {
            let mut exchange = self.exchange.lock();
            let partner_waiting = exchange.pairing < 0;
            exchange.pairing += 1;
            if partner_waiting {
                let pair = exchange.issue_pair();
                exchange.listener_pairs.push_back(pair);
                Some(pair)
            } else {
                None
            }
        };
        let pair = match pair {
            Some(pair) => {
                self.listeners.wake();
                pair
            }
            None => loop {
                let issued = self.exchange.lock().speaker_pairs.pop_front();
                if let Some(pair) = issued {
                    break pair;
                }
                self.speakers.sleep();
            },
        };
        debug!("Speaker paired as #{pair}");

        while self.exchange.lock().serving != pair {
            self.handoff.sleep();
        }
        {
            let mut exchange = self.exchange.lock();
            debug_assert!(!exchange.transmitted(), "slot occupied by another pair");
            exchange.slot = Some(word);
        }
        self.handoff.wake_all();

        while self.exchange.lock().serving <= pair {
            self.handoff.sleep();
        }

        self.lock.release();
    }

    /// Waits for a speaker and returns the word it transfers.
    pub fn listen(&self) -> T {
        self.lock.acquire();

        let pair = {
            let mut exchange = self.exchange.lock();
            let partner_waiting = exchange.pairing > 0;
            exchange.pairing -= 1;
            if partner_waiting {
                let pair = exchange.issue_pair();
                exchange.speaker_pairs.push_back(pair);
                Some(pair)
            } else {
                None
            }
        };
        let pair = match pair {
            Some(pair) => {
                self.speakers.wake();
                pair
            }
            None => loop {
                let issued = self.exchange.lock().listener_pairs.pop_front();
                if let Some(pair) = issued {
                    break pair;
                }
                self.listeners.sleep();
            },
        };
        debug!("Listener paired as #{pair}");

        let word = loop {
            let received = {
                let mut exchange = self.exchange.lock();
                if exchange.serving == pair {
                    exchange.slot.take()
                } else {
                    None
                }
            };
            if let Some(word) = received {
                break word;
            }
            self.handoff.sleep();
        };
        self.exchange.lock().serving += 1;
        self.handoff.wake_all();

        self.lock.release();
        word
    }

    /// Speakers waiting for a partner minus listeners waiting for one.
    pub fn pairing_balance(&self) -> i64 {
        self.exchange.lock().pairing
    }
}
