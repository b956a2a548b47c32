//! # Parking queue
//!
//! A counting semaphore with an explicit list of sleepers, one per lock queue.
//! The locks never spin on it, they decide everything via their own atomics
//! and come here only to sleep or to wake somebody.
//!
//! Every sleeper gets its own futex word, so a wake targets exactly the thread we've picked
//! instead of whoever the kernel likes. That's what makes the order (FIFO or LIFO) ours to choose.
//!
//! ## Permits
//!
//! The locks announce a waiter (waiter count, reader count) *before* the thread gets here to park.
//! An unpark may land in-between, when the queue is still empty.
//! Dropping it would make the announced waiter sleep forever,
//! so an unpark with nobody to wake banks a permit and the next `park` takes it and returns right away.

mod wait_lock;

use std::{
    collections::VecDeque,
    sync::{
        atomic::{
            AtomicU32,
            Ordering::{Acquire, Release},
        },
        Arc,
    },
    thread,
};

use atomic_wait::{wait, wake_one};

use wait_lock::WaitLock;

const PARKED: u32 = 0;
const GRANTED: u32 = 1;

/// A single sleeping thread
struct Waiter {
    granted: AtomicU32,
}

struct Queue {
    permits: u32,
    waiters: VecDeque<Arc<Waiter>>,
}

pub struct ParkQueue {
    queue: WaitLock<Queue>,
}

impl ParkQueue {
    pub const fn new() -> Self {
        Self {
            queue: WaitLock::new(Queue {
                permits: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Suspends the calling thread until a matching [`ParkQueue::unpark_one`].
    /// `lifo` puts it at the front of the queue instead of the back.
    pub fn park(&self, lifo: bool) {
        let waiter = {
            let mut q = self.queue.lock();
            if q.permits > 0 {
                q.permits -= 1;
                return;
            }
            let waiter = Arc::new(Waiter {
                granted: AtomicU32::new(PARKED),
            });
            if lifo {
                q.waiters.push_front(waiter.clone());
            } else {
                q.waiters.push_back(waiter.clone());
            }
            waiter
        };

        // wait may return spuriously => check the word every time
        while waiter.granted.load(Acquire) == PARKED {
            wait(&waiter.granted, PARKED);
        }
    }

    /// Wakes the thread at the front of the queue or banks a permit if there's none.
    /// `handoff` gives up the rest of the caller's time slice so the woken thread runs promptly.
    pub fn unpark_one(&self, handoff: bool) {
        let waiter = {
            let mut q = self.queue.lock();
            let waiter = q.waiters.pop_front();
            if waiter.is_none() {
                q.permits += 1;
            }
            waiter
        };

        if let Some(waiter) = waiter {
            waiter.granted.store(GRANTED, Release);
            wake_one(&waiter.granted);
            if handoff {
                thread::yield_now();
            }
        }
    }

    /// Number of parked threads at the moment
    pub fn len(&self) -> usize {
        self.queue.lock().waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ParkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ParkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let q = self.queue.lock();
        f.debug_struct("ParkQueue")
            .field("parked", &q.waiters.len())
            .field("permits", &q.permits)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::Mutex,
        thread::{scope, sleep},
        time::Duration,
    };

    use super::*;

    fn wait_for(cond: impl Fn() -> bool) {
        while !cond() {
            sleep(Duration::from_millis(1));
        }
    }

    // park threads one by one, then let them out one by one and record who's out
    fn wake_order(lifo: bool) -> Vec<usize> {
        let queue = ParkQueue::new();
        let order = Mutex::new(Vec::new());
        scope(|s| {
            for id in 0..3 {
                let (queue, order) = (&queue, &order);
                s.spawn(move || {
                    queue.park(lifo);
                    order.lock().unwrap().push(id);
                });
                wait_for(|| queue.len() == id + 1);
            }
            for woken in 1..=3 {
                queue.unpark_one(false);
                wait_for(|| order.lock().unwrap().len() == woken);
            }
        });
        order.into_inner().unwrap()
    }

    #[test]
    fn fifo() {
        assert_eq!(vec![0, 1, 2], wake_order(false));
    }

    #[test]
    fn lifo() {
        assert_eq!(vec![2, 1, 0], wake_order(true));
    }

    #[test]
    fn unpark_before_park_is_remembered() {
        let queue = ParkQueue::new();
        queue.unpark_one(false);
        queue.unpark_one(true);
        assert_eq!(2, queue.queue.lock().permits);
        // both return right away
        queue.park(false);
        queue.park(true);
        assert_eq!(0, queue.queue.lock().permits);
        assert!(queue.is_empty());
    }

    #[test]
    fn handoff_wakes() {
        let queue = ParkQueue::new();
        scope(|s| {
            s.spawn(|| queue.park(false));
            wait_for(|| queue.len() == 1);
            queue.unpark_one(true);
        });
        assert!(queue.is_empty());
        assert_eq!(0, queue.queue.lock().permits);
    }
}
