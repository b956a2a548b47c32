//! # Mutex
//!
//! An adaptive mutex with two modes.
//!
//! ## Normal mode
//! Waiters queue up, but a woken waiter doesn't own the lock: it competes with the newcomers.
//! The newcomers are already running on a CPU (and there could be many of them), so the
//! woken one loses quite often. That's intentional: it keeps the throughput high.
//!
//! ## Starvation mode
//! A waiter that failed to get the lock for longer than [`Config::starvation_threshold`]
//! switches the mutex to starvation mode. In this mode the unlocker hands the lock straight over to
//! the waiter at the queue's front. Newcomers don't even try to grab it or spin, they queue at the tail.
//!
//! The mutex goes back to normal when the waiter that got the lock either is the last one
//! or it waited less than the threshold itself. Starvation mode is slow, and two threads
//! could keep each other in it forever otherwise.
//!
//! ## State
//! Everything lives in a single [`AtomicU32`], see [`state`]. The parking queue
//! ([`ParkQueue`]) only sleeps and wakes threads, the decisions are made on the atomic.
//!
//! The lock isn't bound to a thread: any thread may unlock a locked mutex.

mod guarded;
mod state;

pub use guarded::{Mutex, MutexGuard};
pub use state::StateSnapshot;

use std::{
    cell::UnsafeCell,
    sync::atomic::{
        AtomicBool, AtomicU32,
        Ordering::{AcqRel, Acquire, Relaxed, Release},
    },
    thread::{scope, sleep},
    time::{Duration, Instant},
};

use crate::{
    config::Config,
    fault::Fault,
    sema::ParkQueue,
    spin::{Adaptive, SpinPolicy},
};

use state::{State, LOCKED, STARVING, WAITER};

/// Something that could be locked and unlocked, no matter by which thread
pub trait Locker {
    fn lock(&self);
    fn unlock(&self);
}

pub struct RawMutex<S = Adaptive> {
    state: AtomicU32,
    sema: ParkQueue,
    config: Config,
    policy: S,
}

impl RawMutex {
    pub const fn new() -> Self {
        Self::with_config(Config::new())
    }

    pub const fn with_config(config: Config) -> Self {
        Self::with_policy(config, Adaptive::new())
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: SpinPolicy> RawMutex<S> {
    pub const fn with_policy(config: Config, policy: S) -> Self {
        Self {
            state: AtomicU32::new(0),
            sema: ParkQueue::new(),
            config,
            policy,
        }
    }

    /// Blocks until the mutex is ours
    pub fn lock(&self) {
        if self
            .state
            .compare_exchange(0, LOCKED, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }
        self.lock_slow();
    }

    /// Never blocks and never spins.
    /// A starving mutex belongs to its waiters, so it fails even if the lock bit is clear.
    pub fn try_lock(&self) -> bool {
        let old = self.load();
        if old.is_taken() {
            return false;
        }
        self.state
            .compare_exchange(old.0, old.with_locked().0, Acquire, Relaxed)
            .is_ok()
    }

    /// # Panics
    /// - if the mutex isn't locked (or aborts, see [`Fault`])
    pub fn unlock(&self) {
        let old = State(self.state.fetch_sub(LOCKED, Release));
        if !old.is_locked() {
            Fault::UnlockOfUnlockedMutex.raise();
        }
        let new = State(old.0 - LOCKED);
        if new != State::UNLOCKED {
            // somebody's waiting
            self.unlock_slow(new);
        }
    }

    pub fn snapshot(&self) -> StateSnapshot {
        self.load().snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn load(&self) -> State {
        State(self.state.load(Acquire))
    }

    #[cold]
    fn lock_slow(&self) {
        let mut wait_start: Option<Instant> = None;
        let mut starving = false; // this thread has waited for too long
        let mut awoke = false; // this thread owns the woken bit
        let mut iter = 0;
        let mut old = self.load();
        loop {
            // no spinning in starvation mode: the lock goes to the queue anyway
            if old.is_spinnable() && self.policy.can_spin(iter) {
                // let the unlocker know it shouldn't wake anyone, we're here already
                if !awoke
                    && !old.is_woken()
                    && old.waiters() != 0
                    && self
                        .state
                        .compare_exchange(old.0, old.with_woken().0, Relaxed, Relaxed)
                        .is_ok()
                {
                    awoke = true;
                }
                self.policy.spin();
                iter += 1;
                old = self.load();
                continue;
            }

            let mut new = old;
            // the lock bit doesn't mean we've got it: it may be set already
            if !old.is_starving() {
                new = new.with_locked();
            }
            if old.is_taken() {
                new = new.add_waiter();
            }
            // an unlocked mutex doesn't need starvation mode, the CAS below takes it
            if starving && old.is_locked() {
                new = new.with_starving();
            }
            if awoke {
                // we're about to get the lock or to sleep => the bit goes away either way
                if !new.is_woken() {
                    Fault::InconsistentState.raise();
                }
                new = new.without_woken();
            }

            match self
                .state
                .compare_exchange(old.0, new.0, AcqRel, Relaxed)
            {
                Ok(_) => {
                    if !old.is_taken() {
                        // locked with the CAS
                        break;
                    }
                    if new.is_starving() && !old.is_starving() {
                        log::trace!("mutex {:p} enters starvation mode", self);
                    }

                    // a repeated wait goes to the queue's front
                    let lifo = wait_start.is_some();
                    let started = *wait_start.get_or_insert_with(Instant::now);
                    self.sema.park(lifo);

                    starving = starving || started.elapsed() > self.config.starvation_threshold;
                    old = self.load();
                    if old.is_starving() {
                        // the lock is handed off to us, nobody else could touch the lock bit
                        if old.is_locked() || old.is_woken() || old.waiters() == 0 {
                            Fault::InconsistentState.raise();
                        }
                        // take the lock and leave the queue in one go
                        let mut delta = WAITER - LOCKED;
                        if !starving || old.waiters() == 1 {
                            // leave starvation mode, accounting for our own wait
                            delta += STARVING;
                            log::trace!("mutex {:p} leaves starvation mode", self);
                        }
                        self.state.fetch_sub(delta, Acquire);
                        break;
                    }
                    awoke = true;
                    iter = 0;
                }
                Err(actual) => old = State(actual),
            }
        }
    }

    #[cold]
    fn unlock_slow(&self, new: State) {
        if new.is_starving() {
            // the queue's head owns it now, newcomers won't touch it
            self.sema.unpark_one(true);
            return;
        }

        let mut old = new;
        loop {
            // nobody to wake or somebody has already grabbed / woken / been handed the lock
            if old.waiters() == 0 || old.is_busy() {
                return;
            }
            // the woken waiter still has to win the lock against newcomers
            let next = old.remove_waiter().with_woken();
            match self
                .state
                .compare_exchange(old.0, next.0, Release, Relaxed)
            {
                Ok(_) => {
                    self.sema.unpark_one(false);
                    return;
                }
                Err(actual) => old = State(actual),
            }
        }
    }
}

impl<S: SpinPolicy> Locker for RawMutex<S> {
    fn lock(&self) {
        RawMutex::<S>::lock(self)
    }

    fn unlock(&self) {
        RawMutex::<S>::unlock(self)
    }
}

impl<S> std::fmt::Debug for RawMutex<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMutex")
            .field("state", &State(self.state.load(Relaxed)))
            .field("parked", &self.sema.len())
            .field("config", &self.config)
            .finish()
    }
}

/// A plain counter to make data races visible.
/// Closures go through [`Unprotected::get`], so they capture the whole `Sync` wrapper, not the cell.
pub(crate) struct Unprotected(UnsafeCell<u64>);
unsafe impl Sync for Unprotected {}

impl Unprotected {
    pub(crate) const fn new() -> Self {
        Self(UnsafeCell::new(0))
    }

    pub(crate) fn get(&self) -> *mut u64 {
        self.0.get()
    }

    pub(crate) fn into_inner(self) -> u64 {
        self.0.into_inner()
    }
}

/// `threads` threads do `lock(); counter += 1; unlock()` `iterations` times each.
/// Returns the final counter.
pub fn run(threads: usize, iterations: usize) -> u64 {
    let m = RawMutex::new();
    let counter = Unprotected::new();
    let started = Instant::now();
    scope(|s| {
        for _ in 0..threads {
            s.spawn(|| {
                for _ in 0..iterations {
                    m.lock();
                    // SAFETY: the mutex is held
                    unsafe { *counter.get() += 1 };
                    m.unlock();
                }
            });
        }
    });
    let total = counter.into_inner();
    log::info!(
        "{threads} threads x {iterations} iterations took {:?}",
        started.elapsed()
    );
    println!("counter is {total}, expected {}", threads * iterations);
    total
}

/// A waiter competes with a thread that re-locks the mutex right after unlocking it
pub fn run_starvation(hold: Duration) {
    let m = RawMutex::new();
    let stop = AtomicBool::new(false);
    let rounds = AtomicU32::new(0);
    scope(|s| {
        s.spawn(|| {
            while !stop.load(Relaxed) {
                m.lock();
                let until = Instant::now() + hold;
                while Instant::now() < until {
                    std::hint::spin_loop();
                }
                if m.snapshot().starving {
                    log::info!("the hog holds a starving mutex");
                }
                m.unlock();
                rounds.fetch_add(1, Relaxed);
            }
        });
        sleep(hold * 4);
        let started = Instant::now();
        m.lock();
        println!(
            "the waiter got the lock in {:?} after {} hog rounds",
            started.elapsed(),
            rounds.load(Relaxed)
        );
        stop.store(true, Relaxed);
        m.unlock();
    });
    println!("final state: {:?}", m.snapshot());
}
