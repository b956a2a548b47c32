//! # Queue lock
//!
//! The wait queue needs a lock of its own, and it can't be the mutex we're building on top of it.
//! It's a plain futex mutex: critical sections are a few pointer moves, so a short spin
//! usually does it and nobody cares about fairness here.
//!
//! States:
//! - 0 - unlocked
//! - 1 - locked, no other threads
//! - 2 - locked, other threads are waiting
//!
//! `wake_one` is skipped unless somebody switched the state to 2,
//! so the uncontended case doesn't touch the kernel at all.

use std::{
    cell::UnsafeCell,
    hint,
    ops::{Deref, DerefMut},
    sync::atomic::{
        AtomicU32,
        Ordering::{Acquire, Relaxed, Release},
    },
};

use atomic_wait::{wait, wake_one};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

pub(crate) struct WaitLock<Y> {
    state: AtomicU32,
    value: UnsafeCell<Y>,
}

unsafe impl<Y> Sync for WaitLock<Y> where Y: Send {}

impl<Y> WaitLock<Y> {
    pub(crate) const fn new(value: Y) -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            value: UnsafeCell::new(value),
        }
    }

    pub(crate) fn lock(&self) -> WaitLockGuard<'_, Y> {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            Self::lock_contended(&self.state);
        }
        WaitLockGuard { lock: self }
    }

    #[cold]
    fn lock_contended(state: &AtomicU32) {
        let mut spin_count = 0;

        // only 1 is worth waiting for, 2 means somebody gave up spinning already
        while state.load(Relaxed) == LOCKED && spin_count < 100 {
            spin_count += 1;
            hint::spin_loop();
        }

        if state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok()
        {
            return;
        }

        // leave 2 behind to not lose other waiters
        while state.swap(CONTENDED, Acquire) != UNLOCKED {
            wait(state, CONTENDED);
        }
    }
}

pub(crate) struct WaitLockGuard<'a, Y> {
    lock: &'a WaitLock<Y>,
}

impl<Y> Deref for WaitLockGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard exists only while the lock is held
        unsafe { &*self.lock.value.get() }
    }
}

impl<Y> DerefMut for WaitLockGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard exists only while the lock is held
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<Y> Drop for WaitLockGuard<'_, Y> {
    fn drop(&mut self) {
        if self.lock.state.swap(UNLOCKED, Release) == CONTENDED {
            wake_one(&self.lock.state);
        }
    }
}
