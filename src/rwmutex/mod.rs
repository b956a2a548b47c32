//! # Reader-writer mutex
//!
//! Many readers or a single writer, built on top of the [`RawMutex`].
//!
//! Readers mostly touch one counter. A writer subtracts [`MAX_READERS`] from it:
//! - the counter goes negative => every reader arriving later knows a writer is pending and parks
//! - the value before the subtraction is exactly how many readers the writer has to wait for
//!
//! The readers that were in before the writer (draining readers) count down `reader_wait`,
//! and the last one wakes the writer up. On unlock, the writer gives `MAX_READERS` back and wakes
//! exactly as many parked readers as there were late arrivals.
//!
//! Writers queue on the [`RawMutex`] among themselves. A pending writer blocks new readers,
//! so a stream of readers can't starve it. The readers it blocked all get in as a batch
//! before the next writer could flip the counter again.

mod guarded;

pub use guarded::{ReadGuard, RwLock, WriteGuard};

use std::{
    sync::atomic::{
        AtomicBool, AtomicI32,
        Ordering::{AcqRel, Acquire, Relaxed, Release, SeqCst},
    },
    thread::scope,
    time::Instant,
};

use crate::{
    config::Config,
    fault::Fault,
    mutex::{Locker, RawMutex, Unprotected},
    sema::ParkQueue,
};

/// Upper bound on simultaneous readers, the writer's offset of the reader counter
pub const MAX_READERS: i32 = 1 << 30;

pub struct RawRwMutex {
    /// held by the writer the whole time, so writers go one by one
    writer: RawMutex,
    writer_sem: ParkQueue,
    reader_sem: ParkQueue,
    /// readers in, minus [`MAX_READERS`] while a writer is pending
    reader_count: AtomicI32,
    /// draining readers the pending writer still waits for
    reader_wait: AtomicI32,
}

impl RawRwMutex {
    pub const fn new() -> Self {
        Self::with_config(Config::new())
    }

    /// The config goes to the writers' mutex
    pub const fn with_config(config: Config) -> Self {
        Self {
            writer: RawMutex::with_config(config),
            writer_sem: ParkQueue::new(),
            reader_sem: ParkQueue::new(),
            reader_count: AtomicI32::new(0),
            reader_wait: AtomicI32::new(0),
        }
    }

    pub fn read_lock(&self) {
        if self.reader_count.fetch_add(1, Acquire) + 1 < 0 {
            // a writer is pending, it'll let us in on its unlock
            self.reader_sem.park(false);
        }
    }

    /// Fails when a writer holds the lock or waits for it
    pub fn try_read_lock(&self) -> bool {
        let mut c = self.reader_count.load(Relaxed);
        loop {
            if c < 0 {
                return false;
            }
            match self
                .reader_count
                .compare_exchange_weak(c, c + 1, Acquire, Relaxed)
            {
                Ok(_) => return true,
                Err(e) => c = e,
            }
        }
    }

    /// # Panics
    /// - if there's no read lock to release
    pub fn read_unlock(&self) {
        let r = self.reader_count.fetch_sub(1, Release) - 1;
        if r < 0 {
            self.read_unlock_slow(r);
        }
    }

    #[cold]
    fn read_unlock_slow(&self, r: i32) {
        if r + 1 == 0 || r + 1 == -MAX_READERS {
            Fault::ReadUnlockOfUnlockedRwMutex.raise();
        }
        // a writer is pending, the last draining reader unblocks it
        if self.reader_wait.fetch_sub(1, AcqRel) - 1 == 0 {
            self.writer_sem.unpark_one(false);
        }
    }

    pub fn write_lock(&self) {
        self.writer.lock();
        // announce the writer and learn how many readers are in
        let r = self.reader_count.fetch_sub(MAX_READERS, AcqRel);
        // some of them may have left already, they've counted reader_wait below zero
        if r != 0 && self.reader_wait.fetch_add(r, AcqRel) + r != 0 {
            self.writer_sem.park(false);
        }
    }

    /// Fails unless there's nobody in: no readers, no writer
    pub fn try_write_lock(&self) -> bool {
        if !self.writer.try_lock() {
            return false;
        }
        if self
            .reader_count
            .compare_exchange(0, -MAX_READERS, Acquire, Relaxed)
            .is_err()
        {
            self.writer.unlock();
            return false;
        }
        true
    }

    /// # Panics
    /// - if there's no write lock to release
    pub fn write_unlock(&self) {
        // readers that arrived while we were in
        let r = self.reader_count.fetch_add(MAX_READERS, Release) + MAX_READERS;
        if r >= MAX_READERS {
            Fault::UnlockOfUnlockedRwMutex.raise();
        }
        for _ in 0..r {
            self.reader_sem.unpark_one(false);
        }
        // let the next writer in
        self.writer.unlock();
    }

    /// A [`Locker`] that takes and releases read locks
    pub fn read_locker(&self) -> ReadLocker<'_> {
        ReadLocker { rw: self }
    }
}

impl Default for RawRwMutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Writer side
impl Locker for RawRwMutex {
    fn lock(&self) {
        self.write_lock()
    }

    fn unlock(&self) {
        self.write_unlock()
    }
}

impl std::fmt::Debug for RawRwMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawRwMutex")
            .field("reader_count", &self.reader_count.load(Relaxed))
            .field("reader_wait", &self.reader_wait.load(Relaxed))
            .field("writer", &self.writer)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ReadLocker<'a> {
    rw: &'a RawRwMutex,
}

impl Locker for ReadLocker<'_> {
    fn lock(&self) {
        self.rw.read_lock()
    }

    fn unlock(&self) {
        self.rw.read_unlock()
    }
}

/// `readers` threads take read locks `reads` times each, while `writers` threads
/// increment a shared value `writes` times each. Returns the final value.
pub fn run(readers: usize, reads: usize, writers: usize, writes: usize) -> u64 {
    let rw = RawRwMutex::new();
    let value = Unprotected::new();
    let active_readers = AtomicI32::new(0);
    let writer_in = AtomicBool::new(false);
    let started = Instant::now();
    scope(|s| {
        for _ in 0..readers {
            s.spawn(|| {
                for _ in 0..reads {
                    rw.read_lock();
                    active_readers.fetch_add(1, SeqCst);
                    assert!(!writer_in.load(SeqCst), "a reader next to a writer");
                    // SAFETY: a read lock is held
                    let _ = unsafe { *value.get() };
                    active_readers.fetch_sub(1, SeqCst);
                    rw.read_unlock();
                }
            });
        }
        for _ in 0..writers {
            s.spawn(|| {
                for _ in 0..writes {
                    rw.write_lock();
                    writer_in.store(true, SeqCst);
                    assert_eq!(0, active_readers.load(SeqCst), "a writer next to readers");
                    // SAFETY: the write lock is held
                    unsafe { *value.get() += 1 };
                    writer_in.store(false, SeqCst);
                    rw.write_unlock();
                }
            });
        }
    });
    let total = value.into_inner();
    log::info!(
        "{readers} readers x {reads} and {writers} writers x {writes} took {:?}",
        started.elapsed()
    );
    println!("value is {total}, expected {}", writers * writes);
    total
}

#[cfg(test)]
mod test {
    use std::{
        sync::Barrier,
        thread::sleep,
        time::Duration,
    };

    use super::*;

    fn wait_for(cond: impl Fn() -> bool) {
        while !cond() {
            sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn readers_and_writers() {
        assert_eq!(200, run(8, 1_000, 2, 100));
    }

    #[test]
    fn readers_share() {
        let rw = RawRwMutex::new();
        // nobody passes the barrier unless all 4 hold the read lock at once
        let all_in = Barrier::new(4);
        scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    rw.read_lock();
                    all_in.wait();
                    rw.read_unlock();
                });
            }
        });
        assert_eq!(0, rw.reader_count.load(Relaxed));
    }

    #[test]
    fn writer_waits_for_readers_and_blocks_late_ones() {
        let rw = RawRwMutex::new();
        let writer_done = AtomicBool::new(false);
        let late_reader_saw_writer = AtomicBool::new(false);
        let late_reader_done = AtomicBool::new(false);

        rw.read_lock();
        scope(|s| {
            s.spawn(|| {
                rw.write_lock();
                writer_done.store(true, SeqCst);
                rw.write_unlock();
            });
            // the writer is pending behind us
            wait_for(|| rw.reader_count.load(SeqCst) < 0);
            assert!(!writer_done.load(SeqCst));
            assert!(!rw.try_read_lock());

            s.spawn(|| {
                rw.read_lock();
                late_reader_saw_writer.store(writer_done.load(SeqCst), SeqCst);
                late_reader_done.store(true, SeqCst);
                rw.read_unlock();
            });
            // the late reader is counted in, so it's parked or about to be
            wait_for(|| rw.reader_count.load(SeqCst) == 2 - MAX_READERS);
            assert!(!late_reader_done.load(SeqCst));

            // the writer goes first, then the late reader
            rw.read_unlock();
        });
        assert!(writer_done.load(SeqCst));
        assert!(late_reader_saw_writer.load(SeqCst));
        assert_eq!(0, rw.reader_count.load(SeqCst));
        assert_eq!(0, rw.reader_wait.load(SeqCst));
    }

    #[test]
    fn writers_take_turns() {
        let rw = RawRwMutex::new();
        let value = Unprotected::new();
        scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1_000 {
                        rw.write_lock();
                        unsafe { *value.get() += 1 };
                        rw.write_unlock();
                    }
                });
            }
        });
        assert_eq!(4_000, value.into_inner());
    }

    #[test]
    fn try_locks() {
        let rw = RawRwMutex::new();
        assert!(rw.try_write_lock());
        assert!(!rw.try_write_lock());
        assert!(!rw.try_read_lock());
        rw.write_unlock();

        assert!(rw.try_read_lock());
        assert!(rw.try_read_lock());
        assert!(!rw.try_write_lock());
        // the failed attempt gave the writers' mutex back
        assert!(!rw.writer.snapshot().locked);
        rw.read_unlock();
        rw.read_unlock();
        assert!(rw.try_write_lock());
        rw.write_unlock();
    }

    #[test]
    fn lockers() {
        fn bump<L: Locker>(l: &L, n: &AtomicI32) {
            l.lock();
            n.fetch_add(1, Relaxed);
            l.unlock();
        }
        let rw = RawRwMutex::new();
        let n = AtomicI32::new(0);
        bump(&rw, &n);
        bump(&rw.read_locker(), &n);
        assert_eq!(2, n.load(Relaxed));
        assert_eq!(0, rw.reader_count.load(Relaxed));
    }

    #[test]
    #[should_panic(expected = "sync: RUnlock of unlocked RWMutex")]
    fn read_unlock_without_lock() {
        RawRwMutex::new().read_unlock();
    }

    #[test]
    #[should_panic(expected = "sync: RUnlock of unlocked RWMutex")]
    fn read_unlock_under_writer() {
        let rw = RawRwMutex::new();
        rw.write_lock();
        rw.read_unlock();
    }

    #[test]
    #[should_panic(expected = "sync: Unlock of unlocked RWMutex")]
    fn write_unlock_without_lock() {
        RawRwMutex::new().write_unlock();
    }
}
