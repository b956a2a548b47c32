//! # Spinning
//!
//! Parking a thread costs a couple of syscalls, so a short busy-wait pays off when the lock holder
//! is about to let go. It's only worth it when there's another core to run the holder
//! and only for a handful of rounds. See the `lock_contented` of a futex mutex for the same idea.
//!
//! The heuristic is a policy the lock takes as a parameter, so it could be tuned or switched off.

use std::{
    hint,
    sync::OnceLock,
    thread::available_parallelism,
};

pub trait SpinPolicy: Send + Sync {
    /// Whether another busy-wait round makes sense after `iter` rounds already done
    fn can_spin(&self, iter: u32) -> bool;
    /// One busy-wait round
    fn spin(&self);
}

/// Bounded spinning on multicore hosts only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adaptive {
    pub max_iterations: u32,
    pub cycles: u32,
}

impl Adaptive {
    pub const fn new() -> Self {
        Self {
            max_iterations: 4,
            cycles: 30,
        }
    }

    pub const fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub const fn with_cycles(mut self, cycles: u32) -> Self {
        self.cycles = cycles;
        self
    }
}

impl Default for Adaptive {
    fn default() -> Self {
        Self::new()
    }
}

impl SpinPolicy for Adaptive {
    fn can_spin(&self, iter: u32) -> bool {
        // a single core can't run the holder while we spin
        iter < self.max_iterations && cpus() > 1
    }

    fn spin(&self) {
        for _ in 0..self.cycles {
            hint::spin_loop();
        }
    }
}

/// Go straight to parking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoSpin;

impl SpinPolicy for NoSpin {
    fn can_spin(&self, _iter: u32) -> bool {
        false
    }

    fn spin(&self) {}
}

fn cpus() -> usize {
    static CPUS: OnceLock<usize> = OnceLock::new();
    *CPUS.get_or_init(|| available_parallelism().map(|n| n.get()).unwrap_or(1))
}
