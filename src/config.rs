use std::time::Duration;

/// Tuning knobs of a [`RawMutex`](crate::mutex::RawMutex)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// How long a waiter may wait before it switches the mutex to starvation mode
    pub starvation_threshold: Duration,
}

impl Config {
    pub const DEFAULT_STARVATION_THRESHOLD: Duration = Duration::from_millis(1);

    pub const fn new() -> Self {
        Self {
            starvation_threshold: Self::DEFAULT_STARVATION_THRESHOLD,
        }
    }

    pub const fn with_starvation_threshold(mut self, threshold: Duration) -> Self {
        self.starvation_threshold = threshold;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
