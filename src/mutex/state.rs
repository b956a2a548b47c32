//! The mutex's state word:
//!
//! ```text
//!  31 ........ 3   2          1        0
//! |  waiters  | starving | woken | locked |
//! ```

/// The mutex is held
pub(crate) const LOCKED: u32 = 1;
/// A waiter is awake and racing for the lock => the unlocker shouldn't wake anyone else
pub(crate) const WOKEN: u32 = 1 << 1;
/// Ownership goes straight to the queue head, newcomers don't compete
pub(crate) const STARVING: u32 = 1 << 2;
pub(crate) const WAITER_SHIFT: u32 = 3;
/// One parked thread in the waiter count
pub(crate) const WAITER: u32 = 1 << WAITER_SHIFT;

/// A copy of the state word with named accessors, so nobody fiddles with the masks directly
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) struct State(pub(crate) u32);

impl State {
    pub(crate) const UNLOCKED: State = State(0);

    pub(crate) fn is_locked(self) -> bool {
        self.0 & LOCKED != 0
    }

    pub(crate) fn is_woken(self) -> bool {
        self.0 & WOKEN != 0
    }

    pub(crate) fn is_starving(self) -> bool {
        self.0 & STARVING != 0
    }

    /// Either locked or handed off => a newcomer has to queue
    pub(crate) fn is_taken(self) -> bool {
        self.0 & (LOCKED | STARVING) != 0
    }

    /// Locked in normal mode, the only case where spinning may win the lock
    pub(crate) fn is_spinnable(self) -> bool {
        self.0 & (LOCKED | STARVING) == LOCKED
    }

    /// Somebody already owns the lock or is on the way to wake/grab it
    pub(crate) fn is_busy(self) -> bool {
        self.0 & (LOCKED | WOKEN | STARVING) != 0
    }

    pub(crate) fn waiters(self) -> u32 {
        self.0 >> WAITER_SHIFT
    }

    pub(crate) fn with_locked(self) -> State {
        State(self.0 | LOCKED)
    }

    pub(crate) fn with_woken(self) -> State {
        State(self.0 | WOKEN)
    }

    pub(crate) fn without_woken(self) -> State {
        State(self.0 & !WOKEN)
    }

    pub(crate) fn with_starving(self) -> State {
        State(self.0 | STARVING)
    }

    pub(crate) fn add_waiter(self) -> State {
        State(self.0 + WAITER)
    }

    pub(crate) fn remove_waiter(self) -> State {
        State(self.0 - WAITER)
    }

    pub(crate) fn snapshot(self) -> StateSnapshot {
        StateSnapshot {
            locked: self.is_locked(),
            woken: self.is_woken(),
            starving: self.is_starving(),
            waiters: self.waiters(),
        }
    }
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.snapshot(), f)
    }
}

/// A point-in-time view of a mutex, outdated as soon as it's taken.
/// Good for diagnostics and tests, not for decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateSnapshot {
    pub locked: bool,
    pub woken: bool,
    pub starving: bool,
    pub waiters: u32,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bits() {
        let s = State::UNLOCKED.with_locked().add_waiter().add_waiter();
        assert!(s.is_locked() && s.is_taken() && s.is_spinnable() && s.is_busy());
        assert!(!s.is_woken() && !s.is_starving());
        assert_eq!(2, s.waiters());

        let s = s.with_starving().with_woken();
        assert!(!s.is_spinnable());
        assert_eq!(2, s.waiters());

        let s = s.without_woken().remove_waiter();
        assert_eq!(
            StateSnapshot {
                locked: true,
                woken: false,
                starving: true,
                waiters: 1,
            },
            s.snapshot()
        );
    }

    #[test]
    fn handed_off_is_taken() {
        // starving with the lock bit cleared is the window of a handoff
        let s = State(STARVING | WAITER);
        assert!(s.is_taken() && s.is_busy() && !s.is_locked());
    }
}
