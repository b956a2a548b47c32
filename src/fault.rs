//! # Faults
//!
//! Everything that can go wrong with the locks is a broken contract: unlocking what isn't locked,
//! or the state word disagreeing with itself. None of it is recoverable, as the state word is shared
//! by every waiter and a "fixed up" value would only spread the damage.
//!
//! So there's no `Result` here. A fault is logged and then the thread panics
//! (or the whole process aborts with the `abort-on-fault` feature, the same way
//! [`std::sync::Arc`] aborts on a ref counter overflow).

use strum_macros::{Display, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
pub enum Fault {
    #[strum(serialize = "sync: unlock of unlocked mutex")]
    UnlockOfUnlockedMutex,
    #[strum(serialize = "sync: inconsistent mutex state")]
    InconsistentState,
    #[strum(serialize = "sync: RUnlock of unlocked RWMutex")]
    ReadUnlockOfUnlockedRwMutex,
    #[strum(serialize = "sync: Unlock of unlocked RWMutex")]
    UnlockOfUnlockedRwMutex,
}

impl Fault {
    /// Never returns: the caller's lock is beyond repair.
    #[cold]
    #[inline(never)]
    pub fn raise(self) -> ! {
        log::error!("{self}");
        if cfg!(feature = "abort-on-fault") {
            std::process::abort();
        }
        panic!("{}", <&'static str>::from(self));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            "sync: unlock of unlocked mutex",
            Fault::UnlockOfUnlockedMutex.to_string()
        );
        assert_eq!(
            "sync: RUnlock of unlocked RWMutex",
            <&str>::from(Fault::ReadUnlockOfUnlockedRwMutex)
        );
    }

    #[test]
    #[should_panic(expected = "sync: inconsistent mutex state")]
    fn raise_panics() {
        Fault::InconsistentState.raise();
    }
}
