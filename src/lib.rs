pub mod config;
pub mod fault;
pub mod logger;
pub mod mutex;
pub mod rwmutex;
pub mod sema;
pub mod spin;

pub use config::Config;
pub use mutex::{Locker, Mutex, MutexGuard, RawMutex, StateSnapshot};
pub use rwmutex::{RawRwMutex, ReadGuard, ReadLocker, RwLock, WriteGuard};
