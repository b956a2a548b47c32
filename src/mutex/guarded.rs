//! A [`RawMutex`] with the data it protects. The only way to the data is a guard,
//! and dropping the guard is the only way to unlock.

use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use super::RawMutex;
use crate::config::Config;

pub struct Mutex<Y> {
    raw: RawMutex,
    value: UnsafeCell<Y>,
}

/// promise to the compiler that it's safe to share if the underlying value is safe to send
unsafe impl<Y> Sync for Mutex<Y> where Y: Send {}

impl<Y> Mutex<Y> {
    pub const fn new(value: Y) -> Self {
        Self::with_config(value, Config::new())
    }

    pub const fn with_config(value: Y, config: Config) -> Self {
        Self {
            raw: RawMutex::with_config(config),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Y> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, Y>> {
        self.raw.try_lock().then(|| MutexGuard { mutex: self })
    }

    /// No locking needed: `&mut self` proves nobody else is there
    pub fn get_mut(&mut self) -> &mut Y {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }

    pub fn raw(&self) -> &RawMutex {
        &self.raw
    }
}

impl<Y: Default> Default for Mutex<Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

pub struct MutexGuard<'a, Y> {
    mutex: &'a Mutex<Y>,
}

unsafe impl<Y> Sync for MutexGuard<'_, Y> where Y: Sync {}

impl<Y> Deref for MutexGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: existence of the guard is caused by locking its mutex
        unsafe { &*self.mutex.value.get() }
    }
}

impl<Y> DerefMut for MutexGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: existence of the guard is caused by locking its mutex
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<Y> Drop for MutexGuard<'_, Y> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

#[cfg(test)]
mod test {
    use std::thread::scope;

    use super::*;

    #[test]
    fn guards() {
        let m = Mutex::new(Vec::new());
        scope(|s| {
            for t in 0..4 {
                let m = &m;
                s.spawn(move || {
                    for i in 0..100 {
                        m.lock().push(t * 100 + i);
                    }
                });
            }
        });
        let mut v = m.into_inner();
        v.sort();
        assert_eq!((0..400).collect::<Vec<_>>(), v);
    }

    #[test]
    fn try_lock() {
        let mut m = Mutex::new(1);
        {
            let mut g = m.try_lock().unwrap();
            *g += 1;
            assert!(m.try_lock().is_none());
        }
        assert_eq!(2, *m.get_mut());
        assert!(!m.raw().snapshot().locked);
    }
}
