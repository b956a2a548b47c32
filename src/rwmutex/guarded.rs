use std::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

use super::RawRwMutex;
use crate::config::Config;

/// A [`RawRwMutex`] with the data it protects
pub struct RwLock<Y> {
    raw: RawRwMutex,
    value: UnsafeCell<Y>,
}

/// as the RwLock hands out `&Y` to several threads at once,
/// Y has to be not only Send, but also Sync
unsafe impl<Y> Sync for RwLock<Y> where Y: Send + Sync {}

impl<Y> RwLock<Y> {
    pub const fn new(value: Y) -> Self {
        Self::with_config(value, Config::new())
    }

    pub const fn with_config(value: Y, config: Config) -> Self {
        Self {
            raw: RawRwMutex::with_config(config),
            value: UnsafeCell::new(value),
        }
    }

    pub fn read(&self) -> ReadGuard<'_, Y> {
        self.raw.read_lock();
        ReadGuard { lock: self }
    }

    pub fn try_read(&self) -> Option<ReadGuard<'_, Y>> {
        self.raw.try_read_lock().then(|| ReadGuard { lock: self })
    }

    pub fn write(&self) -> WriteGuard<'_, Y> {
        self.raw.write_lock();
        WriteGuard { lock: self }
    }

    pub fn try_write(&self) -> Option<WriteGuard<'_, Y>> {
        self.raw.try_write_lock().then(|| WriteGuard { lock: self })
    }

    pub fn get_mut(&mut self) -> &mut Y {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> Y {
        self.value.into_inner()
    }

    pub fn raw(&self) -> &RawRwMutex {
        &self.raw
    }
}

impl<Y: Default> Default for RwLock<Y> {
    fn default() -> Self {
        Self::new(Y::default())
    }
}

pub struct ReadGuard<'a, Y> {
    lock: &'a RwLock<Y>,
}

/// Read guard's main purpose - provide &Y
impl<Y> Deref for ReadGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: no writer while a read lock is held
        unsafe { &*self.lock.value.get() }
    }
}

impl<Y> Drop for ReadGuard<'_, Y> {
    fn drop(&mut self) {
        self.lock.raw.read_unlock();
    }
}

pub struct WriteGuard<'a, Y> {
    lock: &'a RwLock<Y>,
}

/// Write guard also allows to just read the data
impl<Y> Deref for WriteGuard<'_, Y> {
    type Target = Y;
    fn deref(&self) -> &Self::Target {
        // SAFETY: the write lock is exclusive
        unsafe { &*self.lock.value.get() }
    }
}

/// write guard's main purpose - get &mut Y
impl<Y> DerefMut for WriteGuard<'_, Y> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the write lock is exclusive
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<Y> Drop for WriteGuard<'_, Y> {
    fn drop(&mut self) {
        self.lock.raw.write_unlock();
    }
}

#[cfg(test)]
mod test {
    use std::thread::scope;

    use super::*;

    #[test]
    fn guards() {
        let lock = RwLock::new(Vec::new());
        scope(|s| {
            for t in 0..2 {
                let lock = &lock;
                s.spawn(move || {
                    for i in 0..50 {
                        lock.write().push(t * 50 + i);
                    }
                });
            }
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..100 {
                        let v = lock.read();
                        // a writer never leaves it half-done
                        assert!(v.len() <= 100);
                    }
                });
            }
        });
        assert_eq!(100, lock.read().len());
    }

    #[test]
    fn try_guards() {
        let mut lock = RwLock::new(5);
        {
            let r1 = lock.try_read().unwrap();
            let r2 = lock.read();
            assert_eq!(10, *r1 + *r2);
            assert!(lock.try_write().is_none());
        }
        {
            let mut w = lock.try_write().unwrap();
            *w = 7;
            assert!(lock.try_read().is_none());
        }
        assert_eq!(7, *lock.get_mut());
        assert_eq!(7, lock.into_inner());
    }

    #[test]
    fn with_config() {
        let lock = RwLock::with_config(
            0u32,
            Config::new().with_starvation_threshold(std::time::Duration::ZERO),
        );
        scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..500 {
                        *lock.write() += 1;
                        let _ = *lock.read();
                    }
                });
            }
        });
        assert_eq!(2_000, lock.into_inner());
    }
}
