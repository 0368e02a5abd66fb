//! Channel mutex with a bounded wait.
//!
//! `std::sync::Mutex` cannot give up after a deadline, but every blocking
//! channel operation takes a caller-supplied timeout that also covers acquiring
//! the channel. [`TimedMutex`] keeps a `locked` flag under a short-hold
//! `std` mutex and parks waiters on a [`Condvar`] until the flag clears or the
//! deadline passes.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::time::Duration;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::{Error, Result};

/// Wait forever.
pub const WAIT_FOREVER: Duration = Duration::MAX;

/// Absolute deadline for `timeout` from now, or `None` if it never expires.
pub(crate) fn deadline(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

pub struct TimedMutex<T> {
    locked: Mutex<bool>,
    cond: Condvar,
    data: UnsafeCell<T>,
}

unsafe impl<T> Sync for TimedMutex<T> where T: Send {}
unsafe impl<T> Send for TimedMutex<T> where T: Send {}

impl<T> TimedMutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: Mutex::new(false),
            cond: Condvar::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// Block until the mutex is free.
    pub fn lock(&self) -> TimedMutexGuard<'_, T> {
        let mut locked = self.flag();
        while *locked {
            locked = self.cond.wait(locked).unwrap_or_else(PoisonError::into_inner);
        }
        *locked = true;
        TimedMutexGuard(self)
    }

    /// Block until the mutex is free or `timeout` expires.
    ///
    /// Expiry yields [`Error::TimedOut`] with nothing transferred.
    pub fn lock_timeout(&self, timeout: Duration) -> Result<TimedMutexGuard<'_, T>> {
        let Some(deadline) = deadline(timeout) else {
            return Ok(self.lock());
        };
        let mut locked = self.flag();
        while *locked {
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::TimedOut { transferred: 0 });
            }
            locked = self
                .cond
                .wait_timeout(locked, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *locked = true;
        Ok(TimedMutexGuard(self))
    }

    pub fn try_lock(&self) -> Option<TimedMutexGuard<'_, T>> {
        let mut locked = self.flag();
        if *locked {
            return None;
        }
        *locked = true;
        Some(TimedMutexGuard(self))
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.locked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unlock(&self) {
        *self.flag() = false;
        self.cond.notify_one();
    }
}

pub struct TimedMutexGuard<'a, T>(&'a TimedMutex<T>);

unsafe impl<T> Sync for TimedMutexGuard<'_, T> where T: Sync {}

impl<T> Drop for TimedMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.0.unlock();
    }
}

impl<T> Deref for TimedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: the guard proves exclusive access.
        unsafe { &*self.0.data.get() }
    }
}

impl<T> DerefMut for TimedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: the guard proves exclusive access.
        unsafe { &mut *self.0.data.get() }
    }
}
