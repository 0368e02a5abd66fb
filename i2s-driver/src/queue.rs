//! Bounded queue shared by the interrupt path and application tasks.
//!
//! The interrupt side only ever calls the non-blocking `*_from_isr` methods,
//! which take a `critical-section` for a handful of instructions and never
//! allocate: storage is reserved up front by [`Queue::new`]. Tasks block in
//! [`recv_front`](Queue::recv_front) by registering themselves as waiters and
//! parking; every send or [`notify`](Queue::notify) unparks them.
//!
//! Unlike a lock-free SPSC ring, the producer may also drop the oldest entry
//! to make room, which is how completion and event queues report overflow.

use core::cell::RefCell;
use core::time::Duration;
use std::collections::VecDeque;
use std::thread::{self, Thread};
use std::time::Instant;

use critical_section::Mutex;

use crate::mutex::deadline;
use crate::{Error, Result};

struct Inner<T> {
    items: VecDeque<T>,
    waiters: Vec<Thread>,
}

pub struct Queue<T> {
    capacity: usize,
    inner: Mutex<RefCell<Inner<T>>>,
}

impl<T: Send> Queue<T> {
    /// Create a queue holding up to `capacity` items.
    pub fn new(capacity: usize) -> Result<Self> {
        ensure!(capacity > 0, Error::InvalidArgument, "queue capacity must be non-zero");
        let mut items = VecDeque::new();
        if items.try_reserve_exact(capacity).is_err() {
            error!("no memory for a queue of {} items", capacity);
            return Err(Error::NoMemory);
        }
        Ok(Self {
            capacity,
            inner: Mutex::new(RefCell::new(Inner {
                items,
                waiters: Vec::new(),
            })),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.inner.borrow_ref(cs).items.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    /// Append `item` without blocking. A full queue hands the item back.
    ///
    /// On success returns whether a blocked task was woken.
    pub fn send_back_from_isr(&self, item: T) -> core::result::Result<bool, T> {
        let waiters = critical_section::with(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            if inner.items.len() >= self.capacity {
                return Err(item);
            }
            inner.items.push_back(item);
            Ok(core::mem::take(&mut inner.waiters))
        })?;
        Ok(wake(waiters))
    }

    /// Remove the oldest item without blocking.
    pub fn recv_front_from_isr(&self) -> Option<T> {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).items.pop_front())
    }

    /// Block up to `timeout` for an item.
    pub fn recv_front(&self, timeout: Duration) -> Option<T> {
        self.recv_front_until(timeout, || false)
    }

    /// Block up to `timeout` for an item, giving up early once `cancelled`
    /// returns `true`.
    ///
    /// `cancelled` is checked after registering as a waiter, so a
    /// [`notify`](Self::notify) issued after the condition became true always
    /// ends the wait.
    pub fn recv_front_until(&self, timeout: Duration, cancelled: impl Fn() -> bool) -> Option<T> {
        let deadline = deadline(timeout);
        let me = thread::current();
        let item = loop {
            let item = critical_section::with(|cs| {
                let mut inner = self.inner.borrow_ref_mut(cs);
                let item = inner.items.pop_front();
                if item.is_none() && !inner.waiters.iter().any(|t| t.id() == me.id()) {
                    inner.waiters.push(me.clone());
                }
                item
            });
            if item.is_some() {
                break item;
            }
            if cancelled() {
                break None;
            }
            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break None;
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        };
        critical_section::with(|cs| {
            self.inner
                .borrow_ref_mut(cs)
                .waiters
                .retain(|t| t.id() != me.id());
        });
        item
    }

    /// Wake every blocked receiver so it re-checks its cancellation condition.
    pub fn notify(&self) {
        let waiters =
            critical_section::with(|cs| core::mem::take(&mut self.inner.borrow_ref_mut(cs).waiters));
        wake(waiters);
    }

    /// Drop every queued item.
    pub fn reset(&self) {
        critical_section::with(|cs| self.inner.borrow_ref_mut(cs).items.clear());
    }
}

fn wake(waiters: Vec<Thread>) -> bool {
    let woken = !waiters.is_empty();
    for t in waiters {
        t.unpark();
    }
    woken
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn fifo_and_capacity() {
        let q = Queue::new(3).unwrap();
        assert_eq!(q.send_back_from_isr(1), Ok(false));
        q.send_back_from_isr(2).unwrap();
        q.send_back_from_isr(3).unwrap();
        assert!(q.is_full());
        assert_eq!(q.send_back_from_isr(4), Err(4));
        assert_eq!(q.recv_front_from_isr(), Some(1));
        assert_eq!(q.recv_front(Duration::ZERO), Some(2));
        assert_eq!(q.len(), 1);
        q.reset();
        assert!(q.is_empty());
    }

    #[test]
    fn zero_capacity_is_rejected() {
        assert_eq!(Queue::<u8>::new(0).err(), Some(Error::InvalidArgument));
    }

    #[test]
    fn recv_times_out_when_empty() {
        let q = Queue::<u8>::new(1).unwrap();
        let start = Instant::now();
        assert_eq!(q.recv_front(Duration::from_millis(20)), None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn blocked_receiver_is_woken_by_send() {
        let q = Arc::new(Queue::new(2).unwrap());
        let rx = {
            let q = q.clone();
            thread::spawn(move || q.recv_front(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        q.send_back_from_isr(7u32).unwrap();
        assert_eq!(rx.join().unwrap(), Some(7));
    }

    #[test]
    fn notify_ends_a_cancelled_wait() {
        let q = Arc::new(Queue::<u32>::new(2).unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        let rx = {
            let q = q.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let item = q.recv_front_until(Duration::from_secs(5), || stop.load(Ordering::SeqCst));
                (item, start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::SeqCst);
        q.notify();
        let (item, elapsed) = rx.join().unwrap();
        assert_eq!(item, None);
        assert!(elapsed < Duration::from_secs(2));
    }
}
