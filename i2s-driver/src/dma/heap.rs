//! DMA-capable memory accounting.
//!
//! DMA buffers and descriptors must come from internal, DMA-reachable RAM,
//! which is a much smaller region than the general heap. Every ring allocation
//! is charged against a global budget here so that exhaustion surfaces as
//! [`Error::NoMemory`](crate::Error::NoMemory) instead of an abort, and so that
//! leaks show up as a non-zero [`DMA_HEAP.used()`](DmaHeap::used) after every
//! channel is gone.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Size of one hardware DMA descriptor in bytes.
pub const DESCRIPTOR_SIZE: usize = 12;

/// Budget of DMA-capable bytes shared by every ring.
///
/// Lock-free and usable from any context. Each successful
/// [`reserve`](Self::reserve) is one live allocation until the matching
/// [`release`](Self::release).
pub struct DmaHeap {
    used: AtomicUsize,
    limit: AtomicUsize,
    allocations: AtomicUsize,
}

impl DmaHeap {
    const fn new() -> Self {
        DmaHeap {
            used: AtomicUsize::new(0),
            limit: AtomicUsize::new(usize::MAX),
            allocations: AtomicUsize::new(0),
        }
    }

    /// Charge `bytes` against the budget. Returns `false` if it would be
    /// exceeded; nothing is charged in that case.
    pub fn reserve(&self, bytes: usize) -> bool {
        let limit = self.limit.load(Ordering::Acquire);
        loop {
            let used = self.used.load(Ordering::Acquire);
            let Some(total) = used.checked_add(bytes).filter(|total| *total <= limit) else {
                return false;
            };
            if self
                .used
                .compare_exchange_weak(used, total, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.allocations.fetch_add(1, Ordering::AcqRel);
                return true;
            }
        }
    }

    /// Return `bytes` previously charged with [`reserve`](Self::reserve).
    pub fn release(&self, bytes: usize) {
        let old = self.used.fetch_sub(bytes, Ordering::AcqRel);
        debug_assert!(old >= bytes, "dma heap release underflow");
        let old = self.allocations.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old > 0, "release without a reservation");
    }

    /// Number of live reservations.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Acquire)
    }

    /// Bytes currently charged.
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    /// Bytes still available.
    pub fn free(&self) -> usize {
        self.limit
            .load(Ordering::Acquire)
            .saturating_sub(self.used())
    }

    /// Cap the budget. Allocations already made are not affected.
    pub fn set_limit(&self, bytes: usize) {
        self.limit.store(bytes, Ordering::Release);
    }

    /// Remove the cap.
    pub fn clear_limit(&self) {
        self.limit.store(usize::MAX, Ordering::Release);
    }

    /// Reset to the initial state. For testing only.
    #[cfg(test)]
    pub fn reset(&self) {
        self.used.store(0, Ordering::Release);
        self.allocations.store(0, Ordering::Release);
        self.clear_limit();
    }
}

/// The global DMA memory budget.
pub static DMA_HEAP: DmaHeap = DmaHeap::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_respects_limit() {
        let heap = DmaHeap::new();
        heap.set_limit(100);
        assert!(heap.reserve(60));
        assert!(!heap.reserve(41));
        assert_eq!(heap.used(), 60);
        assert_eq!(heap.free(), 40);
        assert_eq!(heap.allocations(), 1);
        assert!(heap.reserve(40));
        assert_eq!(heap.allocations(), 2);
        heap.release(60);
        heap.release(40);
        assert_eq!(heap.used(), 0);
        assert_eq!(heap.allocations(), 0);
    }

    #[test]
    fn unlimited_by_default() {
        let heap = DmaHeap::new();
        assert!(heap.reserve(1 << 20));
        heap.release(1 << 20);
        assert_eq!(heap.free(), usize::MAX);
    }
}
