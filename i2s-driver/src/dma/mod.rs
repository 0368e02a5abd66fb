//! Circular DMA buffer ring.
//!
//! Each channel owns one [`DmaRing`]: `N` equally sized buffers, each with a
//! descriptor linking it to the next, forming a closed circle the DMA engine
//! walks forever once started.
//!
//! ```text
//!        ┌──────────┐   ┌──────────┐         ┌──────────┐
//!   ┌──► │ desc 0   ├──►│ desc 1   ├──► … ──►│ desc N-1 ├──┐
//!   │    │ buf 0    │   │ buf 1    │         │ buf N-1  │  │
//!   │    └──────────┘   └──────────┘         └──────────┘  │
//!   └──────────────────────────────────────────────────────┘
//! ```
//!
//! ## Buffer ownership
//!
//! Every slot is owned by exactly one side at a time:
//!
//! | Owner | Who may touch the buffer |
//! |-------|--------------------------|
//! | [`Owner::Hardware`] | the DMA engine and the interrupt path |
//! | [`Owner::Driver`] | the task holding the channel mutex |
//!
//! Slots start hardware-owned. The blocking read/write path
//! [`claim`](DmaRing::claim)s a slot after the interrupt path reports it
//! complete, copies data, and [`release`](DmaRing::release)s it back once it is
//! full (TX) or drained (RX). While the engine or the interrupt path is inside a
//! buffer the slot is briefly marked busy, and a concurrent claim spins until
//! that access finishes.
//!
//! ## Cursor
//!
//! [`RingCursor`] tracks the slot currently held by the driver and how many
//! bytes of it have been produced or consumed. `curr` is `None` until the
//! first slot arrives from the completion queue.

pub mod heap;

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::constants::DMA_BUFFER_MAX_SIZE;
use crate::hal::Direction;
use crate::{Error, Result};

use heap::{DESCRIPTOR_SIZE, DMA_HEAP};

const OWNER_DRIVER: u8 = 0;
const OWNER_HW: u8 = 1;
const OWNER_BUSY: u8 = 2;

/// Which side currently owns a slot's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Owner {
    Driver,
    Hardware,
}

/// Hardware descriptor fields the driver programs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Descriptor {
    /// Capacity of the attached buffer.
    pub size: usize,
    /// Valid bytes in the attached buffer.
    pub length: usize,
    /// Raise an end-of-frame interrupt when this descriptor completes.
    pub eof: bool,
    /// Index of the next descriptor in the ring.
    pub next: usize,
}

struct Slot {
    owner: AtomicU8,
    buf: UnsafeCell<Box<[u8]>>,
}

/// Number of bytes in one DMA buffer holding `frames` frames of
/// `active_slots` samples of `data_bits` bits each.
///
/// Samples occupy whole 16-bit halfwords (24-bit samples take 4 bytes). The
/// result is clamped to the largest whole number of frames that fits in one
/// descriptor.
pub fn buffer_size(data_bits: u32, active_slots: u32, frames: u32) -> usize {
    let bytes_per_sample = ((data_bits as usize + 15) / 16) * 2;
    let bytes_per_frame = (bytes_per_sample * active_slots.max(1) as usize).max(1);
    let size = frames as usize * bytes_per_frame;
    if size > DMA_BUFFER_MAX_SIZE {
        let clamped = DMA_BUFFER_MAX_SIZE / bytes_per_frame * bytes_per_frame;
        warn!(
            "dma frame num too large, buffer size clamped from {} to {} bytes ({} frames)",
            size,
            clamped,
            clamped / bytes_per_frame
        );
        return clamped;
    }
    size
}

/// A closed ring of DMA descriptors and buffers.
pub struct DmaRing {
    dir: Direction,
    buf_size: usize,
    descs: Vec<Descriptor>,
    slots: Vec<Slot>,
    charged: usize,
}

// SAFETY: buffer contents are only reached through `with_driver_buffer`
// (driver-owned slots, serialized by the channel mutex) or `with_hw_buffer`
// (hardware-owned slots, exclusive through the busy state).
unsafe impl Sync for DmaRing {}
unsafe impl Send for DmaRing {}

impl DmaRing {
    /// Allocate `desc_num` linked descriptors of `buf_size` bytes each.
    ///
    /// Every descriptor starts hardware-owned with end-of-frame set. Fails with
    /// `InvalidArgument` for an oversized buffer and `NoMemory` when the DMA
    /// budget or the allocator is exhausted; nothing stays allocated then.
    pub fn allocate(dir: Direction, desc_num: usize, buf_size: usize) -> Result<DmaRing> {
        ensure!(
            buf_size > 0 && buf_size <= DMA_BUFFER_MAX_SIZE,
            Error::InvalidArgument,
            "dma buffer size {} out of range",
            buf_size
        );
        ensure!(desc_num >= 2, Error::InvalidArgument, "a dma ring needs at least 2 descriptors");

        let charged = desc_num
            .checked_mul(buf_size + DESCRIPTOR_SIZE)
            .ok_or(Error::NoMemory)?;
        if !DMA_HEAP.reserve(charged) {
            error!("no memory for {} dma buffers of {} bytes", desc_num, buf_size);
            return Err(Error::NoMemory);
        }
        let mut ring = DmaRing {
            dir,
            buf_size,
            descs: Vec::new(),
            slots: Vec::new(),
            charged,
        };
        // Dropping `ring` on any early return gives the budget back.
        if ring.descs.try_reserve_exact(desc_num).is_err()
            || ring.slots.try_reserve_exact(desc_num).is_err()
        {
            return Err(Error::NoMemory);
        }
        for i in 0..desc_num {
            let mut buf = Vec::new();
            buf.try_reserve_exact(buf_size).map_err(|_| Error::NoMemory)?;
            buf.resize(buf_size, 0u8);
            ring.slots.push(Slot {
                owner: AtomicU8::new(OWNER_HW),
                buf: UnsafeCell::new(buf.into_boxed_slice()),
            });
            ring.descs.push(Descriptor {
                size: buf_size,
                length: buf_size,
                eof: true,
                next: (i + 1) % desc_num,
            });
        }
        debug!(
            "{:?} dma ring allocated: {} descriptors x {} bytes",
            dir,
            desc_num,
            buf_size
        );
        Ok(ring)
    }

    /// Release every buffer and descriptor. A no-op on an empty ring.
    pub fn free(&mut self) {
        if self.charged == 0 {
            return;
        }
        self.descs = Vec::new();
        self.slots = Vec::new();
        DMA_HEAP.release(self.charged);
        debug!("{:?} dma ring freed ({} bytes)", self.dir, self.charged);
        self.charged = 0;
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    /// Number of descriptors.
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn descriptor(&self, index: usize) -> Option<&Descriptor> {
        self.descs.get(index)
    }

    /// Index of the descriptor following `index`.
    pub fn next(&self, index: usize) -> usize {
        self.descs.get(index).map_or(0, |d| d.next)
    }

    pub fn owner(&self, index: usize) -> Option<Owner> {
        self.slots.get(index).map(|slot| {
            if slot.owner.load(Ordering::Acquire) == OWNER_DRIVER {
                Owner::Driver
            } else {
                Owner::Hardware
            }
        })
    }

    /// Take a completed slot away from the hardware.
    ///
    /// Returns `false` for an index outside the ring.
    pub fn claim(&self, index: usize) -> bool {
        let Some(slot) = self.slots.get(index) else {
            return false;
        };
        loop {
            match slot.owner.compare_exchange_weak(
                OWNER_HW,
                OWNER_DRIVER,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(OWNER_DRIVER) => return true,
                Err(_) => core::hint::spin_loop(),
            }
        }
    }

    /// Hand a driver-owned slot back to the hardware.
    pub fn release(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            let _ = slot.owner.compare_exchange(
                OWNER_DRIVER,
                OWNER_HW,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }

    /// Hand every slot back to the hardware.
    pub fn release_all(&self) {
        for i in 0..self.slots.len() {
            self.release(i);
        }
    }

    /// Run `f` on a driver-owned buffer.
    ///
    /// The caller must hold the owning channel's mutex. Returns `None` if the
    /// slot is not driver-owned.
    pub(crate) fn with_driver_buffer<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        let slot = self.slots.get(index)?;
        if slot.owner.load(Ordering::Acquire) != OWNER_DRIVER {
            return None;
        }
        // SAFETY: driver-owned slots are only touched by the mutex holder.
        let buf = unsafe { &mut *slot.buf.get() };
        Some(f(buf))
    }

    /// Run `f` on a hardware-owned buffer from the DMA engine or the interrupt
    /// path.
    ///
    /// Fails with the current owner if the driver holds the slot (the
    /// hardware would report a descriptor error) or another hardware-side
    /// access is in progress.
    pub fn with_hw_buffer<R>(
        &self,
        index: usize,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> core::result::Result<R, Owner> {
        let slot = self.slots.get(index).ok_or(Owner::Driver)?;
        match slot.owner.compare_exchange(
            OWNER_HW,
            OWNER_BUSY,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(OWNER_DRIVER) => return Err(Owner::Driver),
            Err(_) => return Err(Owner::Hardware),
        }
        // SAFETY: the busy state excludes every other access to this slot.
        let buf = unsafe { &mut *slot.buf.get() };
        let result = f(buf);
        slot.owner.store(OWNER_HW, Ordering::Release);
        Ok(result)
    }

    /// Zero every buffer in the ring.
    ///
    /// Only meaningful while the engine is stopped; slots currently being
    /// accessed by the hardware side are skipped.
    pub fn zero_all(&self) {
        for i in 0..self.slots.len() {
            let zero = |buf: &mut [u8]| buf.fill(0);
            if self.with_hw_buffer(i, zero) == Err(Owner::Driver) {
                let _ = self.with_driver_buffer(i, zero);
            }
        }
    }

    /// Length of the cycle reached by following `next` from descriptor 0.
    pub fn cycle_len(&self) -> usize {
        if self.descs.is_empty() {
            return 0;
        }
        let mut len = 1;
        let mut i = self.next(0);
        while i != 0 && len <= self.descs.len() {
            i = self.next(i);
            len += 1;
        }
        len
    }
}

impl Drop for DmaRing {
    fn drop(&mut self) {
        self.free();
    }
}

/// Position of the blocking read/write path within the ring.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RingCursor {
    /// Slot currently held by the driver.
    pub curr: Option<usize>,
    /// Bytes produced or consumed in `curr`.
    pub rw_pos: usize,
}

impl RingCursor {
    /// Whether the next byte needs a fresh slot from the completion queue.
    pub fn needs_slot(&self, buf_size: usize) -> bool {
        self.curr.is_none() || self.rw_pos >= buf_size
    }

    pub fn reset(&mut self) {
        *self = RingCursor::default();
    }
}
