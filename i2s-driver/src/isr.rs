//! Interrupt-context completion handling.
//!
//! One [`InterruptDispatcher`] is armed per running direction. The HAL calls
//! it from the DMA end-of-frame interrupt with the index of the descriptor
//! that just completed:
//!
//! ```text
//! DMA eof(desc) ──► [auto-clear TX buffer] ──► completion queue ──► read()/write()
//!                                         │
//!                                         ├──► on_sent / on_recv / *_q_ovf callback
//!                                         └──► event queue (optional)
//! ```
//!
//! The dispatcher never blocks and never takes the channel mutex. When the
//! completion queue is full, the oldest entry is dropped to make room so the
//! queue always holds the most recent buffers, and the completion is reported
//! as an overflow instead of a done event. The same drop-oldest rule applies to
//! the event queue.
//!
//! Every handler returns `true` when a higher-priority task was woken or a
//! callback asked for it, i.e. the interrupt should yield on exit.

use core::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::dma::DmaRing;
use crate::hal::Direction;
use crate::queue::Queue;

/// Kind of event posted to a channel's event queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    TxDone,
    RxDone,
    TxQueueOverflow,
    RxQueueOverflow,
    /// The DMA engine reached a descriptor the driver still owns.
    DmaError,
}

/// Entry of a channel's event queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct I2sEvent {
    pub kind: EventKind,
    /// Descriptor the event refers to.
    pub desc: usize,
}

/// Argument of an event callback.
#[derive(Debug)]
pub struct EventData<'a> {
    /// Descriptor that completed.
    pub desc: usize,
    /// Contents of the completed buffer. Empty if the buffer could not be
    /// borrowed from the hardware side.
    pub data: &'a [u8],
}

/// Callback run in interrupt context. Returning `true` requests a yield.
pub type EventCallback = Arc<dyn Fn(&EventData<'_>) -> bool + Send + Sync>;

/// Per-channel interrupt callbacks. Only the pair matching the channel's
/// direction is used.
#[derive(Clone, Default)]
pub struct EventCallbacks {
    pub on_sent: Option<EventCallback>,
    pub on_send_q_ovf: Option<EventCallback>,
    pub on_recv: Option<EventCallback>,
    pub on_recv_q_ovf: Option<EventCallback>,
}

impl core::fmt::Debug for EventCallbacks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventCallbacks")
            .field("on_sent", &self.on_sent.is_some())
            .field("on_send_q_ovf", &self.on_send_q_ovf.is_some())
            .field("on_recv", &self.on_recv.is_some())
            .field("on_recv_q_ovf", &self.on_recv_q_ovf.is_some())
            .finish()
    }
}

impl EventCallbacks {
    #[must_use]
    pub fn on_sent(mut self, f: impl Fn(&EventData<'_>) -> bool + Send + Sync + 'static) -> Self {
        self.on_sent = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_send_q_ovf(
        mut self,
        f: impl Fn(&EventData<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_send_q_ovf = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_recv(mut self, f: impl Fn(&EventData<'_>) -> bool + Send + Sync + 'static) -> Self {
        self.on_recv = Some(Arc::new(f));
        self
    }

    #[must_use]
    pub fn on_recv_q_ovf(
        mut self,
        f: impl Fn(&EventData<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.on_recv_q_ovf = Some(Arc::new(f));
        self
    }

    fn get(&self, kind: EventKind) -> Option<&EventCallback> {
        match kind {
            EventKind::TxDone => self.on_sent.as_ref(),
            EventKind::TxQueueOverflow => self.on_send_q_ovf.as_ref(),
            EventKind::RxDone => self.on_recv.as_ref(),
            EventKind::RxQueueOverflow => self.on_recv_q_ovf.as_ref(),
            EventKind::DmaError => None,
        }
    }
}

/// Interrupt status bits relevant to one direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IntrStatus {
    /// A descriptor with `eof` set completed.
    pub eof: bool,
    /// The engine met a descriptor it does not own.
    pub dscr_err: bool,
}

/// Counters updated from interrupt context.
#[derive(Debug, Default)]
pub struct ChannelStats {
    completed: AtomicU32,
    queue_overflows: AtomicU32,
    event_overflows: AtomicU32,
    dma_errors: AtomicU32,
}

/// Point-in-time copy of [`ChannelStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub completed: u32,
    pub queue_overflows: u32,
    pub event_overflows: u32,
    pub dma_errors: u32,
}

impl ChannelStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            completed: self.completed.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            event_overflows: self.event_overflows.load(Ordering::Relaxed),
            dma_errors: self.dma_errors.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.completed.store(0, Ordering::Relaxed);
        self.queue_overflows.store(0, Ordering::Relaxed);
        self.event_overflows.store(0, Ordering::Relaxed);
        self.dma_errors.store(0, Ordering::Relaxed);
    }
}

/// Interrupt-side state of one channel.
pub struct InterruptDispatcher {
    dir: Direction,
    ring: Arc<DmaRing>,
    completion: Arc<Queue<usize>>,
    events: Option<Arc<Queue<I2sEvent>>>,
    callbacks: EventCallbacks,
    auto_clear: bool,
    stats: Arc<ChannelStats>,
}

impl InterruptDispatcher {
    pub(crate) fn new(
        dir: Direction,
        ring: Arc<DmaRing>,
        completion: Arc<Queue<usize>>,
        events: Option<Arc<Queue<I2sEvent>>>,
        callbacks: EventCallbacks,
        auto_clear: bool,
        stats: Arc<ChannelStats>,
    ) -> Self {
        Self {
            dir,
            ring,
            completion,
            events,
            callbacks,
            auto_clear: auto_clear && dir == Direction::Tx,
            stats,
        }
    }

    pub fn direction(&self) -> Direction {
        self.dir
    }

    pub fn ring(&self) -> &Arc<DmaRing> {
        &self.ring
    }

    /// Handle a raw interrupt status for this direction.
    pub fn on_interrupt(&self, status: IntrStatus, desc: usize) -> bool {
        let mut need_yield = false;
        if status.dscr_err {
            self.stats.dma_errors.fetch_add(1, Ordering::Relaxed);
            error!("{:?} dma descriptor error at desc {}", self.dir, desc);
            need_yield |= self.post_event(EventKind::DmaError, desc);
        }
        if status.eof {
            need_yield |= self.on_dma_eof(desc);
        }
        need_yield
    }

    /// Handle completion of descriptor `desc`.
    pub fn on_dma_eof(&self, desc: usize) -> bool {
        if desc >= self.ring.len() {
            error!(
                "{:?} eof on descriptor {} outside a ring of {}",
                self.dir,
                desc,
                self.ring.len()
            );
            return false;
        }
        if self.auto_clear {
            let _ = self.ring.with_hw_buffer(desc, |buf| buf.fill(0));
        }

        let mut need_yield = false;
        let overflow = match self.completion.send_back_from_isr(desc) {
            Ok(woken) => {
                need_yield |= woken;
                false
            }
            Err(desc) => {
                let _ = self.completion.recv_front_from_isr();
                self.stats.queue_overflows.fetch_add(1, Ordering::Relaxed);
                if let Ok(woken) = self.completion.send_back_from_isr(desc) {
                    need_yield |= woken;
                }
                true
            }
        };
        self.stats.completed.fetch_add(1, Ordering::Relaxed);

        let kind = match (self.dir, overflow) {
            (Direction::Tx, false) => EventKind::TxDone,
            (Direction::Tx, true) => EventKind::TxQueueOverflow,
            (Direction::Rx, false) => EventKind::RxDone,
            (Direction::Rx, true) => EventKind::RxQueueOverflow,
        };
        if let Some(callback) = self.callbacks.get(kind) {
            need_yield |= self
                .ring
                .with_hw_buffer(desc, |buf| callback(&EventData { desc, data: buf }))
                .unwrap_or_else(|_| callback(&EventData { desc, data: &[] }));
        }
        need_yield |= self.post_event(kind, desc);
        need_yield
    }

    fn post_event(&self, kind: EventKind, desc: usize) -> bool {
        let Some(events) = &self.events else {
            return false;
        };
        let event = I2sEvent { kind, desc };
        match events.send_back_from_isr(event) {
            Ok(woken) => woken,
            Err(event) => {
                let _ = events.recv_front_from_isr();
                self.stats.event_overflows.fetch_add(1, Ordering::Relaxed);
                events.send_back_from_isr(event).unwrap_or(false)
            }
        }
    }
}
