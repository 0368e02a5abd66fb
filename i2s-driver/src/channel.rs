//! Channel handles and the channel state machine.
//!
//! A [`Channel`] is one direction of one port. Its lifecycle:
//!
//! ```text
//!            init_mode            start              write / read
//! Register ───────────► Ready ───────────► Idle ◄──────────────────► Writing / Reading
//!                         ▲                  │                              │
//!                         └──────── stop ────┴──────────────────────────────┘
//! ```
//!
//! | Operation | Allowed in | Result state |
//! |-----------|------------|--------------|
//! | `init_mode` | Register | Ready |
//! | `reconfigure_*`, `preload`, `zero_dma_buffer` | Ready | Ready |
//! | `start` | Ready | Idle |
//! | `write` / `read` | Idle, Writing, Reading | Idle |
//! | `abort` | Idle, Writing, Reading | Idle |
//! | `stop` | Idle, Writing, Reading | Ready |
//! | `delete` / drop | any | (gone) |
//!
//! There is no way back to Register: changing mode means deleting the channel
//! and allocating a new one.
//!
//! ## Transfers
//!
//! `write` and `read` hold the channel mutex for the whole call and copy data
//! through the DMA ring one buffer at a time. Each buffer is obtained from the
//! completion queue fed by the [`InterruptDispatcher`]; every wait for one is
//! bounded by the caller's timeout. A timeout returns
//! [`Error::TimedOut`] carrying the bytes already copied; those bytes are in
//! the ring and the channel stays usable.
//!
//! [`abort`](Channel::abort) does not take the mutex. It only flips the state
//! back to Idle and wakes the waiting transfer, which notices on its next loop
//! iteration and returns the bytes copied so far as a success.

use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use core::time::Duration;
use std::sync::{Arc, Weak};

use crate::clock::ClockInfo;
use crate::config::{ChannelConfig, Port, Role};
use crate::controller::{Controller, ModeSnapshot};
use crate::dma::{self, DmaRing, RingCursor};
use crate::hal::{Direction, HalProvider};
use crate::isr::{ChannelStats, EventCallbacks, I2sEvent, InterruptDispatcher, StatsSnapshot};
use crate::mode::{self, ClkConfig, CommMode, GpioSetting, ModeConfig, SlotConfig, SlotLayout};
use crate::mutex::TimedMutex;
use crate::platform;
use crate::pm::{PmLock, PmLockKind};
use crate::queue::Queue;
use crate::{Error, Result};

/// Channel state.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChannelState {
    /// Allocated, no mode yet.
    Register = 0,
    /// Mode initialized, stopped.
    Ready = 1,
    /// Started, no transfer in progress.
    Idle = 2,
    Writing = 3,
    Reading = 4,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Register,
            1 => ChannelState::Ready,
            2 => ChannelState::Idle,
            3 => ChannelState::Writing,
            _ => ChannelState::Reading,
        }
    }

    fn is_running(self) -> bool {
        self > ChannelState::Ready
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Type-level channel direction.
pub trait ChannelDirection: sealed::Sealed {
    const DIR: Direction;
}

/// Transmit direction marker.
#[derive(Debug)]
pub struct Tx;

/// Receive direction marker.
#[derive(Debug)]
pub struct Rx;

impl sealed::Sealed for Tx {}
impl sealed::Sealed for Rx {}

impl ChannelDirection for Tx {
    const DIR: Direction = Direction::Tx;
}

impl ChannelDirection for Rx {
    const DIR: Direction = Direction::Rx;
}

/// Snapshot of a channel's configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelInfo {
    pub port: u8,
    pub direction: Direction,
    /// Effective role; a master paired into full duplex reports `Slave`.
    pub role: Role,
    pub mode: CommMode,
    pub state: ChannelState,
    pub total_slots: u32,
    pub active_slots: u32,
    /// Bytes per DMA buffer, `0` before `init_mode`.
    pub buf_size: usize,
    pub desc_num: usize,
    pub clock: Option<ClockInfo>,
    pub full_duplex: bool,
}

struct ChannelInner {
    config: ChannelConfig,
    role: Role,
    forced_slave: bool,
    mode: Option<ModeConfig>,
    layout: Option<SlotLayout>,
    clock: Option<ClockInfo>,
    ring: Option<Arc<DmaRing>>,
    cursor: RingCursor,
    preload: RingCursor,
    preload_full: bool,
    callbacks: EventCallbacks,
    pm: Option<PmLock>,
}

impl ChannelInner {
    fn reset_preload(&mut self) {
        self.preload.reset();
        self.preload_full = false;
    }
}

pub(crate) struct ChannelCore {
    dir: Direction,
    port: u8,
    controller: Weak<Controller>,
    state: AtomicU8,
    deleted: AtomicBool,
    inner: TimedMutex<ChannelInner>,
    completion: Arc<Queue<usize>>,
    events: Option<Arc<Queue<I2sEvent>>>,
    stats: Arc<ChannelStats>,
}

impl ChannelCore {
    fn create(provider: &dyn HalProvider, config: &ChannelConfig, dir: Direction) -> Result<Arc<Self>> {
        config.validate(provider.caps().ports())?;
        let lock = platform::lifecycle();
        let ctrl = platform::acquire_controller(&lock, provider, config.port, dir)?;

        let queues = Queue::<usize>::new(config.dma_desc as usize - 1).and_then(|completion| {
            let events = config
                .event_queue_len
                .map(Queue::<I2sEvent>::new)
                .transpose()?;
            Ok((completion, events))
        });
        let (completion, events) = match queues {
            Ok(queues) => queues,
            Err(err) => {
                platform::release_controller(&lock, &ctrl, dir);
                return Err(err);
            }
        };

        let core = Arc::new(ChannelCore {
            dir,
            port: ctrl.port(),
            controller: Arc::downgrade(&ctrl),
            state: AtomicU8::new(ChannelState::Register as u8),
            deleted: AtomicBool::new(false),
            inner: TimedMutex::new(ChannelInner {
                config: *config,
                role: config.role,
                forced_slave: false,
                mode: None,
                layout: None,
                clock: None,
                ring: None,
                cursor: RingCursor::default(),
                preload: RingCursor::default(),
                preload_full: false,
                callbacks: EventCallbacks::default(),
                pm: None,
            }),
            completion: Arc::new(completion),
            events: events.map(Arc::new),
            stats: Arc::new(ChannelStats::default()),
        });
        ctrl.register_channel(dir, core.clone());
        info!("port {} {:?} channel registered", core.port, dir);
        Ok(core)
    }

    pub(crate) fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn controller(&self) -> Result<Arc<Controller>> {
        self.controller.upgrade().ok_or_else(|| {
            error!("port {} {:?} channel lost its controller", self.port, self.dir);
            Error::InvalidState
        })
    }

    fn expect_state(&self, expected: ChannelState, op: &'static str) -> Result<()> {
        let state = self.state();
        ensure!(
            state == expected,
            Error::InvalidState,
            "{} needs the {:?} channel in {:?} state, it is {:?}",
            op,
            self.dir,
            expected,
            state
        );
        Ok(())
    }

    fn expect_running(&self, op: &'static str) -> Result<()> {
        let state = self.state();
        ensure!(
            state.is_running(),
            Error::InvalidState,
            "{} needs the {:?} channel started, it is {:?}",
            op,
            self.dir,
            state
        );
        Ok(())
    }

    fn dispatcher(&self, inner: &ChannelInner, ring: Arc<DmaRing>) -> Arc<InterruptDispatcher> {
        Arc::new(InterruptDispatcher::new(
            self.dir,
            ring,
            self.completion.clone(),
            self.events.clone(),
            inner.callbacks.clone(),
            inner.config.auto_clear,
            self.stats.clone(),
        ))
    }

    fn init_mode(&self, config: ModeConfig) -> Result<()> {
        let mut inner = self.inner.lock();
        self.expect_state(ChannelState::Register, "init_mode")?;
        let ctrl = self.controller()?;
        self.program(&mut inner, &ctrl, config)?;
        self.set_state(ChannelState::Ready);
        info!(
            "port {} {:?} channel initialized, mode {:?}, role {:?}",
            self.port,
            self.dir,
            config.comm_mode(),
            inner.role
        );
        Ok(())
    }

    /// Validate `config`, size the ring and program the port.
    ///
    /// Nothing in `inner` or on the port changes unless every step succeeds.
    fn program(
        &self,
        inner: &mut ChannelInner,
        ctrl: &Controller,
        config: ModeConfig,
    ) -> Result<()> {
        let caps = *ctrl.caps();
        config.check(&caps, self.port, self.dir)?;
        let layout = config.layout()?;

        let mut hw = ctrl.hw();
        let decision = ctrl.duplex_decision(&hw, self.dir, &config, inner.config.role)?;
        let role = mode::clock_role(decision.role, decision.forced_slave, config.slave_bclk_div());
        let clock = config.clock(&caps, role, &layout)?;

        let buf_size = dma::buffer_size(layout.data_bits, layout.active_slots, inner.config.dma_frame);
        let ring = match &inner.ring {
            Some(ring) if ring.buf_size() == buf_size => ring.clone(),
            _ => Arc::new(DmaRing::allocate(
                self.dir,
                inner.config.dma_desc as usize,
                buf_size,
            )?),
        };

        hw.hal.attach_dma(self.dir, self.dispatcher(inner, ring.clone()))?;
        hw.hal.set_slot(self.dir, &layout, decision.role);
        hw.hal.set_clock(self.dir, &clock);
        if self.dir == Direction::Rx {
            hw.hal.set_rx_eof_num(buf_size);
        }
        hw.hal.route_gpio(self.dir, &config.pin_route(self.dir, decision.role));
        ctrl.commit_mode(
            &mut hw,
            self.dir,
            ModeSnapshot {
                key: config.duplex_key(),
                role: decision.role,
                forced_slave: decision.forced_slave,
                clock,
            },
            decision.full_duplex,
        );
        drop(hw);

        if !inner.ring.as_ref().is_some_and(|old| Arc::ptr_eq(old, &ring)) {
            inner.cursor.reset();
            inner.reset_preload();
            self.completion.reset();
        }
        inner.ring = Some(ring);
        let kind = PmLockKind::for_source(clock.source);
        if inner.pm.as_ref().map(PmLock::kind) != Some(kind) {
            inner.pm = Some(PmLock::new(kind));
        }
        inner.mode = Some(config);
        inner.layout = Some(layout);
        inner.clock = Some(clock);
        inner.role = decision.role;
        inner.forced_slave = decision.forced_slave;
        Ok(())
    }

    fn reconfigure(&self, op: &'static str, apply: impl FnOnce(&ModeConfig) -> Result<ModeConfig>) -> Result<()> {
        let mut inner = self.inner.lock();
        self.expect_state(ChannelState::Ready, op)?;
        let ctrl = self.controller()?;
        let Some(current) = inner.mode else {
            error!("{:?} channel is Ready without a mode", self.dir);
            return Err(Error::InvalidState);
        };
        let config = apply(&current)?;
        self.program(&mut inner, &ctrl, config)?;
        debug!("port {} {:?} channel {}", self.port, self.dir, op);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.expect_state(ChannelState::Ready, "start")?;
        let ctrl = self.controller()?;
        if let Some(ring) = &inner.ring {
            ring.release_all();
        }
        inner.cursor.reset();
        inner.reset_preload();
        self.completion.reset();
        {
            let mut hw = ctrl.hw();
            hw.hal.reset(self.dir);
            hw.hal.start(self.dir);
        }
        if let Some(pm) = inner.pm.as_mut() {
            pm.acquire();
        }
        self.set_state(ChannelState::Idle);
        debug!("port {} {:?} channel started", self.port, self.dir);
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.expect_running("stop")?;
        let ctrl = self.controller()?;
        ctrl.hw().hal.stop(self.dir);
        if let (Some(ring), Some(index)) = (&inner.ring, inner.cursor.curr) {
            ring.release(index);
        }
        inner.cursor.reset();
        if let Some(pm) = inner.pm.as_mut() {
            pm.release();
        }
        self.set_state(ChannelState::Ready);
        debug!("port {} {:?} channel stopped", self.port, self.dir);
        Ok(())
    }

    fn abort(&self) -> Result<()> {
        let result = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
            ChannelState::from_u8(state)
                .is_running()
                .then_some(ChannelState::Idle as u8)
        });
        if let Err(state) = result {
            error!(
                "abort needs the {:?} channel started, it is {:?}",
                self.dir,
                ChannelState::from_u8(state)
            );
            return Err(Error::InvalidState);
        }
        self.completion.notify();
        Ok(())
    }

    /// Move `len` bytes through the ring. `copy` gets the unused tail of the
    /// current buffer and the bytes done so far, and returns how many it moved.
    fn transfer(
        &self,
        len: usize,
        timeout: Duration,
        mut copy: impl FnMut(&mut [u8], usize) -> usize,
    ) -> Result<usize> {
        let (op, transient) = match self.dir {
            Direction::Tx => ("write", ChannelState::Writing),
            Direction::Rx => ("read", ChannelState::Reading),
        };
        self.expect_running(op)?;
        let mut inner = self.inner.lock_timeout(timeout)?;
        self.expect_running(op)?;
        let Some(ring) = inner.ring.clone() else {
            error!("{:?} channel is running without a dma ring", self.dir);
            return Err(Error::InvalidState);
        };
        self.set_state(transient);

        let buf_size = ring.buf_size();
        let mut done = 0;
        let result = loop {
            if done >= len {
                break Ok(done);
            }
            if self.state() != transient {
                debug!("{:?} {} aborted after {} bytes", self.dir, op, done);
                break Ok(done);
            }
            if inner.cursor.needs_slot(buf_size) {
                match self
                    .completion
                    .recv_front_until(timeout, || self.state() != transient)
                {
                    Some(index) => {
                        if !ring.claim(index) {
                            continue;
                        }
                        inner.cursor.curr = Some(index);
                        inner.cursor.rw_pos = 0;
                    }
                    None if self.state() != transient => continue,
                    None => break Err(Error::TimedOut { transferred: done }),
                }
            }
            let Some(index) = inner.cursor.curr else {
                break Err(Error::InvalidState);
            };
            let pos = inner.cursor.rw_pos;
            let Some(n) = ring.with_driver_buffer(index, |buf| copy(&mut buf[pos..], done)) else {
                error!("{:?} dma buffer {} is not owned by the driver", self.dir, index);
                break Err(Error::InvalidState);
            };
            inner.cursor.rw_pos += n;
            done += n;
            if inner.cursor.rw_pos >= buf_size {
                ring.release(index);
            }
        };
        let _ = self.state.compare_exchange(
            transient as u8,
            ChannelState::Idle as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        result
    }

    fn write(&self, src: &[u8], timeout: Duration) -> Result<usize> {
        self.transfer(src.len(), timeout, |buf, done| {
            let n = buf.len().min(src.len() - done);
            buf[..n].copy_from_slice(&src[done..done + n]);
            n
        })
    }

    fn read(&self, dst: &mut [u8], timeout: Duration) -> Result<usize> {
        let len = dst.len();
        self.transfer(len, timeout, |buf, done| {
            let n = buf.len().min(len - done);
            dst[done..done + n].copy_from_slice(&buf[..n]);
            n
        })
    }

    fn preload(&self, data: &[u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        self.expect_state(ChannelState::Ready, "preload")?;
        let Some(ring) = inner.ring.clone() else {
            return Err(Error::InvalidState);
        };
        let mut loaded = 0;
        while loaded < data.len() && !inner.preload_full {
            let index = inner.preload.curr.unwrap_or(0);
            let pos = inner.preload.rw_pos;
            ring.claim(index);
            let n = ring
                .with_driver_buffer(index, |buf| {
                    let n = (buf.len() - pos).min(data.len() - loaded);
                    buf[pos..pos + n].copy_from_slice(&data[loaded..loaded + n]);
                    n
                })
                .unwrap_or(0);
            ring.release(index);
            if n == 0 {
                break;
            }
            loaded += n;
            inner.preload = RingCursor {
                curr: Some(index),
                rw_pos: pos + n,
            };
            if pos + n >= ring.buf_size() {
                let next = ring.next(index);
                inner.preload = RingCursor {
                    curr: Some(next),
                    rw_pos: 0,
                };
                inner.preload_full = next == 0;
            }
        }
        if inner.preload_full && loaded < data.len() {
            warn!("dma buffers full, {} of {} bytes preloaded", loaded, data.len());
        }
        Ok(loaded)
    }

    fn zero_dma_buffer(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        self.expect_state(ChannelState::Ready, "zero_dma_buffer")?;
        if let Some(ring) = &inner.ring {
            ring.zero_all();
        }
        inner.reset_preload();
        Ok(())
    }

    fn register_event_callback(&self, callbacks: EventCallbacks) -> Result<()> {
        let mut inner = self.inner.lock();
        let state = self.state();
        ensure!(
            !state.is_running(),
            Error::InvalidState,
            "callbacks can only be registered on a stopped {:?} channel",
            self.dir
        );
        inner.callbacks = callbacks;
        if let Some(ring) = inner.ring.clone() {
            let ctrl = self.controller()?;
            let dispatcher = self.dispatcher(&inner, ring);
            ctrl.hw().hal.attach_dma(self.dir, dispatcher)?;
        }
        Ok(())
    }

    fn info(&self) -> ChannelInfo {
        let inner = self.inner.lock();
        ChannelInfo {
            port: self.port,
            direction: self.dir,
            role: inner.role,
            mode: inner.mode.map_or(CommMode::None, |m| m.comm_mode()),
            state: self.state(),
            total_slots: inner.layout.map_or(0, |l| l.total_slots),
            active_slots: inner.layout.map_or(0, |l| l.active_slots),
            buf_size: inner.ring.as_ref().map_or(0, |r| r.buf_size()),
            desc_num: inner.config.dma_desc as usize,
            clock: inner.clock,
            full_duplex: self
                .controller
                .upgrade()
                .is_some_and(|ctrl| ctrl.is_full_duplex()),
        }
    }

    /// Stop the direction on the port and detach its interrupt path.
    pub(crate) fn teardown_hw(&self, ctrl: &Controller) {
        let mut hw = ctrl.hw();
        hw.hal.stop(self.dir);
        hw.hal.detach_dma(self.dir);
        ctrl.clear_mode(&mut hw, self.dir);
    }

    /// Called when another channel took over this one's controller slot.
    pub(crate) fn evict(&self, ctrl: &Controller) {
        self.deleted.store(true, Ordering::Release);
        self.set_state(ChannelState::Register);
        self.completion.notify();
        self.teardown_hw(ctrl);
    }

    fn delete(&self) -> Result<()> {
        if self.deleted.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if self.state().is_running() {
            let _ = self.abort();
            let _ = self.stop();
        }
        let ctrl = self.controller.upgrade();
        {
            let mut inner = self.inner.lock();
            if let Some(ctrl) = &ctrl {
                self.teardown_hw(ctrl);
            }
            inner.ring = None;
            inner.pm = None;
            inner.mode = None;
            inner.layout = None;
            inner.clock = None;
            inner.cursor.reset();
            inner.reset_preload();
            self.completion.reset();
            if let Some(events) = &self.events {
                events.reset();
            }
            self.set_state(ChannelState::Register);
        }
        if let Some(ctrl) = ctrl {
            let lock = platform::lifecycle();
            let _ = ctrl.unregister_channel(self.dir, self);
            platform::release_controller(&lock, &ctrl, self.dir);
        }
        info!("port {} {:?} channel deleted", self.port, self.dir);
        Ok(())
    }
}

/// Handle to one direction of a port.
///
/// Dropping the handle deletes the channel.
pub struct Channel<D: ChannelDirection> {
    core: Arc<ChannelCore>,
    _dir: PhantomData<D>,
}

impl<D: ChannelDirection> Channel<D> {
    /// Allocate a channel on the port selected by `config`.
    pub fn new(provider: &dyn HalProvider, config: &ChannelConfig) -> Result<Self> {
        Ok(Self {
            core: ChannelCore::create(provider, config, D::DIR)?,
            _dir: PhantomData,
        })
    }

    pub fn port(&self) -> u8 {
        self.core.port
    }

    pub fn direction(&self) -> Direction {
        D::DIR
    }

    pub fn state(&self) -> ChannelState {
        self.core.state()
    }

    /// Put the channel into a communication mode.
    ///
    /// Validates the configuration, allocates the DMA ring, programs slot,
    /// clock and pins and arms the interrupt path. On failure the channel stays
    /// in Register and nothing remains allocated.
    pub fn init_mode(&self, config: impl Into<ModeConfig>) -> Result<()> {
        self.core.init_mode(config.into())
    }

    pub fn reconfigure_slot(&self, slot: impl Into<SlotConfig>) -> Result<()> {
        let slot = slot.into();
        self.core
            .reconfigure("reconfigure_slot", |mode| mode.with_slot(slot))
    }

    pub fn reconfigure_clock(&self, clk: impl Into<ClkConfig>) -> Result<()> {
        let clk = clk.into();
        self.core
            .reconfigure("reconfigure_clock", |mode| mode.with_clock(clk))
    }

    pub fn reconfigure_gpio(&self, gpio: impl Into<GpioSetting>) -> Result<()> {
        let gpio = gpio.into();
        self.core
            .reconfigure("reconfigure_gpio", |mode| mode.with_gpio(gpio))
    }

    pub fn start(&self) -> Result<()> {
        self.core.start()
    }

    /// Stop the channel. Waits for a transfer in progress; abort it first to
    /// stop promptly.
    pub fn stop(&self) -> Result<()> {
        self.core.stop()
    }

    /// End a blocked `write`/`read` early.
    ///
    /// The transfer returns the bytes it moved so far. Cancellation is best
    /// effort: a transfer in the middle of copying a buffer finishes that copy
    /// first.
    pub fn abort(&self) -> Result<()> {
        self.core.abort()
    }

    /// Zero every DMA buffer. Channel must be Ready.
    pub fn zero_dma_buffer(&self) -> Result<()> {
        self.core.zero_dma_buffer()
    }

    /// Replace the interrupt callbacks. Channel must not be running.
    pub fn register_event_callback(&self, callbacks: EventCallbacks) -> Result<()> {
        self.core.register_event_callback(callbacks)
    }

    /// Wait up to `timeout` for the next event. Always `None` without an
    /// event queue.
    pub fn recv_event(&self, timeout: Duration) -> Option<I2sEvent> {
        self.core.events.as_ref()?.recv_front(timeout)
    }

    /// Waits for a transfer in progress.
    pub fn info(&self) -> ChannelInfo {
        self.core.info()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// Stop the channel if needed and release everything it holds. The port
    /// is released once its other direction is gone too.
    pub fn delete(self) -> Result<()> {
        self.core.delete()
    }
}

impl Channel<Tx> {
    /// Write `src` into the DMA ring, blocking up to `timeout` for each free
    /// buffer. Returns the bytes written.
    pub fn write(&self, src: &[u8], timeout: Duration) -> Result<usize> {
        self.core.write(src, timeout)
    }

    /// Write `src_bits` samples widened to `aim_bits`, zero-filling the low
    /// bytes. Returns the bytes of `src` consumed.
    pub fn write_expand(
        &self,
        src: &[u8],
        src_bits: u32,
        aim_bits: u32,
        timeout: Duration,
    ) -> Result<usize> {
        let valid = |bits: u32| (8..=32).contains(&bits) && bits % 8 == 0;
        ensure!(
            valid(src_bits) && valid(aim_bits) && aim_bits >= src_bits,
            Error::InvalidArgument,
            "cannot expand {}-bit samples to {} bits",
            src_bits,
            aim_bits
        );
        let src_bytes = (src_bits / 8) as usize;
        let aim_bytes = (aim_bits / 8) as usize;
        ensure!(
            src.len() % src_bytes == 0,
            Error::InvalidArgument,
            "{} bytes is not a whole number of {}-bit samples",
            src.len(),
            src_bits
        );
        let mut expanded = Vec::new();
        if expanded.try_reserve_exact(src.len() / src_bytes * aim_bytes).is_err() {
            return Err(Error::NoMemory);
        }
        for sample in src.chunks_exact(src_bytes) {
            expanded.resize(expanded.len() + aim_bytes - src_bytes, 0);
            expanded.extend_from_slice(sample);
        }
        let consumed = |written: usize| written / aim_bytes * src_bytes;
        match self.core.write(&expanded, timeout) {
            Ok(written) => Ok(consumed(written)),
            Err(Error::TimedOut { transferred }) => Err(Error::TimedOut {
                transferred: consumed(transferred),
            }),
            Err(err) => Err(err),
        }
    }

    /// Fill the DMA buffers before `start` so the first frames sent are
    /// `data`. Returns the bytes loaded, less than `data.len()` once every
    /// buffer is full.
    pub fn preload(&self, data: &[u8]) -> Result<usize> {
        self.core.preload(data)
    }
}

impl Channel<Rx> {
    /// Read into `dst`, blocking up to `timeout` for each filled buffer.
    /// Returns the bytes read.
    pub fn read(&self, dst: &mut [u8], timeout: Duration) -> Result<usize> {
        self.core.read(dst, timeout)
    }
}

impl<D: ChannelDirection> Drop for Channel<D> {
    fn drop(&mut self) {
        let _ = self.core.delete();
    }
}

impl<D: ChannelDirection> core::fmt::Debug for Channel<D> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Channel")
            .field("port", &self.core.port)
            .field("direction", &D::DIR)
            .field("state", &self.core.state())
            .finish()
    }
}

/// Allocate a TX and an RX channel on one port.
pub(crate) fn new_pair(
    provider: &dyn HalProvider,
    config: &ChannelConfig,
) -> Result<(Channel<Tx>, Channel<Rx>)> {
    let tx = Channel::<Tx>::new(provider, config)?;
    let rx = Channel::<Rx>::new(provider, &config.port(Port::Id(tx.port())))?;
    Ok((tx, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::SocCaps;
    use crate::config::{DataBitWidth, GpioConfig};
    use crate::dma::heap::DMA_HEAP;
    use crate::mode::{StdClkConfig, StdConfig};
    use crate::pm;
    use crate::sim::SimPlatform;
    use crate::test_util;

    const MS: Duration = Duration::from_millis(1);

    fn std_config() -> StdConfig {
        StdConfig::philips(48_000, DataBitWidth::Bits16)
            .gpio(GpioConfig::default().bclk(1).ws(2).data_out(3).data_in(4))
    }

    #[test]
    fn transfers_need_a_started_channel() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let tx = Channel::<Tx>::new(sim.as_ref(), &ChannelConfig::default()).unwrap();
        assert_eq!(tx.state(), ChannelState::Register);
        assert_eq!(tx.write(&[0; 4], MS), Err(Error::InvalidState));
        assert_eq!(tx.start(), Err(Error::InvalidState));

        tx.init_mode(std_config()).unwrap();
        assert_eq!(tx.state(), ChannelState::Ready);
        assert_eq!(tx.write(&[0; 4], MS), Err(Error::InvalidState));
        assert_eq!(tx.abort(), Err(Error::InvalidState));
        assert_eq!(tx.stop(), Err(Error::InvalidState));
        assert_eq!(tx.init_mode(std_config()), Err(Error::InvalidState));
    }

    #[test]
    fn start_stop_cycle() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let rx = Channel::<Rx>::new(sim.as_ref(), &ChannelConfig::default()).unwrap();
        rx.init_mode(std_config()).unwrap();
        let port = sim.port(rx.port());
        assert_eq!(port.eof_num(), 960);

        let held = pm::held(pm::PmLockKind::ApbFreqMax);
        rx.start().unwrap();
        assert_eq!(rx.state(), ChannelState::Idle);
        assert!(port.is_running(Direction::Rx));
        assert_eq!(pm::held(pm::PmLockKind::ApbFreqMax), held + 1);

        rx.stop().unwrap();
        assert_eq!(rx.state(), ChannelState::Ready);
        assert!(!port.is_running(Direction::Rx));
        assert_eq!(pm::held(pm::PmLockKind::ApbFreqMax), held);
        rx.start().unwrap();
        rx.delete().unwrap();
        assert_eq!(pm::held(pm::PmLockKind::ApbFreqMax), held);
        assert!(platform::controller(0).is_none());
    }

    #[test]
    fn read_times_out_with_partial_count() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let config = ChannelConfig::default().dma_desc(3).dma_frame(4);
        let rx = Channel::<Rx>::new(sim.as_ref(), &config).unwrap();
        rx.init_mode(std_config()).unwrap();
        rx.start().unwrap();
        let port = sim.port(rx.port());
        assert!(port.complete_rx(&[7; 16]));

        let mut buf = [0u8; 24];
        assert_eq!(
            rx.read(&mut buf, 20 * MS),
            Err(Error::TimedOut { transferred: 16 })
        );
        assert_eq!(&buf[..16], &[7; 16]);
        assert_eq!(rx.state(), ChannelState::Idle);

        // the channel stays usable
        assert!(port.complete_rx(&[9; 16]));
        let mut buf = [0u8; 8];
        assert_eq!(rx.read(&mut buf, 20 * MS), Ok(8));
        assert_eq!(buf, [9; 8]);
    }

    #[test]
    fn reconfigure_only_when_ready() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let tx = Channel::<Tx>::new(sim.as_ref(), &ChannelConfig::default()).unwrap();
        assert_eq!(
            tx.reconfigure_clock(StdClkConfig::from_sample_rate_hz(16_000)),
            Err(Error::InvalidState)
        );
        tx.init_mode(std_config()).unwrap();
        tx.reconfigure_clock(StdClkConfig::from_sample_rate_hz(16_000)).unwrap();
        assert_eq!(tx.info().clock.unwrap().sample_rate_hz, 16_000);
        assert_eq!(sim.port(0).clock(Direction::Tx).unwrap().sample_rate_hz, 16_000);

        let used = DMA_HEAP.used();
        tx.reconfigure_slot(crate::mode::StdSlotConfig::philips(
            DataBitWidth::Bits32,
            crate::config::SlotMode::Stereo,
        ))
        .unwrap();
        let info = tx.info();
        assert_eq!(info.buf_size, 240 * 8);
        assert!(DMA_HEAP.used() > used);

        tx.start().unwrap();
        assert_eq!(
            tx.reconfigure_gpio(GpioConfig::default().bclk(5)),
            Err(Error::InvalidState)
        );
    }

    #[test]
    fn failed_init_leaves_channel_registered() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let tx = Channel::<Tx>::new(sim.as_ref(), &ChannelConfig::default()).unwrap();
        let used = DMA_HEAP.used();
        let bad = std_config().clk(StdClkConfig::from_sample_rate_hz(1_000).mclk_multiple(
            crate::config::MclkMultiple::M128,
        ));
        assert_eq!(tx.init_mode(bad), Err(Error::InvalidArgument));
        assert_eq!(tx.state(), ChannelState::Register);
        assert_eq!(DMA_HEAP.used(), used);
        assert!(tx.init_mode(std_config()).is_ok());
    }

    #[test]
    fn preload_fills_ring_in_order() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let config = ChannelConfig::default().dma_desc(2).dma_frame(4);
        let tx = Channel::<Tx>::new(sim.as_ref(), &config).unwrap();
        tx.init_mode(std_config()).unwrap();
        let data = test_util::pattern(0, 40);
        assert_eq!(tx.preload(&data[..10]), Ok(10));
        assert_eq!(tx.preload(&data[10..]), Ok(22));
        assert_eq!(tx.preload(&data), Ok(0));

        tx.start().unwrap();
        let port = sim.port(0);
        assert_eq!(port.complete_tx(), Some(data[..16].to_vec()));
        assert_eq!(port.complete_tx(), Some(data[16..32].to_vec()));
    }

    #[test]
    fn write_expand_pads_low_bytes() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let config = ChannelConfig::default().dma_desc(2).dma_frame(2);
        let tx = Channel::<Tx>::new(sim.as_ref(), &config).unwrap();
        tx.init_mode(
            std_config().slot(crate::mode::StdSlotConfig::philips(
                DataBitWidth::Bits32,
                crate::config::SlotMode::Stereo,
            )),
        )
        .unwrap();
        assert_eq!(
            tx.write_expand(&[1, 2, 3], 16, 32, MS),
            Err(Error::InvalidArgument)
        );
        assert_eq!(
            tx.write_expand(&[1, 2], 16, 8, MS),
            Err(Error::InvalidArgument)
        );
        tx.start().unwrap();
        let port = sim.port(0);
        assert!(port.complete_tx().is_some());
        assert_eq!(tx.write_expand(&[1, 2, 3, 4, 5, 6, 7, 8], 16, 32, MS), Ok(8));
        assert!(port.complete_tx().is_some());
        assert_eq!(
            port.complete_tx(),
            Some(vec![0, 0, 1, 2, 0, 0, 3, 4, 0, 0, 5, 6, 0, 0, 7, 8])
        );
    }

    #[test]
    fn zero_dma_buffer_clears_preloaded_data() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let config = ChannelConfig::default().dma_desc(2).dma_frame(4);
        let tx = Channel::<Tx>::new(sim.as_ref(), &config).unwrap();
        tx.init_mode(std_config()).unwrap();
        tx.preload(&[0xaa; 32]).unwrap();
        tx.zero_dma_buffer().unwrap();
        tx.start().unwrap();
        assert_eq!(sim.port(0).complete_tx(), Some(vec![0; 16]));
        assert_eq!(tx.zero_dma_buffer(), Err(Error::InvalidState));
    }

    #[test]
    fn callbacks_only_while_stopped() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let tx = Channel::<Tx>::new(sim.as_ref(), &ChannelConfig::default()).unwrap();
        assert!(tx.register_event_callback(EventCallbacks::default()).is_ok());
        tx.init_mode(std_config()).unwrap();
        tx.start().unwrap();
        assert_eq!(
            tx.register_event_callback(EventCallbacks::default()),
            Err(Error::InvalidState)
        );
    }

    #[test]
    fn info_reports_layout() {
        let _guard = test_util::serial();
        platform::reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let rx = Channel::<Rx>::new(sim.as_ref(), &ChannelConfig::default().port(Port::Id(1)))
            .unwrap();
        let info = rx.info();
        assert_eq!(info.mode, CommMode::None);
        assert_eq!(info.buf_size, 0);

        rx.init_mode(std_config()).unwrap();
        let info = rx.info();
        assert_eq!(info.port, 1);
        assert_eq!(info.direction, Direction::Rx);
        assert_eq!(info.mode, CommMode::Standard);
        assert_eq!((info.total_slots, info.active_slots), (2, 2));
        assert_eq!(info.buf_size, 960);
        assert_eq!(info.desc_num, 6);
        assert!(!info.full_duplex);
    }
}
