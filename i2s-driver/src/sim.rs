//! Software platform.
//!
//! [`SimPlatform`] implements [`HalProvider`] with ports that record what the
//! driver programs and move data through the DMA rings on request, so channels
//! can be exercised without hardware.
//!
//! Nothing runs on its own: a test (or a host application) drives the engine
//! by calling [`SimPort::complete_tx`], [`SimPort::complete_rx`] or
//! [`SimPort::loopback_step`], each of which walks one descriptor and raises
//! the interrupt for it.
//!
//! ```text
//!   complete_tx:  ring[tx_next] ──copy──► returned bytes ──► on_interrupt(eof)
//!   complete_rx:  input bytes ──copy──► ring[rx_next] ──────► on_interrupt(eof)
//!   loopback:     complete_tx ──► complete_rx
//! ```
//!
//! A descriptor still held by the driver is not touched; the port reports a
//! descriptor error for it and moves on, like the hardware does.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::caps::SocCaps;
use crate::clock::ClockInfo;
use crate::config::Role;
use crate::dma::Owner;
use crate::hal::{Direction, HalProvider, I2sHal, PinRoute};
use crate::isr::{InterruptDispatcher, IntrStatus};
use crate::mode::SlotLayout;
use crate::Result;

// ── Port state ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct DirState {
    running: bool,
    dispatcher: Option<Arc<InterruptDispatcher>>,
    next_desc: usize,
    clock: Option<ClockInfo>,
    layout: Option<SlotLayout>,
    role: Option<Role>,
    route: Option<PinRoute>,
}

#[derive(Default)]
struct PortState {
    initialized: bool,
    rx_eof_num: usize,
    dirs: [DirState; 2],
}

/// One simulated port.
#[derive(Default)]
pub struct SimPort {
    state: Mutex<PortState>,
}

impl SimPort {
    fn lock(&self) -> MutexGuard<'_, PortState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    pub fn is_running(&self, dir: Direction) -> bool {
        self.lock().dirs[dir.index()].running
    }

    pub fn is_dma_attached(&self, dir: Direction) -> bool {
        self.lock().dirs[dir.index()].dispatcher.is_some()
    }

    /// Last clock programmed for `dir`.
    pub fn clock(&self, dir: Direction) -> Option<ClockInfo> {
        self.lock().dirs[dir.index()].clock
    }

    pub fn layout(&self, dir: Direction) -> Option<SlotLayout> {
        self.lock().dirs[dir.index()].layout
    }

    /// Role `dir` was programmed with.
    pub fn role(&self, dir: Direction) -> Option<Role> {
        self.lock().dirs[dir.index()].role
    }

    pub fn route(&self, dir: Direction) -> Option<PinRoute> {
        self.lock().dirs[dir.index()].route
    }

    /// RX end-of-frame threshold in bytes.
    pub fn eof_num(&self) -> usize {
        self.lock().rx_eof_num
    }

    /// Take the next descriptor of a running direction and advance.
    fn next_desc(&self, dir: Direction) -> Option<(Arc<InterruptDispatcher>, usize)> {
        let mut state = self.lock();
        let dir_state = &mut state.dirs[dir.index()];
        if !dir_state.running {
            return None;
        }
        let dispatcher = dir_state.dispatcher.clone()?;
        let desc = dir_state.next_desc;
        dir_state.next_desc = dispatcher.ring().next(desc);
        Some((dispatcher, desc))
    }

    /// Transmit one descriptor.
    ///
    /// Returns the bytes sent, or `None` when TX is not running or the
    /// descriptor was still held by the driver.
    pub fn complete_tx(&self) -> Option<Vec<u8>> {
        let (dispatcher, desc) = self.next_desc(Direction::Tx)?;
        match dispatcher.ring().with_hw_buffer(desc, |buf| buf.to_vec()) {
            Ok(data) => {
                dispatcher.on_interrupt(eof(), desc);
                Some(data)
            }
            Err(Owner::Driver) => {
                dispatcher.on_interrupt(dscr_err(), desc);
                None
            }
            Err(Owner::Hardware) => None,
        }
    }

    /// Receive `data` into one descriptor, zero-filling the rest of the
    /// buffer. Returns whether the descriptor was filled.
    pub fn complete_rx(&self, data: &[u8]) -> bool {
        let Some((dispatcher, desc)) = self.next_desc(Direction::Rx) else {
            return false;
        };
        let filled = dispatcher.ring().with_hw_buffer(desc, |buf| {
            let n = buf.len().min(data.len());
            buf[..n].copy_from_slice(&data[..n]);
            buf[n..].fill(0);
        });
        match filled {
            Ok(()) => {
                dispatcher.on_interrupt(eof(), desc);
                true
            }
            Err(Owner::Driver) => {
                dispatcher.on_interrupt(dscr_err(), desc);
                false
            }
            Err(Owner::Hardware) => false,
        }
    }

    /// Send one TX descriptor and feed it to RX.
    pub fn loopback_step(&self) -> bool {
        match self.complete_tx() {
            Some(data) => self.complete_rx(&data),
            None => false,
        }
    }
}

fn eof() -> IntrStatus {
    IntrStatus {
        eof: true,
        dscr_err: false,
    }
}

fn dscr_err() -> IntrStatus {
    IntrStatus {
        eof: false,
        dscr_err: true,
    }
}

// ── HAL ────────────────────────────────────────────────────────────────────

struct SimHal {
    port: Arc<SimPort>,
}

impl SimHal {
    fn with_dir<R>(&self, dir: Direction, f: impl FnOnce(&mut DirState) -> R) -> R {
        f(&mut self.port.lock().dirs[dir.index()])
    }
}

impl I2sHal for SimHal {
    fn init(&mut self) {
        self.port.lock().initialized = true;
    }

    fn deinit(&mut self) {
        // dispatchers are dropped outside the port lock
        let old = core::mem::take(&mut *self.port.lock());
        drop(old);
    }

    fn set_clock(&mut self, dir: Direction, clock: &ClockInfo) {
        self.with_dir(dir, |d| d.clock = Some(*clock));
    }

    fn set_slot(&mut self, dir: Direction, layout: &SlotLayout, role: Role) {
        self.with_dir(dir, |d| {
            d.layout = Some(*layout);
            d.role = Some(role);
        });
    }

    fn set_rx_eof_num(&mut self, bytes: usize) {
        self.port.lock().rx_eof_num = bytes;
    }

    fn route_gpio(&mut self, dir: Direction, route: &PinRoute) {
        self.with_dir(dir, |d| d.route = Some(*route));
    }

    fn attach_dma(&mut self, dir: Direction, dispatcher: Arc<InterruptDispatcher>) -> Result<()> {
        let old = self.with_dir(dir, |d| d.dispatcher.replace(dispatcher));
        drop(old);
        Ok(())
    }

    fn detach_dma(&mut self, dir: Direction) {
        let old = self.with_dir(dir, |d| {
            d.running = false;
            d.dispatcher.take()
        });
        drop(old);
    }

    fn reset(&mut self, dir: Direction) {
        self.with_dir(dir, |d| d.next_desc = 0);
    }

    fn start(&mut self, dir: Direction) {
        self.with_dir(dir, |d| d.running = true);
    }

    fn stop(&mut self, dir: Direction) {
        self.with_dir(dir, |d| d.running = false);
    }
}

// ── Platform ───────────────────────────────────────────────────────────────

/// A chip with [`SimPort`]s.
pub struct SimPlatform {
    caps: SocCaps,
    ports: Vec<Arc<SimPort>>,
}

impl SimPlatform {
    pub fn new(caps: SocCaps) -> Arc<Self> {
        Arc::new(Self {
            caps,
            ports: (0..caps.ports()).map(|_| Arc::default()).collect(),
        })
    }

    /// Port `index`. Ports beyond the chip's count are detached stand-ins.
    pub fn port(&self, index: u8) -> Arc<SimPort> {
        self.ports
            .get(usize::from(index))
            .cloned()
            .unwrap_or_default()
    }
}

impl HalProvider for SimPlatform {
    fn caps(&self) -> SocCaps {
        self.caps
    }

    fn create_hal(&self, port: u8) -> Box<dyn I2sHal> {
        Box::new(SimHal {
            port: self.port(port),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dma::DmaRing;
    use crate::isr::{ChannelStats, EventCallbacks};
    use crate::queue::Queue;
    use crate::test_util;

    fn attach(hal: &mut dyn I2sHal, dir: Direction) -> (Arc<DmaRing>, Arc<Queue<usize>>) {
        let ring = Arc::new(DmaRing::allocate(dir, 3, 8).unwrap());
        let completion = Arc::new(Queue::new(2).unwrap());
        let dispatcher = InterruptDispatcher::new(
            dir,
            ring.clone(),
            completion.clone(),
            None,
            EventCallbacks::default(),
            false,
            Arc::new(ChannelStats::default()),
        );
        hal.attach_dma(dir, Arc::new(dispatcher)).unwrap();
        (ring, completion)
    }

    #[test]
    fn engine_walks_the_ring() {
        let _guard = test_util::serial();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let mut hal = sim.create_hal(0);
        hal.init();
        let (_ring, completion) = attach(hal.as_mut(), Direction::Rx);
        let port = sim.port(0);
        assert!(!port.complete_rx(&[1; 8]));

        hal.start(Direction::Rx);
        for _ in 0..3 {
            assert!(port.complete_rx(&[1; 8]));
        }
        assert_eq!(completion.recv_front_from_isr(), Some(1));
        assert_eq!(completion.recv_front_from_isr(), Some(2));
        assert!(port.complete_rx(&[1; 8]));
        assert_eq!(completion.recv_front_from_isr(), Some(0));
    }

    #[test]
    fn driver_owned_descriptor_is_skipped() {
        let _guard = test_util::serial();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let mut hal = sim.create_hal(0);
        let (ring, completion) = attach(hal.as_mut(), Direction::Tx);
        hal.start(Direction::Tx);
        assert!(ring.claim(0));
        let port = sim.port(0);
        assert_eq!(port.complete_tx(), None);
        assert!(completion.is_empty());
        assert_eq!(port.complete_tx(), Some(vec![0; 8]));
        assert_eq!(completion.recv_front_from_isr(), Some(1));
    }

    #[test]
    fn deinit_forgets_programming() {
        let _guard = test_util::serial();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let mut hal = sim.create_hal(1);
        hal.init();
        hal.set_rx_eof_num(64);
        attach(hal.as_mut(), Direction::Tx);
        let port = sim.port(1);
        assert!(port.is_dma_attached(Direction::Tx));
        hal.deinit();
        assert!(!port.is_initialized());
        assert!(!port.is_dma_attached(Direction::Tx));
        assert_eq!(port.eof_num(), 0);
    }
}
