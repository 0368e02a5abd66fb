//! One physical port.
//!
//! A [`Controller`] owns the port's HAL object and carries up to one TX and
//! one RX channel. It is created when the first channel is requested on the
//! port and destroyed when the last one is deleted (see
//! [`platform`](crate::platform)).
//!
//! ## Full duplex
//!
//! When the second direction is mode-initialized, its configuration is
//! compared with the one the opposite direction was initialized with, pins
//! excluded and `Auto` slot widths resolved:
//!
//! | Configs | HW | Result |
//! |---------|----|--------|
//! | identical | any | full duplex; a second master becomes slave |
//! | different | V1 (shared clock) | `InvalidArgument` |
//! | different | V2 | two independent directions |
//!
//! A channel forced to slave this way still computes its dividers as a master,
//! since the port drives one set of clocks for both directions.
//!
//! The comparison runs again on every reconfiguration, so a direction that
//! moves away from its partner's config fails on V1 and leaves the pair on
//! V2. A forced slave whose master went away keeps its slave programming
//! until it is reconfigured, which re-applies its requested role.
//!
//! Lock order is channel mutex, then the controller's hardware mutex.

use core::cell::{Cell, RefCell};
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use critical_section::{CriticalSection, Mutex};

use crate::caps::SocCaps;
use crate::channel::ChannelCore;
use crate::clock::ClockInfo;
use crate::config::Role;
use crate::hal::{Direction, I2sHal};
use crate::mode::ModeConfig;
use crate::{Error, Result};

/// Mode a direction was initialized with, kept for the duplex comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ModeSnapshot {
    pub key: ModeConfig,
    pub role: Role,
    /// Demoted from master by pairing.
    pub forced_slave: bool,
    pub clock: ClockInfo,
}

pub(crate) struct ControllerHw {
    pub hal: Box<dyn I2sHal>,
    modes: [Option<ModeSnapshot>; 2],
}

/// Role a direction ends up with after the duplex comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DuplexDecision {
    pub role: Role,
    pub full_duplex: bool,
    /// Forced from master to slave by pairing.
    pub forced_slave: bool,
}

pub struct Controller {
    port: u8,
    caps: SocCaps,
    occupancy: Mutex<Cell<u8>>,
    channels: Mutex<RefCell<[Option<Arc<ChannelCore>>; 2]>>,
    full_duplex: AtomicBool,
    hw: StdMutex<ControllerHw>,
}

impl Controller {
    pub(crate) fn new(port: u8, caps: SocCaps, hal: Box<dyn I2sHal>, first: Direction) -> Self {
        Self {
            port,
            caps,
            occupancy: Mutex::new(Cell::new(first.bit())),
            channels: Mutex::new(RefCell::new([None, None])),
            full_duplex: AtomicBool::new(false),
            hw: StdMutex::new(ControllerHw {
                hal,
                modes: [None, None],
            }),
        }
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn caps(&self) -> &SocCaps {
        &self.caps
    }

    pub fn is_full_duplex(&self) -> bool {
        self.full_duplex.load(Ordering::Acquire)
    }

    /// Directions currently reserved, as [`Direction::bit`] flags.
    pub fn occupancy(&self) -> u8 {
        critical_section::with(|cs| self.occupancy.borrow(cs).get())
    }

    pub(crate) fn try_occupy(&self, cs: CriticalSection<'_>, dir: Direction) -> bool {
        let occupancy = self.occupancy.borrow(cs);
        if occupancy.get() & dir.bit() != 0 {
            return false;
        }
        occupancy.set(occupancy.get() | dir.bit());
        true
    }

    /// Clear `dir`; returns whether the controller is now empty.
    pub(crate) fn vacate(&self, cs: CriticalSection<'_>, dir: Direction) -> bool {
        let occupancy = self.occupancy.borrow(cs);
        occupancy.set(occupancy.get() & !dir.bit());
        occupancy.get() == 0
    }

    pub(crate) fn hw(&self) -> MutexGuard<'_, ControllerHw> {
        self.hw.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn init_hw(&self) {
        self.hw().hal.init();
    }

    pub(crate) fn deinit_hw(&self) {
        self.hw().hal.deinit();
    }

    /// Bind `core` to its direction slot.
    ///
    /// A channel still present in that slot is evicted and its direction torn
    /// down.
    pub(crate) fn register_channel(&self, dir: Direction, core: Arc<ChannelCore>) {
        let previous = critical_section::with(|cs| {
            self.channels.borrow_ref_mut(cs)[dir.index()].replace(core)
        });
        if let Some(previous) = previous {
            warn!("port {} {:?} slot still held a channel, replacing it", self.port, dir);
            previous.evict(self);
        }
    }

    /// Unbind `core` from its slot. A slot already taken over by another
    /// channel is left alone.
    pub(crate) fn unregister_channel(&self, dir: Direction, core: &ChannelCore) -> Option<Arc<ChannelCore>> {
        critical_section::with(|cs| {
            let mut channels = self.channels.borrow_ref_mut(cs);
            let slot = &mut channels[dir.index()];
            match slot {
                Some(bound) if core::ptr::eq(Arc::as_ptr(bound), core) => slot.take(),
                _ => None,
            }
        })
    }

    /// Decide the role of `dir` initialized with `config`, comparing against
    /// the opposite direction.
    pub(crate) fn duplex_decision(
        &self,
        hw: &ControllerHw,
        dir: Direction,
        config: &ModeConfig,
        requested: Role,
    ) -> Result<DuplexDecision> {
        let mut decision = DuplexDecision {
            role: requested,
            full_duplex: false,
            forced_slave: false,
        };
        let Some(other) = &hw.modes[dir.opposite().index()] else {
            return Ok(decision);
        };
        if other.key == config.duplex_key() {
            decision.full_duplex = true;
            if requested == Role::Master && other.role == Role::Master {
                decision.role = Role::Slave;
                decision.forced_slave = true;
                info!(
                    "port {} full duplex, {:?} channel switched to slave",
                    self.port,
                    dir
                );
            }
            return Ok(decision);
        }
        ensure!(
            !self.caps.shared_clock(),
            Error::InvalidArgument,
            "port {} {:?} config differs from the {:?} channel and this chip shares one clock",
            self.port,
            dir,
            dir.opposite()
        );
        Ok(decision)
    }

    pub(crate) fn commit_mode(
        &self,
        hw: &mut ControllerHw,
        dir: Direction,
        snapshot: ModeSnapshot,
        full_duplex: bool,
    ) {
        hw.modes[dir.index()] = Some(snapshot);
        let was = self.full_duplex.swap(full_duplex, Ordering::AcqRel);
        if was && !full_duplex {
            info!("port {} {:?} channel left full duplex", self.port, dir);
            self.warn_orphaned_slave(hw, dir.opposite());
        }
    }

    pub(crate) fn clear_mode(&self, hw: &mut ControllerHw, dir: Direction) {
        hw.modes[dir.index()] = None;
        if self.full_duplex.swap(false, Ordering::AcqRel) {
            self.warn_orphaned_slave(hw, dir.opposite());
        }
    }

    fn warn_orphaned_slave(&self, hw: &ControllerHw, dir: Direction) {
        if hw.modes[dir.index()].is_some_and(|m| m.forced_slave) {
            warn!(
                "port {} {:?} channel lost its clock master and stays slave until reconfigured",
                self.port,
                dir
            );
        }
    }
}

impl core::fmt::Debug for Controller {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("port", &self.port)
            .field("occupancy", &self.occupancy())
            .field("full_duplex", &self.is_full_duplex())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockRole;
    use crate::config::{DataBitWidth, GpioConfig};
    use crate::hal::HalProvider;
    use crate::mode::StdConfig;
    use crate::sim::SimPlatform;

    fn snapshot(config: ModeConfig, role: Role) -> ModeSnapshot {
        let layout = config.layout().unwrap();
        ModeSnapshot {
            key: config.duplex_key(),
            role,
            forced_slave: false,
            clock: config
                .clock(&SocCaps::ESP32S3, ClockRole::Master, &layout)
                .unwrap(),
        }
    }

    fn controller(caps: SocCaps) -> Controller {
        let sim = SimPlatform::new(caps);
        Controller::new(0, caps, sim.create_hal(0), Direction::Tx)
    }

    #[test]
    fn identical_configs_pair_and_demote_second_master() {
        let ctrl = controller(SocCaps::ESP32S3);
        let tx = ModeConfig::from(
            StdConfig::philips(48_000, DataBitWidth::Bits16)
                .gpio(GpioConfig::default().bclk(1).ws(2).data_out(3)),
        );
        let rx = ModeConfig::from(
            StdConfig::philips(48_000, DataBitWidth::Bits16)
                .gpio(GpioConfig::default().bclk(1).ws(2).data_in(4)),
        );
        let mut hw = ctrl.hw();
        let first = ctrl.duplex_decision(&hw, Direction::Tx, &tx, Role::Master).unwrap();
        assert!(!first.full_duplex);
        ctrl.commit_mode(&mut hw, Direction::Tx, snapshot(tx, first.role), first.full_duplex);

        let second = ctrl.duplex_decision(&hw, Direction::Rx, &rx, Role::Master).unwrap();
        assert!(second.full_duplex);
        assert!(second.forced_slave);
        assert_eq!(second.role, Role::Slave);
        ctrl.commit_mode(&mut hw, Direction::Rx, snapshot(rx, second.role), second.full_duplex);
        drop(hw);
        assert!(ctrl.is_full_duplex());

        ctrl.clear_mode(&mut ctrl.hw(), Direction::Rx);
        assert!(!ctrl.is_full_duplex());
    }

    #[test]
    fn differing_configs_depend_on_hw_version() {
        let tx = ModeConfig::from(StdConfig::philips(48_000, DataBitWidth::Bits16));
        let rx = ModeConfig::from(StdConfig::philips(44_100, DataBitWidth::Bits16));

        let v1 = controller(SocCaps::ESP32);
        let mut hw = v1.hw();
        v1.commit_mode(&mut hw, Direction::Tx, snapshot(tx, Role::Master), false);
        assert_eq!(
            v1.duplex_decision(&hw, Direction::Rx, &rx, Role::Master),
            Err(Error::InvalidArgument)
        );
        drop(hw);

        let v2 = controller(SocCaps::ESP32S3);
        let mut hw = v2.hw();
        v2.commit_mode(&mut hw, Direction::Tx, snapshot(tx, Role::Master), false);
        let decision = v2.duplex_decision(&hw, Direction::Rx, &rx, Role::Master).unwrap();
        assert_eq!(decision.role, Role::Master);
        assert!(!decision.full_duplex);
    }

    #[test]
    fn slave_request_is_kept_when_pairing() {
        let ctrl = controller(SocCaps::ESP32S3);
        let config = ModeConfig::from(StdConfig::philips(48_000, DataBitWidth::Bits16));
        let mut hw = ctrl.hw();
        ctrl.commit_mode(&mut hw, Direction::Rx, snapshot(config, Role::Master), false);
        let decision = ctrl.duplex_decision(&hw, Direction::Tx, &config, Role::Slave).unwrap();
        assert_eq!(decision.role, Role::Slave);
        assert!(decision.full_duplex);
        assert!(!decision.forced_slave);
    }

    #[test]
    fn occupancy_bits() {
        let ctrl = controller(SocCaps::ESP32S3);
        assert_eq!(ctrl.occupancy(), Direction::Tx.bit());
        critical_section::with(|cs| {
            assert!(!ctrl.try_occupy(cs, Direction::Tx));
            assert!(ctrl.try_occupy(cs, Direction::Rx));
            assert!(!ctrl.vacate(cs, Direction::Tx));
            assert!(ctrl.vacate(cs, Direction::Rx));
        });
    }
}
