//! Process-wide port table.
//!
//! Each physical port is either free, claimed by a named collaborator (an LCD
//! bus, an ADC driver) through [`acquire_occupation`], or bound to a driver
//! [`Controller`]. The owner name and the controller are set and cleared
//! together inside one critical section, so a port is never half claimed.
//!
//! ```text
//!             acquire_occupation(p, "lcd")          release_occupation(p)
//!   Free ─────────────────────────────────► Owned("lcd") ──────────────► Free
//!    │
//!    │ acquire_controller (driver)                   last channel deleted
//!    └───────────────────────────► Bound(controller) ───────────────────► Free
//! ```
//!
//! Claiming never blocks: a contended port fails immediately with
//! [`OccupationError::AlreadyOwned`].
//!
//! Creating and destroying controllers additionally runs under a task-level
//! lifecycle lock ([`lifecycle`]), which also keeps two concurrent channel
//! deletions from tearing down the same controller twice.

use core::cell::RefCell;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use critical_section::Mutex;

use crate::config::Port;
use crate::constants::{DRIVER_OWNER, SOC_I2S_NUM};
use crate::controller::Controller;
use crate::error::OccupationError;
use crate::hal::{Direction, HalProvider};
use crate::{Error, Result};

struct PortSlot {
    owner: Option<&'static str>,
    controller: Option<Arc<Controller>>,
    bus_clock_enabled: bool,
}

impl PortSlot {
    const EMPTY: PortSlot = PortSlot {
        owner: None,
        controller: None,
        bus_clock_enabled: false,
    };

    fn is_free(&self) -> bool {
        self.owner.is_none() && self.controller.is_none()
    }
}

static PORTS: Mutex<RefCell<[PortSlot; SOC_I2S_NUM]>> =
    Mutex::new(RefCell::new([PortSlot::EMPTY; SOC_I2S_NUM]));

static LIFECYCLE: StdMutex<()> = StdMutex::new(());

/// Proof that the caller holds the controller lifecycle lock.
pub(crate) struct LifecycleGuard(#[allow(dead_code)] MutexGuard<'static, ()>);

/// Serialize controller creation and channel deletion.
pub(crate) fn lifecycle() -> LifecycleGuard {
    LifecycleGuard(LIFECYCLE.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Claim `port` for `name`.
///
/// Fails if the port already has an owner or a bound driver controller. On
/// success the port's bus clock is enabled.
pub fn acquire_occupation(port: u8, name: &'static str) -> core::result::Result<(), OccupationError> {
    let index = port_index(port)?;
    critical_section::with(|cs| {
        let mut ports = PORTS.borrow_ref_mut(cs);
        let slot = &mut ports[index];
        if !slot.is_free() {
            return Err(OccupationError::AlreadyOwned(slot.owner.unwrap_or(DRIVER_OWNER)));
        }
        slot.owner = Some(name);
        slot.bus_clock_enabled = true;
        Ok(())
    })?;
    debug!("port {} occupied by {}", port, name);
    Ok(())
}

/// Give up a claim made with [`acquire_occupation`].
///
/// Fails while a driver controller is still bound to the port. Releasing a
/// free port is a no-op.
pub fn release_occupation(port: u8) -> core::result::Result<(), OccupationError> {
    let index = port_index(port)?;
    critical_section::with(|cs| {
        let mut ports = PORTS.borrow_ref_mut(cs);
        let slot = &mut ports[index];
        if slot.controller.is_some() {
            return Err(OccupationError::StillBound);
        }
        slot.owner = None;
        slot.bus_clock_enabled = false;
        Ok(())
    })?;
    debug!("port {} released", port);
    Ok(())
}

/// Current owner name of `port`.
pub fn owner(port: u8) -> Option<&'static str> {
    let index = port_index(port).ok()?;
    critical_section::with(|cs| PORTS.borrow_ref(cs)[index].owner)
}

pub fn bus_clock_enabled(port: u8) -> bool {
    port_index(port).is_ok_and(|index| {
        critical_section::with(|cs| PORTS.borrow_ref(cs)[index].bus_clock_enabled)
    })
}

/// The controller bound to `port`, if any.
pub fn controller(port: u8) -> Option<Arc<Controller>> {
    let index = port_index(port).ok()?;
    critical_section::with(|cs| PORTS.borrow_ref(cs)[index].controller.clone())
}

fn port_index(port: u8) -> core::result::Result<usize, OccupationError> {
    let index = usize::from(port);
    if index < SOC_I2S_NUM {
        Ok(index)
    } else {
        Err(OccupationError::InvalidPort)
    }
}

/// Find or create a controller with `dir` free and reserve `dir` on it.
///
/// A specific port reuses the bound controller or claims the port afresh.
/// `Auto` scans ports in order and takes the first that works.
pub(crate) fn acquire_controller(
    _lock: &LifecycleGuard,
    provider: &dyn HalProvider,
    port: Port,
    dir: Direction,
) -> Result<Arc<Controller>> {
    let port_count = provider.caps().ports();
    match port {
        Port::Id(id) => {
            ensure!(
                id < port_count,
                Error::InvalidArgument,
                "port {} out of range, the chip has {}",
                id,
                port_count
            );
            try_port(provider, id, dir).map_err(|err| {
                error!("no {:?} channel available on port {}", dir, id);
                err
            })
        }
        Port::Auto => {
            for id in 0..port_count {
                if let Ok(ctrl) = try_port(provider, id, dir) {
                    return Ok(ctrl);
                }
            }
            error!("no free {:?} channel on any port", dir);
            Err(Error::NotFound)
        }
    }
}

fn try_port(provider: &dyn HalProvider, id: u8, dir: Direction) -> Result<Arc<Controller>> {
    let index = usize::from(id);
    let existing = critical_section::with(|cs| {
        let ports = PORTS.borrow_ref(cs);
        let slot = &ports[index];
        match &slot.controller {
            Some(ctrl) if ctrl.try_occupy(cs, dir) => Ok(Some(ctrl.clone())),
            Some(_) => Err(Error::NotFound),
            None if slot.owner.is_some() => Err(Error::NotFound),
            None => Ok(None),
        }
    })?;
    if let Some(ctrl) = existing {
        return Ok(ctrl);
    }

    // The HAL is built outside the critical section; the slot is re-checked
    // when binding.
    let ctrl = Arc::new(Controller::new(id, provider.caps(), provider.create_hal(id), dir));
    let bound = critical_section::with(|cs| {
        let mut ports = PORTS.borrow_ref_mut(cs);
        let slot = &mut ports[index];
        if !slot.is_free() {
            return false;
        }
        slot.owner = Some(DRIVER_OWNER);
        slot.controller = Some(ctrl.clone());
        slot.bus_clock_enabled = true;
        true
    });
    if !bound {
        return Err(Error::NotFound);
    }
    ctrl.init_hw();
    info!("port {} bound to the driver", id);
    Ok(ctrl)
}

/// Free `dir` on `ctrl` and destroy the controller once both directions are
/// empty.
pub(crate) fn release_controller(_lock: &LifecycleGuard, ctrl: &Arc<Controller>, dir: Direction) {
    let index = usize::from(ctrl.port());
    let unbound = critical_section::with(|cs| {
        if !ctrl.vacate(cs, dir) {
            return None;
        }
        let mut ports = PORTS.borrow_ref_mut(cs);
        let slot = &mut ports[index];
        match &slot.controller {
            Some(bound) if Arc::ptr_eq(bound, ctrl) => {
                slot.owner = None;
                slot.bus_clock_enabled = false;
                slot.controller.take()
            }
            _ => None,
        }
    });
    if let Some(ctrl) = unbound {
        ctrl.deinit_hw();
        info!("port {} released by the driver", ctrl.port());
    }
}

/// Forget every claim and controller. For testing only.
#[cfg(test)]
pub(crate) fn reset() {
    let dropped: Vec<Option<Arc<Controller>>> = critical_section::with(|cs| {
        PORTS
            .borrow_ref_mut(cs)
            .iter_mut()
            .map(|slot| {
                slot.owner = None;
                slot.bus_clock_enabled = false;
                slot.controller.take()
            })
            .collect()
    });
    drop(dropped);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::SocCaps;
    use crate::sim::SimPlatform;
    use crate::test_util;

    #[test]
    fn occupation_is_exclusive() {
        let _guard = test_util::serial();
        reset();
        assert_eq!(acquire_occupation(0, "lcd"), Ok(()));
        assert_eq!(owner(0), Some("lcd"));
        assert!(bus_clock_enabled(0));
        assert_eq!(
            acquire_occupation(0, "adc"),
            Err(OccupationError::AlreadyOwned("lcd"))
        );
        assert_eq!(release_occupation(0), Ok(()));
        assert!(!bus_clock_enabled(0));
        assert_eq!(acquire_occupation(0, "adc"), Ok(()));
        assert_eq!(release_occupation(0), Ok(()));
    }

    #[test]
    fn out_of_range_port() {
        assert_eq!(
            acquire_occupation(SOC_I2S_NUM as u8, "lcd"),
            Err(OccupationError::InvalidPort)
        );
        assert_eq!(release_occupation(200), Err(OccupationError::InvalidPort));
    }

    #[test]
    fn bound_controller_blocks_release_and_collaborators() {
        let _guard = test_util::serial();
        reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let lock = lifecycle();
        let ctrl = acquire_controller(&lock, sim.as_ref(), Port::Id(1), Direction::Tx).unwrap();
        assert_eq!(owner(1), Some(DRIVER_OWNER));
        assert_eq!(release_occupation(1), Err(OccupationError::StillBound));
        assert_eq!(
            acquire_occupation(1, "lcd"),
            Err(OccupationError::AlreadyOwned(DRIVER_OWNER))
        );
        assert!(sim.port(1).is_initialized());

        release_controller(&lock, &ctrl, Direction::Tx);
        assert_eq!(owner(1), None);
        assert!(controller(1).is_none());
        assert!(!sim.port(1).is_initialized());
    }

    #[test]
    fn second_direction_reuses_controller() {
        let _guard = test_util::serial();
        reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        let lock = lifecycle();
        let tx = acquire_controller(&lock, sim.as_ref(), Port::Id(0), Direction::Tx).unwrap();
        let rx = acquire_controller(&lock, sim.as_ref(), Port::Id(0), Direction::Rx).unwrap();
        assert!(Arc::ptr_eq(&tx, &rx));
        assert_eq!(
            acquire_controller(&lock, sim.as_ref(), Port::Id(0), Direction::Tx).err(),
            Some(Error::NotFound)
        );

        release_controller(&lock, &tx, Direction::Tx);
        assert!(controller(0).is_some());
        release_controller(&lock, &rx, Direction::Rx);
        assert!(controller(0).is_none());
    }

    #[test]
    fn auto_skips_ports_held_by_collaborators() {
        let _guard = test_util::serial();
        reset();
        let sim = SimPlatform::new(SocCaps::ESP32S3);
        acquire_occupation(0, "lcd").unwrap();
        let lock = lifecycle();
        let ctrl = acquire_controller(&lock, sim.as_ref(), Port::Auto, Direction::Rx).unwrap();
        assert_eq!(ctrl.port(), 1);
        assert_eq!(
            acquire_controller(&lock, sim.as_ref(), Port::Auto, Direction::Rx).err(),
            Some(Error::NotFound)
        );
        release_controller(&lock, &ctrl, Direction::Rx);
        release_occupation(0).unwrap();
    }

    #[test]
    fn specific_port_beyond_chip_is_invalid() {
        let _guard = test_util::serial();
        reset();
        let sim = SimPlatform::new(SocCaps::ESP32C3);
        let lock = lifecycle();
        assert_eq!(
            acquire_controller(&lock, sim.as_ref(), Port::Id(1), Direction::Tx).err(),
            Some(Error::InvalidArgument)
        );
    }
}
