//! Communication modes.
//!
//! A channel is put into one mode by `init_mode` and stays in it until it is
//! deleted. Each mode is a [`ModeConfigurator`] that turns its configuration
//! into the three things the controller programs:
//!
//! | Step | Output | Used for |
//! |------|--------|----------|
//! | slot | [`SlotLayout`] | DMA buffer size, `set_slot` |
//! | clock | [`ClockInfo`] | `set_clock` |
//! | gpio | [`PinRoute`] | `route_gpio` |
//!
//! | Mode | Config | Directions | Notes |
//! |------|--------|------------|-------|
//! | Standard | [`StdConfig`] | TX, RX | Philips, MSB or PCM framing, two slots |
//! | PDM | [`PdmTxConfig`] / [`PdmRxConfig`] | one each | 16-bit data, ports per chip |
//! | TDM | [`TdmConfig`] | TX, RX | up to 16 slots, chips with TDM only |

pub mod pdm;
pub mod std;
pub mod tdm;

use crate::caps::SocCaps;
use crate::clock::{ClockInfo, ClockRole};
use crate::config::{ClockSource, GpioConfig, Role};
use crate::constants::BCLK_DIV_MIN;
use crate::hal::{Direction, PinRoute};
use crate::{Error, Result};

pub use self::pdm::{
    PdmDownsample, PdmGpioConfig, PdmRxClkConfig, PdmRxConfig, PdmSlotConfig, PdmSlotMask,
    PdmTxClkConfig, PdmTxConfig,
};
pub use self::std::{StdClkConfig, StdConfig, StdSlotConfig, StdSlotMask};
pub use self::tdm::{TdmClkConfig, TdmConfig, TdmSlotConfig, TdmSlotMask};

/// Communication mode of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CommMode {
    /// Not initialized yet.
    #[default]
    None,
    Standard,
    Pdm,
    Tdm,
}

/// Frame layout computed from a slot configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotLayout {
    pub mode: CommMode,
    pub data_bits: u32,
    pub slot_bits: u32,
    /// Slots in one frame on the wire.
    pub total_slots: u32,
    /// Slots carrying data in memory.
    pub active_slots: u32,
    /// Bit `n` set when slot `n` is active.
    pub slot_mask: u16,
    pub mono: bool,
    /// Data starts one bclk after the ws edge (Philips framing).
    pub bit_shift: bool,
    /// ws is high for the first slot.
    pub ws_pol: bool,
}

/// Per-mode strategy.
pub(crate) trait ModeConfigurator {
    fn comm_mode(&self) -> CommMode;

    /// Reject configurations the chip, port or direction cannot run.
    fn check(&self, caps: &SocCaps, port: u8, dir: Direction) -> Result<()>;

    fn layout(&self) -> Result<SlotLayout>;

    fn clock(&self, caps: &SocCaps, role: ClockRole, layout: &SlotLayout) -> Result<ClockInfo>;

    fn pin_route(&self, dir: Direction, role: Role) -> PinRoute;
}

/// Mode configuration of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeConfig {
    Std(StdConfig),
    PdmTx(PdmTxConfig),
    PdmRx(PdmRxConfig),
    Tdm(TdmConfig),
}

impl From<StdConfig> for ModeConfig {
    fn from(value: StdConfig) -> Self {
        ModeConfig::Std(value)
    }
}

impl From<PdmTxConfig> for ModeConfig {
    fn from(value: PdmTxConfig) -> Self {
        ModeConfig::PdmTx(value)
    }
}

impl From<PdmRxConfig> for ModeConfig {
    fn from(value: PdmRxConfig) -> Self {
        ModeConfig::PdmRx(value)
    }
}

impl From<TdmConfig> for ModeConfig {
    fn from(value: TdmConfig) -> Self {
        ModeConfig::Tdm(value)
    }
}

/// Replacement slot configuration for `reconfigure_slot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotConfig {
    Std(StdSlotConfig),
    Pdm(PdmSlotConfig),
    Tdm(TdmSlotConfig),
}

impl From<StdSlotConfig> for SlotConfig {
    fn from(value: StdSlotConfig) -> Self {
        SlotConfig::Std(value)
    }
}

impl From<PdmSlotConfig> for SlotConfig {
    fn from(value: PdmSlotConfig) -> Self {
        SlotConfig::Pdm(value)
    }
}

impl From<TdmSlotConfig> for SlotConfig {
    fn from(value: TdmSlotConfig) -> Self {
        SlotConfig::Tdm(value)
    }
}

/// Replacement clock configuration for `reconfigure_clock`. Standard and TDM
/// share [`StdClkConfig`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClkConfig {
    Std(StdClkConfig),
    PdmTx(PdmTxClkConfig),
    PdmRx(PdmRxClkConfig),
}

impl From<StdClkConfig> for ClkConfig {
    fn from(value: StdClkConfig) -> Self {
        ClkConfig::Std(value)
    }
}

impl From<PdmTxClkConfig> for ClkConfig {
    fn from(value: PdmTxClkConfig) -> Self {
        ClkConfig::PdmTx(value)
    }
}

impl From<PdmRxClkConfig> for ClkConfig {
    fn from(value: PdmRxClkConfig) -> Self {
        ClkConfig::PdmRx(value)
    }
}

/// Replacement pin assignment for `reconfigure_gpio`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpioSetting {
    /// Standard and TDM.
    Frame(GpioConfig),
    Pdm(PdmGpioConfig),
}

impl From<GpioConfig> for GpioSetting {
    fn from(value: GpioConfig) -> Self {
        GpioSetting::Frame(value)
    }
}

impl From<PdmGpioConfig> for GpioSetting {
    fn from(value: PdmGpioConfig) -> Self {
        GpioSetting::Pdm(value)
    }
}

impl ModeConfig {
    fn configurator(&self) -> &dyn ModeConfigurator {
        match self {
            ModeConfig::Std(c) => c,
            ModeConfig::PdmTx(c) => c,
            ModeConfig::PdmRx(c) => c,
            ModeConfig::Tdm(c) => c,
        }
    }

    pub fn comm_mode(&self) -> CommMode {
        self.configurator().comm_mode()
    }

    pub(crate) fn check(&self, caps: &SocCaps, port: u8, dir: Direction) -> Result<()> {
        self.configurator().check(caps, port, dir)
    }

    pub(crate) fn layout(&self) -> Result<SlotLayout> {
        self.configurator().layout()
    }

    pub(crate) fn clock(
        &self,
        caps: &SocCaps,
        role: ClockRole,
        layout: &SlotLayout,
    ) -> Result<ClockInfo> {
        self.configurator().clock(caps, role, layout)
    }

    pub(crate) fn pin_route(&self, dir: Direction, role: Role) -> PinRoute {
        self.configurator().pin_route(dir, role)
    }

    pub fn clock_source(&self) -> ClockSource {
        match self {
            ModeConfig::Std(c) => c.clk.clk_src,
            ModeConfig::Tdm(c) => c.clk.clk_src,
            ModeConfig::PdmTx(c) => c.clk.clk_src,
            ModeConfig::PdmRx(c) => c.clk.clk_src,
        }
    }

    /// bclk divider requested for slave role. PDM always uses the minimum.
    pub(crate) fn slave_bclk_div(&self) -> u32 {
        match self {
            ModeConfig::Std(c) => c.clk.bclk_div,
            ModeConfig::Tdm(c) => c.clk.bclk_div,
            ModeConfig::PdmTx(_) | ModeConfig::PdmRx(_) => BCLK_DIV_MIN,
        }
    }

    /// The configuration with pins cleared and `Auto` slot widths resolved,
    /// for comparing the two directions of one port.
    pub(crate) fn duplex_key(&self) -> ModeConfig {
        match *self {
            ModeConfig::Std(c) => ModeConfig::Std(StdConfig {
                gpio: GpioConfig::default(),
                slot: c.slot.normalized(),
                ..c
            }),
            ModeConfig::PdmTx(c) => ModeConfig::PdmTx(PdmTxConfig {
                gpio: PdmGpioConfig::default(),
                slot: c.slot.normalized(),
                ..c
            }),
            ModeConfig::PdmRx(c) => ModeConfig::PdmRx(PdmRxConfig {
                gpio: PdmGpioConfig::default(),
                slot: c.slot.normalized(),
                ..c
            }),
            ModeConfig::Tdm(c) => ModeConfig::Tdm(TdmConfig {
                gpio: GpioConfig::default(),
                slot: c.slot.normalized(),
                ..c
            }),
        }
    }

    pub(crate) fn with_slot(&self, slot: SlotConfig) -> Result<ModeConfig> {
        match (*self, slot) {
            (ModeConfig::Std(c), SlotConfig::Std(slot)) => Ok(ModeConfig::Std(StdConfig { slot, ..c })),
            (ModeConfig::PdmTx(c), SlotConfig::Pdm(slot)) => {
                Ok(ModeConfig::PdmTx(PdmTxConfig { slot, ..c }))
            }
            (ModeConfig::PdmRx(c), SlotConfig::Pdm(slot)) => {
                Ok(ModeConfig::PdmRx(PdmRxConfig { slot, ..c }))
            }
            (ModeConfig::Tdm(c), SlotConfig::Tdm(slot)) => Ok(ModeConfig::Tdm(TdmConfig { slot, ..c })),
            _ => Err(mode_mismatch(self.comm_mode())),
        }
    }

    pub(crate) fn with_clock(&self, clk: ClkConfig) -> Result<ModeConfig> {
        match (*self, clk) {
            (ModeConfig::Std(c), ClkConfig::Std(clk)) => Ok(ModeConfig::Std(StdConfig { clk, ..c })),
            (ModeConfig::Tdm(c), ClkConfig::Std(clk)) => Ok(ModeConfig::Tdm(TdmConfig { clk, ..c })),
            (ModeConfig::PdmTx(c), ClkConfig::PdmTx(clk)) => {
                Ok(ModeConfig::PdmTx(PdmTxConfig { clk, ..c }))
            }
            (ModeConfig::PdmRx(c), ClkConfig::PdmRx(clk)) => {
                Ok(ModeConfig::PdmRx(PdmRxConfig { clk, ..c }))
            }
            _ => Err(mode_mismatch(self.comm_mode())),
        }
    }

    pub(crate) fn with_gpio(&self, gpio: GpioSetting) -> Result<ModeConfig> {
        match (*self, gpio) {
            (ModeConfig::Std(c), GpioSetting::Frame(gpio)) => Ok(ModeConfig::Std(StdConfig { gpio, ..c })),
            (ModeConfig::Tdm(c), GpioSetting::Frame(gpio)) => Ok(ModeConfig::Tdm(TdmConfig { gpio, ..c })),
            (ModeConfig::PdmTx(c), GpioSetting::Pdm(gpio)) => {
                Ok(ModeConfig::PdmTx(PdmTxConfig { gpio, ..c }))
            }
            (ModeConfig::PdmRx(c), GpioSetting::Pdm(gpio)) => {
                Ok(ModeConfig::PdmRx(PdmRxConfig { gpio, ..c }))
            }
            _ => Err(mode_mismatch(self.comm_mode())),
        }
    }
}

fn mode_mismatch(mode: CommMode) -> Error {
    error!("configuration does not match the channel's {:?} mode", mode);
    Error::InvalidArgument
}

/// Slot mask bits of the first `n` slots.
pub(crate) fn low_slots(n: u32) -> u16 {
    if n >= 16 {
        u16::MAX
    } else {
        (1u16 << n) - 1
    }
}

/// Clock role for a channel running as `role`. A slave forced by full-duplex
/// pairing still computes its clock as a master.
pub(crate) fn clock_role(role: Role, full_duplex_slave: bool, bclk_div: u32) -> ClockRole {
    match role {
        Role::Master => ClockRole::Master,
        Role::Slave if full_duplex_slave => ClockRole::Master,
        Role::Slave => ClockRole::Slave { bclk_div },
    }
}
