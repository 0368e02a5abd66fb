//! PDM mode.
//!
//! A PDM channel carries a one-bit oversampled stream on a clock line and a
//! data line. The port converts to and from 16-bit PCM samples in memory, so
//! the slot configuration only accepts [`DataBitWidth::Bits16`]. Transmit and
//! receive are separate configurations, and each is only available on the
//! ports the chip lists in its PDM masks.

use crate::caps::SocCaps;
use crate::clock::{self, ClockInfo, ClockRole};
use crate::config::{ClockSource, DataBitWidth, Role, SignalInvert, SlotBitWidth, SlotMode};
use crate::hal::{Direction, PinRoute};
use crate::{Error, Result};

use super::{CommMode, ModeConfigurator, SlotLayout};

/// PDM receive down-sampling.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum PdmDownsample {
    /// 8 PDM samples per PCM sample.
    #[default]
    Samples8,
    /// 16 PDM samples per PCM sample; doubles bclk.
    Samples16,
}

/// PDM transmit clock configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PdmTxClkConfig {
    pub sample_rate_hz: u32,
    pub clk_src: ClockSource,
    /// Up-sampling numerator.
    pub up_sample_fp: u32,
    /// Up-sampling denominator.
    pub up_sample_fs: u32,
}

impl PdmTxClkConfig {
    /// `PLL_F160M` source, up-sampling `fp = 960`, `fs = 480`.
    pub fn from_sample_rate_hz(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            clk_src: ClockSource::default(),
            up_sample_fp: 960,
            up_sample_fs: 480,
        }
    }

    #[must_use]
    pub fn clk_src(mut self, clk_src: ClockSource) -> Self {
        self.clk_src = clk_src;
        self
    }

    #[must_use]
    pub fn up_sample(mut self, fp: u32, fs: u32) -> Self {
        self.up_sample_fp = fp;
        self.up_sample_fs = fs;
        self
    }
}

/// PDM receive clock configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PdmRxClkConfig {
    pub sample_rate_hz: u32,
    pub clk_src: ClockSource,
    pub dn_sample_mode: PdmDownsample,
}

impl PdmRxClkConfig {
    pub fn from_sample_rate_hz(sample_rate_hz: u32) -> Self {
        Self {
            sample_rate_hz,
            clk_src: ClockSource::default(),
            dn_sample_mode: PdmDownsample::default(),
        }
    }

    #[must_use]
    pub fn clk_src(mut self, clk_src: ClockSource) -> Self {
        self.clk_src = clk_src;
        self
    }

    #[must_use]
    pub fn dn_sample_mode(mut self, dn_sample_mode: PdmDownsample) -> Self {
        self.dn_sample_mode = dn_sample_mode;
        self
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum PdmSlotMask {
    Left,
    Right,
    #[default]
    Both,
}

impl PdmSlotMask {
    fn bits(self) -> u16 {
        match self {
            PdmSlotMask::Left => 0b01,
            PdmSlotMask::Right => 0b10,
            PdmSlotMask::Both => 0b11,
        }
    }
}

/// PDM slot configuration, shared by both directions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PdmSlotConfig {
    pub data_bit_width: DataBitWidth,
    pub slot_bit_width: SlotBitWidth,
    pub slot_mode: SlotMode,
    pub slot_mask: PdmSlotMask,
}

impl Default for PdmSlotConfig {
    fn default() -> Self {
        Self::new(SlotMode::Stereo)
    }
}

impl PdmSlotConfig {
    /// 16-bit samples.
    pub fn new(slot_mode: SlotMode) -> Self {
        Self {
            data_bit_width: DataBitWidth::Bits16,
            slot_bit_width: SlotBitWidth::Auto,
            slot_mode,
            slot_mask: PdmSlotMask::Both,
        }
    }

    #[must_use]
    pub fn slot_mask(mut self, slot_mask: PdmSlotMask) -> Self {
        self.slot_mask = slot_mask;
        self
    }

    pub(crate) fn normalized(&self) -> Self {
        Self {
            slot_bit_width: self.slot_bit_width.normalized(self.data_bit_width),
            ..*self
        }
    }

    fn layout(&self) -> Result<SlotLayout> {
        ensure!(
            self.data_bit_width == DataBitWidth::Bits16,
            Error::InvalidArgument,
            "pdm only supports 16-bit samples"
        );
        let slot_bits = self.slot_bit_width.resolve(self.data_bit_width);
        ensure!(
            slot_bits == 16,
            Error::InvalidArgument,
            "pdm only supports 16-bit slots, got {}",
            slot_bits
        );
        let mono = self.slot_mode == SlotMode::Mono;
        Ok(SlotLayout {
            mode: CommMode::Pdm,
            data_bits: 16,
            slot_bits,
            total_slots: 2,
            active_slots: if mono { 1 } else { 2 },
            slot_mask: self.slot_mask.bits(),
            mono,
            bit_shift: false,
            ws_pol: false,
        })
    }
}

/// PDM pins: one clock line and one data line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub struct PdmGpioConfig {
    pub clk: Option<u8>,
    pub data: Option<u8>,
    pub clk_inv: bool,
}

impl PdmGpioConfig {
    #[must_use]
    pub fn clk(mut self, pin: u8) -> Self {
        self.clk = Some(pin);
        self
    }

    #[must_use]
    pub fn data(mut self, pin: u8) -> Self {
        self.data = Some(pin);
        self
    }

    #[must_use]
    pub fn clk_inv(mut self, clk_inv: bool) -> Self {
        self.clk_inv = clk_inv;
        self
    }

    fn validate(&self, gpio_count: u8) -> Result<()> {
        for pin in [self.clk, self.data].into_iter().flatten() {
            ensure!(pin < gpio_count, Error::InvalidArgument, "gpio {} out of range", pin);
        }
        Ok(())
    }

    fn route(&self, role: Role) -> PinRoute {
        PinRoute {
            ws: self.clk,
            data: self.data,
            clk_input: role == Role::Slave,
            invert: SignalInvert {
                ws: self.clk_inv,
                ..SignalInvert::default()
            },
            ..PinRoute::default()
        }
    }
}

/// PDM transmit channel configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PdmTxConfig {
    pub clk: PdmTxClkConfig,
    pub slot: PdmSlotConfig,
    pub gpio: PdmGpioConfig,
}

impl PdmTxConfig {
    pub fn new(clk: PdmTxClkConfig, slot: PdmSlotConfig, gpio: PdmGpioConfig) -> Self {
        Self { clk, slot, gpio }
    }
}

/// PDM receive channel configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PdmRxConfig {
    pub clk: PdmRxClkConfig,
    pub slot: PdmSlotConfig,
    pub gpio: PdmGpioConfig,
}

impl PdmRxConfig {
    pub fn new(clk: PdmRxClkConfig, slot: PdmSlotConfig, gpio: PdmGpioConfig) -> Self {
        Self { clk, slot, gpio }
    }
}

impl ModeConfigurator for PdmTxConfig {
    fn comm_mode(&self) -> CommMode {
        CommMode::Pdm
    }

    fn check(&self, caps: &SocCaps, port: u8, dir: Direction) -> Result<()> {
        ensure!(
            dir == Direction::Tx,
            Error::InvalidArgument,
            "pdm tx configuration used on an rx channel"
        );
        ensure!(
            caps.supports_pdm_tx(port),
            Error::InvalidArgument,
            "pdm tx is not supported on port {}",
            port
        );
        self.gpio.validate(caps.gpio_count)
    }

    fn layout(&self) -> Result<SlotLayout> {
        self.slot.layout()
    }

    fn clock(&self, caps: &SocCaps, _role: ClockRole, _layout: &SlotLayout) -> Result<ClockInfo> {
        clock::calc_pdm_tx(
            caps,
            self.clk.sample_rate_hz,
            self.clk.up_sample_fp,
            self.clk.up_sample_fs,
            self.clk.clk_src,
        )
    }

    fn pin_route(&self, _dir: Direction, role: Role) -> PinRoute {
        self.gpio.route(role)
    }
}

impl ModeConfigurator for PdmRxConfig {
    fn comm_mode(&self) -> CommMode {
        CommMode::Pdm
    }

    fn check(&self, caps: &SocCaps, port: u8, dir: Direction) -> Result<()> {
        ensure!(
            dir == Direction::Rx,
            Error::InvalidArgument,
            "pdm rx configuration used on a tx channel"
        );
        ensure!(
            caps.supports_pdm_rx(port),
            Error::InvalidArgument,
            "pdm rx is not supported on port {}",
            port
        );
        self.gpio.validate(caps.gpio_count)
    }

    fn layout(&self) -> Result<SlotLayout> {
        self.slot.layout()
    }

    fn clock(&self, caps: &SocCaps, _role: ClockRole, _layout: &SlotLayout) -> Result<ClockInfo> {
        clock::calc_pdm_rx(
            caps,
            self.clk.sample_rate_hz,
            self.clk.dn_sample_mode == PdmDownsample::Samples16,
            self.clk.clk_src,
        )
    }

    fn pin_route(&self, _dir: Direction, role: Role) -> PinRoute {
        self.gpio.route(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> PdmTxConfig {
        PdmTxConfig::new(
            PdmTxClkConfig::from_sample_rate_hz(48_000),
            PdmSlotConfig::default(),
            PdmGpioConfig::default().clk(4).data(5),
        )
    }

    #[test]
    fn pdm_is_limited_to_listed_ports_and_direction() {
        let caps = SocCaps::ESP32S3;
        assert!(tx().check(&caps, 0, Direction::Tx).is_ok());
        assert_eq!(tx().check(&caps, 1, Direction::Tx), Err(Error::InvalidArgument));
        assert_eq!(tx().check(&caps, 0, Direction::Rx), Err(Error::InvalidArgument));

        let rx = PdmRxConfig::new(
            PdmRxClkConfig::from_sample_rate_hz(16_000),
            PdmSlotConfig::new(SlotMode::Mono),
            PdmGpioConfig::default(),
        );
        assert!(rx.check(&caps, 0, Direction::Rx).is_ok());
        assert_eq!(
            rx.check(&SocCaps::ESP32C3, 0, Direction::Rx),
            Err(Error::InvalidArgument)
        );
    }

    #[test]
    fn pdm_requires_sixteen_bit_data() {
        let mut config = tx();
        config.slot.data_bit_width = DataBitWidth::Bits32;
        assert_eq!(config.layout(), Err(Error::InvalidArgument));

        let layout = tx().layout().unwrap();
        assert_eq!(layout.mode, CommMode::Pdm);
        assert_eq!((layout.total_slots, layout.active_slots), (2, 2));
    }

    #[test]
    fn rx_downsampling_doubles_bclk() {
        let rx = PdmRxConfig::new(
            PdmRxClkConfig::from_sample_rate_hz(16_000).dn_sample_mode(PdmDownsample::Samples16),
            PdmSlotConfig::default(),
            PdmGpioConfig::default(),
        );
        let layout = rx.layout().unwrap();
        let info = rx.clock(&SocCaps::ESP32S3, ClockRole::Master, &layout).unwrap();
        assert_eq!(info.bclk, 16_000 * 64 * 2);
        assert_eq!(info.mclk, info.bclk * 8);
    }

    #[test]
    fn clock_pin_is_routed_on_ws() {
        let route = tx().pin_route(Direction::Tx, Role::Master);
        assert_eq!(route.ws, Some(4));
        assert_eq!(route.data, Some(5));
        assert_eq!(route.bclk, None);
    }
}
