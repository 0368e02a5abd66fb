//! TDM mode: up to 16 slots per frame.

use crate::caps::SocCaps;
use crate::clock::{self, ClockInfo, ClockRole};
use crate::config::{DataBitWidth, GpioConfig, Role, SlotBitWidth, SlotMode};
use crate::hal::{Direction, PinRoute};
use crate::{Error, Result};

use super::std::{frame_pin_route, StdClkConfig};
use super::{CommMode, ModeConfigurator, SlotLayout};

/// TDM shares the standard-mode clock configuration.
pub type TdmClkConfig = StdClkConfig;

/// Active TDM slots; bit `n` enables slot `n`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub struct TdmSlotMask(pub u16);

impl TdmSlotMask {
    /// Slots `0..n`.
    pub fn first(n: u32) -> Self {
        Self(super::low_slots(n))
    }

    #[must_use]
    pub fn with(self, slot: u8) -> Self {
        Self(self.0 | (1 << (slot & 0x0f)))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Index of the highest enabled slot.
    pub fn highest(self) -> Option<u32> {
        (self.0 != 0).then(|| 15 - self.0.leading_zeros())
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

/// TDM slot configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TdmSlotConfig {
    pub data_bit_width: DataBitWidth,
    pub slot_bit_width: SlotBitWidth,
    pub slot_mode: SlotMode,
    pub slot_mask: TdmSlotMask,
    /// Slots per frame; `0` uses the highest enabled slot.
    pub total_slot: u32,
    pub ws_pol: bool,
    pub bit_shift: bool,
}

impl TdmSlotConfig {
    /// Philips-style TDM framing over `slot_mask`.
    pub fn philips(bits_per_sample: DataBitWidth, slot_mode: SlotMode, slot_mask: TdmSlotMask) -> Self {
        Self {
            data_bit_width: bits_per_sample,
            slot_bit_width: SlotBitWidth::Auto,
            slot_mode,
            slot_mask,
            total_slot: 0,
            ws_pol: false,
            bit_shift: true,
        }
    }

    #[must_use]
    pub fn slot_bit_width(mut self, slot_bit_width: SlotBitWidth) -> Self {
        self.slot_bit_width = slot_bit_width;
        self
    }

    #[must_use]
    pub fn total_slot(mut self, total_slot: u32) -> Self {
        self.total_slot = total_slot;
        self
    }

    pub(crate) fn normalized(&self) -> Self {
        Self {
            slot_bit_width: self.slot_bit_width.normalized(self.data_bit_width),
            ..*self
        }
    }
}

/// TDM channel configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TdmConfig {
    pub clk: TdmClkConfig,
    pub slot: TdmSlotConfig,
    pub gpio: GpioConfig,
}

impl TdmConfig {
    pub fn new(clk: TdmClkConfig, slot: TdmSlotConfig, gpio: GpioConfig) -> Self {
        Self { clk, slot, gpio }
    }

    #[must_use]
    pub fn gpio(mut self, gpio: GpioConfig) -> Self {
        self.gpio = gpio;
        self
    }
}

impl ModeConfigurator for TdmConfig {
    fn comm_mode(&self) -> CommMode {
        CommMode::Tdm
    }

    fn check(&self, caps: &SocCaps, _port: u8, _dir: Direction) -> Result<()> {
        ensure!(caps.tdm, Error::InvalidArgument, "tdm is not supported on this chip");
        self.gpio.validate(caps.gpio_count)
    }

    fn layout(&self) -> Result<SlotLayout> {
        let slot = &self.slot;
        let Some(highest) = slot.slot_mask.highest() else {
            error!("tdm slot mask is empty");
            return Err(Error::InvalidArgument);
        };
        ensure!(
            slot.total_slot <= 16,
            Error::InvalidArgument,
            "tdm supports at most 16 slots, got {}",
            slot.total_slot
        );
        let data_bits = u32::from(slot.data_bit_width);
        let slot_bits = slot.slot_bit_width.resolve(slot.data_bit_width);
        ensure!(
            slot_bits >= data_bits,
            Error::InvalidArgument,
            "slot width {} is smaller than data width {}",
            slot_bits,
            data_bits
        );
        let mono = slot.slot_mode == SlotMode::Mono;
        Ok(SlotLayout {
            mode: CommMode::Tdm,
            data_bits,
            slot_bits,
            total_slots: (highest + 1).max(slot.total_slot),
            active_slots: if mono { 1 } else { slot.slot_mask.count() },
            slot_mask: slot.slot_mask.bits(),
            mono,
            bit_shift: slot.bit_shift,
            ws_pol: slot.ws_pol,
        })
    }

    fn clock(&self, caps: &SocCaps, role: ClockRole, layout: &SlotLayout) -> Result<ClockInfo> {
        clock::calc_tdm(caps, &self.clk.request(layout, role))
    }

    fn pin_route(&self, dir: Direction, role: Role) -> PinRoute {
        frame_pin_route(&self.gpio, dir, role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mask: TdmSlotMask) -> TdmConfig {
        TdmConfig::new(
            TdmClkConfig::from_sample_rate_hz(48_000),
            TdmSlotConfig::philips(DataBitWidth::Bits16, SlotMode::Stereo, mask),
            GpioConfig::default(),
        )
    }

    #[test]
    fn total_slots_follow_highest_active_slot() {
        let layout = config(TdmSlotMask(0b0101)).layout().unwrap();
        assert_eq!(layout.total_slots, 3);
        assert_eq!(layout.active_slots, 2);

        let mut wide = config(TdmSlotMask::first(2));
        wide.slot = wide.slot.total_slot(8);
        let layout = wide.layout().unwrap();
        assert_eq!(layout.total_slots, 8);
        assert_eq!(layout.active_slots, 2);

        let mut mono = config(TdmSlotMask::first(4));
        mono.slot.slot_mode = SlotMode::Mono;
        assert_eq!(mono.layout().unwrap().active_slots, 1);
    }

    #[test]
    fn empty_mask_is_rejected() {
        assert_eq!(config(TdmSlotMask(0)).layout(), Err(Error::InvalidArgument));
    }

    #[test]
    fn chip_without_tdm_is_rejected() {
        let config = config(TdmSlotMask::first(4));
        assert_eq!(
            config.check(&SocCaps::ESP32, 0, Direction::Tx),
            Err(Error::InvalidArgument)
        );
        assert!(config.check(&SocCaps::ESP32S3, 0, Direction::Tx).is_ok());
    }

    #[test]
    fn many_slots_raise_bclk_divider() {
        let config = config(TdmSlotMask::first(16));
        let layout = config.layout().unwrap();
        let info = config
            .clock(&SocCaps::ESP32S3, ClockRole::Master, &layout)
            .unwrap();
        assert_eq!(info.bclk, 48_000 * 16 * 16);
        assert_eq!(info.bclk_div, 3);
    }

    #[test]
    fn mask_helpers() {
        let mask = TdmSlotMask::default().with(0).with(7);
        assert_eq!(mask.highest(), Some(7));
        assert_eq!(mask.count(), 2);
        assert_eq!(TdmSlotMask(0).highest(), None);
    }
}
