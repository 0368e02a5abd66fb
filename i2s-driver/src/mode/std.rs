//! Standard (two-slot) mode: Philips, MSB and PCM framing.

use crate::caps::SocCaps;
use crate::clock::{self, ClockInfo, ClockRole, FrameClockRequest};
use crate::config::{ClockSource, DataBitWidth, GpioConfig, MclkMultiple, Role, SlotBitWidth, SlotMode};
use crate::constants::BCLK_DIV_MIN;
use crate::hal::{Direction, PinRoute};
use crate::{Error, Result};

use super::{CommMode, ModeConfigurator, SlotLayout};

/// Standard mode channel configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StdConfig {
    pub clk: StdClkConfig,
    pub slot: StdSlotConfig,
    pub gpio: GpioConfig,
}

impl StdConfig {
    pub fn new(clk: StdClkConfig, slot: StdSlotConfig, gpio: GpioConfig) -> Self {
        Self { clk, slot, gpio }
    }

    /// Philips I2S at `sample_rate_hz`, stereo, mclk at 256 times the sample
    /// rate, no pins routed.
    pub fn philips(sample_rate_hz: u32, bits_per_sample: DataBitWidth) -> Self {
        Self {
            clk: StdClkConfig::from_sample_rate_hz(sample_rate_hz),
            slot: StdSlotConfig::philips(bits_per_sample, SlotMode::Stereo),
            gpio: GpioConfig::default(),
        }
    }

    #[must_use]
    pub fn clk(mut self, clk: StdClkConfig) -> Self {
        self.clk = clk;
        self
    }

    #[must_use]
    pub fn slot(mut self, slot: StdSlotConfig) -> Self {
        self.slot = slot;
        self
    }

    #[must_use]
    pub fn gpio(mut self, gpio: GpioConfig) -> Self {
        self.gpio = gpio;
        self
    }
}

/// Standard and TDM clock configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StdClkConfig {
    pub sample_rate_hz: u32,
    pub clk_src: ClockSource,
    /// Used in master role.
    pub mclk_multiple: MclkMultiple,
    /// Used in slave role; raised to at least 8.
    pub bclk_div: u32,
}

impl StdClkConfig {
    pub fn new(sample_rate_hz: u32, clk_src: ClockSource, mclk_multiple: MclkMultiple) -> Self {
        Self {
            sample_rate_hz,
            clk_src,
            mclk_multiple,
            bclk_div: BCLK_DIV_MIN,
        }
    }

    /// `PLL_F160M` source with mclk at 256 times the sample rate.
    ///
    /// Use [`MclkMultiple::M384`] with 24-bit slots.
    pub fn from_sample_rate_hz(rate: u32) -> Self {
        Self::new(rate, ClockSource::default(), MclkMultiple::M256)
    }

    #[must_use]
    pub fn clk_src(mut self, clk_src: ClockSource) -> Self {
        self.clk_src = clk_src;
        self
    }

    #[must_use]
    pub fn mclk_multiple(mut self, mclk_multiple: MclkMultiple) -> Self {
        self.mclk_multiple = mclk_multiple;
        self
    }

    #[must_use]
    pub fn bclk_div(mut self, bclk_div: u32) -> Self {
        self.bclk_div = bclk_div;
        self
    }

    pub(crate) fn request(&self, layout: &SlotLayout, role: ClockRole) -> FrameClockRequest {
        FrameClockRequest {
            sample_rate_hz: self.sample_rate_hz,
            total_slots: layout.total_slots,
            slot_bits: layout.slot_bits,
            source: self.clk_src,
            mclk_multiple: self.mclk_multiple,
            role,
        }
    }
}

/// Which of the two slots carry data.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub enum StdSlotMask {
    Left,
    Right,
    #[default]
    Both,
}

impl StdSlotMask {
    fn bits(self) -> u16 {
        match self {
            StdSlotMask::Left => 0b01,
            StdSlotMask::Right => 0b10,
            StdSlotMask::Both => 0b11,
        }
    }
}

/// Standard mode slot configuration.
///
/// Start from [`philips`](Self::philips), [`msb`](Self::msb) or
/// [`pcm_short`](Self::pcm_short) and adjust.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StdSlotConfig {
    pub data_bit_width: DataBitWidth,
    pub slot_bit_width: SlotBitWidth,
    pub slot_mode: SlotMode,
    pub slot_mask: StdSlotMask,
    pub ws_pol: bool,
    pub bit_shift: bool,
}

impl StdSlotConfig {
    pub fn philips(bits_per_sample: DataBitWidth, slot_mode: SlotMode) -> Self {
        Self {
            data_bit_width: bits_per_sample,
            slot_bit_width: SlotBitWidth::Auto,
            slot_mode,
            slot_mask: StdSlotMask::Both,
            ws_pol: false,
            bit_shift: true,
        }
    }

    pub fn msb(bits_per_sample: DataBitWidth, slot_mode: SlotMode) -> Self {
        Self {
            bit_shift: false,
            ..Self::philips(bits_per_sample, slot_mode)
        }
    }

    pub fn pcm_short(bits_per_sample: DataBitWidth, slot_mode: SlotMode) -> Self {
        Self {
            ws_pol: true,
            ..Self::philips(bits_per_sample, slot_mode)
        }
    }

    #[must_use]
    pub fn data_bit_width(mut self, data_bit_width: DataBitWidth) -> Self {
        self.data_bit_width = data_bit_width;
        self
    }

    #[must_use]
    pub fn slot_bit_width(mut self, slot_bit_width: SlotBitWidth) -> Self {
        self.slot_bit_width = slot_bit_width;
        self
    }

    #[must_use]
    pub fn slot_mode_mask(mut self, slot_mode: SlotMode, slot_mask: StdSlotMask) -> Self {
        self.slot_mode = slot_mode;
        self.slot_mask = slot_mask;
        self
    }

    pub(crate) fn normalized(&self) -> Self {
        Self {
            slot_bit_width: self.slot_bit_width.normalized(self.data_bit_width),
            ..*self
        }
    }
}

impl ModeConfigurator for StdConfig {
    fn comm_mode(&self) -> CommMode {
        CommMode::Standard
    }

    fn check(&self, caps: &SocCaps, _port: u8, _dir: Direction) -> Result<()> {
        self.gpio.validate(caps.gpio_count)
    }

    fn layout(&self) -> Result<SlotLayout> {
        let data_bits = u32::from(self.slot.data_bit_width);
        let slot_bits = self.slot.slot_bit_width.resolve(self.slot.data_bit_width);
        ensure!(
            slot_bits >= data_bits,
            Error::InvalidArgument,
            "slot width {} is smaller than data width {}",
            slot_bits,
            data_bits
        );
        let mono = self.slot.slot_mode == SlotMode::Mono;
        Ok(SlotLayout {
            mode: CommMode::Standard,
            data_bits,
            slot_bits,
            total_slots: 2,
            active_slots: if mono { 1 } else { 2 },
            slot_mask: self.slot.slot_mask.bits(),
            mono,
            bit_shift: self.slot.bit_shift,
            ws_pol: self.slot.ws_pol,
        })
    }

    fn clock(&self, caps: &SocCaps, role: ClockRole, layout: &SlotLayout) -> Result<ClockInfo> {
        clock::calc_std(caps, &self.clk.request(layout, role))
    }

    fn pin_route(&self, dir: Direction, role: Role) -> PinRoute {
        frame_pin_route(&self.gpio, dir, role)
    }
}

/// Pin routing shared by standard and TDM modes.
pub(crate) fn frame_pin_route(gpio: &GpioConfig, dir: Direction, role: Role) -> PinRoute {
    PinRoute {
        mclk: gpio.mclk,
        bclk: gpio.bclk,
        ws: gpio.ws,
        data: match dir {
            Direction::Tx => gpio.data_out,
            Direction::Rx => gpio.data_in,
        },
        clk_input: role == Role::Slave,
        loopback: gpio.is_loopback(),
        invert: gpio.invert,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_and_mono_layouts() {
        let stereo = StdConfig::philips(48_000, DataBitWidth::Bits16).layout().unwrap();
        assert_eq!(stereo.total_slots, 2);
        assert_eq!(stereo.active_slots, 2);
        assert_eq!(stereo.slot_bits, 16);
        assert!(stereo.bit_shift);

        let mono = StdConfig::philips(48_000, DataBitWidth::Bits24)
            .slot(StdSlotConfig::msb(DataBitWidth::Bits24, SlotMode::Mono))
            .layout()
            .unwrap();
        assert_eq!(mono.active_slots, 1);
        assert_eq!(mono.total_slots, 2);
        assert!(!mono.bit_shift);
    }

    #[test]
    fn slot_narrower_than_data_is_rejected() {
        let config = StdConfig::philips(48_000, DataBitWidth::Bits32).slot(
            StdSlotConfig::philips(DataBitWidth::Bits32, SlotMode::Stereo)
                .slot_bit_width(SlotBitWidth::Bits16),
        );
        assert_eq!(config.layout().err(), Some(Error::InvalidArgument));
    }

    #[test]
    fn std_clock_matches_reference_scenario() {
        let config = StdConfig::philips(48_000, DataBitWidth::Bits16);
        let layout = config.layout().unwrap();
        let info = config
            .clock(&SocCaps::ESP32S3, ClockRole::Master, &layout)
            .unwrap();
        assert_eq!((info.bclk, info.mclk, info.bclk_div), (1_536_000, 12_288_000, 8));
    }

    #[test]
    fn pin_route_picks_data_line_per_direction() {
        let gpio = GpioConfig::default().bclk(1).ws(2).data_out(3).data_in(4);
        let config = StdConfig::philips(48_000, DataBitWidth::Bits16).gpio(gpio);
        assert_eq!(config.pin_route(Direction::Tx, Role::Master).data, Some(3));
        let rx = config.pin_route(Direction::Rx, Role::Slave);
        assert_eq!(rx.data, Some(4));
        assert!(rx.clk_input);
        assert!(!rx.loopback);
    }

    #[test]
    fn gpio_out_of_range_fails_check() {
        let config = StdConfig::philips(48_000, DataBitWidth::Bits16)
            .gpio(GpioConfig::default().bclk(60));
        assert_eq!(
            config.check(&SocCaps::ESP32S3, 0, Direction::Tx),
            Err(Error::InvalidArgument)
        );
    }
}
