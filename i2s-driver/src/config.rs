//! Channel allocation and shared configuration values.
//!
//! Mode-specific configuration (slot layout, clocks) lives next to each mode in
//! [`crate::mode`]. The values here are shared by every mode.
//!
//! All configuration types are plain values with a [`Default`] and consuming
//! builder setters:
//!
//! ```
//! use i2s_driver::config::{ChannelConfig, Port, Role};
//! let config = ChannelConfig::default().port(Port::Id(0)).role(Role::Slave).dma_desc(4);
//! ```

use crate::constants::SOC_I2S_NUM;

/// Which physical port a channel should be allocated on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Port {
    /// Take the first port with a free slot in the requested direction(s).
    #[default]
    Auto,
    /// Use this port index.
    Id(u8),
}

/// Channel operating role.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Role {
    /// Master: bclk and ws are outputs.
    #[default]
    Master,
    /// Slave: bclk and ws are inputs.
    Slave,
}

/// Channel allocation config.
///
/// The default configuration is:
/// * Port: [`Port::Auto`]
/// * Role: [`Role::Master`]
/// * DMA descriptors: 6
/// * Frames per DMA buffer: 240
/// * Auto clear: `false`
/// * Event queue: none
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub(crate) port: Port,
    pub(crate) role: Role,
    pub(crate) dma_desc: u32,
    pub(crate) dma_frame: u32,
    pub(crate) auto_clear: bool,
    pub(crate) event_queue_len: Option<usize>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            port: Port::Auto,
            role: Role::Master,
            dma_desc: 6,
            dma_frame: 240,
            auto_clear: false,
            event_queue_len: None,
        }
    }
}

impl ChannelConfig {
    /// Select the port.
    #[must_use]
    pub fn port(mut self, port: Port) -> Self {
        self.port = port;
        self
    }

    /// Select master or slave role.
    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Number of DMA descriptors (and buffers) in the ring. Must be at least 2.
    #[must_use]
    pub fn dma_desc(mut self, dma_desc: u32) -> Self {
        self.dma_desc = dma_desc;
        self
    }

    /// Number of frames in one DMA buffer.
    #[must_use]
    pub fn dma_frame(mut self, dma_frame: u32) -> Self {
        self.dma_frame = dma_frame;
        self
    }

    /// Zero each transmit buffer once the hardware has sent it. TX only.
    #[must_use]
    pub fn auto_clear(mut self, auto_clear: bool) -> Self {
        self.auto_clear = auto_clear;
        self
    }

    /// Create a bounded event queue of `len` entries for the channel.
    #[must_use]
    pub fn event_queue(mut self, len: usize) -> Self {
        self.event_queue_len = Some(len);
        self
    }

    pub(crate) fn validate(&self, port_count: u8) -> crate::Result<()> {
        ensure!(
            self.dma_desc >= crate::constants::DMA_DESC_NUM_MIN,
            crate::Error::InvalidArgument,
            "dma_desc must be at least 2, got {}",
            self.dma_desc
        );
        ensure!(
            self.dma_frame > 0,
            crate::Error::InvalidArgument,
            "dma_frame must be non-zero"
        );
        if let Port::Id(id) = self.port {
            ensure!(
                (id as usize) < SOC_I2S_NUM && id < port_count,
                crate::Error::InvalidArgument,
                "port {} out of range",
                id
            );
        }
        if let Some(len) = self.event_queue_len {
            ensure!(len > 0, crate::Error::InvalidArgument, "event queue length must be non-zero");
        }
        Ok(())
    }
}

/// Number of data bits in one sample.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Hash)]
pub enum DataBitWidth {
    /// 8 bits.
    Bits8,
    /// 16 bits.
    Bits16,
    /// 24 bits.
    Bits24,
    /// 32 bits.
    Bits32,
}

impl From<DataBitWidth> for u32 {
    fn from(value: DataBitWidth) -> Self {
        match value {
            DataBitWidth::Bits8 => 8,
            DataBitWidth::Bits16 => 16,
            DataBitWidth::Bits24 => 24,
            DataBitWidth::Bits32 => 32,
        }
    }
}

impl TryFrom<u32> for DataBitWidth {
    type Error = crate::Error;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            8 => Ok(Self::Bits8),
            16 => Ok(Self::Bits16),
            24 => Ok(Self::Bits24),
            32 => Ok(Self::Bits32),
            _ => Err(crate::Error::InvalidArgument),
        }
    }
}

/// Total width of one slot.
///
/// This is not necessarily the number of data bits in one slot; a slot may be
/// padded beyond the data.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, Hash)]
pub enum SlotBitWidth {
    /// Same as the data bit width.
    #[default]
    Auto,
    /// 8 bits.
    Bits8,
    /// 16 bits.
    Bits16,
    /// 24 bits.
    Bits24,
    /// 32 bits.
    Bits32,
}

impl SlotBitWidth {
    /// Resolve `Auto` against the data width.
    pub fn resolve(self, data: DataBitWidth) -> u32 {
        match self {
            Self::Auto => data.into(),
            Self::Bits8 => 8,
            Self::Bits16 => 16,
            Self::Bits24 => 24,
            Self::Bits32 => 32,
        }
    }

    /// `Auto` replaced by the concrete width matching `data`.
    pub fn normalized(self, data: DataBitWidth) -> Self {
        match self {
            Self::Auto => match data {
                DataBitWidth::Bits8 => Self::Bits8,
                DataBitWidth::Bits16 => Self::Bits16,
                DataBitWidth::Bits24 => Self::Bits24,
                DataBitWidth::Bits32 => Self::Bits32,
            },
            other => other,
        }
    }
}

/// Slot mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, Hash)]
pub enum SlotMode {
    /// TX sends the same data in every slot; RX keeps the first slot only.
    Mono,
    /// Every slot carries its own data.
    #[default]
    Stereo,
}

/// Multiple of the sample rate used as mclk.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, Hash)]
pub enum MclkMultiple {
    /// mclk = sample rate * 128
    M128,
    /// mclk = sample rate * 256
    #[default]
    M256,
    /// mclk = sample rate * 384
    M384,
    /// mclk = sample rate * 512
    M512,
    /// mclk = sample rate * 576
    M576,
    /// mclk = sample rate * 768
    M768,
    /// mclk = sample rate * 1024
    M1024,
    /// mclk = sample rate * 1152
    M1152,
}

impl From<MclkMultiple> for u32 {
    fn from(value: MclkMultiple) -> Self {
        match value {
            MclkMultiple::M128 => 128,
            MclkMultiple::M256 => 256,
            MclkMultiple::M384 => 384,
            MclkMultiple::M512 => 512,
            MclkMultiple::M576 => 576,
            MclkMultiple::M768 => 768,
            MclkMultiple::M1024 => 1024,
            MclkMultiple::M1152 => 1152,
        }
    }
}

/// Source clock feeding the port's divider chain.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default, Hash)]
pub enum ClockSource {
    /// `PLL_F160M`.
    #[default]
    Pll160M,
    /// Crystal oscillator.
    Xtal,
    /// Audio PLL, tuned to a multiple of mclk.
    Apll,
    /// Clock supplied on the mclk pin at the given frequency.
    External(u32),
}

/// GPIO assignment for standard and TDM modes.
///
/// `None` leaves a signal unconnected. Setting `data_out == data_in` asks for
/// the two data lines to be wired together (loopback).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub struct GpioConfig {
    pub mclk: Option<u8>,
    pub bclk: Option<u8>,
    pub ws: Option<u8>,
    pub data_out: Option<u8>,
    pub data_in: Option<u8>,
    pub invert: SignalInvert,
}

/// Per-signal inversion flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub struct SignalInvert {
    pub mclk: bool,
    pub bclk: bool,
    pub ws: bool,
}

impl GpioConfig {
    #[must_use]
    pub fn mclk(mut self, pin: u8) -> Self {
        self.mclk = Some(pin);
        self
    }

    #[must_use]
    pub fn bclk(mut self, pin: u8) -> Self {
        self.bclk = Some(pin);
        self
    }

    #[must_use]
    pub fn ws(mut self, pin: u8) -> Self {
        self.ws = Some(pin);
        self
    }

    #[must_use]
    pub fn data_out(mut self, pin: u8) -> Self {
        self.data_out = Some(pin);
        self
    }

    #[must_use]
    pub fn data_in(mut self, pin: u8) -> Self {
        self.data_in = Some(pin);
        self
    }

    #[must_use]
    pub fn invert(mut self, invert: SignalInvert) -> Self {
        self.invert = invert;
        self
    }

    /// Whether the data lines are intentionally wired together.
    pub fn is_loopback(&self) -> bool {
        self.data_out.is_some() && self.data_out == self.data_in
    }

    pub(crate) fn validate(&self, gpio_count: u8) -> crate::Result<()> {
        for pin in [self.mclk, self.bclk, self.ws, self.data_out, self.data_in]
            .into_iter()
            .flatten()
        {
            ensure!(
                pin < gpio_count,
                crate::Error::InvalidArgument,
                "gpio {} out of range",
                pin
            );
        }
        Ok(())
    }
}
