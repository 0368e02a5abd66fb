//! # i2s-driver
//!
//! Channel-based I2S driver core. It arbitrates the chip's I2S ports between
//! the driver and other peripherals sharing them, builds the circular DMA
//! rings, computes clock dividers for the standard, PDM and TDM modes, pairs
//! TX and RX into full duplex, and moves data between callers and the DMA
//! engine through the completion interrupt.
//!
//! Register access is left to an [`I2sHal`] implementation supplied through a
//! [`HalProvider`]. The `sim` feature adds a software platform that runs the
//! whole driver on a host.
//!
//! ## Architecture
//!
//! | Layer | Module | Purpose |
//! |-------|--------|---------|
//! | Ports | [`platform`] | Port ownership table, controller lifecycle |
//! | Port | [`controller`] | One port, its HAL object, full-duplex pairing |
//! | Channel | [`channel`] | State machine, blocking read/write |
//! | Modes | [`mode`] | Standard / PDM / TDM slot, clock and pin setup |
//! | Clocks | [`clock`] | mclk / bclk dividers and the fractional divider |
//! | DMA | [`dma`] | Descriptor rings and buffer ownership |
//! | Interrupt | [`isr`] | Completion path, events, callbacks |
//! | Hardware | [`hal`] | `I2sHal` / `HalProvider` traits |
//!
//! ## Quick start
//!
//! ```ignore
//! use core::time::Duration;
//! use i2s_driver::config::{ChannelConfig, DataBitWidth, GpioConfig};
//! use i2s_driver::mode::StdConfig;
//!
//! let (tx, rx) = i2s_driver::new_duplex_channels(&platform, &ChannelConfig::default())?;
//! let std = StdConfig::philips(48_000, DataBitWidth::Bits16)
//!     .gpio(GpioConfig::default().bclk(4).ws(5).data_out(18).data_in(19));
//! tx.init_mode(std)?;
//! rx.init_mode(std)?;
//! tx.start()?;
//! rx.start()?;
//!
//! tx.write(&samples, Duration::from_millis(100))?;
//! let n = rx.read(&mut buf, Duration::from_millis(100))?;
//! ```
//!
//! ## Features
//!
//! | Feature | Default | Enables |
//! |---------|---------|---------|
//! | `std` | yes | `critical-section` implementation for hosted targets |
//! | `log` | yes | Diagnostics through the `log` facade (target `i2s`) |
//! | `sim` | no | [`sim`] software platform (always built for tests) |

#[macro_use]
mod fmt;

pub mod caps;
pub mod channel;
pub mod clock;
pub mod config;
pub mod constants;
pub mod controller;
pub mod dma;
pub mod error;
pub mod hal;
pub mod isr;
pub mod mode;
pub mod mutex;
pub mod platform;
pub mod pm;
pub mod queue;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

#[cfg(test)]
mod test_util;


pub use caps::SocCaps;
pub use channel::{Channel, ChannelInfo, ChannelState, Rx, Tx};
pub use config::ChannelConfig;
pub use error::{Error, OccupationError, Result};
pub use hal::{Direction, HalProvider, I2sHal};
pub use isr::{EventCallbacks, I2sEvent};
pub use mode::ModeConfig;

/// Allocate a transmit channel.
pub fn new_tx_channel(provider: &dyn HalProvider, config: &ChannelConfig) -> Result<Channel<Tx>> {
    Channel::new(provider, config)
}

/// Allocate a receive channel.
pub fn new_rx_channel(provider: &dyn HalProvider, config: &ChannelConfig) -> Result<Channel<Rx>> {
    Channel::new(provider, config)
}

/// Allocate a TX and an RX channel on the same port.
///
/// TX is allocated first, as selected by `config`; RX then goes on the port
/// TX landed on. If the RX half cannot be allocated the TX half is deleted
/// again.
pub fn new_duplex_channels(
    provider: &dyn HalProvider,
    config: &ChannelConfig,
) -> Result<(Channel<Tx>, Channel<Rx>)> {
    channel::new_pair(provider, config)
}
