//! Hardware abstraction boundary.
//!
//! The driver core never touches registers. Each physical port is driven
//! through an [`I2sHal`] object created by the platform's [`HalProvider`]
//! when the port's controller is first needed. A HAL implementation programs
//! clock dividers, slot layout and pin routing, starts and stops each
//! direction, and delivers DMA completions to the [`InterruptDispatcher`]
//! attached for that direction.

use std::sync::Arc;

use crate::caps::SocCaps;
use crate::clock::ClockInfo;
use crate::config::{Role, SignalInvert};
use crate::isr::InterruptDispatcher;
use crate::mode::SlotLayout;
use crate::Result;

/// Transfer direction of a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Tx,
    Rx,
}

impl Direction {
    /// Index into per-direction tables.
    pub const fn index(self) -> usize {
        match self {
            Direction::Tx => 0,
            Direction::Rx => 1,
        }
    }

    /// Bit in a per-direction occupancy mask.
    pub const fn bit(self) -> u8 {
        1 << self.index()
    }

    pub const fn opposite(self) -> Direction {
        match self {
            Direction::Tx => Direction::Rx,
            Direction::Rx => Direction::Tx,
        }
    }
}

/// Signals to route for one direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PinRoute {
    pub mclk: Option<u8>,
    pub bclk: Option<u8>,
    pub ws: Option<u8>,
    /// Data out for TX, data in for RX.
    pub data: Option<u8>,
    /// bclk and ws are driven from outside.
    pub clk_input: bool,
    /// The data output is wired back to the data input.
    pub loopback: bool,
    pub invert: SignalInvert,
}

/// Register-level operations on one port.
pub trait I2sHal: Send {
    /// Enable the port and bring it to a known state.
    fn init(&mut self);

    /// Disable the port.
    fn deinit(&mut self);

    fn set_clock(&mut self, dir: Direction, clock: &ClockInfo);

    fn set_slot(&mut self, dir: Direction, layout: &SlotLayout, role: Role);

    /// Bytes received before the RX engine raises end-of-frame.
    fn set_rx_eof_num(&mut self, bytes: usize);

    fn route_gpio(&mut self, dir: Direction, route: &PinRoute);

    /// Connect the DMA engine of `dir` and route its completion interrupts to
    /// `dispatcher`, replacing any previous one.
    fn attach_dma(&mut self, dir: Direction, dispatcher: Arc<InterruptDispatcher>) -> Result<()>;

    /// Disconnect the DMA engine and drop the dispatcher.
    fn detach_dma(&mut self, dir: Direction);

    /// Reset the FIFO and the DMA engine of `dir` to descriptor 0.
    fn reset(&mut self, dir: Direction);

    fn start(&mut self, dir: Direction);

    fn stop(&mut self, dir: Direction);
}

/// Source of HAL objects for one chip.
pub trait HalProvider: Send + Sync {
    fn caps(&self) -> SocCaps;

    fn create_hal(&self, port: u8) -> Box<dyn I2sHal>;
}
