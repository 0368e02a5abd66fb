//! Chip generation capabilities.
//!
//! | Preset | Ports | HW | PDM TX | PDM RX | TDM | APLL | GPIOs |
//! |--------|-------|----|--------|--------|-----|------|-------|
//! | [`SocCaps::ESP32`] | 2 | V1 | port 0 | port 0 | no | yes | 40 |
//! | [`SocCaps::ESP32S3`] | 2 | V2 | port 0 | port 0 | yes | no | 49 |
//! | [`SocCaps::ESP32C3`] | 1 | V2 | port 0 | none | yes | no | 22 |
//!
//! A V1 controller drives TX and RX from one shared clock and slot
//! configuration, so both directions of a port must agree. A V2 controller
//! configures each direction independently.

use crate::constants::{DEFAULT_CLK_FREQ_HZ, SOC_I2S_NUM, XTAL_CLK_FREQ_HZ};

/// Controller hardware generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HwVersion {
    /// TX and RX share clock and slot registers.
    V1,
    /// TX and RX are configured independently.
    V2,
}

/// Capabilities of one chip generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocCaps {
    pub port_count: u8,
    pub hw_version: HwVersion,
    /// Bit `n` set when port `n` supports PDM transmit.
    pub pdm_tx_ports: u8,
    /// Bit `n` set when port `n` supports PDM receive.
    pub pdm_rx_ports: u8,
    pub tdm: bool,
    pub apll: bool,
    pub gpio_count: u8,
    pub default_clk_hz: u32,
    pub xtal_clk_hz: u32,
}

impl SocCaps {
    pub const ESP32: SocCaps = SocCaps {
        port_count: 2,
        hw_version: HwVersion::V1,
        pdm_tx_ports: 0b01,
        pdm_rx_ports: 0b01,
        tdm: false,
        apll: true,
        gpio_count: 40,
        default_clk_hz: DEFAULT_CLK_FREQ_HZ,
        xtal_clk_hz: XTAL_CLK_FREQ_HZ,
    };

    pub const ESP32S3: SocCaps = SocCaps {
        port_count: 2,
        hw_version: HwVersion::V2,
        pdm_tx_ports: 0b01,
        pdm_rx_ports: 0b01,
        tdm: true,
        apll: false,
        gpio_count: 49,
        default_clk_hz: DEFAULT_CLK_FREQ_HZ,
        xtal_clk_hz: XTAL_CLK_FREQ_HZ,
    };

    pub const ESP32C3: SocCaps = SocCaps {
        port_count: 1,
        hw_version: HwVersion::V2,
        pdm_tx_ports: 0b01,
        pdm_rx_ports: 0,
        tdm: true,
        apll: false,
        gpio_count: 22,
        default_clk_hz: DEFAULT_CLK_FREQ_HZ,
        xtal_clk_hz: XTAL_CLK_FREQ_HZ,
    };

    /// Number of ports usable by the driver, bounded by the registry size.
    pub fn ports(&self) -> u8 {
        self.port_count.min(SOC_I2S_NUM as u8)
    }

    pub fn supports_pdm_tx(&self, port: u8) -> bool {
        port < 8 && self.pdm_tx_ports & (1 << port) != 0
    }

    pub fn supports_pdm_rx(&self, port: u8) -> bool {
        port < 8 && self.pdm_rx_ports & (1 << port) != 0
    }

    /// Whether TX and RX of one port must share one configuration.
    pub fn shared_clock(&self) -> bool {
        self.hw_version == HwVersion::V1
    }
}

impl Default for SocCaps {
    fn default() -> Self {
        Self::ESP32S3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdm_masks_select_ports() {
        assert!(SocCaps::ESP32.supports_pdm_tx(0));
        assert!(!SocCaps::ESP32.supports_pdm_tx(1));
        assert!(!SocCaps::ESP32C3.supports_pdm_rx(0));
        assert!(!SocCaps::ESP32S3.supports_pdm_rx(9));
    }

    #[test]
    fn only_v1_shares_the_clock() {
        assert!(SocCaps::ESP32.shared_clock());
        assert!(!SocCaps::ESP32S3.shared_clock());
    }

    #[test]
    fn ports_are_bounded_by_registry_size() {
        let caps = SocCaps {
            port_count: 5,
            ..SocCaps::ESP32
        };
        assert_eq!(caps.ports(), SOC_I2S_NUM as u8);
        assert_eq!(SocCaps::ESP32C3.ports(), 1);
    }
}
