/// Maximum number of physical I2S ports on any supported chip.
pub const SOC_I2S_NUM: usize = 2;

/// Largest byte count a single DMA descriptor can describe.
pub const DMA_BUFFER_MAX_SIZE: usize = 4092;

/// Minimum number of descriptors in a DMA ring.
pub const DMA_DESC_NUM_MIN: u32 = 2;

/// Owner name recorded in the platform table for ports held by this driver.
pub const DRIVER_OWNER: &str = "i2s_driver";

/// Bit clock to sample rate factor in PDM mode.
pub const PDM_BCK_FACTOR: u32 = 64;

/// Fixed bit clock divider used by PDM and by slave-role standard mode.
pub const BCLK_DIV_MIN: u32 = 8;

/// The integer part of the mclk divider must stay below this value.
pub const MCLK_DIV_INT_MAX: u32 = 256;

/// Largest denominator of the fractional mclk divider.
pub const MCLK_DIV_FRAC_MAX: u32 = 63;

/// Default source clock (`PLL_F160M`).
pub const DEFAULT_CLK_FREQ_HZ: u32 = 160_000_000;

/// Crystal oscillator frequency.
pub const XTAL_CLK_FREQ_HZ: u32 = 40_000_000;

/// APLL output range.
pub const APLL_MIN_HZ: u32 = 5_303_031;
pub const APLL_MAX_HZ: u32 = 125_000_000;
