//! Clock divider arithmetic.
//!
//! Every port derives its serial clocks from one source clock through two
//! dividers:
//!
//! ```text
//!  source (sclk) ──► mclk divider ──► mclk ──► bclk divider ──► bclk ──► ws
//!                    integer + b/a           integer
//! ```
//!
//! The functions here are pure: they take the requested rate and slot layout
//! and produce a [`ClockInfo`] describing every derived frequency, or fail with
//! [`Error::InvalidArgument`] when the request cannot be met by the dividers.
//!
//! | Mode | bclk | mclk | bclk_div |
//! |------|------|------|----------|
//! | Standard/TDM master | `rate * slots * bits` | `rate * multiple` | `mclk / bclk` |
//! | Standard/TDM slave | `rate * slots * bits` | `bclk * bclk_div` | `max(requested, 8)` |
//! | PDM TX | `rate * 64 * fp / fs` | `bclk * 8` | 8 |
//! | PDM RX | `rate * 64 * (2 if 16S else 1)` | `bclk * 8` | 8 |

use crate::caps::SocCaps;
use crate::config::{ClockSource, MclkMultiple};
use crate::constants::{
    APLL_MAX_HZ, APLL_MIN_HZ, BCLK_DIV_MIN, MCLK_DIV_FRAC_MAX, MCLK_DIV_INT_MAX, PDM_BCK_FACTOR,
};
use crate::{Error, Result};

/// Fractional mclk divider: `sclk / mclk ≈ integer + numerator / denominator`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MclkDivider {
    pub integer: u32,
    pub numerator: u32,
    pub denominator: u32,
}

/// Every frequency derived for one direction of a port.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClockInfo {
    pub sample_rate_hz: u32,
    pub total_slots: u32,
    pub slot_bits: u32,
    pub source: ClockSource,
    /// Source clock frequency.
    pub sclk: u32,
    pub mclk: u32,
    /// Integer part of `sclk / mclk`.
    pub mclk_div: u32,
    pub bclk: u32,
    pub bclk_div: u32,
    pub divider: MclkDivider,
}

/// How the bit clock is obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockRole {
    /// The port generates bclk from `rate * mclk_multiple`.
    Master,
    /// bclk comes from outside; mclk is only needed to sample it.
    Slave { bclk_div: u32 },
}

/// Standard and TDM clock request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameClockRequest {
    pub sample_rate_hz: u32,
    pub total_slots: u32,
    pub slot_bits: u32,
    pub source: ClockSource,
    pub mclk_multiple: MclkMultiple,
    pub role: ClockRole,
}

/// Compute the clocks of a standard-mode channel.
pub fn calc_std(caps: &SocCaps, req: &FrameClockRequest) -> Result<ClockInfo> {
    let (bclk, mclk, bclk_div) = frame_clocks(req)?;
    ensure!(
        bclk_div > 0,
        Error::InvalidArgument,
        "mclk multiple {} is below the bclk ratio",
        u32::from(req.mclk_multiple)
    );
    finish(caps, req.source, req.sample_rate_hz, req.total_slots, req.slot_bits, bclk, mclk, bclk_div)
}

/// Compute the clocks of a TDM channel.
///
/// TDM frames can hold many slots, so `rate * multiple` may leave a bclk
/// divider the hardware cannot produce. Dividers of 2 or less are raised to 3
/// by increasing mclk.
pub fn calc_tdm(caps: &SocCaps, req: &FrameClockRequest) -> Result<ClockInfo> {
    let (bclk, mut mclk, mut bclk_div) = frame_clocks(req)?;
    if matches!(req.role, ClockRole::Master) && bclk_div <= 2 {
        bclk_div = 3;
        mclk = checked_mul(bclk, bclk_div)?;
        warn!(
            "mclk multiple too small for {} slots, mclk raised to {} ({}x sample rate)",
            req.total_slots,
            mclk,
            mclk / req.sample_rate_hz
        );
    }
    finish(caps, req.source, req.sample_rate_hz, req.total_slots, req.slot_bits, bclk, mclk, bclk_div)
}

/// Compute the clocks of a PDM transmit channel. `fp / fs` is the
/// up-sampling ratio.
pub fn calc_pdm_tx(
    caps: &SocCaps,
    sample_rate_hz: u32,
    up_sample_fp: u32,
    up_sample_fs: u32,
    source: ClockSource,
) -> Result<ClockInfo> {
    ensure!(
        sample_rate_hz > 0 && up_sample_fp > 0 && up_sample_fs > 0,
        Error::InvalidArgument,
        "pdm tx rate and up-sampling factors must be non-zero"
    );
    let bclk = u64::from(sample_rate_hz) * u64::from(PDM_BCK_FACTOR) * u64::from(up_sample_fp)
        / u64::from(up_sample_fs);
    let bclk = to_u32(bclk)?;
    let mclk = checked_mul(bclk, BCLK_DIV_MIN)?;
    finish(caps, source, sample_rate_hz, 2, 16, bclk, mclk, BCLK_DIV_MIN)
}

/// Compute the clocks of a PDM receive channel.
pub fn calc_pdm_rx(
    caps: &SocCaps,
    sample_rate_hz: u32,
    downsample_16s: bool,
    source: ClockSource,
) -> Result<ClockInfo> {
    ensure!(sample_rate_hz > 0, Error::InvalidArgument, "pdm rx rate must be non-zero");
    let factor = if downsample_16s { 2 } else { 1 };
    let bclk = checked_mul(checked_mul(sample_rate_hz, PDM_BCK_FACTOR)?, factor)?;
    let mclk = checked_mul(bclk, BCLK_DIV_MIN)?;
    finish(caps, source, sample_rate_hz, 2, 16, bclk, mclk, BCLK_DIV_MIN)
}

fn frame_clocks(req: &FrameClockRequest) -> Result<(u32, u32, u32)> {
    ensure!(
        req.sample_rate_hz > 0 && req.total_slots > 0 && req.slot_bits > 0,
        Error::InvalidArgument,
        "sample rate, slot count and slot width must be non-zero"
    );
    let slots = req.total_slots.max(2);
    let bclk = checked_mul(checked_mul(req.sample_rate_hz, slots)?, req.slot_bits)?;
    match req.role {
        ClockRole::Master => {
            let multiple = u32::from(req.mclk_multiple);
            ensure!(
                req.slot_bits != 24 || multiple % 3 == 0,
                Error::InvalidArgument,
                "24-bit slots need an mclk multiple divisible by 3, got {}",
                multiple
            );
            let mclk = checked_mul(req.sample_rate_hz, multiple)?;
            let bclk_div = mclk / bclk;
            if mclk % bclk != 0 {
                warn!(
                    "mclk {} is not an integer multiple of bclk {}, ws will drift",
                    mclk,
                    bclk
                );
            }
            Ok((bclk, mclk, bclk_div))
        }
        ClockRole::Slave { bclk_div } => {
            let bclk_div = bclk_div.max(BCLK_DIV_MIN);
            let mclk = checked_mul(bclk, bclk_div)?;
            Ok((bclk, mclk, bclk_div))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn finish(
    caps: &SocCaps,
    source: ClockSource,
    sample_rate_hz: u32,
    total_slots: u32,
    slot_bits: u32,
    bclk: u32,
    mclk: u32,
    bclk_div: u32,
) -> Result<ClockInfo> {
    ensure!(
        bclk > 0 && mclk > 0,
        Error::InvalidArgument,
        "sample rate {} gives a zero clock (bclk {}, mclk {})",
        sample_rate_hz,
        bclk,
        mclk
    );
    let sclk = source_freq(caps, source, mclk)?;
    let min_ratio = if matches!(source, ClockSource::External(_)) {
        0.99
    } else {
        1.99
    };
    ensure!(
        sclk as f32 / mclk as f32 > min_ratio,
        Error::InvalidArgument,
        "sample rate is too large, source clock {} cannot produce mclk {}",
        sclk,
        mclk
    );
    let mclk_div = sclk / mclk;
    ensure!(
        mclk_div < MCLK_DIV_INT_MAX,
        Error::InvalidArgument,
        "sample rate is too small, mclk division {} exceeds {}",
        mclk_div,
        MCLK_DIV_INT_MAX - 1
    );
    let info = ClockInfo {
        sample_rate_hz,
        total_slots,
        slot_bits,
        source,
        sclk,
        mclk,
        mclk_div,
        bclk,
        bclk_div,
        divider: mclk_divider(sclk, mclk),
    };
    debug!(
        "[sclk] {} [mclk] {} [mclk_div] {} [bclk] {} [bclk_div] {}",
        info.sclk,
        info.mclk,
        info.mclk_div,
        info.bclk,
        info.bclk_div
    );
    Ok(info)
}

/// Frequency of `source` when it has to produce `mclk`.
pub fn source_freq(caps: &SocCaps, source: ClockSource, mclk: u32) -> Result<u32> {
    match source {
        ClockSource::Pll160M => Ok(caps.default_clk_hz),
        ClockSource::Xtal => Ok(caps.xtal_clk_hz),
        ClockSource::External(hz) => {
            ensure!(hz > 0, Error::InvalidArgument, "external clock frequency must be non-zero");
            Ok(hz)
        }
        ClockSource::Apll => {
            ensure!(caps.apll, Error::InvalidArgument, "APLL is not available on this chip");
            ensure!(mclk > 0, Error::InvalidArgument, "mclk must be non-zero");
            let div = (APLL_MIN_HZ / mclk + 1).max(2);
            let freq = u64::from(mclk) * u64::from(div);
            ensure!(
                freq <= u64::from(APLL_MAX_HZ),
                Error::InvalidArgument,
                "mclk {} too high for APLL",
                mclk
            );
            Ok(freq as u32)
        }
    }
}

/// Closest `integer + numerator / denominator` to `sclk / mclk` that the
/// fractional divider can represent.
pub fn mclk_divider(sclk: u32, mclk: u32) -> MclkDivider {
    let exact = MclkDivider {
        integer: sclk / mclk.max(1),
        numerator: 0,
        denominator: 1,
    };
    if mclk == 0 {
        return exact;
    }
    let mclk64 = u64::from(mclk);
    let freq_diff = u64::from(sclk) - u64::from(exact.integer) * mclk64;
    if freq_diff == 0 {
        return exact;
    }
    let decimal = freq_diff as f32 / mclk as f32;
    if decimal > 125.0 / 126.0 {
        return MclkDivider {
            integer: exact.integer + 1,
            ..exact
        };
    }

    let mut best = (u64::MAX, 0, 1);
    for a in 2..=MCLK_DIV_FRAC_MAX {
        let b = libm::floorf(a as f32 * decimal + 0.5) as u32;
        let ma = freq_diff * u64::from(a);
        let mb = mclk64 * u64::from(b);
        if ma == mb {
            best = (0, b, a);
            break;
        }
        let diff = ma.abs_diff(mb);
        if diff < best.0 {
            best = (diff, b, a);
        }
    }
    MclkDivider {
        integer: exact.integer,
        numerator: best.1,
        denominator: best.2,
    }
}

fn checked_mul(a: u32, b: u32) -> Result<u32> {
    a.checked_mul(b).ok_or_else(|| {
        error!("clock frequency overflow ({} * {})", a, b);
        Error::InvalidArgument
    })
}

fn to_u32(v: u64) -> Result<u32> {
    u32::try_from(v).map_err(|_| {
        error!("clock frequency overflow ({})", v);
        Error::InvalidArgument
    })
}
