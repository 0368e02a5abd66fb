//! Error types.
//!
//! Every mutating operation in the driver returns [`Result`]. The variants map
//! one-to-one onto the failure classes a caller has to tell apart:
//!
//! | Variant | Meaning | Caller action |
//! |---------|---------|---------------|
//! | [`Error::InvalidArgument`] | malformed config, port out of range, bad GPIO | fix the call |
//! | [`Error::InvalidState`] | operation not valid in the channel's current state | reorder calls |
//! | [`Error::NotFound`] | no free port or direction slot | retry or pick another port |
//! | [`Error::NoMemory`] | DMA buffers, descriptors or queues could not be allocated | free memory |
//! | [`Error::TimedOut`] | mutex or completion-queue wait expired | inspect `transferred` |

use core::fmt;

/// Driver error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// An argument or configuration value is out of range or inconsistent.
    InvalidArgument,
    /// The operation is not permitted in the current channel state.
    InvalidState,
    /// No free port or channel slot was found.
    NotFound,
    /// DMA-capable memory or a queue could not be allocated.
    NoMemory,
    /// A bounded wait expired.
    ///
    /// `transferred` holds the number of bytes moved before the wait expired;
    /// those bytes are not lost and the channel remains usable.
    TimedOut {
        /// Bytes copied into or out of the DMA ring before the timeout.
        transferred: usize,
    },
}

impl Error {
    /// Bytes transferred before the error occurred (non-zero only for timeouts).
    pub fn transferred(&self) -> usize {
        match self {
            Error::TimedOut { transferred } => *transferred,
            _ => 0,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::InvalidState => write!(f, "operation invalid in the current channel state"),
            Error::NotFound => write!(f, "no free I2S port or channel found"),
            Error::NoMemory => write!(f, "out of DMA-capable memory"),
            Error::TimedOut { transferred } => {
                write!(f, "timed out after transferring {transferred} bytes")
            }
        }
    }
}

impl core::error::Error for Error {}

/// Errors returned by the platform occupancy table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OccupationError {
    /// The port index is beyond the number of physical ports.
    InvalidPort,
    /// The port is already claimed; carries the current owner's name.
    AlreadyOwned(&'static str),
    /// A driver controller is still bound to the port.
    StillBound,
}

impl fmt::Display for OccupationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OccupationError::InvalidPort => write!(f, "port index out of range"),
            OccupationError::AlreadyOwned(owner) => write!(f, "port already owned by {owner}"),
            OccupationError::StillBound => {
                write!(f, "a driver controller is still bound to the port")
            }
        }
    }
}

impl core::error::Error for OccupationError {}

impl From<OccupationError> for Error {
    fn from(value: OccupationError) -> Self {
        match value {
            OccupationError::InvalidPort => Error::InvalidArgument,
            OccupationError::AlreadyOwned(_) => Error::NotFound,
            OccupationError::StillBound => Error::InvalidState,
        }
    }
}

/// Result alias used throughout the driver.
pub type Result<T> = core::result::Result<T, Error>;
