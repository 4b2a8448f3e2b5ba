//! Error types for the ME driver engine.
//!
//! Every public operation returns [`Result`]. Validation errors are raised
//! before any hardware or subdevice state is touched; state-transition errors
//! leave the subdevice unchanged; hardware faults are surfaced to the caller
//! without internal retry.

use thiserror::Error;

use crate::types::SubdeviceState;

/// Result type alias for driver operations.
pub type Result<T> = std::result::Result<T, MeError>;

/// Errors that can occur when operating the streaming engine.
#[derive(Error, Debug)]
pub enum MeError {
    /// Subdevice index out of range for this device
    #[error("Invalid subdevice {subdevice}: device has {count} subdevices")]
    InvalidSubdevice { subdevice: u32, count: u32 },

    /// Channel index out of range for the subdevice
    #[error("Invalid channel {channel}: subdevice {subdevice} has {max} channels")]
    InvalidChannel {
        subdevice: u32,
        channel: u32,
        max: u32,
    },

    /// Malformed argument (bad count, zero capacity, unknown flag, ...)
    #[error("Invalid parameter: {message}")]
    InvalidParameter { message: String },

    /// Unsupported or incomplete trigger combination
    #[error("Invalid trigger: {message}")]
    InvalidTrigger { message: String },

    /// Operation not valid for the subdevice's current state
    #[error("Subdevice {subdevice} is {state:?}: {message}")]
    InvalidState {
        subdevice: u32,
        state: SubdeviceState,
        message: String,
    },

    /// Subdevice is already armed or running
    #[error("Subdevice {subdevice} is already running")]
    AlreadyRunning { subdevice: u32 },

    /// Subdevice is not running
    #[error("Subdevice {subdevice} is not running")]
    NotRunning { subdevice: u32 },

    /// Blocking call exceeded its deadline; the caller may retry
    #[error("Operation timed out")]
    Timeout,

    /// A blocked call was cancelled by an explicit stop
    #[error("Operation aborted: subdevice {subdevice} was stopped")]
    Aborted { subdevice: u32 },

    /// Hardware produced samples faster than the buffer could absorb them
    #[error("Buffer overflow on subdevice {subdevice}")]
    BufferOverflow { subdevice: u32 },

    /// Register or bus access failure reported by the backend
    #[error("Hardware fault: {message}")]
    Hardware { message: String },

    /// Operation not implemented by this backend
    #[error("Operation not supported: {message}")]
    NotSupported { message: String },

    /// Device configuration could not be read or parsed
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl MeError {
    /// True for outcomes a caller can retry without reconfiguring.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout | Self::BufferOverflow { .. })
    }

    /// True if the error reports a cancelled blocking call.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    pub(crate) fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_trigger(message: impl Into<String>) -> Self {
        Self::InvalidTrigger {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(
        subdevice: u32,
        state: SubdeviceState,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            subdevice,
            state,
            message: message.into(),
        }
    }

    pub(crate) fn hardware(message: impl Into<String>) -> Self {
        Self::Hardware {
            message: message.into(),
        }
    }
}
