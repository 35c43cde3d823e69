//! Error types for BioemuS driver operations

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for driver operations
pub type Result<T> = std::result::Result<T, BioemusError>;

/// Errors that can occur while driving the emulator
#[derive(Debug, Error)]
pub enum BioemusError {
    /// Device file not found at the expected path
    #[error("Device not found: {path}")]
    DeviceNotFound {
        /// Path that was checked
        path: PathBuf,
    },

    /// I/O error during device communication
    #[error("I/O error: {source}")]
    Io {
        /// Underlying I/O error
        #[from]
        source: std::io::Error,
    },

    /// Memory mapping of a device region failed
    #[error("Failed to map {what}: {reason}")]
    MapFailed {
        /// Region being mapped
        what: String,
        /// Reason for failure
        reason: String,
    },

    /// Register index outside the window
    #[error("Register index {index} out of range (limit {limit})")]
    RegisterOutOfRange {
        /// Requested index
        index: u16,
        /// First invalid index
        limit: u16,
    },

    /// Malformed hardware configuration file
    #[error("Configuration error at line {line}: {reason}")]
    Config {
        /// 1-based line number (0 when not tied to a line)
        line: usize,
        /// What is wrong
        reason: String,
    },

    /// Hardware never acknowledged a handshake write
    #[error(
        "Handshake timeout on register {register}: expected {expected}, last read {last} after {elapsed:?}"
    )]
    HandshakeTimeout {
        /// Acknowledgement register polled
        register: u16,
        /// Value waited for
        expected: u32,
        /// Last value observed
        last: u32,
        /// Time spent polling
        elapsed: Duration,
    },

    /// DMA transfer completed with a non-ok status
    #[error("Transfer failed: {reason}")]
    TransferFailed {
        /// Reason for failure
        reason: String,
    },

    /// Slot accessed while owned by the driver, or out of range
    #[error("Slot {slot} misuse: {reason}")]
    SlotMisuse {
        /// Slot index
        slot: usize,
        /// What was attempted
        reason: String,
    },

    /// Invalid argument
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Reason
        reason: String,
    },

    /// Component is in an invalid state for the request
    #[error("Invalid state: {state}")]
    InvalidState {
        /// Current state description
        state: String,
    },

    /// Requested feature is not available
    #[error("Unsupported: {feature}")]
    Unsupported {
        /// Feature description
        feature: String,
    },

    /// Hardware geometry inconsistent
    #[error("Geometry error: {source}")]
    Geometry {
        /// Underlying geometry error
        #[from]
        source: bioemus_hw::GeometryError,
    },

    /// Message bus failure
    #[error("Message bus error: {source}")]
    Bus {
        /// Underlying ZeroMQ error
        #[from]
        source: zmq::Error,
    },

    /// Message bus endpoint closed
    #[error("Message bus disconnected: {endpoint}")]
    BusDisconnected {
        /// Endpoint description
        endpoint: String,
    },
}

impl BioemusError {
    /// Create a device not found error
    pub fn device_not_found(path: impl Into<PathBuf>) -> Self {
        Self::DeviceNotFound { path: path.into() }
    }

    /// Create a mapping failure error
    pub fn map_failed(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::MapFailed {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a configuration error for a 1-based line
    pub fn config(line: usize, reason: impl Into<String>) -> Self {
        Self::Config {
            line,
            reason: reason.into(),
        }
    }

    /// Create a transfer failed error
    pub fn transfer_failed(reason: impl Into<String>) -> Self {
        Self::TransferFailed {
            reason: reason.into(),
        }
    }

    /// Create a slot misuse error
    pub fn slot_misuse(slot: usize, reason: impl Into<String>) -> Self {
        Self::SlotMisuse {
            slot,
            reason: reason.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create an invalid state error
    pub fn invalid_state(state: impl Into<String>) -> Self {
        Self::InvalidState {
            state: state.into(),
        }
    }

    /// Create an unsupported feature error
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported {
            feature: feature.into(),
        }
    }
}
