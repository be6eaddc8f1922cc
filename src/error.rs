//! Error types for the sensor poller
//!
//! Errors fall into two groups:
//!
//! - **Fatal**: the serial link or the direction line is unusable
//!   (`Io`, `Connection`, `Direction`, `Timeout`, `Config`, `InvalidData`).
//!   The poll loop stops and reports the error.
//! - **Per-frame**: the device answered but the answer cannot be used
//!   (`Frame`, `Exception`). The frame is discarded and the next cycle runs
//!   on schedule.
//!
//! An empty read is not an error at all; it is reported as "no response".

use thiserror::Error;

use crate::constants;

/// Result type used across the crate
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors raised while exchanging frames with a sensor
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// Serial read or write failure
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serial port could not be opened
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Direction-control line could not be driven
    #[error("Direction line error: {message}")]
    Direction { message: String },

    /// An operation did not complete in time
    #[error("Timeout during {operation} after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Response bytes were received but do not form a valid frame
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// The device replied with a Modbus exception response
    #[error("Modbus exception: function 0x{function:02X}, code 0x{code:02X}")]
    Exception { function: u8, code: u8 },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Invalid argument supplied by the caller
    #[error("Invalid data: {message}")]
    InvalidData { message: String },
}

impl ModbusError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn direction(message: impl Into<String>) -> Self {
        Self::Direction {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    pub fn frame(message: impl Into<String>) -> Self {
        Self::Frame {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData {
            message: message.into(),
        }
    }

    /// Whether the poll loop must stop on this error.
    ///
    /// Malformed frames and exception replies only affect the current cycle.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Frame { .. } | Self::Exception { .. })
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

/// Human-readable name of a Modbus exception code
pub fn exception_description(code: u8) -> &'static str {
    match code {
        constants::EXCEPTION_ILLEGAL_FUNCTION => "Illegal Function",
        constants::EXCEPTION_ILLEGAL_DATA_ADDRESS => "Illegal Data Address",
        constants::EXCEPTION_ILLEGAL_DATA_VALUE => "Illegal Data Value",
        constants::EXCEPTION_SERVER_DEVICE_FAILURE => "Server Device Failure",
        constants::EXCEPTION_ACKNOWLEDGE => "Acknowledge",
        constants::EXCEPTION_SERVER_DEVICE_BUSY => "Server Device Busy",
        constants::EXCEPTION_MEMORY_PARITY_ERROR => "Memory Parity Error",
        constants::EXCEPTION_GATEWAY_PATH_UNAVAILABLE => "Gateway Path Unavailable",
        constants::EXCEPTION_GATEWAY_TARGET_FAILED => "Gateway Target Device Failed to Respond",
        _ => "Unknown Exception",
    }
}
