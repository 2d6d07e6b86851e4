//! # Error Module
//!
//! This module provides custom error types for the `serial_lines` crate.
//! It uses the `thiserror` crate for ergonomic error handling.

use thiserror::Error;

/// Result type alias for `serial_lines` operations.
pub type Result<T> = std::result::Result<T, SerialLinesError>;

/// Main error type for the `serial_lines` crate.
#[derive(Debug, Error)]
pub enum SerialLinesError {
    /// Serial port operation failed.
    #[error("Serial port error: {0}")]
    SerialPort(String),

    /// No serial port matched the discovery rules.
    #[error("Couldn't find serial port matching '{pattern}'")]
    PortNotFound { pattern: String },

    /// Failed to open serial port.
    #[error("Failed to open serial port '{port_name}': {reason}")]
    PortOpen { port_name: String, reason: String },

    /// Failed to read from serial port.
    #[error("Failed to read from serial port: {0}")]
    PortRead(String),

    /// Failed to write to serial port.
    #[error("Failed to write to serial port: {0}")]
    PortWrite(String),

    /// Channel communication error.
    #[error("Channel communication error: {0}")]
    Channel(String),

    /// File I/O error.
    #[error("File I/O error: {0}")]
    FileIo(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SerialLinesError {
    /// Creates a new serial port error.
    #[must_use]
    pub fn serial_port(msg: impl Into<String>) -> Self {
        Self::SerialPort(msg.into())
    }

    /// Creates a new port not found error.
    #[must_use]
    pub fn port_not_found(pattern: impl Into<String>) -> Self {
        Self::PortNotFound {
            pattern: pattern.into(),
        }
    }

    /// Creates a new port open error.
    #[must_use]
    pub fn port_open(port_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PortOpen {
            port_name: port_name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new port read error.
    #[must_use]
    pub fn port_read(msg: impl Into<String>) -> Self {
        Self::PortRead(msg.into())
    }

    /// Creates a new port write error.
    #[must_use]
    pub fn port_write(msg: impl Into<String>) -> Self {
        Self::PortWrite(msg.into())
    }

    /// Creates a new channel error.
    #[must_use]
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Creates a new invalid configuration error.
    #[must_use]
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
