//! Error types for the MIDI packet multiplexer

use thiserror::Error;

use crate::core::Direction;

/// Result type for multiplexer operations
pub type Result<T> = std::result::Result<T, MuxError>;

/// Errors raised by the multiplexer.
///
/// The data path never propagates these: decoders and encoders turn them into a
/// log line and a counter and carry on. Only setup-time calls return them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MuxError {
    /// A bounded buffer or FIFO had no room for another byte
    #[error("Buffer full: capacity {capacity} bytes")]
    BufferFull { capacity: usize },

    /// Port index outside the range of the active device family
    #[error("Invalid {direction} port {port} (device has {count})")]
    InvalidPort {
        port: usize,
        direction: Direction,
        count: usize,
    },

    /// Device identification did not match any known family
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// The transport refused a submission
    #[error("Submit rejected: {0}")]
    SubmitRejected(String),

    /// Session configuration error
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl MuxError {
    /// Create a new BufferFull error
    pub fn buffer_full(capacity: usize) -> Self {
        MuxError::BufferFull { capacity }
    }

    /// Create a new InvalidPort error
    pub fn invalid_port(port: usize, direction: Direction, count: usize) -> Self {
        MuxError::InvalidPort {
            port,
            direction,
            count,
        }
    }

    /// Create a new UnsupportedDevice error
    pub fn unsupported_device(msg: impl Into<String>) -> Self {
        MuxError::UnsupportedDevice(msg.into())
    }

    /// Create a new SubmitRejected error
    pub fn submit_rejected(msg: impl Into<String>) -> Self {
        MuxError::SubmitRejected(msg.into())
    }

    /// Create a new InvalidConfig error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        MuxError::InvalidConfig(msg.into())
    }
}
