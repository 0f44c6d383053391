//! Protocol error types

use crate::types::{Parity, StopBits};
use thiserror::Error;

/// Errors raised while encoding or decoding chip-level messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Data bits outside 5..=8
    #[error("Invalid data bits: {0} (expected 5-8)")]
    InvalidDataBits(u8),

    /// Baud rate the chip cannot be programmed with
    #[error("Invalid baud rate: {0}")]
    InvalidBaudRate(u32),

    /// Parity mode the chip family does not implement
    #[error("Unsupported parity {parity:?} for {driver}")]
    UnsupportedParity {
        driver: &'static str,
        parity: Parity,
    },

    /// Stop bits setting the chip family does not implement
    #[error("Unsupported stop bits {stop_bits:?} for {driver}")]
    UnsupportedStopBits {
        driver: &'static str,
        stop_bits: StopBits,
    },

    /// Bulk read shorter than the per-packet status header
    #[error("Short status header: expected at least {expected} bytes, got {actual}")]
    ShortStatusHeader { expected: usize, actual: usize },

    /// Interrupt status buffer of unexpected size
    #[error("Invalid status buffer: expected {expected} bytes, got {actual}")]
    InvalidStatusBuffer { expected: usize, actual: usize },

    /// Driver name not recognised
    #[error("Unknown driver: {0}")]
    UnknownDriver(String),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::ShortStatusHeader {
            expected: 2,
            actual: 1,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Short status header"));
        assert!(msg.contains("expected at least 2"));

        let err = ProtocolError::UnsupportedParity {
            driver: "cp21xx",
            parity: Parity::Space,
        };
        assert!(err.to_string().contains("Space"));
        assert!(err.to_string().contains("cp21xx"));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(
            ProtocolError::InvalidDataBits(9),
            ProtocolError::InvalidDataBits(9)
        );
        assert_ne!(
            ProtocolError::InvalidBaudRate(0),
            ProtocolError::InvalidBaudRate(1)
        );
    }
}
