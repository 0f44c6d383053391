//! Common error types

use crate::usb_types::TransferError;
use protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Port is not open")]
    NotOpen,

    #[error("Port is already open")]
    AlreadyOpen,

    #[error("USB error: {0}")]
    Usb(#[from] TransferError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Could not claim interface {interface}: {source}")]
    ClaimInterface {
        interface: u8,
        #[source]
        source: TransferError,
    },

    #[error("Interface {0} not present on device")]
    MissingInterface(u8),

    #[error("No {what} endpoint on interface {interface}")]
    MissingEndpoint { interface: u8, what: &'static str },

    #[error("Error writing {attempted} bytes at offset {offset} length={length}: {reason}")]
    Write {
        attempted: usize,
        offset: usize,
        length: usize,
        reason: String,
    },

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a failure of the background read loop should stop it
    ///
    /// Protocol violations and a vanished device end the loop; any other
    /// transfer error is reported and the next read cycle proceeds.
    pub fn is_fatal_read(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Usb(TransferError::NoDevice)
        )
    }

    /// Configuration errors raised before any hardware was touched
    pub fn is_argument_error(&self) -> bool {
        match self {
            Error::InvalidArgument(_) => true,
            Error::Protocol(e) => !matches!(
                e,
                ProtocolError::ShortStatusHeader { .. } | ProtocolError::InvalidStatusBuffer { .. }
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_read_classification() {
        let violation = Error::Protocol(ProtocolError::ShortStatusHeader {
            expected: 2,
            actual: 0,
        });
        assert!(violation.is_fatal_read());
        assert!(Error::Usb(TransferError::NoDevice).is_fatal_read());
        assert!(!Error::Usb(TransferError::Timeout).is_fatal_read());
        assert!(!Error::Usb(TransferError::Pipe).is_fatal_read());
    }

    #[test]
    fn test_argument_classification() {
        assert!(Error::Protocol(ProtocolError::InvalidDataBits(9)).is_argument_error());
        assert!(Error::InvalidArgument("x".into()).is_argument_error());
        assert!(
            !Error::Protocol(ProtocolError::InvalidStatusBuffer {
                expected: 10,
                actual: 3
            })
            .is_argument_error()
        );
        assert!(!Error::NotOpen.is_argument_error());
    }

    #[test]
    fn test_write_error_display() {
        let err = Error::Write {
            attempted: 64,
            offset: 128,
            length: 300,
            reason: "transfer timed out".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("64 bytes"));
        assert!(msg.contains("offset 128"));
        assert!(msg.contains("length=300"));
    }
}
