//! Wire vocabulary for USB serial bridge chips
//!
//! This crate defines the serial framing types shared by every chip variant
//! and the pure encoders/decoders for each chip's control-transfer
//! vocabulary. Nothing here performs I/O; the port engine feeds the encoded
//! values into control and bulk transfers.
//!
//! # Example
//!
//! ```
//! use protocol::{LineConfig, cp21xx, ftdi};
//!
//! let config = LineConfig::default();
//! let (divisor, control) = cp21xx::encode_line_config(&config).unwrap();
//! assert_eq!(divisor, 0x180);
//! assert_eq!(control, 0x0800);
//!
//! let div = ftdi::convert_baud_rate(9600, ftdi::FtdiChip::R, 0).unwrap();
//! assert_eq!((div.value, div.index), (0x4138, 0));
//! ```

pub mod cdc;
pub mod cp21xx;
pub mod error;
pub mod ftdi;
pub mod prolific;
pub mod types;

pub use error::{ProtocolError, Result};
pub use types::{DEFAULT_BAUD_RATE, DataBits, DriverKind, LineConfig, Parity, StopBits};
