//! USB serial port engine
//!
//! Exposes a byte-stream interface over USB serial bridge chips: a generic
//! CDC/ACM class driver and the CP210x, FTDI and PL2303 vendor protocols.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use common::test_utils::MockUsbDevice;
//! use protocol::DriverKind;
//! use serial::{PortSettings, SerialDevice};
//!
//! let mock = MockUsbDevice::cp21xx();
//! let device = SerialDevice::new(Arc::new(mock.clone()), DriverKind::Cp21xx, PortSettings::default());
//! let port = &device.ports()[0];
//!
//! port.open().unwrap();
//! port.write(b"AT\r\n", Duration::from_millis(100)).unwrap();
//! assert_eq!(mock.written(), b"AT\r\n");
//! assert!(device.close().is_empty());
//! ```

pub mod config;
pub mod device;
mod driver;
pub mod port;
pub mod ring_buffer;
pub mod usb;

pub use config::SerialConfig;
pub use device::SerialDevice;
pub use port::{PortSettings, PortState, PortStats, SerialPort};
pub use ring_buffer::RingBuffer;
