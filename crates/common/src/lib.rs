//! Common utilities for usb-serial
//!
//! This crate provides shared functionality between the protocol encoders
//! and the port engine: the USB transfer adapter contract, error handling,
//! logging setup, the port event channel, and a scripted mock device for
//! tests.

pub mod channel;
pub mod error;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod usb_types;

pub use channel::{DEFAULT_EVENT_CAPACITY, EventListeners, PortEvent, PortId, lock};
pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb_types::{
    DIRECTION_IN, DeviceInfo, Direction, EndpointInfo, EndpointKind, InterfaceInfo, TransferError,
    UsbDevice, UsbHandle,
};
