//! Blocking transfers on a rusb device handle

use common::{TransferError, UsbHandle};
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// Opened rusb device
///
/// Dropping it closes the device, which also releases any interface still
/// claimed.
pub struct RusbHandle {
    handle: DeviceHandle<Context>,
}

impl RusbHandle {
    pub(crate) fn new(handle: DeviceHandle<Context>) -> Self {
        Self { handle }
    }

    fn detach_kernel_driver(&mut self, interface: u8) {
        match self.handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {}", interface);
                if let Err(e) = self.handle.detach_kernel_driver(interface) {
                    warn!(
                        "Failed to detach kernel driver from interface {}: {}",
                        interface, e
                    );
                }
            }
            Ok(false) => debug!("No kernel driver active on interface {}", interface),
            Err(e) => debug!(
                "Could not check kernel driver status for interface {}: {}",
                interface, e
            ),
        }
    }
}

impl UsbHandle for RusbHandle {
    fn claim_interface(&mut self, interface: u8, force: bool) -> Result<(), TransferError> {
        if force {
            self.detach_kernel_driver(interface);
        }
        self.handle
            .claim_interface(interface)
            .map_err(map_rusb_error)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), TransferError> {
        self.handle
            .release_interface(interface)
            .map_err(map_rusb_error)
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.handle
            .read_bulk(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn write_bulk(
        &self,
        endpoint: u8,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.handle
            .write_bulk(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.handle
            .read_interrupt(endpoint, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.handle
            .read_control(request_type, request, value, index, buf, timeout)
            .map_err(map_rusb_error)
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.handle
            .write_control(request_type, request, value, index, buf, timeout)
            .map_err(map_rusb_error)
    }
}

/// Map rusb errors onto the transfer error vocabulary
pub fn map_rusb_error(err: rusb::Error) -> TransferError {
    match err {
        rusb::Error::Timeout => TransferError::Timeout,
        rusb::Error::Pipe => TransferError::Pipe,
        rusb::Error::NoDevice => TransferError::NoDevice,
        rusb::Error::NotFound => TransferError::NotFound,
        rusb::Error::Busy => TransferError::Busy,
        rusb::Error::Overflow => TransferError::Overflow,
        rusb::Error::Io => TransferError::Io,
        rusb::Error::InvalidParam => TransferError::InvalidParam,
        rusb::Error::Access => TransferError::Access,
        _ => TransferError::Other(err.to_string()),
    }
}
