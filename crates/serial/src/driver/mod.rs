//! Chip protocol variants
//!
//! Every variant sits on a [`Link`]: one opened device handle, the
//! interfaces claimed on it, and the bulk endpoint pair the port engine
//! reads from and writes to. Variants differ only in the control traffic
//! they issue on top of it. The set of variants is closed, so dispatch goes
//! through the [`Driver`] enum.

mod cdc_acm;
mod cp21xx;
mod ftdi;
mod prolific;

pub(crate) use cdc_acm::CdcAcmDriver;
pub(crate) use cp21xx::Cp21xxDriver;
pub(crate) use ftdi::FtdiDriver;
pub(crate) use prolific::ProlificDriver;

use common::{
    DeviceInfo, Direction, EndpointInfo, EndpointKind, Error, InterfaceInfo, Result,
    TransferError, UsbDevice, UsbHandle,
};
use protocol::{DriverKind, LineConfig};
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for control transfers
pub(crate) const CONTROL_TIMEOUT: Duration = Duration::from_millis(5000);

/// Claimed device handle plus the data endpoints of one port
pub(crate) struct Link {
    usb: Arc<dyn UsbHandle>,
    claimed: Vec<u8>,
    read_endpoint: EndpointInfo,
    write_endpoint: EndpointInfo,
}

impl Link {
    pub(crate) fn usb(&self) -> &Arc<dyn UsbHandle> {
        &self.usb
    }

    pub(crate) fn read_endpoint(&self) -> EndpointInfo {
        self.read_endpoint
    }

    #[cfg(test)]
    pub(crate) fn write_endpoint(&self) -> EndpointInfo {
        self.write_endpoint
    }

    /// Control transfer without a data stage or with an OUT payload
    pub(crate) fn control_out(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<()> {
        let sent = self
            .usb
            .write_control(request_type, request, value, index, data, CONTROL_TIMEOUT)?;
        if sent != data.len() {
            return Err(Error::Usb(TransferError::ShortTransfer {
                expected: data.len(),
                actual: sent,
            }));
        }
        Ok(())
    }

    /// Control transfer reading exactly `length` bytes
    pub(crate) fn control_in(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        length: usize,
    ) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; length];
        let received = self
            .usb
            .read_control(request_type, request, value, index, &mut buf, CONTROL_TIMEOUT)?;
        if received != length {
            return Err(Error::Usb(TransferError::ShortTransfer {
                expected: length,
                actual: received,
            }));
        }
        Ok(buf)
    }

    /// Bulk read from the data IN endpoint; a timeout yields zero bytes
    pub(crate) fn read_bulk(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match self.usb.read_bulk(self.read_endpoint.address, buf, timeout) {
            Ok(n) => Ok(n),
            Err(TransferError::Timeout) => Ok(0),
            Err(e) => Err(Error::Usb(e)),
        }
    }

    /// Bulk write to the data OUT endpoint
    pub(crate) fn write_bulk(
        &self,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransferError> {
        self.usb.write_bulk(self.write_endpoint.address, data, timeout)
    }

    /// Release claimed interfaces and drop the handle
    ///
    /// Needs the only reference to the handle. If a transfer is still
    /// holding one, the interfaces go away when the last reference closes
    /// the device.
    pub(crate) fn release(self) {
        let Link {
            mut usb, claimed, ..
        } = self;

        match Arc::get_mut(&mut usb) {
            Some(handle) => {
                for interface in claimed.iter().rev() {
                    match handle.release_interface(*interface) {
                        Ok(()) => debug!("Released interface {}", interface),
                        Err(e) => warn!("Failed to release interface {}: {}", interface, e),
                    }
                }
            }
            None => warn!(
                "Device handle still in use, interfaces {:?} released on close",
                claimed
            ),
        }
    }
}

/// Exclusive access to a freshly opened handle while interfaces are claimed
pub(crate) struct Claimer {
    handle: Box<dyn UsbHandle>,
    claimed: Vec<u8>,
}

impl Claimer {
    pub(crate) fn new(handle: Box<dyn UsbHandle>) -> Self {
        Self {
            handle,
            claimed: Vec::new(),
        }
    }

    /// Claim an interface, detaching a kernel driver if one is bound
    ///
    /// On failure everything claimed so far is released again.
    pub(crate) fn claim(&mut self, interface: u8) -> Result<()> {
        match self.handle.claim_interface(interface, true) {
            Ok(()) => {
                debug!("Claimed interface {}", interface);
                self.claimed.push(interface);
                Ok(())
            }
            Err(source) => {
                warn!("Failed to claim interface {}: {}", interface, source);
                for claimed in self.claimed.drain(..).rev() {
                    if let Err(e) = self.handle.release_interface(claimed) {
                        warn!("Failed to release interface {}: {}", claimed, e);
                    }
                }
                Err(Error::ClaimInterface { interface, source })
            }
        }
    }

    pub(crate) fn into_link(self, read_endpoint: EndpointInfo, write_endpoint: EndpointInfo) -> Link {
        Link {
            usb: Arc::from(self.handle),
            claimed: self.claimed,
            read_endpoint,
            write_endpoint,
        }
    }
}

/// Interface at a position in the descriptor list
pub(crate) fn interface_at(info: &DeviceInfo, position: usize) -> Result<&InterfaceInfo> {
    info.interfaces
        .get(position)
        .ok_or(Error::MissingInterface(position as u8))
}

/// Bulk IN and bulk OUT endpoints of an interface
pub(crate) fn bulk_pair(interface: &InterfaceInfo) -> Result<(EndpointInfo, EndpointInfo)> {
    let read = interface
        .find_endpoint(Direction::In, EndpointKind::Bulk)
        .ok_or(Error::MissingEndpoint {
            interface: interface.number,
            what: "bulk IN",
        })?;
    let write = interface
        .find_endpoint(Direction::Out, EndpointKind::Bulk)
        .ok_or(Error::MissingEndpoint {
            interface: interface.number,
            what: "bulk OUT",
        })?;
    Ok((read, write))
}

/// Operations every chip variant provides
///
/// Line-state getters for signals a variant cannot observe report `false`.
pub(crate) trait SerialDriver: Send + Sync {
    fn link(&self) -> &Link;

    /// Chip bring-up after the interfaces are claimed
    fn initialize(&self) -> Result<()>;

    /// Program baud rate and framing
    ///
    /// Parameters are validated before any transfer is issued.
    fn set_parameters(&self, config: &LineConfig) -> Result<()>;

    /// One read from the data IN endpoint with chip framing removed
    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.link().read_bulk(buf, timeout)
    }

    fn cd(&self) -> Result<bool> {
        Ok(false)
    }

    fn cts(&self) -> Result<bool> {
        Ok(false)
    }

    fn dsr(&self) -> Result<bool> {
        Ok(false)
    }

    fn ri(&self) -> Result<bool> {
        Ok(false)
    }

    fn dtr(&self) -> Result<bool>;

    fn rts(&self) -> Result<bool>;

    fn set_dtr(&self, value: bool) -> Result<()>;

    fn set_rts(&self, value: bool) -> Result<()>;

    /// Flush chip FIFOs; `false` when the chip has no such command
    fn purge_buffers(&self, _read: bool, _write: bool) -> Result<bool> {
        Ok(false)
    }

    fn send_break(&self, _duration_ms: u16) -> Result<()> {
        Err(Error::Unsupported("break signalling"))
    }

    /// Variant teardown before the interfaces are released
    fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// The closed set of chip variants
pub(crate) enum Driver {
    CdcAcm(CdcAcmDriver),
    Cp21xx(Cp21xxDriver),
    Ftdi(FtdiDriver),
    Prolific(ProlificDriver),
}

impl Driver {
    /// Open the device and claim what port `port_number` of `kind` needs
    pub(crate) fn attach(kind: DriverKind, device: &dyn UsbDevice, port_number: u8) -> Result<Self> {
        let info = device.info();
        let handle = device.open().map_err(|e| {
            warn!("Failed to open device {}: {}", info, e);
            Error::Usb(e)
        })?;
        debug!("Opened device {} for {} port {}", info, kind, port_number);

        let driver = match kind {
            DriverKind::CdcAcm => Driver::CdcAcm(CdcAcmDriver::attach(info, port_number, handle)?),
            DriverKind::Cp21xx => Driver::Cp21xx(Cp21xxDriver::attach(info, port_number, handle)?),
            DriverKind::Ftdi => Driver::Ftdi(FtdiDriver::attach(info, port_number, handle)?),
            DriverKind::Prolific => {
                Driver::Prolific(ProlificDriver::attach(info, port_number, handle)?)
            }
        };
        Ok(driver)
    }

    #[cfg(test)]
    pub(crate) fn kind(&self) -> DriverKind {
        match self {
            Driver::CdcAcm(_) => DriverKind::CdcAcm,
            Driver::Cp21xx(_) => DriverKind::Cp21xx,
            Driver::Ftdi(_) => DriverKind::Ftdi,
            Driver::Prolific(_) => DriverKind::Prolific,
        }
    }

    /// Release the interfaces and close the handle
    pub(crate) fn detach(self) {
        let link = match self {
            Driver::CdcAcm(d) => d.into_link(),
            Driver::Cp21xx(d) => d.into_link(),
            Driver::Ftdi(d) => d.into_link(),
            Driver::Prolific(d) => d.into_link(),
        };
        link.release();
    }
}

impl Deref for Driver {
    type Target = dyn SerialDriver;

    fn deref(&self) -> &Self::Target {
        match self {
            Driver::CdcAcm(d) => d,
            Driver::Cp21xx(d) => d,
            Driver::Ftdi(d) => d,
            Driver::Prolific(d) => d,
        }
    }
}
