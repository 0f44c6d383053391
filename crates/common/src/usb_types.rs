//! USB transfer adapter contract
//!
//! The port engine never talks to a USB stack directly. It consumes the
//! capabilities below: open a device, claim/release interfaces, and run
//! blocking bulk, interrupt and control transfers with a timeout. The
//! `serial` crate provides an implementation on top of `rusb`; tests use
//! `MockUsbDevice` from the `test-utils` feature.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Endpoint direction bit in an endpoint address / bmRequestType
pub const DIRECTION_IN: u8 = 0x80;

/// Transfer-level failure reported by the USB stack
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("transfer timed out")]
    Timeout,
    #[error("endpoint stalled")]
    Pipe,
    #[error("device disconnected")]
    NoDevice,
    #[error("entity not found")]
    NotFound,
    #[error("resource busy")]
    Busy,
    #[error("transfer overflow")]
    Overflow,
    #[error("input/output error")]
    Io,
    #[error("invalid parameter")]
    InvalidParam,
    #[error("access denied")]
    Access,
    #[error("short transfer: expected {expected} bytes, got {actual}")]
    ShortTransfer { expected: usize, actual: usize },
    #[error("{0}")]
    Other(String),
}

/// Endpoint direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// Cached endpoint descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Endpoint address including the direction bit
    pub address: u8,
    pub kind: EndpointKind,
    pub max_packet_size: u16,
}

impl EndpointInfo {
    pub fn new(address: u8, kind: EndpointKind, max_packet_size: u16) -> Self {
        Self {
            address,
            kind,
            max_packet_size,
        }
    }

    pub fn direction(&self) -> Direction {
        if self.address & DIRECTION_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Cached interface descriptor (first alternate setting)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub class: u8,
    pub endpoints: Vec<EndpointInfo>,
}

impl InterfaceInfo {
    /// First endpoint matching direction and transfer type
    pub fn find_endpoint(&self, direction: Direction, kind: EndpointKind) -> Option<EndpointInfo> {
        self.endpoints
            .iter()
            .find(|ep| ep.direction() == direction && ep.kind == kind)
            .copied()
    }

    /// Endpoint with an exact address
    pub fn endpoint_at(&self, address: u8) -> Option<EndpointInfo> {
        self.endpoints.iter().find(|ep| ep.address == address).copied()
    }
}

/// Descriptor summary of one physical device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub device_address: u8,
    /// bDeviceClass
    pub class: u8,
    /// bMaxPacketSize0
    pub max_packet_size0: u8,
    /// bcdDevice
    pub bcd_device: u16,
    pub interfaces: Vec<InterfaceInfo>,
}

impl DeviceInfo {
    pub fn interface(&self, number: u8) -> Option<&InterfaceInfo> {
        self.interfaces.iter().find(|i| i.number == number)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} (bus {} addr {})",
            self.vendor_id, self.product_id, self.bus_number, self.device_address
        )
    }
}

/// An opened device
///
/// Transfer methods take `&self` so the poll task and foreground callers can
/// share one handle. Claiming and releasing need exclusive access and only
/// happen while the port is opening or closing.
pub trait UsbHandle: Send + Sync {
    fn claim_interface(&mut self, interface: u8, force: bool) -> Result<(), TransferError>;

    fn release_interface(&mut self, interface: u8) -> Result<(), TransferError>;

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError>;

    fn write_bulk(&self, endpoint: u8, buf: &[u8], timeout: Duration)
    -> Result<usize, TransferError>;

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError>;

    #[allow(clippy::too_many_arguments)]
    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError>;

    #[allow(clippy::too_many_arguments)]
    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransferError>;
}

/// A physical device that can be opened
pub trait UsbDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Acquire a device handle; dropping the handle closes the device
    fn open(&self) -> Result<Box<dyn UsbHandle>, TransferError>;
}
