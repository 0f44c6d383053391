//! FTDI FT232/FT2232/FT4232
//!
//! Every max-packet chunk the chip returns starts with a two-byte modem
//! status header. Reads strip the headers and keep the last status byte so
//! CTS/DSR/RI/CD can be answered without an extra transfer.

use super::{Claimer, Link, SerialDriver, bulk_pair, interface_at};
use common::{DeviceInfo, Error, Result, TransferError, UsbHandle, lock};
use protocol::ftdi::{self, FtdiChip, ModemStatus};
use protocol::LineConfig;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_PACKET_SIZE: usize = 64;

#[derive(Debug, Default, Clone, Copy)]
struct ControlLines {
    dtr: bool,
    rts: bool,
}

pub(crate) struct FtdiDriver {
    link: Link,
    chip: FtdiChip,
    /// `wIndex` for control requests
    index: u16,
    packet_size: usize,
    status: Mutex<ModemStatus>,
    lines: Mutex<ControlLines>,
}

impl FtdiDriver {
    pub(crate) fn attach(info: &DeviceInfo, port_number: u8, handle: Box<dyn UsbHandle>) -> Result<Self> {
        let chip = FtdiChip::from_bcd_device(info.bcd_device);
        let interface = interface_at(info, usize::from(port_number))?;
        let (read, write) = bulk_pair(interface)?;

        let index = if chip.is_multi_interface() || info.interfaces.len() > 1 {
            u16::from(port_number) + 1
        } else {
            0
        };
        let packet_size = match usize::from(read.max_packet_size) {
            0 => DEFAULT_PACKET_SIZE,
            n => n,
        };
        debug!(
            "FTDI {:?} (bcdDevice {:#06x}), index {}, packet size {}",
            chip, info.bcd_device, index, packet_size
        );

        let mut claimer = Claimer::new(handle);
        claimer.claim(interface.number)?;

        Ok(Self {
            link: claimer.into_link(read, write),
            chip,
            index,
            packet_size,
            status: Mutex::new(ModemStatus::default()),
            lines: Mutex::new(ControlLines::default()),
        })
    }

    pub(crate) fn into_link(self) -> Link {
        self.link
    }

    fn vendor_out(&self, request: u8, value: u16, index: u16) -> Result<()> {
        self.link
            .control_out(ftdi::REQTYPE_OUT, request, value, index, &[])
    }

    fn status(&self) -> ModemStatus {
        *lock(&self.status)
    }
}

impl SerialDriver for FtdiDriver {
    fn link(&self) -> &Link {
        &self.link
    }

    fn initialize(&self) -> Result<()> {
        self.vendor_out(ftdi::SIO_RESET_REQUEST, ftdi::SIO_RESET_SIO, self.index)
    }

    fn set_parameters(&self, config: &LineConfig) -> Result<()> {
        let divisor = ftdi::convert_baud_rate(config.baud_rate, self.chip, self.index)?;
        let data = ftdi::data_word(config);

        if divisor.actual_baud != config.baud_rate {
            info!(
                "FTDI baud rate {} requested, chip runs at {}",
                config.baud_rate, divisor.actual_baud
            );
        }

        self.vendor_out(ftdi::SIO_SET_BAUD_RATE_REQUEST, divisor.value, divisor.index)?;
        self.vendor_out(ftdi::SIO_SET_DATA_REQUEST, data, self.index)
    }

    fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let received = match self
            .link
            .usb()
            .read_bulk(self.link.read_endpoint().address, buf, timeout)
        {
            Ok(n) => n,
            Err(TransferError::Timeout) => return Ok(0),
            Err(e) => return Err(Error::Usb(e)),
        };

        let (payload, status) = ftdi::strip_status_headers(&mut buf[..received], self.packet_size)?;
        *lock(&self.status) = status;
        Ok(payload)
    }

    fn cd(&self) -> Result<bool> {
        Ok(self.status().cd())
    }

    fn cts(&self) -> Result<bool> {
        Ok(self.status().cts())
    }

    fn dsr(&self) -> Result<bool> {
        Ok(self.status().dsr())
    }

    fn ri(&self) -> Result<bool> {
        Ok(self.status().ri())
    }

    fn dtr(&self) -> Result<bool> {
        Ok(lock(&self.lines).dtr)
    }

    fn rts(&self) -> Result<bool> {
        Ok(lock(&self.lines).rts)
    }

    fn set_dtr(&self, value: bool) -> Result<()> {
        let mut lines = lock(&self.lines);
        self.vendor_out(ftdi::SIO_MODEM_CTRL_REQUEST, ftdi::dtr_value(value), self.index)?;
        lines.dtr = value;
        Ok(())
    }

    fn set_rts(&self, value: bool) -> Result<()> {
        let mut lines = lock(&self.lines);
        self.vendor_out(ftdi::SIO_MODEM_CTRL_REQUEST, ftdi::rts_value(value), self.index)?;
        lines.rts = value;
        Ok(())
    }

    fn purge_buffers(&self, read: bool, write: bool) -> Result<bool> {
        if read {
            self.vendor_out(ftdi::SIO_RESET_REQUEST, ftdi::SIO_RESET_PURGE_RX, self.index)?;
        }
        if write {
            self.vendor_out(ftdi::SIO_RESET_REQUEST, ftdi::SIO_RESET_PURGE_TX, self.index)?;
        }
        Ok(true)
    }
}
