//! Silicon Labs CP210x

use super::{Claimer, Link, SerialDriver, bulk_pair, interface_at};
use common::{DeviceInfo, Result, UsbHandle};
use protocol::{DEFAULT_BAUD_RATE, LineConfig, cp21xx};
use tracing::debug;

pub(crate) struct Cp21xxDriver {
    link: Link,
    interface: u8,
}

impl Cp21xxDriver {
    pub(crate) fn attach(info: &DeviceInfo, port_number: u8, handle: Box<dyn UsbHandle>) -> Result<Self> {
        let interface = interface_at(info, usize::from(port_number))?;
        let (read, write) = bulk_pair(interface)?;

        let mut claimer = Claimer::new(handle);
        claimer.claim(interface.number)?;

        Ok(Self {
            link: claimer.into_link(read, write),
            interface: interface.number,
        })
    }

    pub(crate) fn into_link(self) -> Link {
        self.link
    }

    fn set_config(&self, request: u8, value: u16) -> Result<()> {
        self.link.control_out(
            cp21xx::REQTYPE_HOST_TO_DEVICE,
            request,
            value,
            u16::from(self.interface),
            &[],
        )
    }
}

impl SerialDriver for Cp21xxDriver {
    fn link(&self) -> &Link {
        &self.link
    }

    fn initialize(&self) -> Result<()> {
        self.set_config(cp21xx::IFC_ENABLE, cp21xx::UART_ENABLE)?;
        self.set_config(
            cp21xx::SET_MHS,
            cp21xx::MCR_ALL | cp21xx::CONTROL_WRITE_DTR | cp21xx::CONTROL_WRITE_RTS,
        )?;
        self.set_config(cp21xx::SET_BAUDDIV, cp21xx::baud_divisor(DEFAULT_BAUD_RATE)?)?;
        debug!("CP21xx UART enabled on interface {}", self.interface);
        Ok(())
    }

    fn set_parameters(&self, config: &LineConfig) -> Result<()> {
        let (divisor, line_control) = cp21xx::encode_line_config(config)?;
        self.set_config(cp21xx::SET_BAUDDIV, divisor)?;
        self.set_config(cp21xx::SET_LINE_CTL, line_control)
    }

    // Modem lines are driven high at bring-up and not tracked afterwards
    fn dtr(&self) -> Result<bool> {
        Ok(true)
    }

    fn rts(&self) -> Result<bool> {
        Ok(true)
    }

    fn set_dtr(&self, value: bool) -> Result<()> {
        debug!("CP21xx ignores DTR={}", value);
        Ok(())
    }

    fn set_rts(&self, value: bool) -> Result<()> {
        debug!("CP21xx ignores RTS={}", value);
        Ok(())
    }

    fn purge_buffers(&self, read: bool, write: bool) -> Result<bool> {
        if let Some(code) = cp21xx::purge_code(read, write) {
            self.set_config(cp21xx::PURGE, code)?;
        }
        Ok(true)
    }

    fn shutdown(&self) -> Result<()> {
        self.set_config(cp21xx::IFC_ENABLE, cp21xx::UART_DISABLE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UsbDevice;
    use common::test_utils::MockUsbDevice;
    use protocol::{DataBits, Parity, StopBits};

    fn attach(mock: &MockUsbDevice) -> Cp21xxDriver {
        Cp21xxDriver::attach(mock.info(), 0, mock.open().unwrap()).unwrap()
    }

    fn requests(mock: &MockUsbDevice) -> Vec<(u8, u16)> {
        mock.control_requests()
            .iter()
            .map(|r| (r.request, r.value))
            .collect()
    }

    #[test]
    fn test_initialize_sequence() {
        let mock = MockUsbDevice::cp21xx();
        let driver = attach(&mock);
        driver.initialize().unwrap();

        assert_eq!(
            requests(&mock),
            vec![(0x00, 0x0001), (0x07, 0x0303), (0x01, 0x0180)]
        );
        assert!(mock.control_requests().iter().all(|r| r.request_type == 0x41));
    }

    #[test]
    fn test_set_parameters() {
        let mock = MockUsbDevice::cp21xx();
        let driver = attach(&mock);
        let config = LineConfig::new(115_200, DataBits::Seven, Parity::Odd, StopBits::Two);
        driver.set_parameters(&config).unwrap();

        assert_eq!(requests(&mock), vec![(0x01, 32), (0x03, 0x0712)]);
    }

    #[test]
    fn test_unsupported_framing_sends_nothing() {
        let mock = MockUsbDevice::cp21xx();
        let driver = attach(&mock);

        let space = LineConfig::new(9600, DataBits::Eight, Parity::Space, StopBits::One);
        assert!(driver.set_parameters(&space).is_err());
        let one_half = LineConfig::new(9600, DataBits::Eight, Parity::None, StopBits::OnePointFive);
        assert!(driver.set_parameters(&one_half).is_err());

        assert!(mock.control_requests().is_empty());
    }

    #[test]
    fn test_purge_codes() {
        let mock = MockUsbDevice::cp21xx();
        let driver = attach(&mock);
        assert!(driver.purge_buffers(true, true).unwrap());
        assert!(driver.purge_buffers(false, false).unwrap());
        assert_eq!(requests(&mock), vec![(0x12, 0x0f)]);
    }

    #[test]
    fn test_shutdown_disables_uart() {
        let mock = MockUsbDevice::cp21xx();
        let driver = attach(&mock);
        driver.shutdown().unwrap();
        assert_eq!(requests(&mock), vec![(0x00, 0x0000)]);
    }

    #[test]
    fn test_line_setters_are_accepted() {
        let mock = MockUsbDevice::cp21xx();
        let driver = attach(&mock);
        driver.set_dtr(false).unwrap();
        driver.set_rts(false).unwrap();
        assert!(driver.dtr().unwrap());
        assert!(driver.rts().unwrap());
        assert!(mock.control_requests().is_empty());
    }
}
