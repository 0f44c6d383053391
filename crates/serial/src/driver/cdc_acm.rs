//! CDC/ACM (USB communications class)

use super::{Claimer, Link, SerialDriver, bulk_pair, interface_at};
use common::{DeviceInfo, Direction, EndpointKind, InterfaceInfo, Result, UsbHandle, lock};
use protocol::{LineConfig, cdc};
use std::sync::Mutex;
use tracing::debug;

const CLASS_COMM: u8 = 0x02;
const CLASS_CDC_DATA: u8 = 0x0A;

#[derive(Debug, Default, Clone, Copy)]
struct ControlLines {
    dtr: bool,
    rts: bool,
}

pub(crate) struct CdcAcmDriver {
    link: Link,
    control_interface: u8,
    lines: Mutex<ControlLines>,
}

impl CdcAcmDriver {
    /// Claim the control/data interface pair of port `port_number`
    pub(crate) fn attach(info: &DeviceInfo, port_number: u8, handle: Box<dyn UsbHandle>) -> Result<Self> {
        let (control, data) = interface_pair(info, port_number)?;
        let (read, write) = bulk_pair(data)?;

        match control.find_endpoint(Direction::In, EndpointKind::Interrupt) {
            Some(ep) => debug!("CDC notification endpoint {:#04x}", ep.address),
            None => debug!("CDC control interface {} has no notification endpoint", control.number),
        }

        let mut claimer = Claimer::new(handle);
        claimer.claim(control.number)?;
        claimer.claim(data.number)?;

        Ok(Self {
            link: claimer.into_link(read, write),
            control_interface: control.number,
            lines: Mutex::new(ControlLines::default()),
        })
    }

    pub(crate) fn into_link(self) -> Link {
        self.link
    }

    fn class_request(&self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        self.link.control_out(
            cdc::REQTYPE_CLASS_INTERFACE_OUT,
            request,
            value,
            u16::from(self.control_interface),
            data,
        )
    }

    fn write_control_lines(&self, lines: ControlLines) -> Result<()> {
        self.class_request(
            cdc::SET_CONTROL_LINE_STATE,
            cdc::control_line_state(lines.dtr, lines.rts),
            &[],
        )
    }
}

/// Control and data interface of the n-th function
///
/// Matches on interface class first and falls back to descriptor order for
/// devices that report vendor-specific classes.
fn interface_pair(info: &DeviceInfo, port_number: u8) -> Result<(&InterfaceInfo, &InterfaceInfo)> {
    let n = usize::from(port_number);
    let controls: Vec<_> = info.interfaces.iter().filter(|i| i.class == CLASS_COMM).collect();
    let datas: Vec<_> = info.interfaces.iter().filter(|i| i.class == CLASS_CDC_DATA).collect();

    match (controls.get(n), datas.get(n)) {
        (Some(control), Some(data)) => Ok((*control, *data)),
        _ => Ok((interface_at(info, 2 * n)?, interface_at(info, 2 * n + 1)?)),
    }
}

impl SerialDriver for CdcAcmDriver {
    fn link(&self) -> &Link {
        &self.link
    }

    fn initialize(&self) -> Result<()> {
        debug!("CDC/ACM ready on control interface {}", self.control_interface);
        Ok(())
    }

    fn set_parameters(&self, config: &LineConfig) -> Result<()> {
        config.validate()?;
        let coding = cdc::encode_line_coding(config);
        self.class_request(cdc::SET_LINE_CODING, 0, &coding)
    }

    fn dtr(&self) -> Result<bool> {
        Ok(lock(&self.lines).dtr)
    }

    fn rts(&self) -> Result<bool> {
        Ok(lock(&self.lines).rts)
    }

    fn set_dtr(&self, value: bool) -> Result<()> {
        let mut lines = lock(&self.lines);
        let next = ControlLines { dtr: value, ..*lines };
        self.write_control_lines(next)?;
        *lines = next;
        Ok(())
    }

    fn set_rts(&self, value: bool) -> Result<()> {
        let mut lines = lock(&self.lines);
        let next = ControlLines { rts: value, ..*lines };
        self.write_control_lines(next)?;
        *lines = next;
        Ok(())
    }

    fn send_break(&self, duration_ms: u16) -> Result<()> {
        self.class_request(cdc::SEND_BREAK, duration_ms, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UsbDevice;
    use common::test_utils::MockUsbDevice;
    use protocol::{DataBits, Parity, StopBits};

    fn attach(mock: &MockUsbDevice) -> CdcAcmDriver {
        CdcAcmDriver::attach(mock.info(), 0, mock.open().unwrap()).unwrap()
    }

    #[test]
    fn test_attach_resolves_data_endpoints() {
        let mock = MockUsbDevice::cdc_acm();
        let driver = attach(&mock);
        assert_eq!(driver.link.read_endpoint().address, 0x81);
        assert_eq!(driver.link.write_endpoint().address, 0x02);
        assert_eq!(mock.claimed_interfaces(), vec![0, 1]);
    }

    #[test]
    fn test_set_line_coding() {
        let mock = MockUsbDevice::cdc_acm();
        let driver = attach(&mock);
        let config = LineConfig::new(115_200, DataBits::Seven, Parity::Even, StopBits::Two);
        driver.set_parameters(&config).unwrap();

        let requests = mock.control_requests_for(cdc::SET_LINE_CODING);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request_type, 0x21);
        assert_eq!(requests[0].index, 0);
        assert_eq!(requests[0].data, vec![0x00, 0xC2, 0x01, 0x00, 2, 2, 7]);
    }

    #[test]
    fn test_zero_baud_sends_nothing() {
        let mock = MockUsbDevice::cdc_acm();
        let driver = attach(&mock);
        let config = LineConfig {
            baud_rate: 0,
            ..LineConfig::default()
        };
        assert!(driver.set_parameters(&config).is_err());
        assert!(mock.control_requests().is_empty());
    }

    #[test]
    fn test_control_lines_track_both_bits() {
        let mock = MockUsbDevice::cdc_acm();
        let driver = attach(&mock);
        driver.set_dtr(true).unwrap();
        driver.set_rts(true).unwrap();
        driver.set_dtr(false).unwrap();

        let values: Vec<u16> = mock
            .control_requests_for(cdc::SET_CONTROL_LINE_STATE)
            .iter()
            .map(|r| r.value)
            .collect();
        assert_eq!(values, vec![0x01, 0x03, 0x02]);
        assert!(!driver.dtr().unwrap());
        assert!(driver.rts().unwrap());
    }

    #[test]
    fn test_failed_line_write_keeps_state() {
        let mock = MockUsbDevice::cdc_acm();
        let driver = attach(&mock);
        mock.fail_control(cdc::SET_CONTROL_LINE_STATE, common::TransferError::Pipe);
        assert!(driver.set_dtr(true).is_err());
        assert!(!driver.dtr().unwrap());
    }

    #[test]
    fn test_send_break_and_unsupported_signals() {
        let mock = MockUsbDevice::cdc_acm();
        let driver = attach(&mock);
        driver.send_break(250).unwrap();
        assert_eq!(mock.control_requests_for(cdc::SEND_BREAK)[0].value, 250);

        assert!(!driver.cd().unwrap());
        assert!(!driver.cts().unwrap());
        assert!(!driver.purge_buffers(true, true).unwrap());
    }
}
