//! Prolific PL2303
//!
//! Modem status arrives on an interrupt endpoint. A status thread is started
//! lazily by the first status query and keeps the latest status byte; an
//! error it hits is latched and surfaced exactly once by the next query.

use super::{Claimer, Link, SerialDriver, interface_at};
use common::{
    DeviceInfo, Direction, EndpointInfo, EndpointKind, Error, InterfaceInfo, Result,
    TransferError, UsbHandle, lock,
};
use protocol::prolific::{self, InitStep, Pl2303Type};
use protocol::LineConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Timeout for the synchronous status read before the thread starts
const INITIAL_STATUS_TIMEOUT: Duration = Duration::from_millis(100);
/// Timeout of each status thread read
const STATUS_POLL_TIMEOUT: Duration = Duration::from_millis(500);
/// Pause after a transient status read failure
const STATUS_ERROR_BACKOFF: Duration = Duration::from_millis(100);

pub(crate) struct ProlificDriver {
    link: Link,
    device_type: Pl2303Type,
    control_lines: Mutex<u16>,
    /// Last line configuration successfully programmed
    line: Mutex<Option<LineConfig>>,
    status: StatusMonitor,
}

impl ProlificDriver {
    pub(crate) fn attach(info: &DeviceInfo, port_number: u8, handle: Box<dyn UsbHandle>) -> Result<Self> {
        let interface = interface_at(info, usize::from(port_number))?;
        let read = endpoint(interface, prolific::READ_ENDPOINT, Direction::In, EndpointKind::Bulk, "bulk IN")?;
        let write = endpoint(
            interface,
            prolific::WRITE_ENDPOINT,
            Direction::Out,
            EndpointKind::Bulk,
            "bulk OUT",
        )?;
        let interrupt = endpoint(
            interface,
            prolific::INTERRUPT_ENDPOINT,
            Direction::In,
            EndpointKind::Interrupt,
            "interrupt IN",
        )?;

        let detection = prolific::detect_type(info.class, info.max_packet_size0);
        if detection.fallback {
            warn!(
                "Could not detect PL2303 subtype (class {:#04x}, max packet size {}), assuming HX",
                info.class, info.max_packet_size0
            );
        } else {
            debug!("PL2303 subtype {:?}", detection.device_type);
        }

        let mut claimer = Claimer::new(handle);
        claimer.claim(interface.number)?;
        let link = claimer.into_link(read, write);
        let status = StatusMonitor::new(Arc::clone(link.usb()), interrupt.address);

        Ok(Self {
            link,
            device_type: detection.device_type,
            control_lines: Mutex::new(0),
            line: Mutex::new(None),
            status,
        })
    }

    pub(crate) fn into_link(self) -> Link {
        self.link
    }

    fn vendor_in(&self, value: u16, index: u16, length: u16) -> Result<Vec<u8>> {
        self.link.control_in(
            prolific::VENDOR_IN_REQTYPE,
            prolific::VENDOR_READ_REQUEST,
            value,
            index,
            usize::from(length),
        )
    }

    fn vendor_out(&self, value: u16, index: u16) -> Result<()> {
        self.link.control_out(
            prolific::VENDOR_OUT_REQTYPE,
            prolific::VENDOR_WRITE_REQUEST,
            value,
            index,
            &[],
        )
    }

    fn ctrl_out(&self, request: u8, value: u16, data: &[u8]) -> Result<()> {
        self.link
            .control_out(prolific::CTRL_OUT_REQTYPE, request, value, 0, data)
    }

    fn write_control_lines(&self, lines: u16) -> Result<()> {
        self.ctrl_out(prolific::SET_CONTROL_REQUEST, lines, &[])
    }

    fn reset_device(&self) -> Result<()> {
        self.purge_buffers(true, true).map(|_| ())
    }

    fn run_init_sequence(&self) -> Result<()> {
        for step in prolific::init_sequence(self.device_type) {
            match step {
                InitStep::VendorIn {
                    value,
                    index,
                    length,
                } => {
                    self.vendor_in(value, index, length)?;
                }
                InitStep::VendorOut { value, index } => self.vendor_out(value, index)?,
            }
        }
        Ok(())
    }

    fn set_line(&self, flag: u16, state: bool) -> Result<()> {
        let mut lines = lock(&self.control_lines);
        let next = prolific::update_control_lines(*lines, flag, state);
        self.write_control_lines(next)?;
        *lines = next;
        Ok(())
    }

    fn status_flag(&self, flag: u8) -> Result<bool> {
        Ok(self.status.status()? & flag == flag)
    }
}

/// Endpoint at its fixed address, or the first of the right type
fn endpoint(
    interface: &InterfaceInfo,
    address: u8,
    direction: Direction,
    kind: EndpointKind,
    what: &'static str,
) -> Result<EndpointInfo> {
    interface
        .endpoint_at(address)
        .filter(|ep| ep.kind == kind)
        .or_else(|| interface.find_endpoint(direction, kind))
        .ok_or(Error::MissingEndpoint {
            interface: interface.number,
            what,
        })
}

impl SerialDriver for ProlificDriver {
    fn link(&self) -> &Link {
        &self.link
    }

    fn initialize(&self) -> Result<()> {
        let lines = *lock(&self.control_lines);
        self.write_control_lines(lines)?;
        self.reset_device()?;
        self.run_init_sequence()?;
        debug!("PL2303 {:?} initialised", self.device_type);
        Ok(())
    }

    fn set_parameters(&self, config: &LineConfig) -> Result<()> {
        let mut line = lock(&self.line);
        if line.as_ref() == Some(config) {
            debug!("PL2303 line settings unchanged");
            return Ok(());
        }

        let request = prolific::encode_line_request(config)?;
        self.ctrl_out(prolific::SET_LINE_REQUEST, 0, &request)?;
        self.reset_device()?;
        *line = Some(*config);
        Ok(())
    }

    fn cd(&self) -> Result<bool> {
        self.status_flag(prolific::STATUS_FLAG_CD)
    }

    fn cts(&self) -> Result<bool> {
        self.status_flag(prolific::STATUS_FLAG_CTS)
    }

    fn dsr(&self) -> Result<bool> {
        self.status_flag(prolific::STATUS_FLAG_DSR)
    }

    fn ri(&self) -> Result<bool> {
        self.status_flag(prolific::STATUS_FLAG_RI)
    }

    fn dtr(&self) -> Result<bool> {
        Ok(*lock(&self.control_lines) & prolific::CONTROL_DTR != 0)
    }

    fn rts(&self) -> Result<bool> {
        Ok(*lock(&self.control_lines) & prolific::CONTROL_RTS != 0)
    }

    fn set_dtr(&self, value: bool) -> Result<()> {
        self.set_line(prolific::CONTROL_DTR, value)
    }

    fn set_rts(&self, value: bool) -> Result<()> {
        self.set_line(prolific::CONTROL_RTS, value)
    }

    fn purge_buffers(&self, read: bool, write: bool) -> Result<bool> {
        if read {
            self.vendor_out(prolific::FLUSH_RX_REQUEST, 0)?;
        }
        if write {
            self.vendor_out(prolific::FLUSH_TX_REQUEST, 0)?;
        }
        Ok(true)
    }

    fn shutdown(&self) -> Result<()> {
        self.status.stop();
        self.reset_device()
    }
}

#[derive(Default)]
struct Latched {
    status: u8,
    error: Option<Error>,
}

struct StatusShared {
    latched: Mutex<Latched>,
    running: AtomicBool,
}

impl StatusShared {
    fn set_status(&self, status: u8) {
        lock(&self.latched).status = status;
    }

    fn latch_error(&self, err: Error) {
        lock(&self.latched).error = Some(err);
    }

    fn has_error(&self) -> bool {
        lock(&self.latched).error.is_some()
    }

    /// Latest status, or the latched error (cleared by this call)
    fn take(&self) -> Result<u8> {
        let mut latched = lock(&self.latched);
        match latched.error.take() {
            Some(err) => Err(err),
            None => Ok(latched.status),
        }
    }
}

/// Background reader of the interrupt status endpoint
struct StatusMonitor {
    usb: Arc<dyn UsbHandle>,
    endpoint: u8,
    /// Also serialises the lazy start
    worker: Mutex<Option<JoinHandle<()>>>,
    shared: Arc<StatusShared>,
}

impl StatusMonitor {
    fn new(usb: Arc<dyn UsbHandle>, endpoint: u8) -> Self {
        Self {
            usb,
            endpoint,
            worker: Mutex::new(None),
            shared: Arc::new(StatusShared {
                latched: Mutex::new(Latched::default()),
                running: AtomicBool::new(false),
            }),
        }
    }

    fn status(&self) -> Result<u8> {
        {
            let mut worker = lock(&self.worker);
            if worker.is_none() && !self.shared.has_error() {
                self.read_initial();
                *worker = Some(self.spawn()?);
            }
        }
        self.shared.take()
    }

    fn read_initial(&self) {
        let mut buf = [0u8; prolific::STATUS_BUFFER_SIZE];
        match self
            .usb
            .read_interrupt(self.endpoint, &mut buf, INITIAL_STATUS_TIMEOUT)
            .map_err(Error::from)
            .and_then(|n| prolific::parse_status(&buf[..n]).map_err(Error::from))
        {
            Ok(status) => self.shared.set_status(status),
            Err(e) => warn!("Could not read initial CTS / DSR / CD / RI status: {}", e),
        }
    }

    fn spawn(&self) -> Result<JoinHandle<()>> {
        let usb = Arc::clone(&self.usb);
        let shared = Arc::clone(&self.shared);
        let endpoint = self.endpoint;
        shared.running.store(true, Ordering::Release);

        thread::Builder::new()
            .name("pl2303-status".to_string())
            .spawn(move || status_loop(usb.as_ref(), endpoint, &shared))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::Release);
                Error::Io(e)
            })
    }

    /// Stop and join the status thread if it was started
    fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(worker) = lock(&self.worker).take() {
            if worker.join().is_err() {
                error!("PL2303 status thread panicked");
            }
        }
    }
}

fn status_loop(usb: &dyn UsbHandle, endpoint: u8, shared: &StatusShared) {
    debug!("PL2303 status thread started on endpoint {:#04x}", endpoint);
    let mut buf = [0u8; prolific::STATUS_BUFFER_SIZE];

    while shared.running.load(Ordering::Acquire) {
        match usb.read_interrupt(endpoint, &mut buf, STATUS_POLL_TIMEOUT) {
            Ok(0) | Err(TransferError::Timeout) => {}
            Ok(n) => match prolific::parse_status(&buf[..n]) {
                Ok(status) => shared.set_status(status),
                Err(e) => {
                    error!("PL2303 status thread stopped: {}", e);
                    shared.latch_error(e.into());
                    break;
                }
            },
            Err(TransferError::NoDevice) => {
                error!("PL2303 status thread stopped: device disconnected");
                shared.latch_error(Error::Usb(TransferError::NoDevice));
                break;
            }
            Err(e) => {
                warn!("PL2303 status read failed: {}", e);
                thread::sleep(STATUS_ERROR_BACKOFF);
            }
        }
    }
    debug!("PL2303 status thread exiting");
}
