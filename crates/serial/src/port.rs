//! Serial port engine
//!
//! A [`SerialPort`] is one logical channel on one physical device. Opening
//! it claims the interfaces its chip variant needs, brings the chip up and
//! starts a named read thread that moves decoded payload into the receive
//! ring buffer and notifies listeners. Writes go straight to the bulk OUT
//! endpoint in chunks of at most the write buffer size.
//!
//! Lifecycle: `Closed -> Opening -> Open -> Closing -> Closed`. A failed
//! open returns to `Closed` with the device handle released, so it can be
//! retried. Closing waits for in-flight calls, then stops and joins the read
//! thread before the variant teardown runs and the handle is released.

use crate::driver::Driver;
use crate::ring_buffer::{self, RingBuffer};
use async_channel::Receiver;
use common::{Error, EventListeners, PortEvent, PortId, Result, UsbDevice, lock};
use protocol::{DriverKind, LineConfig};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::ops::Deref;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Default transmit chunk size
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Default size of one read-thread transfer
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Default timeout of one read-thread transfer
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Pause after a non-fatal read failure
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Floor for the read-thread timeout; libusb treats zero as unlimited
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Per-port tunables
#[derive(Debug, Clone, PartialEq)]
pub struct PortSettings {
    /// Line parameters programmed at open
    pub line: LineConfig,
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub read_chunk_size: usize,
    pub read_timeout: Duration,
    /// Queue depth of each event listener
    pub event_capacity: usize,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            line: LineConfig::default(),
            read_buffer_size: ring_buffer::DEFAULT_CAPACITY,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            event_capacity: common::DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Port lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortState {
    Closed,
    Opening,
    Open,
    Closing,
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortState::Closed => "closed",
            PortState::Opening => "opening",
            PortState::Open => "open",
            PortState::Closing => "closing",
        };
        f.write_str(name)
    }
}

/// Traffic counters since the port was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortStats {
    pub bytes_received: u64,
    /// Received bytes overwritten before they were read
    pub bytes_dropped: u64,
    pub bytes_written: u64,
}

/// Resources that exist only while the port is open
struct Active {
    driver: Arc<Driver>,
    line: LineConfig,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
}

struct Lifecycle {
    state: PortState,
    active: Option<Active>,
}

/// Driver borrowed for one call; close waits until it is dropped
struct InFlight<'a> {
    driver: Arc<Driver>,
    _guard: RwLockReadGuard<'a, ()>,
}

impl Deref for InFlight<'_> {
    type Target = Driver;

    fn deref(&self) -> &Driver {
        &self.driver
    }
}

/// State shared with the read thread
struct Inbound {
    id: PortId,
    rx: Mutex<RingBuffer>,
    listeners: EventListeners,
    bytes_received: AtomicU64,
}

impl Inbound {
    fn deliver(&self, data: &[u8]) {
        let lost = lock(&self.rx).push(data);
        if lost > 0 {
            trace!("{}: receive buffer overrun, {} bytes dropped", self.id, lost);
        }
        self.bytes_received
            .fetch_add(data.len() as u64, Ordering::Relaxed);
        self.listeners.notify(PortEvent::DataAvailable {
            port: self.id,
            bytes: data.len(),
        });
    }
}

/// One serial channel of a USB device
pub struct SerialPort {
    device: Arc<dyn UsbDevice>,
    kind: DriverKind,
    port_number: u8,
    settings: PortSettings,
    lifecycle: Mutex<Lifecycle>,
    /// Shared by every driver call, exclusive while closing
    in_flight: RwLock<()>,
    inbound: Arc<Inbound>,
    /// Transmit chunk size; held for the whole of a write
    tx: Mutex<usize>,
    bytes_written: AtomicU64,
}

impl SerialPort {
    pub fn new(
        device: Arc<dyn UsbDevice>,
        kind: DriverKind,
        port_number: u8,
        settings: PortSettings,
    ) -> Self {
        let info = device.info();
        let id = PortId {
            bus: info.bus_number,
            address: info.device_address,
            port: port_number,
        };

        Self {
            inbound: Arc::new(Inbound {
                id,
                rx: Mutex::new(RingBuffer::new(settings.read_buffer_size)),
                listeners: EventListeners::new(settings.event_capacity),
                bytes_received: AtomicU64::new(0),
            }),
            tx: Mutex::new(settings.write_buffer_size.max(1)),
            device,
            kind,
            port_number,
            settings,
            lifecycle: Mutex::new(Lifecycle {
                state: PortState::Closed,
                active: None,
            }),
            in_flight: RwLock::new(()),
            bytes_written: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> PortId {
        self.inbound.id
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    pub fn port_number(&self) -> u8 {
        self.port_number
    }

    pub fn state(&self) -> PortState {
        lock(&self.lifecycle).state
    }

    pub fn is_open(&self) -> bool {
        self.state() == PortState::Open
    }

    /// Open the port and start the read thread
    pub fn open(&self) -> Result<()> {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != PortState::Closed {
                return Err(Error::AlreadyOpen);
            }
            lifecycle.state = PortState::Opening;
        }

        match self.start() {
            Ok(active) => {
                let mut lifecycle = lock(&self.lifecycle);
                lifecycle.active = Some(active);
                lifecycle.state = PortState::Open;
                info!("Opened {} port {}", self.kind, self.id());
                Ok(())
            }
            Err(e) => {
                lock(&self.lifecycle).state = PortState::Closed;
                warn!("Failed to open {} port {}: {}", self.kind, self.id(), e);
                Err(e)
            }
        }
    }

    fn start(&self) -> Result<Active> {
        let driver = Driver::attach(self.kind, self.device.as_ref(), self.port_number)?;

        let line = self.settings.line;
        let prepared = driver
            .initialize()
            .and_then(|()| driver.set_parameters(&line));
        if let Err(e) = prepared {
            driver.detach();
            return Err(e);
        }

        let driver = Arc::new(driver);
        let running = Arc::new(AtomicBool::new(true));
        let reader = match self.spawn_reader(Arc::clone(&driver), Arc::clone(&running)) {
            Ok(reader) => reader,
            Err(e) => {
                release(driver);
                return Err(e);
            }
        };

        Ok(Active {
            driver,
            line,
            running,
            reader: Some(reader),
        })
    }

    fn spawn_reader(&self, driver: Arc<Driver>, running: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let inbound = Arc::clone(&self.inbound);
        let chunk_size = self.settings.read_chunk_size.max(1);
        let timeout = self.settings.read_timeout.max(MIN_READ_TIMEOUT);

        thread::Builder::new()
            .name(format!("serial-read-{}", self.id()))
            .spawn(move || read_loop(&driver, &inbound, &running, chunk_size, timeout))
            .map_err(Error::Io)
    }

    /// Close the port; closing a port that is not open does nothing
    ///
    /// Blocks until calls already using the driver (a write in progress, a
    /// line-state query) have returned. The device handle is released even
    /// when the variant teardown fails; that failure is still returned.
    pub fn close(&self) -> Result<()> {
        let active = {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != PortState::Open {
                debug!("Close of {} port {} ignored", lifecycle.state, self.id());
                return Ok(());
            }
            lifecycle.state = PortState::Closing;
            lifecycle.active.take()
        };

        let drained = self.in_flight.write().unwrap_or_else(PoisonError::into_inner);
        let result = match active {
            Some(active) => self.stop(active),
            None => Ok(()),
        };

        lock(&self.lifecycle).state = PortState::Closed;
        drop(drained);
        info!("Closed {} port {}", self.kind, self.id());
        result
    }

    fn stop(&self, mut active: Active) -> Result<()> {
        active.running.store(false, Ordering::Release);
        if let Some(reader) = active.reader.take() {
            if reader.join().is_err() {
                error!("Read thread of {} panicked", self.id());
            }
        }

        let result = active.driver.shutdown();
        if let Err(e) = &result {
            warn!("Teardown of {} failed: {}", self.id(), e);
        }
        release(active.driver);
        result
    }

    fn driver(&self) -> Result<InFlight<'_>> {
        let guard = self.in_flight.read().unwrap_or_else(PoisonError::into_inner);
        let lifecycle = lock(&self.lifecycle);
        match (&lifecycle.state, &lifecycle.active) {
            (PortState::Open, Some(active)) => Ok(InFlight {
                driver: Arc::clone(&active.driver),
                _guard: guard,
            }),
            _ => Err(Error::NotOpen),
        }
    }

    /// Register for data-available and read-failure events
    pub fn subscribe(&self) -> Receiver<PortEvent> {
        self.inbound.listeners.subscribe()
    }

    /// Copy buffered received bytes into `dest[start..]`
    ///
    /// Never blocks; returns 0 when nothing is buffered.
    pub fn read(&self, dest: &mut [u8], start: usize) -> Result<usize> {
        if start > dest.len() {
            return Err(Error::InvalidArgument(format!(
                "start index {} beyond buffer of {} bytes",
                start,
                dest.len()
            )));
        }
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        Ok(lock(&self.inbound.rx).pop_into(&mut dest[start..]))
    }

    /// Bytes waiting in the receive buffer
    pub fn available(&self) -> Result<usize> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        Ok(lock(&self.inbound.rx).len())
    }

    /// Write all of `data`, chunked to the write buffer size
    ///
    /// A chunk that fails or is not accepted at all aborts the call with
    /// [`Error::Write`] carrying the offset to resume from.
    pub fn write(&self, data: &[u8], timeout: Duration) -> Result<usize> {
        let driver = self.driver()?;
        let chunk_size = lock(&self.tx);
        let length = data.len();
        let mut offset = 0;

        while offset < length {
            let attempted = (length - offset).min(*chunk_size);
            let chunk = &data[offset..offset + attempted];

            let written = driver
                .link()
                .write_bulk(chunk, timeout)
                .map_err(|e| Error::Write {
                    attempted,
                    offset,
                    length,
                    reason: e.to_string(),
                })?;
            if written == 0 {
                return Err(Error::Write {
                    attempted,
                    offset,
                    length,
                    reason: "device accepted no data".to_string(),
                });
            }

            trace!("{}: wrote {} of {} bytes at offset {}", self.id(), written, attempted, offset);
            offset += written;
            self.bytes_written
                .fetch_add(written as u64, Ordering::Relaxed);
        }

        Ok(offset)
    }

    /// Line parameters last programmed, or the defaults while closed
    pub fn line_config(&self) -> LineConfig {
        match &lock(&self.lifecycle).active {
            Some(active) => active.line,
            None => self.settings.line,
        }
    }

    /// Program baud rate and framing
    pub fn set_parameters(&self, config: LineConfig) -> Result<()> {
        let driver = self.driver()?;
        if let Err(e) = driver.set_parameters(&config) {
            if e.is_argument_error() {
                debug!("{}: rejected line settings {}: {}", self.id(), config, e);
            } else {
                warn!("{}: failed to program {}: {}", self.id(), config, e);
            }
            return Err(e);
        }

        if let Some(active) = lock(&self.lifecycle).active.as_mut() {
            active.line = config;
        }
        debug!("{}: line set to {}", self.id(), config);
        Ok(())
    }

    pub fn cd(&self) -> Result<bool> {
        self.driver()?.cd()
    }

    pub fn cts(&self) -> Result<bool> {
        self.driver()?.cts()
    }

    pub fn dsr(&self) -> Result<bool> {
        self.driver()?.dsr()
    }

    pub fn ri(&self) -> Result<bool> {
        self.driver()?.ri()
    }

    pub fn dtr(&self) -> Result<bool> {
        self.driver()?.dtr()
    }

    pub fn rts(&self) -> Result<bool> {
        self.driver()?.rts()
    }

    pub fn set_dtr(&self, value: bool) -> Result<()> {
        self.driver()?.set_dtr(value)
    }

    pub fn set_rts(&self, value: bool) -> Result<()> {
        self.driver()?.set_rts(value)
    }

    /// Flush chip FIFOs; a read purge also empties the receive buffer
    pub fn purge_buffers(&self, read: bool, write: bool) -> Result<bool> {
        let purged = self.driver()?.purge_buffers(read, write)?;
        if read {
            lock(&self.inbound.rx).clear();
        }
        Ok(purged)
    }

    /// Hold the line in break state (CDC/ACM only)
    pub fn send_break(&self, duration_ms: u16) -> Result<()> {
        self.driver()?.send_break(duration_ms)
    }

    pub fn read_buffer_size(&self) -> usize {
        lock(&self.inbound.rx).capacity()
    }

    /// Replace the receive buffer, keeping the newest buffered bytes
    pub fn set_read_buffer_size(&self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(Error::InvalidArgument("read buffer size must be non-zero".into()));
        }
        lock(&self.inbound.rx).resize(size);
        Ok(())
    }

    pub fn write_buffer_size(&self) -> usize {
        *lock(&self.tx)
    }

    /// Change the transmit chunk size; waits for an in-flight write
    pub fn set_write_buffer_size(&self, size: usize) -> Result<()> {
        if size == 0 {
            return Err(Error::InvalidArgument("write buffer size must be non-zero".into()));
        }
        *lock(&self.tx) = size;
        Ok(())
    }

    pub fn stats(&self) -> PortStats {
        PortStats {
            bytes_received: self.inbound.bytes_received.load(Ordering::Relaxed),
            bytes_dropped: lock(&self.inbound.rx).dropped(),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
        }
    }
}

impl Drop for SerialPort {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing {} on drop: {}", self.id(), e);
        }
    }
}

impl fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPort")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

/// Release interfaces once nothing else holds the driver
fn release(driver: Arc<Driver>) {
    match Arc::try_unwrap(driver) {
        Ok(driver) => driver.detach(),
        Err(_) => warn!("Driver still in use, device closes when the last reference drops"),
    }
}

fn read_loop(
    driver: &Driver,
    inbound: &Inbound,
    running: &AtomicBool,
    chunk_size: usize,
    timeout: Duration,
) {
    debug!("Read thread started for {}", inbound.id);
    let mut buf = vec![0u8; chunk_size];

    while running.load(Ordering::Acquire) {
        match driver.read(&mut buf, timeout) {
            Ok(0) => {}
            Ok(n) => inbound.deliver(&buf[..n]),
            Err(e) if e.is_fatal_read() => {
                error!("Read thread for {} stopped: {}", inbound.id, e);
                inbound.listeners.notify(PortEvent::ReadFailed {
                    port: inbound.id,
                    reason: e.to_string(),
                });
                break;
            }
            Err(e) => {
                warn!("Read from {} failed: {}", inbound.id, e);
                thread::sleep(READ_ERROR_BACKOFF);
            }
        }
    }

    debug!("Read thread for {} exiting", inbound.id);
}
