//! Test utilities for the USB serial crates
//!
//! Provides a scripted in-memory USB device that implements the transfer
//! adapter contract. Bulk and interrupt reads are served from per-endpoint
//! queues, writes and control requests are recorded, and failures can be
//! injected at open, claim, control and write time.
//!
//! # Example
//!
//! ```
//! use common::test_utils::MockUsbDevice;
//! use common::UsbDevice;
//!
//! let device = MockUsbDevice::cp21xx();
//! device.push_read(0x81, b"hello".to_vec());
//! assert_eq!(device.info().vendor_id, 0x10c4);
//! ```

use crate::channel::lock;
use crate::usb_types::{
    DIRECTION_IN, DeviceInfo, EndpointInfo, EndpointKind, InterfaceInfo, TransferError, UsbDevice,
    UsbHandle,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on how long an empty mock read blocks
const MOCK_READ_BLOCK: Duration = Duration::from_millis(5);

/// Scripted result for one read
#[derive(Debug, Clone)]
pub enum MockRead {
    Data(Vec<u8>),
    Error(TransferError),
}

/// Scripted result for one bulk write
#[derive(Debug, Clone)]
pub enum MockWrite {
    /// Accept the whole buffer
    Accept,
    /// Accept at most this many bytes
    Partial(usize),
    /// Accept the whole buffer after blocking for a while
    Delay(Duration),
    Fail(TransferError),
}

/// A recorded control transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    /// Payload for OUT requests, requested length (zero-filled) for IN
    pub data: Vec<u8>,
}

impl ControlRequest {
    pub fn is_in(&self) -> bool {
        self.request_type & DIRECTION_IN != 0
    }
}

#[derive(Default)]
struct MockState {
    reads: Mutex<HashMap<u8, VecDeque<MockRead>>>,
    read_calls: Mutex<HashMap<u8, usize>>,
    read_timeouts: Mutex<HashMap<u8, Duration>>,
    write_results: Mutex<VecDeque<MockWrite>>,
    write_attempts: AtomicUsize,
    writes: Mutex<Vec<(u8, Vec<u8>)>>,
    control_log: Mutex<Vec<ControlRequest>>,
    control_in: Mutex<VecDeque<Vec<u8>>>,
    control_failures: Mutex<HashMap<u8, TransferError>>,
    claim_failures: Mutex<HashSet<u8>>,
    claimed: Mutex<Vec<u8>>,
    released: Mutex<Vec<u8>>,
    fail_open: AtomicBool,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// In-memory USB device
#[derive(Clone)]
pub struct MockUsbDevice {
    info: DeviceInfo,
    state: Arc<MockState>,
}

impl MockUsbDevice {
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            state: Arc::new(MockState::default()),
        }
    }

    /// CDC/ACM layout: control interface 0 (interrupt IN 0x83), data
    /// interface 1 (bulk OUT 0x02, bulk IN 0x81)
    pub fn cdc_acm() -> Self {
        Self::new(DeviceInfo {
            vendor_id: 0x2341,
            product_id: 0x0043,
            bus_number: 1,
            device_address: 2,
            class: 0x02,
            max_packet_size0: 64,
            bcd_device: 0x0100,
            interfaces: vec![
                InterfaceInfo {
                    number: 0,
                    class: 0x02,
                    endpoints: vec![EndpointInfo::new(0x83, EndpointKind::Interrupt, 8)],
                },
                InterfaceInfo {
                    number: 1,
                    class: 0x0A,
                    endpoints: vec![
                        EndpointInfo::new(0x02, EndpointKind::Bulk, 64),
                        EndpointInfo::new(0x81, EndpointKind::Bulk, 64),
                    ],
                },
            ],
        })
    }

    /// CP210x layout: interface 0 (bulk IN 0x81, bulk OUT 0x01)
    pub fn cp21xx() -> Self {
        Self::new(DeviceInfo {
            vendor_id: 0x10c4,
            product_id: 0xea60,
            bus_number: 1,
            device_address: 3,
            class: 0x00,
            max_packet_size0: 64,
            bcd_device: 0x0100,
            interfaces: vec![InterfaceInfo {
                number: 0,
                class: 0xFF,
                endpoints: vec![
                    EndpointInfo::new(0x81, EndpointKind::Bulk, 64),
                    EndpointInfo::new(0x01, EndpointKind::Bulk, 64),
                ],
            }],
        })
    }

    /// FT232R layout: interface 0 (bulk IN 0x81, bulk OUT 0x02), 64-byte packets
    pub fn ftdi() -> Self {
        Self::ftdi_with_bcd(0x0600)
    }

    pub fn ftdi_with_bcd(bcd_device: u16) -> Self {
        Self::new(DeviceInfo {
            vendor_id: 0x0403,
            product_id: 0x6001,
            bus_number: 1,
            device_address: 4,
            class: 0x00,
            max_packet_size0: 8,
            bcd_device,
            interfaces: vec![InterfaceInfo {
                number: 0,
                class: 0xFF,
                endpoints: vec![
                    EndpointInfo::new(0x81, EndpointKind::Bulk, 64),
                    EndpointInfo::new(0x02, EndpointKind::Bulk, 64),
                ],
            }],
        })
    }

    /// PL2303HX layout: interface 0 (interrupt IN 0x81, bulk OUT 0x02, bulk IN 0x83)
    pub fn prolific() -> Self {
        Self::prolific_with(0x00, 64)
    }

    pub fn prolific_with(class: u8, max_packet_size0: u8) -> Self {
        Self::new(DeviceInfo {
            vendor_id: 0x067b,
            product_id: 0x2303,
            bus_number: 1,
            device_address: 5,
            class,
            max_packet_size0,
            bcd_device: 0x0300,
            interfaces: vec![InterfaceInfo {
                number: 0,
                class: 0xFF,
                endpoints: vec![
                    EndpointInfo::new(0x81, EndpointKind::Interrupt, 10),
                    EndpointInfo::new(0x02, EndpointKind::Bulk, 64),
                    EndpointInfo::new(0x83, EndpointKind::Bulk, 64),
                ],
            }],
        })
    }

    /// Queue data for the next read on `endpoint`
    pub fn push_read(&self, endpoint: u8, data: Vec<u8>) {
        lock(&self.state.reads)
            .entry(endpoint)
            .or_default()
            .push_back(MockRead::Data(data));
    }

    /// Queue a failure for the next read on `endpoint`
    pub fn push_read_error(&self, endpoint: u8, error: TransferError) {
        lock(&self.state.reads)
            .entry(endpoint)
            .or_default()
            .push_back(MockRead::Error(error));
    }

    /// Reads still queued on `endpoint`
    pub fn pending_reads(&self, endpoint: u8) -> usize {
        lock(&self.state.reads).get(&endpoint).map_or(0, |q| q.len())
    }

    /// Timeout passed to the latest read on `endpoint`
    pub fn last_read_timeout(&self, endpoint: u8) -> Option<Duration> {
        lock(&self.state.read_timeouts).get(&endpoint).copied()
    }

    /// Reads attempted on `endpoint`, including empty ones
    pub fn read_calls(&self, endpoint: u8) -> usize {
        lock(&self.state.read_calls)
            .get(&endpoint)
            .copied()
            .unwrap_or(0)
    }

    /// Script the result of the next bulk write
    pub fn push_write_result(&self, result: MockWrite) {
        lock(&self.state.write_results).push_back(result);
    }

    /// Queue the data stage for the next control IN request
    pub fn push_control_in(&self, data: Vec<u8>) {
        lock(&self.state.control_in).push_back(data);
    }

    /// Fail every control request with this bRequest
    pub fn fail_control(&self, request: u8, error: TransferError) {
        lock(&self.state.control_failures).insert(request, error);
    }

    pub fn clear_control_failures(&self) {
        lock(&self.state.control_failures).clear();
    }

    pub fn fail_claim(&self, interface: u8) {
        lock(&self.state.claim_failures).insert(interface);
    }

    pub fn clear_claim_failures(&self) {
        lock(&self.state.claim_failures).clear();
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Bulk writes entered, including ones still blocked or failed
    pub fn write_attempts(&self) -> usize {
        self.state.write_attempts.load(Ordering::SeqCst)
    }

    /// All bulk writes as `(endpoint, data)`
    pub fn write_calls(&self) -> Vec<(u8, Vec<u8>)> {
        lock(&self.state.writes).clone()
    }

    /// Concatenation of every accepted bulk write
    pub fn written(&self) -> Vec<u8> {
        lock(&self.state.writes)
            .iter()
            .flat_map(|(_, data)| data.iter().copied())
            .collect()
    }

    pub fn control_requests(&self) -> Vec<ControlRequest> {
        lock(&self.state.control_log).clone()
    }

    /// Control requests with the given bRequest
    pub fn control_requests_for(&self, request: u8) -> Vec<ControlRequest> {
        lock(&self.state.control_log)
            .iter()
            .filter(|r| r.request == request)
            .cloned()
            .collect()
    }

    pub fn clear_control_log(&self) {
        lock(&self.state.control_log).clear();
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        lock(&self.state.claimed).clone()
    }

    pub fn released_interfaces(&self) -> Vec<u8> {
        lock(&self.state.released).clone()
    }

    /// Handles handed out by `open`
    pub fn open_count(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Handles dropped so far
    pub fn close_count(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Handles currently alive
    pub fn open_handles(&self) -> usize {
        self.open_count() - self.close_count()
    }
}

impl UsbDevice for MockUsbDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&self) -> Result<Box<dyn UsbHandle>, TransferError> {
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(TransferError::Access);
        }
        self.state.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockHandle {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockHandle {
    state: Arc<MockState>,
}

impl MockHandle {
    fn next_read(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        *lock(&self.state.read_calls).entry(endpoint).or_default() += 1;
        lock(&self.state.read_timeouts).insert(endpoint, timeout);

        let next = lock(&self.state.reads)
            .get_mut(&endpoint)
            .and_then(|q| q.pop_front());

        match next {
            Some(MockRead::Data(data)) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            Some(MockRead::Error(e)) => Err(e),
            None => {
                std::thread::sleep(timeout.min(MOCK_READ_BLOCK));
                Err(TransferError::Timeout)
            }
        }
    }

    fn record_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        data: Vec<u8>,
    ) -> Result<(), TransferError> {
        lock(&self.state.control_log).push(ControlRequest {
            request_type,
            request,
            value,
            index,
            data,
        });
        match lock(&self.state.control_failures).get(&request) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl UsbHandle for MockHandle {
    fn claim_interface(&mut self, interface: u8, _force: bool) -> Result<(), TransferError> {
        if lock(&self.state.claim_failures).contains(&interface) {
            return Err(TransferError::Busy);
        }
        lock(&self.state.claimed).push(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), TransferError> {
        lock(&self.state.released).push(interface);
        Ok(())
    }

    fn read_bulk(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.next_read(endpoint, buf, timeout)
    }

    fn write_bulk(
        &self,
        endpoint: u8,
        buf: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.state.write_attempts.fetch_add(1, Ordering::SeqCst);
        let result = lock(&self.state.write_results)
            .pop_front()
            .unwrap_or(MockWrite::Accept);

        let accepted = match result {
            MockWrite::Accept => buf.len(),
            MockWrite::Partial(n) => n.min(buf.len()),
            MockWrite::Delay(pause) => {
                std::thread::sleep(pause);
                buf.len()
            }
            MockWrite::Fail(e) => return Err(e),
        };
        lock(&self.state.writes).push((endpoint, buf[..accepted].to_vec()));
        Ok(accepted)
    }

    fn read_interrupt(
        &self,
        endpoint: u8,
        buf: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.next_read(endpoint, buf, timeout)
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.record_control(request_type, request, value, index, vec![0; buf.len()])?;
        match lock(&self.state.control_in).pop_front() {
            Some(data) => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            None => Ok(buf.len()),
        }
    }

    fn write_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buf: &[u8],
        _timeout: Duration,
    ) -> Result<usize, TransferError> {
        self.record_control(request_type, request, value, index, buf.to_vec())?;
        Ok(buf.len())
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
