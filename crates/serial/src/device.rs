//! Physical device aggregate
//!
//! Groups the ports of one USB device behind one chip variant.

use crate::port::{PortSettings, SerialPort};
use common::{DeviceInfo, Error, UsbDevice};
use protocol::DriverKind;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SerialDevice {
    device: Arc<dyn UsbDevice>,
    kind: DriverKind,
    ports: Vec<Arc<SerialPort>>,
}

impl SerialDevice {
    /// One port per channel of the chip family
    pub fn new(device: Arc<dyn UsbDevice>, kind: DriverKind, settings: PortSettings) -> Self {
        Self::with_port_count(device, kind, kind.port_count(), settings)
    }

    /// Bind an explicit number of ports, numbered from zero
    pub fn with_port_count(
        device: Arc<dyn UsbDevice>,
        kind: DriverKind,
        port_count: u8,
        settings: PortSettings,
    ) -> Self {
        let ports = (0..port_count)
            .map(|n| {
                Arc::new(SerialPort::new(
                    Arc::clone(&device),
                    kind,
                    n,
                    settings.clone(),
                ))
            })
            .collect();
        debug!("{} bound as {} with {} port(s)", device.info(), kind, port_count);

        Self {
            device,
            kind,
            ports,
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        self.device.info()
    }

    pub fn kind(&self) -> DriverKind {
        self.kind
    }

    pub fn ports(&self) -> &[Arc<SerialPort>] {
        &self.ports
    }

    pub fn port(&self, n: usize) -> Option<&Arc<SerialPort>> {
        self.ports.get(n)
    }

    /// Close every port, continuing past failures
    ///
    /// Returns the failures by port number; every port ends up closed.
    pub fn close(&self) -> Vec<(u8, Error)> {
        let mut failures = Vec::new();
        for port in &self.ports {
            if let Err(e) = port.close() {
                warn!("Failed to close port {}: {}", port.id(), e);
                failures.push((port.port_number(), e));
            }
        }
        failures
    }
}
