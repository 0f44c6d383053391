//! rusb device wrapper

use super::transfers::{RusbHandle, map_rusb_error};
use common::{
    DeviceInfo, EndpointInfo, EndpointKind, InterfaceInfo, TransferError, UsbDevice, UsbHandle,
};
use rusb::{Context, Device, TransferType, UsbContext};
use tracing::{debug, warn};

/// A device found on the bus with its descriptors cached
pub struct RusbDevice {
    device: Device<Context>,
    info: DeviceInfo,
}

impl RusbDevice {
    pub fn new(device: Device<Context>) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;
        let version = descriptor.device_version();

        let interfaces = match device.active_config_descriptor() {
            Ok(config) => config
                .interfaces()
                .filter_map(|interface| {
                    // First alternate setting only
                    interface.descriptors().next().map(|alt| InterfaceInfo {
                        number: alt.interface_number(),
                        class: alt.class_code(),
                        endpoints: alt
                            .endpoint_descriptors()
                            .map(|ep| {
                                EndpointInfo::new(
                                    ep.address(),
                                    map_transfer_type(ep.transfer_type()),
                                    ep.max_packet_size(),
                                )
                            })
                            .collect(),
                    })
                })
                .collect(),
            Err(e) => {
                warn!(
                    "Failed to get active config descriptor for {:03}:{:03}: {}",
                    device.bus_number(),
                    device.address(),
                    e
                );
                Vec::new()
            }
        };

        let info = DeviceInfo {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            bus_number: device.bus_number(),
            device_address: device.address(),
            class: descriptor.class_code(),
            max_packet_size0: descriptor.max_packet_size(),
            bcd_device: to_bcd(version.major(), version.minor(), version.sub_minor()),
            interfaces,
        };

        Ok(Self { device, info })
    }
}

impl UsbDevice for RusbDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn open(&self) -> Result<Box<dyn UsbHandle>, TransferError> {
        let handle = self.device.open().map_err(map_rusb_error)?;
        debug!("Opened device {}", self.info);
        Ok(Box::new(RusbHandle::new(handle)))
    }
}

/// Every device on the bus whose descriptors can be read
pub fn list_devices(context: &Context) -> Result<Vec<RusbDevice>, rusb::Error> {
    let mut found = Vec::new();
    for device in context.devices()?.iter() {
        match RusbDevice::new(device) {
            Ok(device) => found.push(device),
            Err(e) => debug!("Skipping device: {}", e),
        }
    }
    Ok(found)
}

fn map_transfer_type(transfer_type: TransferType) -> EndpointKind {
    match transfer_type {
        TransferType::Control => EndpointKind::Control,
        TransferType::Isochronous => EndpointKind::Isochronous,
        TransferType::Bulk => EndpointKind::Bulk,
        TransferType::Interrupt => EndpointKind::Interrupt,
    }
}

/// Re-pack a decoded release number as `bcdDevice`
fn to_bcd(major: u8, minor: u8, sub_minor: u8) -> u16 {
    (u16::from(major / 10) << 12)
        | (u16::from(major % 10) << 8)
        | (u16::from(minor & 0x0F) << 4)
        | u16::from(sub_minor & 0x0F)
}
