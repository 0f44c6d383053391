//! rusb implementation of the USB transfer contract

mod device;
mod transfers;

pub use device::{RusbDevice, list_devices};
pub use transfers::{RusbHandle, map_rusb_error};
