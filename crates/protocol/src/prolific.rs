//! PL2303 style request encoding
//!
//! The PL2303 needs a fixed vendor read/write sequence before first use,
//! takes its line parameters as a class-style 7-byte request and reports
//! modem status on an interrupt endpoint.

use crate::cdc;
use crate::error::{ProtocolError, Result};
use crate::types::LineConfig;

pub const VENDOR_OUT_REQTYPE: u8 = 0x40;
pub const VENDOR_IN_REQTYPE: u8 = 0xC0;
pub const CTRL_OUT_REQTYPE: u8 = 0x21;

pub const VENDOR_READ_REQUEST: u8 = 0x01;
pub const VENDOR_WRITE_REQUEST: u8 = 0x01;

pub const SET_LINE_REQUEST: u8 = 0x20;
pub const SET_CONTROL_REQUEST: u8 = 0x22;

pub const FLUSH_RX_REQUEST: u16 = 0x08;
pub const FLUSH_TX_REQUEST: u16 = 0x09;

pub const WRITE_ENDPOINT: u8 = 0x02;
pub const READ_ENDPOINT: u8 = 0x83;
pub const INTERRUPT_ENDPOINT: u8 = 0x81;

pub const CONTROL_DTR: u16 = 0x01;
pub const CONTROL_RTS: u16 = 0x02;

pub const STATUS_FLAG_CD: u8 = 0x01;
pub const STATUS_FLAG_DSR: u8 = 0x02;
pub const STATUS_FLAG_RI: u8 = 0x08;
pub const STATUS_FLAG_CTS: u8 = 0x80;

/// Size of an interrupt status notification
pub const STATUS_BUFFER_SIZE: usize = 10;
/// Offset of the modem status byte within the notification
pub const STATUS_BYTE_IDX: usize = 8;

/// PL2303 silicon generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Pl2303Type {
    #[default]
    Hx,
    Type0,
    Type1,
}

/// Outcome of subtype detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Detection {
    pub device_type: Pl2303Type,
    /// Detection could not decide and fell back to HX
    pub fallback: bool,
}

/// Detect the PL2303 subtype from the device class and `bMaxPacketSize0`
pub fn detect_type(device_class: u8, max_packet_size0: u8) -> Detection {
    let (device_type, fallback) = if device_class == 0x02 {
        (Pl2303Type::Type0, false)
    } else if max_packet_size0 == 64 {
        (Pl2303Type::Hx, false)
    } else if device_class == 0x00 || device_class == 0xFF {
        (Pl2303Type::Type1, false)
    } else {
        (Pl2303Type::Hx, true)
    };
    Detection {
        device_type,
        fallback,
    }
}

/// One step of the bring-up sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    /// Vendor read of `length` bytes
    VendorIn { value: u16, index: u16, length: u16 },
    /// Vendor write without data stage
    VendorOut { value: u16, index: u16 },
}

/// Fixed vendor sequence the chip needs before first use
pub fn init_sequence(device_type: Pl2303Type) -> Vec<InitStep> {
    use InitStep::{VendorIn, VendorOut};

    let last_index = if device_type == Pl2303Type::Hx {
        0x44
    } else {
        0x24
    };

    vec![
        VendorIn { value: 0x8484, index: 0, length: 1 },
        VendorOut { value: 0x0404, index: 0 },
        VendorIn { value: 0x8484, index: 0, length: 1 },
        VendorIn { value: 0x8383, index: 0, length: 1 },
        VendorIn { value: 0x8484, index: 0, length: 1 },
        VendorOut { value: 0x0404, index: 1 },
        VendorIn { value: 0x8484, index: 0, length: 1 },
        VendorIn { value: 0x8383, index: 0, length: 1 },
        VendorOut { value: 0, index: 1 },
        VendorOut { value: 1, index: 0 },
        VendorOut { value: 2, index: last_index },
    ]
}

/// Encode the `SET_LINE_REQUEST` payload
///
/// Same layout as CDC line coding: baud (u32 LE), stop code, parity code,
/// data bits.
pub fn encode_line_request(config: &LineConfig) -> Result<[u8; cdc::LINE_CODING_LEN]> {
    config.validate()?;
    Ok(cdc::encode_line_coding(config))
}

/// Extract the modem status byte from an interrupt notification
pub fn parse_status(buf: &[u8]) -> Result<u8> {
    if buf.len() != STATUS_BUFFER_SIZE {
        return Err(ProtocolError::InvalidStatusBuffer {
            expected: STATUS_BUFFER_SIZE,
            actual: buf.len(),
        });
    }
    Ok(buf[STATUS_BYTE_IDX])
}

/// Apply a DTR/RTS change to the control-line bitmask
pub fn update_control_lines(current: u16, flag: u16, state: bool) -> u16 {
    if state { current | flag } else { current & !flag }
}
