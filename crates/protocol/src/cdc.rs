//! CDC/ACM class request encoding
//!
//! The communications device class carries line coding as a 7-byte
//! structure and control-line state as a bitmask in `wValue`.

use crate::types::LineConfig;
use byteorder::{ByteOrder, LittleEndian};

/// bmRequestType for class requests addressed to an interface (host to device)
pub const REQTYPE_CLASS_INTERFACE_OUT: u8 = 0x21;

pub const SET_LINE_CODING: u8 = 0x20;
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;
pub const SEND_BREAK: u8 = 0x23;

/// Control-line bit for DTR
pub const CONTROL_DTR: u16 = 0x01;
/// Control-line bit for RTS
pub const CONTROL_RTS: u16 = 0x02;

/// Size of the line coding structure
pub const LINE_CODING_LEN: usize = 7;

/// Encode the line coding structure
///
/// Layout: baud rate (u32 LE), stop-bits code, parity code, data bits.
/// Every parity and stop-bits value has a code, so this cannot fail.
pub fn encode_line_coding(config: &LineConfig) -> [u8; LINE_CODING_LEN] {
    let mut buf = [0u8; LINE_CODING_LEN];
    LittleEndian::write_u32(&mut buf[0..4], config.baud_rate);
    buf[4] = config.stop_bits.code();
    buf[5] = config.parity.code();
    buf[6] = config.data_bits.bits();
    buf
}

/// Encode the `SET_CONTROL_LINE_STATE` value
pub fn control_line_state(dtr: bool, rts: bool) -> u16 {
    let mut value = 0;
    if dtr {
        value |= CONTROL_DTR;
    }
    if rts {
        value |= CONTROL_RTS;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataBits, Parity, StopBits};

    #[test]
    fn test_line_coding_default() {
        let buf = encode_line_coding(&LineConfig::default());
        assert_eq!(buf, [0x80, 0x25, 0x00, 0x00, 0, 0, 8]);
    }

    #[test]
    fn test_line_coding_fields() {
        let config = LineConfig::new(115_200, DataBits::Seven, Parity::Even, StopBits::Two);
        let buf = encode_line_coding(&config);
        assert_eq!(&buf[0..4], &[0x00, 0xC2, 0x01, 0x00]);
        assert_eq!(buf[4], 2);
        assert_eq!(buf[5], 2);
        assert_eq!(buf[6], 7);
    }

    #[test]
    fn test_control_line_state() {
        assert_eq!(control_line_state(false, false), 0);
        assert_eq!(control_line_state(true, false), 0x01);
        assert_eq!(control_line_state(false, true), 0x02);
        assert_eq!(control_line_state(true, true), 0x03);
    }
}
