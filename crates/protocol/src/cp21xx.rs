//! CP21xx register-style request encoding
//!
//! Every setting is a single vendor control write with the payload carried
//! in `wValue`; no data stage is used.

use crate::error::{ProtocolError, Result};
use crate::types::{DataBits, LineConfig, Parity, StopBits};

/// bmRequestType for vendor requests addressed to an interface (host to device)
pub const REQTYPE_HOST_TO_DEVICE: u8 = 0x41;

pub const IFC_ENABLE: u8 = 0x00;
pub const SET_BAUDDIV: u8 = 0x01;
pub const SET_LINE_CTL: u8 = 0x03;
pub const SET_MHS: u8 = 0x07;
pub const PURGE: u8 = 0x12;

pub const UART_ENABLE: u16 = 0x0001;
pub const UART_DISABLE: u16 = 0x0000;

/// Baud rate generator reference frequency
pub const BAUD_RATE_GEN_FREQ: u32 = 0x0038_4000;

pub const MCR_DTR: u16 = 0x0001;
pub const MCR_RTS: u16 = 0x0002;
pub const MCR_ALL: u16 = MCR_DTR | MCR_RTS;
pub const CONTROL_WRITE_DTR: u16 = 0x0100;
pub const CONTROL_WRITE_RTS: u16 = 0x0200;

/// Purge sub-flag for the receive side
pub const FLUSH_READ_CODE: u16 = 0x000a;
/// Purge sub-flag for the transmit side
pub const FLUSH_WRITE_CODE: u16 = 0x0005;

const DRIVER: &str = "cp21xx";

/// Divisor register value: `round(BAUD_RATE_GEN_FREQ / baud)`
pub fn baud_divisor(baud_rate: u32) -> Result<u16> {
    if baud_rate == 0 {
        return Err(ProtocolError::InvalidBaudRate(baud_rate));
    }
    let divisor = (BAUD_RATE_GEN_FREQ + baud_rate / 2) / baud_rate;
    if divisor == 0 || divisor > u32::from(u16::MAX) {
        return Err(ProtocolError::InvalidBaudRate(baud_rate));
    }
    Ok(divisor as u16)
}

/// Pack data bits, parity and stop bits into the `SET_LINE_CTL` word
///
/// Bits 8..=11 carry the data width, bits 4..=5 the parity, bit 1 selects
/// two stop bits. Space parity and 1.5 stop bits have no encoding.
pub fn line_control(data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Result<u16> {
    let mut config: u16 = match data_bits {
        DataBits::Five => 0x0500,
        DataBits::Six => 0x0600,
        DataBits::Seven => 0x0700,
        DataBits::Eight => 0x0800,
    };

    config |= match parity {
        Parity::None => 0x0000,
        Parity::Odd => 0x0010,
        Parity::Even => 0x0020,
        Parity::Mark => 0x0030,
        Parity::Space => {
            return Err(ProtocolError::UnsupportedParity {
                driver: DRIVER,
                parity,
            });
        }
    };

    config |= match stop_bits {
        StopBits::One => 0x0000,
        StopBits::Two => 0x0002,
        StopBits::OnePointFive => {
            return Err(ProtocolError::UnsupportedStopBits {
                driver: DRIVER,
                stop_bits,
            });
        }
    };

    Ok(config)
}

/// Encode both registers for a line configuration
///
/// Returns `(divisor, line_control)`; fails before either is written.
pub fn encode_line_config(config: &LineConfig) -> Result<(u16, u16)> {
    let divisor = baud_divisor(config.baud_rate)?;
    let control = line_control(config.data_bits, config.parity, config.stop_bits)?;
    Ok((divisor, control))
}

/// Purge code for the requested sides, `None` when nothing is requested
pub fn purge_code(read: bool, write: bool) -> Option<u16> {
    let mut value = 0;
    if read {
        value |= FLUSH_READ_CODE;
    }
    if write {
        value |= FLUSH_WRITE_CODE;
    }
    (value != 0).then_some(value)
}
