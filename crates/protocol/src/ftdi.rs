//! FTDI style request encoding
//!
//! Covers the fractional baud-rate divisor search, the data-characteristics
//! word, the modem-control values and the 2-byte modem-status header that
//! prefixes every max-packet-size chunk of bulk IN data.

use crate::error::{ProtocolError, Result};
use crate::types::{LineConfig, Parity, StopBits};

/// bmRequestType for vendor requests (host to device)
pub const REQTYPE_OUT: u8 = 0x40;

pub const SIO_RESET_REQUEST: u8 = 0x00;
pub const SIO_MODEM_CTRL_REQUEST: u8 = 0x01;
pub const SIO_SET_BAUD_RATE_REQUEST: u8 = 0x03;
pub const SIO_SET_DATA_REQUEST: u8 = 0x04;

pub const SIO_RESET_SIO: u16 = 0;
pub const SIO_RESET_PURGE_RX: u16 = 1;
pub const SIO_RESET_PURGE_TX: u16 = 2;

pub const SIO_SET_DTR_HIGH: u16 = 0x0101;
pub const SIO_SET_DTR_LOW: u16 = 0x0100;
pub const SIO_SET_RTS_HIGH: u16 = 0x0202;
pub const SIO_SET_RTS_LOW: u16 = 0x0200;

/// Length of the modem status header at the start of each packet
pub const MODEM_STATUS_HEADER_LENGTH: usize = 2;

/// Reference clock, in units of 1/8 of the 3 MHz base
pub const REFERENCE_CLOCK: u32 = 24_000_000;

const MIN_DIVISOR: u32 = 8;
const MAX_DIVISOR: u32 = 0x1FFFF;

/// Encoding of the low three divisor bits
const FRAC_CODE: [u32; 8] = [0, 3, 2, 4, 1, 5, 6, 7];

const STATUS_CTS: u8 = 0x10;
const STATUS_DSR: u8 = 0x20;
const STATUS_RI: u8 = 0x40;
const STATUS_RLSD: u8 = 0x80;

/// FTDI chip generation, which bounds the legal divisors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FtdiChip {
    Am,
    Bm,
    Ft2232C,
    #[default]
    R,
    Ft2232H,
    Ft4232H,
}

impl FtdiChip {
    /// Detect the chip generation from `bcdDevice`
    ///
    /// Unknown release numbers fall back to the R generation.
    pub fn from_bcd_device(bcd_device: u16) -> Self {
        match bcd_device {
            0x0200 => FtdiChip::Am,
            0x0400 => FtdiChip::Bm,
            0x0500 => FtdiChip::Ft2232C,
            0x0600 => FtdiChip::R,
            0x0700 => FtdiChip::Ft2232H,
            0x0800 => FtdiChip::Ft4232H,
            _ => FtdiChip::R,
        }
    }

    /// Chips with more than one UART interface encode the port in `wIndex`
    pub fn is_multi_interface(self) -> bool {
        matches!(
            self,
            FtdiChip::Ft2232C | FtdiChip::Ft2232H | FtdiChip::Ft4232H
        )
    }
}

/// Result of the divisor search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaudDivisor {
    /// Baud rate the chip will actually run at
    pub actual_baud: u32,
    /// Divisor after fractional encoding and special cases
    pub encoded: u32,
    /// `wValue` for `SIO_SET_BAUD_RATE_REQUEST`
    pub value: u16,
    /// `wIndex` for `SIO_SET_BAUD_RATE_REQUEST`
    pub index: u16,
}

/// Search for the divisor closest to the requested baud rate
///
/// `port_index` is only merged into `index` for multi-interface chips.
pub fn convert_baud_rate(baud_rate: u32, chip: FtdiChip, port_index: u16) -> Result<BaudDivisor> {
    if baud_rate == 0 {
        return Err(ProtocolError::InvalidBaudRate(baud_rate));
    }

    let divisor = REFERENCE_CLOCK / baud_rate;
    let mut best_divisor = 0;
    let mut best_baud = 0;
    let mut best_diff = 0;

    for i in 0..2 {
        let mut try_divisor = divisor + i;

        if try_divisor <= MIN_DIVISOR {
            try_divisor = MIN_DIVISOR;
        } else if chip != FtdiChip::Am && try_divisor < 12 {
            try_divisor = 12;
        } else if divisor < 16 {
            try_divisor = 16;
        } else if try_divisor > MAX_DIVISOR {
            try_divisor = MAX_DIVISOR;
        }

        let estimate = (REFERENCE_CLOCK + try_divisor / 2) / try_divisor;
        let diff = estimate.abs_diff(baud_rate);

        if i == 0 || diff < best_diff {
            best_divisor = try_divisor;
            best_baud = estimate;
            best_diff = diff;
            if diff == 0 {
                break;
            }
        }
    }

    let mut encoded = (best_divisor >> 3) | (FRAC_CODE[(best_divisor & 7) as usize] << 14);
    // 3 Mbaud and 2 Mbaud have dedicated encodings
    if encoded == 1 {
        encoded = 0;
    } else if encoded == 0x4001 {
        encoded = 1;
    }

    let value = (encoded & 0xFFFF) as u16;
    let index = if chip.is_multi_interface() {
        (((encoded >> 8) & 0xFF00) as u16) | port_index
    } else {
        ((encoded >> 16) & 0xFFFF) as u16
    };

    Ok(BaudDivisor {
        actual_baud: best_baud,
        encoded,
        value,
        index,
    })
}

/// Pack the `SIO_SET_DATA_REQUEST` word
///
/// Data bits in the low byte, parity code in bits 8..=10, stop-bits code in
/// bits 11..=12. Every parity and stop-bits setting has an encoding.
pub fn data_word(config: &LineConfig) -> u16 {
    let mut word = u16::from(config.data_bits.bits());

    word |= match config.parity {
        Parity::None => 0x00 << 8,
        Parity::Odd => 0x01 << 8,
        Parity::Even => 0x02 << 8,
        Parity::Mark => 0x03 << 8,
        Parity::Space => 0x04 << 8,
    };

    word |= match config.stop_bits {
        StopBits::One => 0x00 << 11,
        StopBits::OnePointFive => 0x01 << 11,
        StopBits::Two => 0x02 << 11,
    };

    word
}

/// `SIO_MODEM_CTRL_REQUEST` value for DTR
pub fn dtr_value(state: bool) -> u16 {
    if state { SIO_SET_DTR_HIGH } else { SIO_SET_DTR_LOW }
}

/// `SIO_MODEM_CTRL_REQUEST` value for RTS
pub fn rts_value(state: bool) -> u16 {
    if state { SIO_SET_RTS_HIGH } else { SIO_SET_RTS_LOW }
}

/// Modem status carried in the first header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModemStatus(pub u8);

impl ModemStatus {
    pub fn cts(self) -> bool {
        self.0 & STATUS_CTS != 0
    }

    pub fn dsr(self) -> bool {
        self.0 & STATUS_DSR != 0
    }

    pub fn ri(self) -> bool {
        self.0 & STATUS_RI != 0
    }

    pub fn cd(self) -> bool {
        self.0 & STATUS_RLSD != 0
    }
}

/// Strip the status header from every packet of a raw bulk read
///
/// Payload is compacted in place at the front of `data`. Returns the payload
/// length and the status of the last packet. A read shorter than one header
/// is a protocol violation.
pub fn strip_status_headers(data: &mut [u8], packet_size: usize) -> Result<(usize, ModemStatus)> {
    let total = data.len();
    if total < MODEM_STATUS_HEADER_LENGTH {
        return Err(ProtocolError::ShortStatusHeader {
            expected: MODEM_STATUS_HEADER_LENGTH,
            actual: total,
        });
    }

    let packet_size = packet_size.max(MODEM_STATUS_HEADER_LENGTH + 1);
    let mut write_pos = 0;
    let mut status = ModemStatus::default();

    for packet_start in (0..total).step_by(packet_size) {
        let packet_end = (packet_start + packet_size).min(total);
        if packet_end - packet_start < MODEM_STATUS_HEADER_LENGTH {
            continue;
        }
        status = ModemStatus(data[packet_start]);

        let payload_start = packet_start + MODEM_STATUS_HEADER_LENGTH;
        let payload_len = packet_end - payload_start;
        if payload_len > 0 && write_pos != payload_start {
            data.copy_within(payload_start..packet_end, write_pos);
        }
        write_pos += payload_len;
    }

    Ok((write_pos, status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataBits;

    #[test]
    fn test_chip_detection() {
        assert_eq!(FtdiChip::from_bcd_device(0x0200), FtdiChip::Am);
        assert_eq!(FtdiChip::from_bcd_device(0x0600), FtdiChip::R);
        assert_eq!(FtdiChip::from_bcd_device(0x0700), FtdiChip::Ft2232H);
        assert_eq!(FtdiChip::from_bcd_device(0x1234), FtdiChip::R);
        assert!(FtdiChip::Ft4232H.is_multi_interface());
        assert!(!FtdiChip::R.is_multi_interface());
    }

    #[test]
    fn test_divisor_9600() {
        let div = convert_baud_rate(9600, FtdiChip::R, 0).unwrap();
        // 24_000_000 / 9600 = 2500 = 312 * 8 + 4, frac code for 4 is 1
        assert_eq!(div.encoded, 0x4138);
        assert_eq!(div.value, 0x4138);
        assert_eq!(div.index, 0);
        assert_eq!(div.actual_baud, 9600);
    }

    #[test]
    fn test_divisor_special_cases() {
        let div = convert_baud_rate(3_000_000, FtdiChip::R, 0).unwrap();
        assert_eq!(div.encoded, 0);
        assert_eq!(div.value, 0);
        assert_eq!(div.actual_baud, 3_000_000);

        // Above 3 Mbaud clamps to the minimum divisor
        let div = convert_baud_rate(6_000_000, FtdiChip::R, 0).unwrap();
        assert_eq!(div.encoded, 0);
    }

    #[test]
    fn test_divisor_am_clamps_to_16() {
        // divisor 10 is below 16 on AM chips
        let div = convert_baud_rate(2_400_000, FtdiChip::Am, 0).unwrap();
        assert_eq!(div.actual_baud, 1_500_000);
        assert_eq!(div.encoded, 2);
    }

    #[test]
    fn test_divisor_non_am_clamps_to_12() {
        let div = convert_baud_rate(2_400_000, FtdiChip::R, 0).unwrap();
        assert_eq!(div.actual_baud, 2_000_000);
        assert_eq!(div.encoded, 1);
    }

    #[test]
    fn test_divisor_large_value_sets_index() {
        // 24_000_000 / 300 = 80000 = 10000 * 8, encoded 10000 = 0x2710
        let div = convert_baud_rate(300, FtdiChip::R, 0).unwrap();
        assert_eq!(div.value, 0x2710);
        assert_eq!(div.index, 0);

        // 24_000_000 / 183 = 131147 -> clamped to 0x1FFFF
        let div = convert_baud_rate(183, FtdiChip::R, 0).unwrap();
        assert_eq!(div.encoded, (0x1FFFF >> 3) | (7 << 14));
        assert_eq!(div.index, ((div.encoded >> 16) & 0xFFFF) as u16);
    }

    #[test]
    fn test_divisor_multi_interface_index() {
        let div = convert_baud_rate(9600, FtdiChip::Ft2232H, 1).unwrap();
        assert_eq!(div.value, 0x4138);
        // only bits 16.. of the encoded divisor reach the index high byte
        assert_eq!(div.index, 1);
    }

    #[test]
    fn test_divisor_deterministic() {
        let a = convert_baud_rate(115_200, FtdiChip::R, 0).unwrap();
        let b = convert_baud_rate(115_200, FtdiChip::R, 0).unwrap();
        assert_eq!(a, b);
        assert!(convert_baud_rate(0, FtdiChip::R, 0).is_err());
    }

    #[test]
    fn test_data_word() {
        let config = LineConfig::default();
        assert_eq!(data_word(&config), 0x0008);

        let config = LineConfig::new(9600, DataBits::Seven, Parity::Space, StopBits::Two);
        assert_eq!(data_word(&config), 7 | (4 << 8) | (2 << 11));

        let config = LineConfig::new(9600, DataBits::Eight, Parity::Odd, StopBits::OnePointFive);
        assert_eq!(data_word(&config), 8 | (1 << 8) | (1 << 11));
    }

    #[test]
    fn test_modem_ctrl_values() {
        assert_eq!(dtr_value(true), 0x0101);
        assert_eq!(dtr_value(false), 0x0100);
        assert_eq!(rts_value(true), 0x0202);
        assert_eq!(rts_value(false), 0x0200);
    }

    #[test]
    fn test_strip_single_packet() {
        let mut data = vec![0x31, 0x60, b'h', b'i'];
        let (len, status) = strip_status_headers(&mut data, 64).unwrap();
        assert_eq!(len, 2);
        assert_eq!(&data[..len], b"hi");
        assert!(status.cts());
        assert!(status.dsr());
        assert!(!status.ri());
        assert!(!status.cd());
    }

    #[test]
    fn test_strip_multiple_packets() {
        let mut data = vec![0x01, 0x60, 2, 3, 4, 0x81, 0x60, 5, 6, 7, 0x01, 0x60, 8];
        let (len, status) = strip_status_headers(&mut data, 5).unwrap();
        assert_eq!(&data[..len], &[2, 3, 4, 5, 6, 7, 8]);
        assert!(!status.cd());
    }

    #[test]
    fn test_strip_header_only() {
        let mut data = vec![0x81, 0x60];
        let (len, status) = strip_status_headers(&mut data, 64).unwrap();
        assert_eq!(len, 0);
        assert!(status.cd());
    }

    #[test]
    fn test_strip_short_read_is_violation() {
        let mut data = vec![0x01];
        assert_eq!(
            strip_status_headers(&mut data, 64),
            Err(ProtocolError::ShortStatusHeader {
                expected: 2,
                actual: 1
            })
        );
        let mut empty: Vec<u8> = Vec::new();
        assert!(strip_status_headers(&mut empty, 64).is_err());
    }
}
