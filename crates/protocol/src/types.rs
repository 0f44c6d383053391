//! Serial line and driver type definitions
//!
//! This module defines the framing parameters shared by every chip variant
//! (data bits, parity, stop bits, baud rate) and the closed set of protocol
//! variants the port engine knows how to drive.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default baud rate programmed on open
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Number of data bits per character (5..=8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl DataBits {
    /// Raw bit count as sent on the wire
    pub fn bits(self) -> u8 {
        match self {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = ProtocolError;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ProtocolError::InvalidDataBits(other)),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        bits.bits()
    }
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Standard parity code shared by CDC line coding, FTDI and PL2303
    pub fn code(self) -> u8 {
        match self {
            Parity::None => 0,
            Parity::Odd => 1,
            Parity::Even => 2,
            Parity::Mark => 3,
            Parity::Space => 4,
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopBits {
    #[default]
    One,
    OnePointFive,
    Two,
}

impl StopBits {
    /// Standard stop-bits code shared by CDC line coding, FTDI and PL2303
    pub fn code(self) -> u8 {
        match self {
            StopBits::One => 0,
            StopBits::OnePointFive => 1,
            StopBits::Two => 2,
        }
    }
}

/// Complete serial framing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl LineConfig {
    pub fn new(baud_rate: u32, data_bits: DataBits, parity: Parity, stop_bits: StopBits) -> Self {
        Self {
            baud_rate,
            data_bits,
            parity,
            stop_bits,
        }
    }

    /// Reject a zero baud rate before anything touches the hardware
    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == 0 {
            return Err(ProtocolError::InvalidBaudRate(self.baud_rate));
        }
        Ok(())
    }
}

impl Default for LineConfig {
    /// 9600 8N1
    fn default() -> Self {
        Self::new(
            DEFAULT_BAUD_RATE,
            DataBits::Eight,
            Parity::None,
            StopBits::One,
        )
    }
}

impl fmt::Display for LineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(
            f,
            "{} {}{}{}",
            self.baud_rate,
            self.data_bits.bits(),
            parity,
            stop
        )
    }
}

/// Protocol variant used to drive a device
///
/// The mapping from vendor/product ID to a variant is supplied by the
/// caller (configuration), never inferred by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Generic CDC/ACM class driver
    CdcAcm,
    /// Silicon Labs CP210x style register interface
    Cp21xx,
    /// FTDI style status-header protocol
    Ftdi,
    /// Prolific PL2303 style protocol
    Prolific,
}

impl DriverKind {
    /// Number of serial ports exposed by one device of this family
    pub fn port_count(self) -> u8 {
        match self {
            DriverKind::CdcAcm | DriverKind::Cp21xx | DriverKind::Ftdi | DriverKind::Prolific => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DriverKind::CdcAcm => "cdc_acm",
            DriverKind::Cp21xx => "cp21xx",
            DriverKind::Ftdi => "ftdi",
            DriverKind::Prolific => "prolific",
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for DriverKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cdc_acm" | "cdc" | "acm" => Ok(DriverKind::CdcAcm),
            "cp21xx" | "cp210x" => Ok(DriverKind::Cp21xx),
            "ftdi" => Ok(DriverKind::Ftdi),
            "prolific" | "pl2303" => Ok(DriverKind::Prolific),
            other => Err(ProtocolError::UnknownDriver(other.to_string())),
        }
    }
}
