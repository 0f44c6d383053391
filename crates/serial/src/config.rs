//! Configuration management
//!
//! Line defaults, port tunables and the table that maps vendor/product IDs
//! to chip variants. The engine never inspects device identity itself; the
//! CLI resolves a variant here and hands it to [`crate::SerialDevice`].

use crate::port::{self, PortSettings};
use crate::ring_buffer;
use anyhow::{Context, Result, anyhow};
use common::DeviceInfo;
use protocol::{DEFAULT_BAUD_RATE, DataBits, DriverKind, LineConfig, Parity, StopBits};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// USB class code of a communications device / interface
const CLASS_COMM: u8 = 0x02;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    #[serde(default)]
    pub serial: SerialSettings,
    #[serde(default)]
    pub port: PortTunables,
    /// Vendor/product ID to variant table
    #[serde(default = "SerialConfig::default_devices")]
    pub devices: Vec<DeviceMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    #[serde(default = "SerialSettings::default_log_level")]
    pub log_level: String,
    #[serde(default = "SerialSettings::default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "SerialSettings::default_data_bits")]
    pub data_bits: DataBits,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stop_bits: StopBits,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            baud_rate: Self::default_baud_rate(),
            data_bits: Self::default_data_bits(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
        }
    }
}

impl SerialSettings {
    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_baud_rate() -> u32 {
        DEFAULT_BAUD_RATE
    }

    fn default_data_bits() -> DataBits {
        DataBits::Eight
    }
}

/// Buffer sizes and timeouts applied to every port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortTunables {
    #[serde(default = "PortTunables::default_read_buffer_size")]
    pub read_buffer_size: usize,
    #[serde(default = "PortTunables::default_write_buffer_size")]
    pub write_buffer_size: usize,
    #[serde(default = "PortTunables::default_read_chunk_size")]
    pub read_chunk_size: usize,
    #[serde(default = "PortTunables::default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    #[serde(default = "PortTunables::default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    #[serde(default = "PortTunables::default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for PortTunables {
    fn default() -> Self {
        Self {
            read_buffer_size: Self::default_read_buffer_size(),
            write_buffer_size: Self::default_write_buffer_size(),
            read_chunk_size: Self::default_read_chunk_size(),
            read_timeout_ms: Self::default_read_timeout_ms(),
            write_timeout_ms: Self::default_write_timeout_ms(),
            event_capacity: Self::default_event_capacity(),
        }
    }
}

impl PortTunables {
    fn default_read_buffer_size() -> usize {
        ring_buffer::DEFAULT_CAPACITY
    }

    fn default_write_buffer_size() -> usize {
        port::DEFAULT_WRITE_BUFFER_SIZE
    }

    fn default_read_chunk_size() -> usize {
        port::DEFAULT_READ_CHUNK_SIZE
    }

    fn default_read_timeout_ms() -> u64 {
        100
    }

    fn default_write_timeout_ms() -> u64 {
        5000
    }

    fn default_event_capacity() -> usize {
        common::DEFAULT_EVENT_CAPACITY
    }
}

/// One row of the device table
///
/// # Example Configuration
/// ```toml
/// [[devices]]
/// device = "0x0403:0x6001"
/// driver = "ftdi"
/// description = "FT232R"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceMapping {
    /// `VID:PID`, hex with `0x` prefix
    pub device: String,
    pub driver: DriverKind,
    #[serde(default)]
    pub description: Option<String>,
}

impl DeviceMapping {
    fn new(vendor_id: u16, product_id: u16, driver: DriverKind, description: &str) -> Self {
        Self {
            device: format!("0x{:04x}:0x{:04x}", vendor_id, product_id),
            driver,
            description: Some(description.to_string()),
        }
    }

    fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        parse_device_id(&self.device).is_ok_and(|id| id == (vendor_id, product_id))
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            serial: SerialSettings::default(),
            port: PortTunables::default(),
            devices: Self::default_devices(),
        }
    }
}

impl SerialConfig {
    fn default_devices() -> Vec<DeviceMapping> {
        use DriverKind::{Cp21xx, Ftdi, Prolific};
        vec![
            DeviceMapping::new(0x0403, 0x6001, Ftdi, "FT232R"),
            DeviceMapping::new(0x0403, 0x6010, Ftdi, "FT2232"),
            DeviceMapping::new(0x0403, 0x6011, Ftdi, "FT4232H"),
            DeviceMapping::new(0x0403, 0x6014, Ftdi, "FT232H"),
            DeviceMapping::new(0x0403, 0x6015, Ftdi, "FT230X"),
            DeviceMapping::new(0x10c4, 0xea60, Cp21xx, "CP2102"),
            DeviceMapping::new(0x10c4, 0xea70, Cp21xx, "CP2105"),
            DeviceMapping::new(0x10c4, 0xea71, Cp21xx, "CP2108"),
            DeviceMapping::new(0x067b, 0x2303, Prolific, "PL2303"),
        ]
    }

    /// Load configuration from a file or the standard locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-serial/config.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: SerialConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-serial").join("config.toml")
        } else {
            PathBuf::from(".config/usb-serial/config.toml")
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.serial.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.serial.log_level,
                valid_levels.join(", ")
            ));
        }

        self.line_config()
            .validate()
            .map_err(|e| anyhow!("Invalid line settings: {}", e))?;

        let sizes = [
            ("read_buffer_size", self.port.read_buffer_size),
            ("write_buffer_size", self.port.write_buffer_size),
            ("read_chunk_size", self.port.read_chunk_size),
            ("event_capacity", self.port.event_capacity),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(anyhow!("Invalid {} 0, must be non-zero", name));
            }
        }

        // libusb reads zero as no timeout at all
        let timeouts = [
            ("read_timeout_ms", self.port.read_timeout_ms),
            ("write_timeout_ms", self.port.write_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(anyhow!("Invalid {} 0, must be non-zero", name));
            }
        }

        for mapping in &self.devices {
            parse_device_id(&mapping.device)?;
        }

        Ok(())
    }

    pub fn line_config(&self) -> LineConfig {
        LineConfig::new(
            self.serial.baud_rate,
            self.serial.data_bits,
            self.serial.parity,
            self.serial.stop_bits,
        )
    }

    pub fn port_settings(&self) -> PortSettings {
        PortSettings {
            line: self.line_config(),
            read_buffer_size: self.port.read_buffer_size,
            write_buffer_size: self.port.write_buffer_size,
            read_chunk_size: self.port.read_chunk_size,
            read_timeout: Duration::from_millis(self.port.read_timeout_ms),
            event_capacity: self.port.event_capacity,
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.port.write_timeout_ms)
    }

    /// Variant for a device: table entry first, then the CDC class code
    pub fn resolve_driver(&self, info: &DeviceInfo) -> Option<DriverKind> {
        if let Some(mapping) = self
            .devices
            .iter()
            .find(|m| m.matches(info.vendor_id, info.product_id))
        {
            return Some(mapping.driver);
        }

        let is_cdc = info.class == CLASS_COMM || info.interfaces.iter().any(|i| i.class == CLASS_COMM);
        is_cdc.then_some(DriverKind::CdcAcm)
    }
}

/// Parse `VID:PID` (e.g. `0x0403:0x6001`)
pub fn parse_device_id(id: &str) -> Result<(u16, u16)> {
    let (vid, pid) = id.split_once(':').ok_or_else(|| {
        anyhow!(
            "Invalid device '{}', expected VID:PID (e.g., '0x0403:0x6001')",
            id
        )
    })?;
    Ok((parse_hex_id(vid, "VID")?, parse_hex_id(pid, "PID")?))
}

fn parse_hex_id(id: &str, name: &str) -> Result<u16> {
    let hex_part = id
        .strip_prefix("0x")
        .or_else(|| id.strip_prefix("0X"))
        .ok_or_else(|| anyhow!("Invalid {} '{}', must start with '0x' (e.g., '0x1234')", name, id))?;

    if hex_part.is_empty() || hex_part.len() > 4 {
        return Err(anyhow!(
            "Invalid {} '{}', hex part must be 1-4 digits",
            name,
            id
        ));
    }

    u16::from_str_radix(hex_part, 16)
        .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
}

/// Load configuration from a path that may start with `~`
pub fn load_config(path: &str) -> Result<SerialConfig> {
    let path_buf = PathBuf::from(shellexpand::tilde(path).as_ref());
    SerialConfig::load(Some(path_buf))
}
