//! Integration tests for configuration parsing
//!
//! Tests configuration loading, including:
//! - Minimal and full configuration files
//! - Device table resolution
//! - Invalid configuration handling
//! - Save and reload

use protocol::{DataBits, DriverKind, Parity, StopBits};
use serial::SerialConfig;
use serial::config::load_config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

fn load(content: &str) -> anyhow::Result<SerialConfig> {
    let file = write_config(content);
    SerialConfig::load(Some(file.path().to_path_buf()))
}

mod parsing {
    use super::*;

    const MINIMAL_CONFIG: &str = r#"
[serial]
log_level = "debug"
"#;

    const FULL_CONFIG: &str = r#"
[serial]
log_level = "warn"
baud_rate = 115200
data_bits = 7
parity = "even"
stop_bits = "two"

[port]
read_buffer_size = 65536
write_buffer_size = 512
read_chunk_size = 1024
read_timeout_ms = 50
write_timeout_ms = 2000
event_capacity = 32

[[devices]]
device = "0x1a86:0x7523"
driver = "cdc_acm"
description = "CH340"

[[devices]]
device = "0x0403:0x6001"
driver = "ftdi"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load(MINIMAL_CONFIG).unwrap();
        assert_eq!(config.serial.log_level, "debug");
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.port, SerialConfig::default().port);
        assert_eq!(config.devices, SerialConfig::default().devices);
    }

    #[test]
    fn test_full_config() {
        let config = load(FULL_CONFIG).unwrap();
        assert_eq!(config.serial.log_level, "warn");

        let line = config.line_config();
        assert_eq!(line.baud_rate, 115200);
        assert_eq!(line.data_bits, DataBits::Seven);
        assert_eq!(line.parity, Parity::Even);
        assert_eq!(line.stop_bits, StopBits::Two);

        let settings = config.port_settings();
        assert_eq!(settings.line, line);
        assert_eq!(settings.read_buffer_size, 65536);
        assert_eq!(settings.write_buffer_size, 512);
        assert_eq!(settings.read_chunk_size, 1024);
        assert_eq!(settings.read_timeout, Duration::from_millis(50));
        assert_eq!(settings.event_capacity, 32);
        assert_eq!(config.write_timeout(), Duration::from_secs(2));

        // an explicit table replaces the built-in one
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].driver, DriverKind::CdcAcm);
        assert_eq!(config.devices[0].description.as_deref(), Some("CH340"));
        assert_eq!(config.devices[1].description, None);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = load("").unwrap();
        assert_eq!(config, SerialConfig::default());
    }
}

mod invalid {
    use super::*;

    #[test]
    fn test_invalid_log_level() {
        let err = load("[serial]\nlog_level = \"verbose\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("Invalid log level"));
    }

    #[test]
    fn test_invalid_data_bits() {
        assert!(load("[serial]\ndata_bits = 9\n").is_err());
    }

    #[test]
    fn test_zero_baud_rate() {
        assert!(load("[serial]\nbaud_rate = 0\n").is_err());
    }

    #[test]
    fn test_zero_buffer_size() {
        let err = load("[port]\nwrite_buffer_size = 0\n").unwrap_err();
        assert!(format!("{:#}", err).contains("write_buffer_size"));
    }

    #[test]
    fn test_zero_timeouts() {
        let err = load("[port]\nread_timeout_ms = 0\n").unwrap_err();
        assert!(format!("{:#}", err).contains("read_timeout_ms"));

        let err = load("[port]\nwrite_timeout_ms = 0\n").unwrap_err();
        assert!(format!("{:#}", err).contains("write_timeout_ms"));
    }

    #[test]
    fn test_invalid_device_id() {
        let content = r#"
[[devices]]
device = "0403:6001"
driver = "ftdi"
"#;
        assert!(load(content).is_err());
    }

    #[test]
    fn test_unknown_driver() {
        let content = r#"
[[devices]]
device = "0x0403:0x6001"
driver = "ch340"
"#;
        assert!(load(content).is_err());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(dir.path().join("absent.toml").to_str().unwrap()).is_err());
    }
}

mod persistence {
    use super::*;

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = SerialConfig::default();
        config.serial.baud_rate = 57600;
        config.serial.parity = Parity::Odd;
        config.port.read_buffer_size = 2048;
        config.save(&path).unwrap();

        let reloaded = load_config(path.to_str().unwrap()).unwrap();
        assert_eq!(reloaded, config);
    }
}
