//! usb-serial terminal
//!
//! Opens one USB serial device, prints whatever it sends to stdout and
//! forwards stdin lines to it.

use anyhow::{Context, Result, anyhow, bail};
use async_channel::Receiver;
use clap::Parser;
use common::{PortEvent, UsbDevice, setup_logging};
use protocol::DriverKind;
use serial::config::{SerialConfig, load_config, parse_device_id};
use serial::usb::{RusbDevice, list_devices};
use serial::{PortSettings, SerialDevice, SerialPort};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::signal;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "usb-serial")]
#[command(author, version, about = "USB serial terminal for CDC/ACM, CP210x, FTDI and PL2303 adapters")]
#[command(long_about = "
Talks to USB serial adapters directly through libusb, without a kernel
serial driver. Received bytes go to stdout; each stdin line is sent with a
trailing CR LF.

EXAMPLES:
    # Open the first recognised adapter at 9600 8N1
    usb-serial

    # Open a specific adapter at 115200 baud
    usb-serial --device 0x0403:0x6001 --baud 115200

    # Force a driver for an adapter missing from the device table
    usb-serial --device 0x1a86:0x7523 --driver cdc_acm

    # List USB devices and the driver each would use
    usb-serial --list-devices

CONFIGURATION:
    Configuration files are looked up in the following order:
    1. Path specified with --config
    2. ~/.config/usb-serial/config.toml
    3. /etc/usb-serial/config.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Device to open; defaults to the first one with a known driver
    #[arg(short, long, value_name = "VID:PID")]
    device: Option<String>,

    /// Driver to use instead of the device table (cdc_acm, cp21xx, ftdi, prolific)
    #[arg(long, value_name = "DRIVER")]
    driver: Option<DriverKind>,

    /// Baud rate, overriding the configured one
    #[arg(short, long, value_name = "BAUD")]
    baud: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = SerialConfig::default();
        let path = SerialConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = if let Some(ref path) = args.config {
        load_config(path).context("Failed to load configuration")?
    } else {
        SerialConfig::load_or_default()
    };

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.serial.log_level);
    setup_logging(log_level).context("Failed to setup logging")?;

    info!("usb-serial v{}", env!("CARGO_PKG_VERSION"));

    let context = rusb::Context::new().context("Failed to initialise libusb")?;
    let devices = list_devices(&context).context("Failed to enumerate USB devices")?;

    if args.list_devices {
        print_devices(&config, &devices);
        return Ok(());
    }

    let filter = args.device.as_deref().map(parse_device_id).transpose()?;
    let (device, kind) = select_device(&config, devices, filter, args.driver)?;

    let mut settings = config.port_settings();
    if let Some(baud) = args.baud {
        settings.line.baud_rate = baud;
    }

    run_terminal(device, kind, settings, config.write_timeout()).await
}

fn print_devices(config: &SerialConfig, devices: &[RusbDevice]) {
    println!("USB devices:");
    for device in devices {
        let info = device.info();
        let driver = config
            .resolve_driver(info)
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}  class {:#04x}  interfaces {}  driver {}",
            info,
            info.class,
            info.interfaces.len(),
            driver
        );
    }
}

fn select_device(
    config: &SerialConfig,
    devices: Vec<RusbDevice>,
    filter: Option<(u16, u16)>,
    driver: Option<DriverKind>,
) -> Result<(RusbDevice, DriverKind)> {
    for device in devices {
        let info = device.info();
        if let Some(id) = filter {
            if (info.vendor_id, info.product_id) != id {
                continue;
            }
        }

        match driver.or_else(|| config.resolve_driver(info)) {
            Some(kind) => return Ok((device, kind)),
            None if filter.is_some() => bail!("No driver known for {}, pass --driver", info),
            None => {}
        }
    }

    Err(anyhow!("No matching USB serial device found"))
}

async fn run_terminal(
    device: RusbDevice,
    kind: DriverKind,
    settings: PortSettings,
    write_timeout: Duration,
) -> Result<()> {
    let serial = SerialDevice::new(Arc::new(device), kind, settings);
    let port = serial
        .port(0)
        .cloned()
        .ok_or_else(|| anyhow!("Device has no ports"))?;

    let events = port.subscribe();
    port.open().context("Failed to open port")?;
    info!(
        "Connected to {} as {} at {}",
        serial.info(),
        kind,
        port.line_config()
    );

    let result = pump(&port, &events, write_timeout).await;

    for (n, e) in serial.close() {
        error!("Error closing port {}: {}", n, e);
    }
    let stats = port.stats();
    info!(
        "Received {} bytes ({} dropped), sent {} bytes",
        stats.bytes_received, stats.bytes_dropped, stats.bytes_written
    );
    result
}

/// Shuttle bytes between the port and stdio until EOF, Ctrl-C or a read failure
async fn pump(
    port: &Arc<SerialPort>,
    events: &Receiver<PortEvent>,
    write_timeout: Duration,
) -> Result<()> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(PortEvent::DataAvailable { .. }) => {
                    loop {
                        let n = port.read(&mut buf, 0)?;
                        if n == 0 {
                            break;
                        }
                        stdout.write_all(&buf[..n]).await?;
                    }
                    stdout.flush().await?;
                }
                Ok(PortEvent::ReadFailed { reason, .. }) => {
                    return Err(anyhow!("Read failed: {}", reason));
                }
                Err(_) => return Ok(()),
            },
            line = stdin.next_line() => match line? {
                Some(line) => {
                    let mut data = line.into_bytes();
                    data.extend_from_slice(b"\r\n");
                    let port = Arc::clone(port);
                    tokio::task::spawn_blocking(move || port.write(&data, write_timeout))
                        .await
                        .context("Write task failed")??;
                }
                None => {
                    info!("stdin closed");
                    return Ok(());
                }
            },
            _ = signal::ctrl_c() => {
                info!("Interrupted, closing port");
                return Ok(());
            }
        }
    }
}
