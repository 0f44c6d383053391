//! Port lifecycle and read path tests
//!
//! Covers:
//! - Open/close state transitions and idempotent close
//! - Failed open leaving the port closed and retryable
//! - Close waiting for a write still on the wire
//! - Read thread delivery, events and receive-buffer overrun
//! - Fatal and non-fatal read failures

use common::test_utils::{DEFAULT_TEST_TIMEOUT, MockUsbDevice, MockWrite, wait_until};
use common::{Error, PortEvent, TransferError};
use protocol::DriverKind;
use serial::{PortSettings, PortState, SerialPort};
use std::sync::Arc;
use std::time::Duration;

fn cp21xx_port() -> (MockUsbDevice, SerialPort) {
    let mock = MockUsbDevice::cp21xx();
    let port = SerialPort::new(
        Arc::new(mock.clone()),
        DriverKind::Cp21xx,
        0,
        PortSettings::default(),
    );
    (mock, port)
}

fn read_all(port: &SerialPort) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let n = port.read(&mut buf, 0).unwrap();
        if n == 0 {
            return out;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn test_open_then_close() {
        let (mock, port) = cp21xx_port();
        port.open().unwrap();
        assert_eq!(port.state(), PortState::Open);
        assert_eq!(mock.claimed_interfaces(), vec![0]);
        assert_eq!(mock.open_handles(), 1);

        port.close().unwrap();
        assert_eq!(port.state(), PortState::Closed);
        assert_eq!(mock.released_interfaces(), vec![0]);
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn test_close_twice_is_safe() {
        let (_mock, port) = cp21xx_port();
        port.open().unwrap();
        port.close().unwrap();
        port.close().unwrap();
        assert_eq!(port.state(), PortState::Closed);
    }

    #[test]
    fn test_close_never_opened() {
        let (mock, port) = cp21xx_port();
        port.close().unwrap();
        assert_eq!(port.state(), PortState::Closed);
        assert_eq!(mock.open_count(), 0);
    }

    #[test]
    fn test_reopen_after_close() {
        let (mock, port) = cp21xx_port();
        port.open().unwrap();
        port.close().unwrap();
        port.open().unwrap();
        assert!(port.is_open());
        port.close().unwrap();
        assert_eq!(mock.open_count(), 2);
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn test_failed_device_open_is_retryable() {
        let (mock, port) = cp21xx_port();
        mock.set_fail_open(true);
        assert!(matches!(port.open(), Err(Error::Usb(TransferError::Access))));
        assert_eq!(port.state(), PortState::Closed);

        mock.set_fail_open(false);
        port.open().unwrap();
        assert!(port.is_open());
        port.close().unwrap();
    }

    #[test]
    fn test_failed_claim_releases_handle() {
        let (mock, port) = cp21xx_port();
        mock.fail_claim(0);
        let err = port.open().unwrap_err();
        assert!(matches!(err, Error::ClaimInterface { interface: 0, .. }));
        assert_eq!(port.state(), PortState::Closed);
        assert_eq!(mock.open_handles(), 0);

        mock.clear_claim_failures();
        port.open().unwrap();
        port.close().unwrap();
        assert_eq!(mock.open_handles(), 0);
    }

    #[test]
    fn test_failed_initialization_releases_everything() {
        let (mock, port) = cp21xx_port();
        mock.fail_control(protocol::cp21xx::IFC_ENABLE, TransferError::Pipe);
        assert!(matches!(port.open(), Err(Error::Usb(TransferError::Pipe))));
        assert_eq!(port.state(), PortState::Closed);
        assert_eq!(mock.released_interfaces(), vec![0]);
        assert_eq!(mock.open_handles(), 0);

        mock.clear_control_failures();
        port.open().unwrap();
        port.close().unwrap();
    }

    #[test]
    fn test_failed_teardown_still_releases_handle() {
        let (mock, port) = cp21xx_port();
        port.open().unwrap();
        mock.fail_control(protocol::cp21xx::IFC_ENABLE, TransferError::NoDevice);

        assert!(port.close().is_err());
        assert_eq!(port.state(), PortState::Closed);
        assert_eq!(mock.open_handles(), 0);
        // second close is a no-op
        port.close().unwrap();
    }

    #[test]
    fn test_close_stops_read_thread() {
        let (mock, port) = cp21xx_port();
        port.open().unwrap();
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || mock.read_calls(0x81) > 2));
        port.close().unwrap();

        let calls = mock.read_calls(0x81);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.read_calls(0x81), calls);
    }

    #[test]
    fn test_close_waits_for_slow_write() {
        let (mock, port) = cp21xx_port();
        let port = Arc::new(port);
        port.open().unwrap();
        mock.push_write_result(MockWrite::Delay(Duration::from_millis(300)));

        let writer = {
            let port = Arc::clone(&port);
            std::thread::spawn(move || port.write(b"hello", Duration::from_secs(1)))
        };
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || mock.write_attempts() == 1));

        port.close().unwrap();
        // the write finished before teardown and the handle is gone
        assert_eq!(mock.written(), b"hello");
        assert_eq!(mock.released_interfaces(), vec![0]);
        assert_eq!(mock.open_handles(), 0);
        assert_eq!(port.state(), PortState::Closed);

        assert_eq!(writer.join().unwrap().unwrap(), 5);
        assert!(matches!(
            port.write(b"late", Duration::from_millis(100)),
            Err(Error::NotOpen)
        ));

        port.open().unwrap();
        assert_eq!(mock.open_handles(), 1);
        port.close().unwrap();
    }

    #[test]
    fn test_line_queries_after_close() {
        let (mock, port) = cp21xx_port();
        port.open().unwrap();
        mock.push_read(0x81, b"left".to_vec());
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || port.available().unwrap() == 4));
        port.close().unwrap();

        assert!(matches!(port.available(), Err(Error::NotOpen)));
        assert!(matches!(port.cts(), Err(Error::NotOpen)));
        assert!(matches!(port.set_dtr(true), Err(Error::NotOpen)));
    }
}

mod read_path {
    use super::*;

    #[test]
    fn test_data_reaches_read() {
        let (mock, port) = cp21xx_port();
        port.open().unwrap();
        mock.push_read(0x81, b"hello".to_vec());

        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || port.available().unwrap() == 5));
        assert_eq!(read_all(&port), b"hello");
        assert_eq!(port.stats().bytes_received, 5);
        port.close().unwrap();
    }

    #[test]
    fn test_read_respects_start_index() {
        let (mock, port) = cp21xx_port();
        port.open().unwrap();
        mock.push_read(0x81, b"abcdef".to_vec());
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || port.available().unwrap() == 6));

        let mut buf = [0u8; 5];
        assert_eq!(port.read(&mut buf, 2).unwrap(), 3);
        assert_eq!(&buf, b"\0\0abc");
        assert_eq!(port.read(&mut buf, 5).unwrap(), 0);
        assert_eq!(read_all(&port), b"def");
        port.close().unwrap();
    }

    #[test]
    fn test_read_never_blocks() {
        let (_mock, port) = cp21xx_port();
        port.open().unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(port.read(&mut buf, 0).unwrap(), 0);
        port.close().unwrap();
    }

    #[test]
    fn test_overrun_keeps_newest_bytes() {
        let (mock, port) = cp21xx_port();
        port.set_read_buffer_size(4).unwrap();
        port.open().unwrap();
        mock.push_read(0x81, b"0123456789".to_vec());

        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || port.stats().bytes_received == 10));
        assert_eq!(read_all(&port), b"6789");
        assert_eq!(port.stats().bytes_dropped, 6);
        port.close().unwrap();
    }

    #[test]
    fn test_purge_clears_receive_buffer() {
        let (mock, port) = cp21xx_port();
        port.open().unwrap();
        mock.push_read(0x81, b"stale".to_vec());
        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || port.available().unwrap() == 5));

        assert!(port.purge_buffers(true, false).unwrap());
        assert_eq!(port.available().unwrap(), 0);
        port.close().unwrap();
    }

    #[test]
    fn test_transient_error_does_not_stop_reading() {
        let (mock, port) = cp21xx_port();
        port.open().unwrap();
        mock.push_read_error(0x81, TransferError::Pipe);
        mock.push_read(0x81, b"after".to_vec());

        assert!(wait_until(DEFAULT_TEST_TIMEOUT, || port.available().unwrap() == 5));
        assert_eq!(read_all(&port), b"after");
        port.close().unwrap();
    }

    #[tokio::test]
    async fn test_data_available_event() {
        let (mock, port) = cp21xx_port();
        let events = port.subscribe();
        port.open().unwrap();
        mock.push_read(0x81, b"ping".to_vec());

        let event = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, events.recv())
            .await
            .expect("no event before timeout")
            .unwrap();
        assert_eq!(
            event,
            PortEvent::DataAvailable {
                port: port.id(),
                bytes: 4
            }
        );
        port.close().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_stops_reading_with_event() {
        let (mock, port) = cp21xx_port();
        let events = port.subscribe();
        port.open().unwrap();
        mock.push_read_error(0x81, TransferError::NoDevice);

        let event = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, events.recv())
            .await
            .expect("no event before timeout")
            .unwrap();
        assert!(matches!(event, PortEvent::ReadFailed { .. }));

        let calls = mock.read_calls(0x81);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(mock.read_calls(0x81), calls);

        // port stays open until closed by the caller
        assert!(port.is_open());
        port.close().unwrap();
    }

    #[tokio::test]
    async fn test_short_ftdi_read_is_fatal() {
        let mock = MockUsbDevice::ftdi();
        let port = SerialPort::new(
            Arc::new(mock.clone()),
            DriverKind::Ftdi,
            0,
            PortSettings::default(),
        );
        let events = port.subscribe();
        port.open().unwrap();
        mock.push_read(0x81, vec![0x01]);

        let event = tokio::time::timeout(DEFAULT_TEST_TIMEOUT, events.recv())
            .await
            .expect("no event before timeout")
            .unwrap();
        match event {
            PortEvent::ReadFailed { port: id, reason } => {
                assert_eq!(id, port.id());
                assert!(reason.contains("header"), "unexpected reason: {}", reason);
            }
            other => panic!("unexpected event {:?}", other),
        }
        port.close().unwrap();
    }
}
