//! Serial transport for USB/Bluetooth-SPP ELM327-class adapters.
//!
//! Requires the `serial` feature.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;

use crate::transport::{Transport, TransportError, TransportResult};

/// A serial port connection to an ELM327 adapter.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SerialTransport({})", self.port.name().unwrap_or_default())
    }
}

impl SerialTransport {
    /// Opens `path` (e.g. `/dev/ttyUSB0` or `COM3`) at `baud_rate`.
    pub fn open(path: &str, baud_rate: u32) -> TransportResult<Self> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()
            .map_err(|e| TransportError::IoError(std::io::Error::other(e)))?;
        Ok(Self { port })
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, line: &str, post_send_delay: Duration) -> TransportResult<()> {
        log::trace!("serial: > {line}");
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\r")?;
        self.port.flush()?;
        std::thread::sleep(post_send_delay);
        Ok(())
    }

    fn read_until_prompt(&mut self, timeout: Duration) -> TransportResult<String> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];
        let mut acc = Vec::new();
        loop {
            if Instant::now() >= deadline {
                if acc.is_empty() {
                    return Err(TransportError::Timeout);
                }
                break;
            }
            match self.port.read(&mut buf) {
                Ok(0) => continue,
                Ok(n) => {
                    acc.extend_from_slice(&buf[..n]);
                    if acc.contains(&b'>') {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }
        let text = String::from_utf8_lossy(&acc).into_owned();
        log::trace!("serial: < {text:?}");
        Ok(text)
    }

    fn close(&mut self) -> TransportResult<()> {
        Ok(())
    }
}
