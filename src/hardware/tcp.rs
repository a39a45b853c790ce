//! TCP transport for WiFi ELM327-class adapters.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use crate::transport::{Transport, TransportError, TransportResult};

/// A TCP socket to a WiFi ELM327 adapter (most ship a Telnet-like raw
/// socket on port 35000).
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connects to `addr` with a bounded connect timeout.
    pub fn connect(addr: impl ToSocketAddrs, connect_timeout: Duration) -> TransportResult<Self> {
        let addr = addr
            .to_socket_addrs()
            .map_err(TransportError::IoError)?
            .next()
            .ok_or_else(|| {
                TransportError::IoError(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "no socket address resolved",
                ))
            })?;
        let stream = TcpStream::connect_timeout(&addr, connect_timeout)?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, line: &str, post_send_delay: Duration) -> TransportResult<()> {
        log::trace!("tcp: > {line}");
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\r")?;
        self.stream.flush()?;
        std::thread::sleep(post_send_delay);
        Ok(())
    }

    fn read_until_prompt(&mut self, timeout: Duration) -> TransportResult<String> {
        self.stream.set_read_timeout(Some(Duration::from_millis(100)))?;
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 512];
        let mut acc = Vec::new();
        loop {
            if Instant::now() >= deadline {
                if acc.is_empty() {
                    return Err(TransportError::Timeout);
                }
                break;
            }
            match self.stream.read(&mut buf) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => {
                    acc.extend_from_slice(&buf[..n]);
                    if acc.contains(&b'>') {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        let text = String::from_utf8_lossy(&acc).into_owned();
        log::trace!("tcp: < {text:?}");
        Ok(text)
    }

    fn close(&mut self) -> TransportResult<()> {
        self.stream.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}
