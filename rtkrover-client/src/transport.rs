//! Native transport: std TCP in non-blocking mode.
//!
//! The core wants poll semantics (reads that return immediately with
//! "nothing yet"), so the socket is switched to non-blocking right after
//! `connect_timeout` succeeds and WouldBlock maps to a zero-byte read.
//!
//! Line reads during the handshake may pull bytes past the CRLF into the
//! internal buffer; those are handed back by `read` before the socket is
//! touched again, so no stream byte is ever lost between the HTTP phase
//! and the binary phase.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use rtkrover_core::transport::{Clock, Transport, TransportError};

/// Sleep between polls while waiting inside a deadline.
const POLL_SLEEP_MS: u64 = 10;

/// Bound on a single request write; the request is a few hundred bytes, so
/// hitting this means the socket is wedged.
const WRITE_DEADLINE_MS: u64 = 2_000;

pub struct TcpTransport {
    stream: Option<TcpStream>,
    /// Bytes read past a line terminator, served before the next socket read.
    pending: Vec<u8>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self {
            stream: None,
            pending: Vec::new(),
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for TcpTransport {
    fn connect(&mut self, host: &str, port: u16, timeout_ms: u64) -> Result<(), TransportError> {
        self.close();
        let timeout = Duration::from_millis(timeout_ms);
        let addrs = (host, port).to_socket_addrs().map_err(|e| {
            TransportError::ConnectFailed {
                host: host.to_string(),
                port,
                reason: format!("address resolution failed: {}", e),
            }
        })?;

        let mut last_error: Option<std::io::Error> = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    stream
                        .set_nonblocking(true)
                        .map_err(|e| TransportError::Io(e.to_string()))?;
                    log::debug!("connected to {}", addr);
                    self.stream = Some(stream);
                    return Ok(());
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(TransportError::ConnectFailed {
            host: host.to_string(),
            port,
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no addresses resolved".to_string()),
        })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.pending.is_empty() {
            let n = buf.len().min(self.pending.len());
            buf[..n].copy_from_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Ok(n);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        match stream.read(buf) {
            Ok(0) => {
                self.close();
                Err(TransportError::Closed)
            }
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(0)
            }
            Err(e) => {
                self.close();
                Err(TransportError::Io(e.to_string()))
            }
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let deadline = Instant::now() + Duration::from_millis(WRITE_DEADLINE_MS);
        let mut offset = 0;
        while offset < data.len() {
            let Some(stream) = self.stream.as_mut() else {
                return Err(TransportError::NotConnected);
            };
            match stream.write(&data[offset..]) {
                Ok(0) => {
                    self.close();
                    return Err(TransportError::Closed);
                }
                Ok(n) => offset += n,
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted =>
                {
                    if Instant::now() >= deadline {
                        return Err(TransportError::Io("write timed out".to_string()));
                    }
                    std::thread::sleep(Duration::from_millis(POLL_SLEEP_MS));
                }
                Err(e) => {
                    self.close();
                    return Err(TransportError::Io(e.to_string()));
                }
            }
        }
        Ok(())
    }

    fn read_line(&mut self, timeout_ms: u64) -> Option<String> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = self.pending.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line);
                return Some(
                    text.trim_end_matches(|c| c == '\r' || c == '\n')
                        .to_string(),
                );
            }
            if Instant::now() >= deadline {
                return None;
            }
            let stream = self.stream.as_mut()?;
            let mut chunk = [0u8; 512];
            match stream.read(&mut chunk) {
                Ok(0) => {
                    self.close();
                    return None;
                }
                Ok(n) => self.pending.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(POLL_SLEEP_MS));
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => {
                    self.close();
                    return None;
                }
            }
        }
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        self.pending.clear();
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

/// Monotonic clock starting at process setup.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}
