//! Scripted fakes for the unit tests: a transport whose handshake lines
//! and stream bytes are queued up front, a hand-cranked clock, and an RTCM
//! frame builder. Test-only; single-threaded by design.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use crate::rtcm::{crc24q, MAX_PAYLOAD_LEN, RTCM3_PREAMBLE};
use crate::transport::{Clock, Transport, TransportError};

/// Build a self-consistent RTCM 3.x frame: the requested message type in
/// the first 12 payload bits, deterministic filler, and a correct CRC24Q
/// trailer. `payload_len == 0` yields the minimal 6-byte frame.
pub(crate) fn build_frame(message_type: u16, payload_len: usize) -> Vec<u8> {
    assert!(payload_len <= MAX_PAYLOAD_LEN as usize);
    let mut payload = vec![0u8; payload_len];
    if payload_len >= 1 {
        payload[0] = (message_type >> 4) as u8;
    }
    if payload_len >= 2 {
        payload[1] = ((message_type & 0x0F) << 4) as u8;
    }
    for (i, byte) in payload.iter_mut().enumerate().skip(2) {
        *byte = (i % 251) as u8;
    }

    let mut frame = Vec::with_capacity(payload_len + 6);
    frame.push(RTCM3_PREAMBLE);
    frame.push(((payload_len >> 8) & 0x03) as u8);
    frame.push((payload_len & 0xFF) as u8);
    frame.extend_from_slice(&payload);
    let crc = crc24q(0, &frame);
    frame.push((crc >> 16) as u8);
    frame.push((crc >> 8) as u8);
    frame.push(crc as u8);
    frame
}

/// Hand-cranked millisecond clock. Clones share the same time.
#[derive(Clone, Default)]
pub(crate) struct ManualClock {
    now_ms: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.set(self.now_ms.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.get()
    }
}

#[derive(Default)]
struct MockState {
    connected: bool,
    /// Reasons for upcoming connect calls to fail; empty means succeed.
    connect_failures: VecDeque<String>,
    /// Scripted `read_line` results. `None` simulates a deadline miss.
    lines: VecDeque<Option<String>>,
    /// Scripted stream bytes for `read`.
    data: VecDeque<u8>,
    /// After the data runs out, `read` reports the peer closing.
    eof: bool,
    written: Vec<u8>,
    connect_count: usize,
}

/// Scripted [`Transport`]. Clones share the script and the capture
/// buffers, so tests keep one clone for driving and one for inspection.
#[derive(Clone, Default)]
pub(crate) struct MockTransport {
    state: Rc<RefCell<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_line(&self, line: &str) {
        self.state
            .borrow_mut()
            .lines
            .push_back(Some(line.to_string()));
    }

    pub fn push_data(&self, data: &[u8]) {
        self.state.borrow_mut().data.extend(data.iter().copied());
    }

    pub fn fail_next_connect(&self, reason: &str) {
        self.state
            .borrow_mut()
            .connect_failures
            .push_back(reason.to_string());
    }

    /// Simulate the peer going away without a clean shutdown: the supervisor
    /// notices via `is_connected`.
    pub fn drop_connection(&self) {
        self.state.borrow_mut().connected = false;
    }

    /// Simulate a clean EOF: `read` drains remaining data, then errors.
    pub fn close_stream(&self) {
        self.state.borrow_mut().eof = true;
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.borrow().connect_count
    }

    /// Pull scripted stream bytes without going through `Transport::read`.
    pub fn read_into(&self, buf: &mut [u8]) -> usize {
        let mut state = self.state.borrow_mut();
        let n = buf.len().min(state.data.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.data.pop_front().unwrap();
        }
        n
    }
}

impl Transport for MockTransport {
    fn connect(&mut self, host: &str, port: u16, _timeout_ms: u64) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if let Some(reason) = state.connect_failures.pop_front() {
            return Err(TransportError::ConnectFailed {
                host: host.to_string(),
                port,
                reason,
            });
        }
        state.connected = true;
        state.connect_count += 1;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.data.is_empty() {
            if state.eof {
                state.connected = false;
                return Err(TransportError::Closed);
            }
            return Ok(0);
        }
        let n = buf.len().min(state.data.len());
        for slot in buf.iter_mut().take(n) {
            *slot = state.data.pop_front().unwrap();
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.written.extend_from_slice(data);
        Ok(())
    }

    fn read_line(&mut self, _timeout_ms: u64) -> Option<String> {
        let mut state = self.state.borrow_mut();
        if !state.connected {
            return None;
        }
        state.lines.pop_front().flatten()
    }

    fn close(&mut self) {
        self.state.borrow_mut().connected = false;
    }

    fn is_connected(&self) -> bool {
        self.state.borrow().connected
    }
}

/// A byte sink the test keeps a handle on while the supervisor owns a
/// clone. Implements `std::io::Write` so it satisfies the sink trait the
/// same way the daemon's stdout and serial sinks do.
#[derive(Clone, Default)]
pub(crate) struct SharedSink {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl SharedSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.bytes.borrow().clone()
    }
}

impl std::io::Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
