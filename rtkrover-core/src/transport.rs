//! I/O and time abstractions.
//!
//! The core never opens sockets or reads clocks itself; everything goes
//! through these traits so the same supervisor runs against real TCP on the
//! native daemon and against scripted fakes in tests.
//!
//! The read side is poll-based: `read` must return promptly with `Ok(0)`
//! when nothing is buffered. The supervisor's tick cadence provides the
//! pacing, exactly like a non-blocking socket driven from a poll loop.

use thiserror::Error;

/// Transport-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connect to {host}:{port} failed: {reason}")]
    ConnectFailed {
        host: String,
        port: u16,
        reason: String,
    },
    /// The peer closed the connection (EOF or reset).
    #[error("connection closed")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("I/O error: {0}")]
    Io(String),
}

/// A connectable, readable/writable byte stream with millisecond timeouts.
pub trait Transport {
    /// Establish the connection, bounded by `timeout_ms`.
    fn connect(&mut self, host: &str, port: u16, timeout_ms: u64) -> Result<(), TransportError>;

    /// Non-blocking read into `buf`. `Ok(0)` means no data is available
    /// right now; `Err(Closed)` means the peer is gone.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write the whole buffer.
    fn write_all(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Read one CRLF-terminated line, waiting up to `timeout_ms` for it.
    /// The terminator is stripped. `None` means the deadline passed (or the
    /// peer closed before a full line arrived). Bytes past the terminator
    /// must stay buffered for subsequent `read` calls.
    fn read_line(&mut self, timeout_ms: u64) -> Option<String>;

    /// Drop the connection. Safe to call when already closed.
    fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Monotonic millisecond clock. The epoch does not matter as long as it is
/// consistent within a session.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Downstream byte sink for the decoded stream, typically the UART to the
/// GNSS receiver.
///
/// Writes are fire-and-forget: the fast path forwards every received byte
/// before its validity is known, and a failing sink must not take down the
/// stream, so errors are swallowed.
pub trait RtcmSink {
    fn write(&mut self, data: &[u8]);
}

impl<W: std::io::Write> RtcmSink for W {
    fn write(&mut self, data: &[u8]) {
        if std::io::Write::write_all(self, data).is_ok() {
            let _ = self.flush();
        }
    }
}
