//! Observer-visible counters.
//!
//! All counters live in one guarded record so `snapshot()` hands observers
//! a consistent view. The hot read path never touches the guard per byte:
//! the supervisor accumulates into [`LocalStats`] and merges on a 250 ms
//! cadence, at every disconnect, and at task exit.
//!
//! The guard is a leaf: critical sections are straight-line assignments,
//! with no logging and no I/O while it is held.

use std::sync::Mutex;

use serde::Serialize;

use crate::caster::ProtocolVersion;
use crate::error::NtripError;

/// How often local accumulators are merged into the shared record.
pub const STATS_FLUSH_MS: u64 = 250;

/// Snapshot of session counters and latest-observed fields.
///
/// Counters are monotonic across a session; they survive reconnects and
/// only start over with a new client.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NtripStats {
    pub total_frames: u32,
    pub crc_errors: u32,
    pub bytes_received: u64,
    pub reconnects: u32,
    /// Milliseconds connected; frozen at its last value while disconnected.
    pub total_uptime_ms: u64,
    pub last_message_type: u16,
    pub last_frame_time_ms: u64,
    pub connection_start_ms: u64,
    /// `None` while not connected.
    pub protocol_version: Option<ProtocolVersion>,
    pub last_error: Option<NtripError>,
    pub last_error_message: String,
}

/// Supervisor-local accumulators, merged into the shared record by
/// [`StatsRegistry::flush`].
#[derive(Debug, Default)]
pub struct LocalStats {
    pub bytes: u64,
    pub frames: u32,
    pub crc_errors: u32,
    /// 0 means no frame completed since the last flush.
    pub last_message_type: u16,
    /// 0 means no frame or preamble was seen since the last flush.
    pub last_frame_time_ms: u64,
    last_flush_ms: u64,
}

impl LocalStats {
    /// Clear the accumulators and restart the flush window at `now_ms`.
    pub fn restart(&mut self, now_ms: u64) {
        *self = LocalStats {
            last_flush_ms: now_ms,
            ..LocalStats::default()
        };
    }

    pub fn flush_due(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_flush_ms) >= STATS_FLUSH_MS
    }
}

/// Thread-safe home of the shared stats record.
#[derive(Debug, Default)]
pub struct StatsRegistry {
    inner: Mutex<NtripStats>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent value-copy of the whole record.
    pub fn snapshot(&self) -> NtripStats {
        self.inner.lock().unwrap().clone()
    }

    pub fn last_error(&self) -> Option<NtripError> {
        self.inner.lock().unwrap().last_error
    }

    pub fn error_message(&self) -> String {
        self.inner.lock().unwrap().last_error_message.clone()
    }

    pub fn set_error(&self, error: NtripError, message: String) {
        let mut stats = self.inner.lock().unwrap();
        stats.last_error = Some(error);
        stats.last_error_message = message;
    }

    pub fn clear_error(&self) {
        let mut stats = self.inner.lock().unwrap();
        stats.last_error = None;
        stats.last_error_message.clear();
    }

    /// Record a successful caster handshake.
    pub fn on_connected(&self, now_ms: u64, version: ProtocolVersion) {
        let mut stats = self.inner.lock().unwrap();
        stats.reconnects += 1;
        stats.connection_start_ms = now_ms;
        stats.protocol_version = Some(version);
        stats.last_error = None;
        stats.last_error_message.clear();
    }

    /// Record that the transport is gone. Uptime stays frozen at the value
    /// of the final flush.
    pub fn on_disconnected(&self) {
        self.inner.lock().unwrap().protocol_version = None;
    }

    /// Merge local accumulators into the shared record. `connected` gates
    /// the uptime refresh so it freezes while disconnected.
    pub fn flush(&self, local: &mut LocalStats, now_ms: u64, connected: bool) {
        {
            let mut stats = self.inner.lock().unwrap();
            stats.bytes_received += local.bytes;
            stats.total_frames += local.frames;
            stats.crc_errors += local.crc_errors;
            if local.last_message_type != 0 {
                stats.last_message_type = local.last_message_type;
            }
            if local.last_frame_time_ms != 0 {
                stats.last_frame_time_ms = local.last_frame_time_ms;
            }
            if connected && stats.connection_start_ms > 0 {
                stats.total_uptime_ms = now_ms.saturating_sub(stats.connection_start_ms);
            }
        }
        local.restart(now_ms);
    }
}
