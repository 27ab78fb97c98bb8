//! Connection supervisor.
//!
//! One writer, many readers: a single supervisor task owns the transport,
//! the parser and the read buffer, and drives the state machine:
//!
//! ```text
//!         DISCONNECTED ──(retry window elapsed, failures < max)──▶ CONNECTING
//!               ▲                                                      │
//!               │◀──────────────── handshake fails ────────────────────┤
//!               │◀── socket closed / zombie ── STREAMING ◀─ success ───┘
//!               │
//!               └──(failures ≥ max)──▶ LOCKED_OUT ──(reset/reconnect)──▶ DISCONNECTED
//! ```
//!
//! Observers hold a cloneable [`NtripHandle`]: state and the healthy flag
//! are atomics published with release/acquire ordering, counters sit behind
//! the stats guard, and control requests are flags the supervisor applies
//! at the top of its next tick. Nothing here blocks a caller.
//!
//! The supervisor is runtime-agnostic: [`tick`](NtripClient::tick) is a
//! plain synchronous step returning the recommended idle sleep, so the
//! machine is testable as a pure function of its inputs and the clock.
//! [`run`](NtripClient::run) wraps it for dedicated-thread use.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use crate::caster::CasterSession;
use crate::config::{ConfigError, NtripConfig};
use crate::error::NtripError;
use crate::health::HealthMonitor;
use crate::logger::{LogCallback, Logger};
use crate::stats::{LocalStats, NtripStats, StatsRegistry};
use crate::transport::{Clock, RtcmSink, Transport};

const TAG: &str = "client";

/// Idle sleep while streaming or between machine steps.
pub const TICK_STREAMING: Duration = Duration::from_millis(10);
/// Idle sleep while waiting out the retry window.
pub const TICK_RETRY_WAIT: Duration = Duration::from_millis(200);
/// Idle sleep while locked out.
pub const TICK_LOCKED_OUT: Duration = Duration::from_millis(500);

/// Published supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Streaming = 2,
    LockedOut = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Streaming,
            3 => ConnectionState::LockedOut,
            _ => ConnectionState::Disconnected,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "DISCONNECTED"),
            ConnectionState::Connecting => write!(f, "CONNECTING"),
            ConnectionState::Streaming => write!(f, "STREAMING"),
            ConnectionState::LockedOut => write!(f, "LOCKED_OUT"),
        }
    }
}

// Pending control requests, applied at the top of the next tick.
const CTRL_STOP: u8 = 0b001;
const CTRL_RESET: u8 = 0b010;
const CTRL_RECONNECT: u8 = 0b100;

/// State shared between the supervisor and its handles.
struct Shared {
    state: AtomicU8,
    healthy: AtomicBool,
    /// True while the supervisor loop is on a thread.
    running: AtomicBool,
    /// One-way latch asking the loop to exit.
    stop_requested: AtomicBool,
    failures: AtomicU32,
    last_attempt_ms: AtomicU64,
    control: AtomicU8,
    stats: StatsRegistry,
    /// Staged configuration, adopted at the DISCONNECTED→CONNECTING edge.
    config: Mutex<NtripConfig>,
    logger: Logger,
}

impl Shared {
    fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Cloneable observer/control handle. All methods are safe from any thread
/// and never block on the supervisor.
#[derive(Clone)]
pub struct NtripHandle {
    shared: Arc<Shared>,
}

impl NtripHandle {
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_streaming(&self) -> bool {
        self.state() == ConnectionState::Streaming
    }

    pub fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::Acquire)
    }

    /// True while the supervisor loop is running on its thread.
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> u32 {
        self.shared.failures.load(Ordering::Acquire)
    }

    /// Consistent snapshot of the stats record.
    pub fn stats(&self) -> NtripStats {
        self.shared.stats.snapshot()
    }

    pub fn last_error(&self) -> Option<NtripError> {
        self.shared.stats.last_error()
    }

    pub fn error_message(&self) -> String {
        self.shared.stats.error_message()
    }

    /// Disconnect and lock out until `reset()` or `reconnect()`.
    pub fn stop(&self) {
        self.shared.control.fetch_or(CTRL_STOP, Ordering::AcqRel);
    }

    /// Clear the failure counter and last error; leave lockout.
    pub fn reset(&self) {
        self.shared.control.fetch_or(CTRL_RESET, Ordering::AcqRel);
    }

    /// Drop the current connection and retry immediately.
    pub fn reconnect(&self) {
        self.shared.control.fetch_or(CTRL_RECONNECT, Ordering::AcqRel);
    }

    /// Install or remove the log callback.
    pub fn set_logger(&self, callback: Option<LogCallback>) {
        self.shared.logger.set(callback);
    }

    /// Stage a new configuration. It is validated here and adopted by the
    /// supervisor at the next DISCONNECTED→CONNECTING edge; the read buffer
    /// keeps its original size for the task's lifetime.
    pub fn update_config(&self, config: NtripConfig) -> Result<(), ConfigError> {
        config.validate()?;
        *self.shared.config.lock().unwrap() = config;
        Ok(())
    }

    /// Ask the supervisor loop to exit. One-way; the loop finishes its
    /// current tick, flushes stats and closes the transport.
    pub fn request_shutdown(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
    }
}

/// The supervisor. Owns the transport, parser, read buffer and sink; no
/// component refers back to it.
pub struct NtripClient<T: Transport, C: Clock, S: RtcmSink> {
    transport: T,
    clock: C,
    sink: S,
    shared: Arc<Shared>,
    logger: Logger,
    /// Active snapshot, refreshed only at the DISCONNECTED→CONNECTING edge.
    config: NtripConfig,
    health: HealthMonitor,
    buffer: Vec<u8>,
    local: LocalStats,
}

impl<T: Transport, C: Clock, S: RtcmSink> NtripClient<T, C, S> {
    /// Validate the configuration and set up a supervisor in DISCONNECTED.
    /// The read buffer is allocated here, once, from `buffer_size`.
    pub fn new(config: NtripConfig, transport: T, clock: C, sink: S) -> Result<Self, ConfigError> {
        config.validate()?;
        let buffer = vec![0u8; config.buffer_size];
        let logger = Logger::new();
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            healthy: AtomicBool::new(false),
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            failures: AtomicU32::new(0),
            last_attempt_ms: AtomicU64::new(0),
            control: AtomicU8::new(0),
            stats: StatsRegistry::new(),
            config: Mutex::new(config.clone()),
            logger: logger.clone(),
        });
        logger.info(TAG, &format!("Initialized (v{})", crate::VERSION));
        Ok(Self {
            transport,
            clock,
            sink,
            shared,
            logger,
            config,
            health: HealthMonitor::new(),
            buffer,
            local: LocalStats::default(),
        })
    }

    /// A handle for observers and control; cheap to clone.
    pub fn handle(&self) -> NtripHandle {
        NtripHandle {
            shared: self.shared.clone(),
        }
    }

    /// One synchronous step of the state machine. Returns the recommended
    /// idle sleep before the next tick.
    pub fn tick(&mut self) -> Duration {
        // Control requests consume the tick; the machine resumes on the
        // next one.
        if self.apply_control() {
            return TICK_STREAMING;
        }

        // Whenever we are not actively connected, the socket must not be.
        let state = self.shared.state();
        if state != ConnectionState::Streaming
            && state != ConnectionState::Connecting
            && self.transport.is_connected()
        {
            self.drop_transport();
        }

        match self.shared.state() {
            ConnectionState::Disconnected => {
                let now = self.clock.now_ms();
                let last_attempt = self.shared.last_attempt_ms.load(Ordering::Acquire);
                if last_attempt != 0 && now.saturating_sub(last_attempt) < self.config.retry_delay_ms
                {
                    return TICK_RETRY_WAIT;
                }
                let failures = self.shared.failures.load(Ordering::Acquire);
                if failures >= self.config.max_tries {
                    self.publish_error(
                        NtripError::MaxRetriesExceeded,
                        format!("Failed {} times", failures),
                    );
                    self.shared.set_state(ConnectionState::LockedOut);
                    return TICK_LOCKED_OUT;
                }
                // Safe boundary: adopt any staged configuration before the
                // attempt. The buffer keeps its task-lifetime allocation.
                self.config = self.shared.config.lock().unwrap().clone();
                self.shared.set_state(ConnectionState::Connecting);
                self.connect_attempt();
            }
            ConnectionState::Connecting => self.connect_attempt(),
            ConnectionState::Streaming => self.stream_tick(),
            ConnectionState::LockedOut => return TICK_LOCKED_OUT,
        }

        let now = self.clock.now_ms();
        if self.local.flush_due(now) {
            let streaming = self.shared.state() == ConnectionState::Streaming;
            self.shared.stats.flush(&mut self.local, now, streaming);
        }
        TICK_STREAMING
    }

    /// Run tick + sleep on the current thread until `request_shutdown()`.
    pub fn run(&mut self) {
        self.shared.running.store(true, Ordering::Release);
        while !self.shared.stop_requested.load(Ordering::Acquire) {
            let idle = self.tick();
            std::thread::sleep(idle);
        }
        self.shutdown();
        self.shared.running.store(false, Ordering::Release);
    }

    /// Final flush and transport teardown for task exit.
    pub fn shutdown(&mut self) {
        let now = self.clock.now_ms();
        let streaming = self.shared.state() == ConnectionState::Streaming;
        self.shared.stats.flush(&mut self.local, now, streaming);
        if self.transport.is_connected() {
            self.drop_transport();
        }
        self.logger.info(TAG, "Supervisor stopped");
    }

    // -------------------------------------------------------------------------
    // State machine internals
    // -------------------------------------------------------------------------

    fn apply_control(&mut self) -> bool {
        let bits = self.shared.control.swap(0, Ordering::AcqRel);
        if bits == 0 {
            return false;
        }
        if bits & CTRL_STOP != 0 {
            self.disconnect();
            self.shared
                .failures
                .store(self.config.max_tries, Ordering::Release);
            self.shared.set_state(ConnectionState::LockedOut);
            self.logger.info(TAG, "Stopped");
        }
        if bits & CTRL_RESET != 0 {
            self.shared.failures.store(0, Ordering::Release);
            self.shared.stats.clear_error();
            self.shared.set_state(ConnectionState::Disconnected);
            self.logger.info(TAG, "Reset, lockout cleared");
        }
        if bits & CTRL_RECONNECT != 0 {
            self.disconnect();
            self.shared.last_attempt_ms.store(0, Ordering::Release);
            self.logger.info(TAG, "Reconnection requested");
        }
        true
    }

    /// One full handshake attempt; transitions to STREAMING or back to
    /// DISCONNECTED.
    fn connect_attempt(&mut self) {
        let now = self.clock.now_ms();
        self.shared.last_attempt_ms.store(now, Ordering::Release);
        let failures = self.shared.failures.load(Ordering::Acquire);
        self.logger.info(
            TAG,
            &format!(
                "Connecting to {}:{}/{} (attempt {}/{})",
                self.config.host,
                self.config.port,
                self.config.mount,
                failures + 1,
                self.config.max_tries
            ),
        );

        let result = {
            let mut session = CasterSession::new(&mut self.transport, &self.clock, &self.logger);
            session.connect(&self.config)
        };

        match result {
            Ok(version) => {
                // Handshake may have taken a while; restart the window from
                // the actual stream start.
                let now = self.clock.now_ms();
                self.shared.failures.store(0, Ordering::Release);
                self.shared.healthy.store(false, Ordering::Release);
                self.health.on_connect(now);
                self.local.restart(now);
                self.shared.stats.on_connected(now, version);
                self.shared.set_state(ConnectionState::Streaming);
                self.logger.info(
                    TAG,
                    &format!("Connected ({}), validating stream", version),
                );
            }
            Err(error) => {
                self.shared.failures.fetch_add(1, Ordering::AcqRel);
                self.publish_error(error.kind, error.message);
                self.shared.set_state(ConnectionState::Disconnected);
            }
        }
    }

    /// One streaming step: liveness check, non-blocking read, fast-path
    /// forward, health drive, zombie check.
    fn stream_tick(&mut self) {
        if !self.transport.is_connected() {
            self.logger.warn(TAG, "Connection lost");
            self.publish_error(
                NtripError::TcpConnectFailed,
                format!("Socket closed by {}", self.config.host),
            );
            self.shared.failures.fetch_add(1, Ordering::AcqRel);
            self.disconnect();
            return;
        }

        match self.transport.read(&mut self.buffer) {
            Ok(0) => {}
            Ok(n) => {
                let now = self.clock.now_ms();
                self.local.bytes += n as u64;

                // Fast path: forward before parsing, so validation adds no
                // latency to the corrections.
                self.sink.write(&self.buffer[..n]);

                let report = self.health.process(
                    &self.buffer[..n],
                    now,
                    self.config.required_valid_frames,
                    self.config.passive_sample_ms,
                    &self.logger,
                );
                if report.frames > 0 {
                    self.local.frames += report.frames;
                    self.local.last_message_type = report.last_message_type;
                    self.local.last_frame_time_ms = now;
                }
                self.local.crc_errors += report.crc_errors;
                if report.preamble_seen {
                    self.local.last_frame_time_ms = now;
                }
                if report.validated {
                    self.shared.healthy.store(true, Ordering::Release);
                }
            }
            Err(_) => {
                self.logger.warn(TAG, "Connection lost");
                self.publish_error(
                    NtripError::TcpConnectFailed,
                    format!("Socket closed by {}", self.config.host),
                );
                self.shared.failures.fetch_add(1, Ordering::AcqRel);
                self.disconnect();
                return;
            }
        }

        let now = self.clock.now_ms();
        if self.health.is_zombie(now, self.config.health_timeout_ms) {
            self.logger.warn(
                TAG,
                &format!(
                    "Zombie stream detected ({} ms since valid data)",
                    now.saturating_sub(self.health.last_health_ms())
                ),
            );
            self.publish_error(
                NtripError::ZombieStreamDetected,
                format!("No valid RTCM for {} s", self.config.health_timeout_ms / 1000),
            );
            self.shared.failures.fetch_add(1, Ordering::AcqRel);
            self.disconnect();
        }
    }

    /// Write the error to the stats record, then log. The state transition
    /// that reflects the error always comes after this call.
    fn publish_error(&self, error: NtripError, message: String) {
        self.shared.stats.set_error(error, message.clone());
        self.logger.error(TAG, &message);
    }

    /// Tear down the connection and return to DISCONNECTED. Pending local
    /// stats are flushed first so counters are visible before the state
    /// transition publishes.
    fn disconnect(&mut self) {
        let now = self.clock.now_ms();
        let streaming = self.shared.state() == ConnectionState::Streaming;
        self.shared.stats.flush(&mut self.local, now, streaming);
        self.drop_transport();
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Close the socket and clear the connected-only published fields.
    fn drop_transport(&mut self) {
        self.transport.close();
        self.shared.healthy.store(false, Ordering::Release);
        self.shared.stats.on_disconnected();
    }
}
