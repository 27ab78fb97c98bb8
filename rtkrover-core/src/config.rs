//! Client configuration.
//!
//! The configuration is read-mostly: the supervisor snapshots it once per
//! connection attempt (at the DISCONNECTED to CONNECTING edge), so changes
//! staged through [`crate::client::NtripHandle::update_config`] are only
//! picked up at that safe boundary.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why [`NtripConfig::validate`] rejected a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("host is empty")]
    EmptyHost,
    #[error("mount is empty")]
    EmptyMount,
    #[error("port is zero")]
    ZeroPort,
    #[error("buffer_size is zero")]
    ZeroBufferSize,
    #[error("connect_timeout_ms is zero")]
    ZeroConnectTimeout,
    #[error("max_tries is zero")]
    ZeroMaxTries,
    #[error("health_timeout_ms is zero")]
    ZeroHealthTimeout,
}

/// Connection parameters for one caster mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NtripConfig {
    /// Caster host name or IP address.
    pub host: String,
    /// Caster port.
    pub port: u16,
    /// Mount point to subscribe to.
    pub mount: String,
    /// Basic-auth user name.
    pub user: String,
    /// Basic-auth password.
    pub pass: String,
    /// Optional NMEA GGA sentence sent as an `Ntrip-GGA` header (Rev2 only).
    /// Empty means none.
    pub gga_sentence: String,
    /// Reconnect attempts before lockout.
    pub max_tries: u32,
    /// Delay between connection attempts.
    pub retry_delay_ms: u64,
    /// Zombie stream detection timeout.
    pub health_timeout_ms: u64,
    /// Passive health check interval once the stream is validated.
    pub passive_sample_ms: u64,
    /// Valid frames needed before the stream counts as healthy.
    pub required_valid_frames: u32,
    /// TCP read buffer size. Allocated once per task lifetime.
    pub buffer_size: usize,
    /// TCP connect and HTTP response timeout.
    pub connect_timeout_ms: u64,
    /// Retry the handshake with NTRIP Rev1 when the Rev2 attempt fails.
    pub rev1_fallback: bool,
}

impl Default for NtripConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 2101,
            mount: String::new(),
            user: String::new(),
            pass: String::new(),
            gga_sentence: String::new(),
            max_tries: 5,
            retry_delay_ms: 30_000,
            health_timeout_ms: 60_000,
            passive_sample_ms: 5_000,
            required_valid_frames: 3,
            buffer_size: 1024,
            connect_timeout_ms: 5_000,
            rev1_fallback: true,
        }
    }
}

impl NtripConfig {
    /// Check the invariants the supervisor relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::EmptyHost);
        }
        if self.mount.is_empty() {
            return Err(ConfigError::EmptyMount);
        }
        if self.port == 0 {
            return Err(ConfigError::ZeroPort);
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroConnectTimeout);
        }
        if self.max_tries == 0 {
            return Err(ConfigError::ZeroMaxTries);
        }
        if self.health_timeout_ms == 0 {
            return Err(ConfigError::ZeroHealthTimeout);
        }
        Ok(())
    }
}
