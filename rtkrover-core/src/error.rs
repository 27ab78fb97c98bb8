//! Error taxonomy for the NTRIP client.
//!
//! Every failure the supervisor can encounter maps to exactly one variant.
//! The variant is published through the stats record together with a
//! human-readable message; there is no exception-style propagation across
//! the supervisor boundary.

use serde::Serialize;
use thiserror::Error;

/// Errors surfaced through `NtripStats::last_error`.
///
/// `None` (absence) means no error has occurred since the last successful
/// connection or `reset()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NtripError {
    /// Configuration rejected by [`crate::config::NtripConfig::validate`].
    #[error("invalid configuration")]
    InvalidConfig,

    /// TCP connect failed, or the socket dropped while streaming.
    #[error("TCP connect failed")]
    TcpConnectFailed,

    /// Caster answered 401 on the status line.
    #[error("HTTP authentication failed")]
    HttpAuthFailed,

    /// Caster answered 404 on the status line.
    #[error("HTTP mount point not found")]
    HttpMountNotFound,

    /// No response byte arrived within the connect timeout.
    #[error("HTTP response timeout")]
    HttpTimeout,

    /// Any other non-200 status line.
    #[error("HTTP unknown error")]
    HttpUnknownError,

    /// Reserved: validation never completed before the zombie timeout fired.
    /// Reported through the zombie path.
    #[error("stream validation failed")]
    StreamValidationFailed,

    /// Open connection delivered no valid RTCM within the health timeout.
    #[error("zombie stream detected")]
    ZombieStreamDetected,

    /// Failure counter reached `max_tries`; supervisor is locked out.
    #[error("maximum retries exceeded")]
    MaxRetriesExceeded,
}
