//! # rtkrover-core
//!
//! Platform-independent NTRIP client core: subscribe to a caster mount
//! point, receive RTCM 3.x corrections, forward them verbatim to a GNSS
//! receiver, and keep the connection honest.
//!
//! This crate contains no sockets, no threads of its own and no async. All
//! I/O goes through the [`transport::Transport`] trait, all time through
//! [`transport::Clock`], and logging through the [`logger::Logger`] port,
//! so the same supervisor runs against real TCP in the daemon and against
//! scripted fakes in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  NtripClient (supervisor, one writer)                    │
//! │                                                          │
//! │   CasterSession ──▶ Transport          bytes             │
//! │        │                 │          ┌──────────▶ RtcmSink│
//! │        ▼                 ▼          │            (GNSS)  │
//! │   DISCONNECTED → CONNECTING → STREAMING                  │
//! │        ▲                            │                    │
//! │        │                            ▼                    │
//! │   LOCKED_OUT            HealthMonitor(RtcmParser)        │
//! └──────────────────────────────────────────────────────────┘
//!            ▲ NtripHandle: state/healthy atomics,
//!            │ stats snapshots, stop/reset/reconnect
//!        observers (any number of threads)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use rtkrover_core::{NtripClient, NtripConfig};
//!
//! let config = NtripConfig {
//!     host: "caster.example.com".into(),
//!     mount: "MOUNT1".into(),
//!     user: "user".into(),
//!     pass: "pass".into(),
//!     ..Default::default()
//! };
//! let mut client = NtripClient::new(config, transport, clock, gnss_uart)?;
//! let handle = client.handle();
//! std::thread::spawn(move || client.run());
//!
//! // Any thread:
//! if handle.is_healthy() {
//!     println!("{:?}", handle.stats());
//! }
//! ```

pub mod caster;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod logger;
pub mod rtcm;
pub mod stats;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use caster::ProtocolVersion;
pub use client::{ConnectionState, NtripClient, NtripHandle};
pub use config::{ConfigError, NtripConfig};
pub use error::NtripError;
pub use logger::{LogCallback, LogLevel};
pub use stats::NtripStats;
pub use transport::{Clock, RtcmSink, Transport, TransportError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
