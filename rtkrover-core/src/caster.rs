//! Caster handshake.
//!
//! One attempt takes a transport from disconnected to "the next byte is
//! binary RTCM": TCP connect, NTRIP request, status-line classification,
//! header drain. Negotiation tries Rev2 (HTTP/1.1 plus `Ntrip-Version`)
//! first and optionally falls back to Rev1 (plain HTTP/1.0).
//!
//! Casters are a rough crowd: some answer `ICY 200 OK` with no header
//! block at all, so a missed header/body boundary is logged as a warning
//! and treated as success.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use thiserror::Error;

use crate::config::NtripConfig;
use crate::error::NtripError;
use crate::logger::Logger;
use crate::transport::{Clock, Transport};

const TAG: &str = "caster";

/// Implementation name placed in the User-Agent header.
pub const USER_AGENT_NAME: &str = "rtkrover";

/// Negotiated NTRIP protocol revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtocolVersion {
    Rev1,
    Rev2,
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::Rev1 => write!(f, "Ntrip/1.0"),
            ProtocolVersion::Rev2 => write!(f, "Ntrip/2.0"),
        }
    }
}

/// A failed handshake attempt, carrying the taxonomy kind the supervisor
/// publishes plus the human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SessionError {
    pub kind: NtripError,
    pub message: String,
}

impl SessionError {
    fn new(kind: NtripError, message: String) -> Self {
        Self { kind, message }
    }
}

/// Status-line classification per the NTRIP error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusClass {
    Ok,
    AuthFailed,
    MountNotFound,
    Other,
}

pub(crate) fn classify_status_line(line: &str) -> StatusClass {
    if line.starts_with("ICY 200")
        || line.starts_with("HTTP/1.1 200")
        || line.starts_with("HTTP/1.0 200")
    {
        StatusClass::Ok
    } else if line.contains("401") {
        StatusClass::AuthFailed
    } else if line.contains("404") {
        StatusClass::MountNotFound
    } else {
        StatusClass::Other
    }
}

/// Serialise the request exactly as it goes on the wire.
pub(crate) fn build_request(config: &NtripConfig, use_rev2: bool) -> String {
    let auth = BASE64.encode(format!("{}:{}", config.user, config.pass));
    let http_version = if use_rev2 { "1.1" } else { "1.0" };

    let mut request = String::with_capacity(256);
    request.push_str(&format!("GET /{} HTTP/{}\r\n", config.mount, http_version));
    request.push_str(&format!(
        "User-Agent: NTRIP {} v{}\r\n",
        USER_AGENT_NAME,
        crate::VERSION
    ));
    if use_rev2 {
        request.push_str(&format!("Host: {}\r\n", config.host));
        request.push_str("Ntrip-Version: Ntrip/2.0\r\n");
    }
    request.push_str(&format!("Authorization: Basic {}\r\n", auth));
    if use_rev2 && !config.gga_sentence.is_empty() {
        request.push_str(&format!("Ntrip-GGA: {}\r\n", config.gga_sentence));
    }
    request.push_str("\r\n");
    request
}

/// One-shot handshake driver. Borrows the supervisor's transport; on
/// success the transport is left open with the binary stream pending.
pub struct CasterSession<'a, T: Transport, C: Clock> {
    transport: &'a mut T,
    clock: &'a C,
    logger: &'a Logger,
}

impl<'a, T: Transport, C: Clock> CasterSession<'a, T, C> {
    pub fn new(transport: &'a mut T, clock: &'a C, logger: &'a Logger) -> Self {
        Self {
            transport,
            clock,
            logger,
        }
    }

    /// Negotiate: Rev2 first, then Rev1 when fallback is enabled. When both
    /// attempts fail, the error of the last attempt is reported.
    pub fn connect(&mut self, config: &NtripConfig) -> Result<ProtocolVersion, SessionError> {
        match self.connect_with_version(config, true) {
            Ok(()) => Ok(ProtocolVersion::Rev2),
            Err(rev2_error) => {
                if !config.rev1_fallback {
                    return Err(rev2_error);
                }
                self.logger
                    .warn(TAG, "Rev2 handshake failed, falling back to Rev1");
                match self.connect_with_version(config, false) {
                    Ok(()) => Ok(ProtocolVersion::Rev1),
                    Err(rev1_error) => Err(rev1_error),
                }
            }
        }
    }

    /// One attempt with a fixed protocol revision. The transport is closed
    /// on every failure path.
    fn connect_with_version(
        &mut self,
        config: &NtripConfig,
        use_rev2: bool,
    ) -> Result<(), SessionError> {
        self.transport
            .connect(&config.host, config.port, config.connect_timeout_ms)
            .map_err(|e| {
                SessionError::new(
                    NtripError::TcpConnectFailed,
                    format!("Cannot reach {}:{}: {}", config.host, config.port, e),
                )
            })?;

        let request = build_request(config, use_rev2);
        if let Err(e) = self.transport.write_all(request.as_bytes()) {
            self.transport.close();
            return Err(SessionError::new(
                NtripError::TcpConnectFailed,
                format!("Request write to {} failed: {}", config.host, e),
            ));
        }

        let line = match self.transport.read_line(config.connect_timeout_ms) {
            Some(line) => line,
            None => {
                self.transport.close();
                return Err(SessionError::new(
                    NtripError::HttpTimeout,
                    format!("No response from {}", config.host),
                ));
            }
        };

        self.logger.info(TAG, &format!("Caster response: {}", line));

        match classify_status_line(&line) {
            StatusClass::Ok => {
                self.drain_headers(config.connect_timeout_ms);
                Ok(())
            }
            StatusClass::AuthFailed => {
                self.transport.close();
                Err(SessionError::new(
                    NtripError::HttpAuthFailed,
                    format!("Invalid credentials for {}", config.host),
                ))
            }
            StatusClass::MountNotFound => {
                self.transport.close();
                Err(SessionError::new(
                    NtripError::HttpMountNotFound,
                    format!("Mount not found: {}", config.mount),
                ))
            }
            StatusClass::Other => {
                self.transport.close();
                Err(SessionError::new(
                    NtripError::HttpUnknownError,
                    format!("HTTP error: {}", line),
                ))
            }
        }
    }

    /// Read header lines until the empty line before the body. A caster
    /// that never sends the boundary gets a warning and success anyway.
    fn drain_headers(&mut self, timeout_ms: u64) {
        let deadline = self.clock.now_ms() + timeout_ms;
        loop {
            let now = self.clock.now_ms();
            if now >= deadline {
                self.logger
                    .warn(TAG, "Header drain deadline passed, assuming stream start");
                return;
            }
            match self.transport.read_line(deadline - now) {
                Some(line) if line.is_empty() => {
                    self.logger.debug(TAG, "Headers drained, binary stream follows");
                    return;
                }
                Some(_) => continue,
                None => {
                    self.logger
                        .warn(TAG, "Header drain deadline passed, assuming stream start");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MockTransport};

    fn test_config() -> NtripConfig {
        NtripConfig {
            host: "caster.example.com".to_string(),
            mount: "MOUNT1".to_string(),
            user: "user".to_string(),
            pass: "pass".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_rev2_request_wire_format() {
        let request = build_request(&test_config(), true);
        let expected = format!(
            "GET /MOUNT1 HTTP/1.1\r\n\
             User-Agent: NTRIP rtkrover v{}\r\n\
             Host: caster.example.com\r\n\
             Ntrip-Version: Ntrip/2.0\r\n\
             Authorization: Basic dXNlcjpwYXNz\r\n\
             \r\n",
            crate::VERSION
        );
        assert_eq!(request, expected);
    }

    #[test]
    fn test_rev1_request_omits_rev2_headers() {
        let mut config = test_config();
        config.gga_sentence = "$GPGGA,dummy".to_string();
        let request = build_request(&config, false);
        assert!(request.starts_with("GET /MOUNT1 HTTP/1.0\r\n"));
        assert!(!request.contains("Host:"));
        assert!(!request.contains("Ntrip-Version:"));
        assert!(!request.contains("Ntrip-GGA:"));
        assert!(request.contains("Authorization: Basic dXNlcjpwYXNz\r\n"));
    }

    #[test]
    fn test_gga_header_only_when_non_empty() {
        let mut config = test_config();
        assert!(!build_request(&config, true).contains("Ntrip-GGA"));

        config.gga_sentence = "$GPGGA,123519,4807.038,N".to_string();
        let request = build_request(&config, true);
        assert!(request.contains("Ntrip-GGA: $GPGGA,123519,4807.038,N\r\n"));
    }

    /// Parse the serialised request back with a plain HTTP/1.1 reading and
    /// check that exactly the required headers come out, nothing else.
    #[test]
    fn test_rev2_request_round_trips_as_http() {
        let mut config = test_config();
        config.gga_sentence = "$GPGGA,x".to_string();
        let request = build_request(&config, true);
        assert!(request.ends_with("\r\n\r\n"));

        let head = request.trim_end_matches("\r\n");
        let mut lines = head.split("\r\n");
        assert_eq!(lines.next(), Some("GET /MOUNT1 HTTP/1.1"));

        let headers: Vec<(&str, &str)> = lines
            .map(|l| l.split_once(": ").expect("malformed header"))
            .collect();
        let names: Vec<&str> = headers.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "User-Agent",
                "Host",
                "Ntrip-Version",
                "Authorization",
                "Ntrip-GGA"
            ]
        );
    }

    #[test]
    fn test_status_line_classification() {
        assert_eq!(classify_status_line("ICY 200 OK"), StatusClass::Ok);
        assert_eq!(classify_status_line("HTTP/1.1 200 OK"), StatusClass::Ok);
        assert_eq!(classify_status_line("HTTP/1.0 200 OK"), StatusClass::Ok);
        assert_eq!(
            classify_status_line("HTTP/1.1 401 Unauthorized"),
            StatusClass::AuthFailed
        );
        assert_eq!(
            classify_status_line("HTTP/1.1 404 Not Found"),
            StatusClass::MountNotFound
        );
        assert_eq!(
            classify_status_line("HTTP/1.1 500 Internal Server Error"),
            StatusClass::Other
        );
        assert_eq!(classify_status_line("SOURCETABLE 200 OK"), StatusClass::Other);
    }

    #[test]
    fn test_happy_path_negotiates_rev2() {
        let transport = MockTransport::new();
        transport.push_line("ICY 200 OK");
        transport.push_line("");
        let clock = ManualClock::new();
        let logger = Logger::new();

        let mut transport_for_session = transport.clone();
        let mut session = CasterSession::new(&mut transport_for_session, &clock, &logger);
        let version = session.connect(&test_config()).unwrap();
        assert_eq!(version, ProtocolVersion::Rev2);
        assert!(transport.is_connected());

        let written = transport.written();
        let request = String::from_utf8(written).unwrap();
        assert!(request.starts_with("GET /MOUNT1 HTTP/1.1\r\n"));
    }

    #[test]
    fn test_auth_failure_closes_and_reports() {
        let mut config = test_config();
        config.rev1_fallback = false;
        let transport = MockTransport::new();
        transport.push_line("HTTP/1.1 401 Unauthorized");
        let clock = ManualClock::new();
        let logger = Logger::new();

        let mut transport_for_session = transport.clone();
        let mut session = CasterSession::new(&mut transport_for_session, &clock, &logger);
        let err = session.connect(&config).unwrap_err();
        assert_eq!(err.kind, NtripError::HttpAuthFailed);
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_mount_not_found() {
        let mut config = test_config();
        config.rev1_fallback = false;
        let transport = MockTransport::new();
        transport.push_line("HTTP/1.1 404 Not Found");
        let clock = ManualClock::new();
        let logger = Logger::new();

        let mut transport_for_session = transport.clone();
        let mut session = CasterSession::new(&mut transport_for_session, &clock, &logger);
        let err = session.connect(&config).unwrap_err();
        assert_eq!(err.kind, NtripError::HttpMountNotFound);
        assert!(err.message.contains("MOUNT1"));
    }

    #[test]
    fn test_no_response_times_out() {
        let mut config = test_config();
        config.rev1_fallback = false;
        let transport = MockTransport::new();
        // No lines scripted: read_line reports a deadline miss.
        let clock = ManualClock::new();
        let logger = Logger::new();

        let mut transport_for_session = transport.clone();
        let mut session = CasterSession::new(&mut transport_for_session, &clock, &logger);
        let err = session.connect(&config).unwrap_err();
        assert_eq!(err.kind, NtripError::HttpTimeout);
        assert!(!transport.is_connected());
    }

    #[test]
    fn test_tcp_connect_failure() {
        let mut config = test_config();
        config.rev1_fallback = false;
        let transport = MockTransport::new();
        transport.fail_next_connect("connection refused");
        let clock = ManualClock::new();
        let logger = Logger::new();

        let mut transport_for_session = transport.clone();
        let mut session = CasterSession::new(&mut transport_for_session, &clock, &logger);
        let err = session.connect(&config).unwrap_err();
        assert_eq!(err.kind, NtripError::TcpConnectFailed);
        assert!(err.message.contains("caster.example.com:2101"));
    }

    #[test]
    fn test_rev1_fallback_after_rev2_rejection() {
        let transport = MockTransport::new();
        // Rev2 attempt sees a 400; Rev1 attempt succeeds.
        transport.push_line("HTTP/1.1 400 Bad Request");
        transport.push_line("ICY 200 OK");
        transport.push_line("");
        let clock = ManualClock::new();
        let logger = Logger::new();

        let mut transport_for_session = transport.clone();
        let mut session = CasterSession::new(&mut transport_for_session, &clock, &logger);
        let version = session.connect(&test_config()).unwrap();
        assert_eq!(version, ProtocolVersion::Rev1);
        assert_eq!(transport.connect_count(), 2);

        let request = String::from_utf8(transport.written()).unwrap();
        let second = request.split("\r\n\r\n").nth(1).unwrap_or("");
        assert!(second.starts_with("GET /MOUNT1 HTTP/1.0\r\n"));
    }

    #[test]
    fn test_fallback_failure_reports_last_attempt() {
        let transport = MockTransport::new();
        transport.push_line("HTTP/1.1 400 Bad Request");
        transport.push_line("HTTP/1.1 401 Unauthorized");
        let clock = ManualClock::new();
        let logger = Logger::new();

        let mut transport_for_session = transport.clone();
        let mut session = CasterSession::new(&mut transport_for_session, &clock, &logger);
        let err = session.connect(&test_config()).unwrap_err();
        assert_eq!(err.kind, NtripError::HttpAuthFailed);
    }

    #[test]
    fn test_missing_header_boundary_warns_but_succeeds() {
        let transport = MockTransport::new();
        // Status line only, no header block, no boundary.
        transport.push_line("ICY 200 OK");
        let clock = ManualClock::new();
        let logger = Logger::new();
        let warnings = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = warnings.clone();
        logger.set(Some(std::sync::Arc::new(move |level, _, message: &str| {
            if level == crate::logger::LogLevel::Warning {
                sink.lock().unwrap().push(message.to_string());
            }
        })));

        let mut transport_for_session = transport.clone();
        let mut session = CasterSession::new(&mut transport_for_session, &clock, &logger);
        let version = session.connect(&test_config()).unwrap();
        assert_eq!(version, ProtocolVersion::Rev2);
        assert!(warnings
            .lock()
            .unwrap()
            .iter()
            .any(|w| w.contains("Header drain")));
    }

    #[test]
    fn test_header_lines_are_drained_before_success() {
        let transport = MockTransport::new();
        transport.push_line("HTTP/1.1 200 OK");
        transport.push_line("Content-Type: gnss/data");
        transport.push_line("Server: ExampleCaster/2.0");
        transport.push_line("");
        // Binary payload scripted behind the headers must stay readable.
        transport.push_data(&[0xD3, 0x00, 0x00]);
        let clock = ManualClock::new();
        let logger = Logger::new();

        let mut transport_for_session = transport.clone();
        let mut session = CasterSession::new(&mut transport_for_session, &clock, &logger);
        session.connect(&test_config()).unwrap();

        let mut buf = [0u8; 8];
        let n = transport.read_into(&mut buf);
        assert_eq!(&buf[..n], &[0xD3, 0x00, 0x00]);
    }
}
