//! Stream health monitoring.
//!
//! A fresh connection starts in the VALIDATION phase: every received byte
//! goes through the RTCM parser until enough valid frames prove the mount
//! is real. After that the monitor switches to passive sampling, scanning
//! only a small prefix of each read for the preamble on a timer. Full
//! parsing is expensive on small targets; once the stream has proven
//! itself, a cheap liveness probe is enough.
//!
//! In both phases, silence past the health timeout marks the connection a
//! zombie and the supervisor tears it down.

use crate::logger::Logger;
use crate::rtcm::{FrameResult, RtcmParser, RTCM3_PREAMBLE};

const TAG: &str = "health";

/// How many leading bytes of a read the passive probe scans.
pub const PASSIVE_SCAN_BYTES: usize = 128;

/// Phase of an established connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    /// Strict parsing until the required number of valid frames.
    Validation,
    /// Passive preamble sampling.
    Streaming,
}

/// What one batch of bytes did to the monitor, for the supervisor's stats
/// accumulators and the healthy flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthReport {
    /// Valid frames completed in this batch.
    pub frames: u32,
    /// CRC failures in this batch.
    pub crc_errors: u32,
    /// Message type of the last valid frame; 0 when none completed.
    pub last_message_type: u16,
    /// The validation phase finished during this batch.
    pub validated: bool,
    /// The passive probe found a preamble in this batch.
    pub preamble_seen: bool,
}

/// Two-phase stream validator and zombie detector.
#[derive(Debug)]
pub struct HealthMonitor {
    parser: RtcmParser,
    phase: StreamPhase,
    valid_frames: u32,
    last_health_ms: u64,
    last_sample_ms: u64,
    phase_start_ms: u64,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            parser: RtcmParser::new(),
            phase: StreamPhase::Validation,
            valid_frames: 0,
            last_health_ms: 0,
            last_sample_ms: 0,
            phase_start_ms: 0,
        }
    }

    /// Arm the monitor for a fresh connection.
    pub fn on_connect(&mut self, now_ms: u64) {
        self.parser.reset();
        self.phase = StreamPhase::Validation;
        self.valid_frames = 0;
        self.last_health_ms = now_ms;
        self.last_sample_ms = now_ms;
        self.phase_start_ms = now_ms;
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn valid_frames(&self) -> u32 {
        self.valid_frames
    }

    pub fn last_health_ms(&self) -> u64 {
        self.last_health_ms
    }

    /// Milliseconds of silence before the stream counts as a zombie.
    pub fn is_zombie(&self, now_ms: u64, health_timeout_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_health_ms) > health_timeout_ms
    }

    /// Run one received batch through the current phase.
    pub fn process(
        &mut self,
        data: &[u8],
        now_ms: u64,
        required_valid_frames: u32,
        passive_sample_ms: u64,
        logger: &Logger,
    ) -> HealthReport {
        match self.phase {
            StreamPhase::Validation => {
                self.validate(data, now_ms, required_valid_frames, logger)
            }
            StreamPhase::Streaming => self.sample(data, now_ms, passive_sample_ms, logger),
        }
    }

    fn validate(
        &mut self,
        data: &[u8],
        now_ms: u64,
        required_valid_frames: u32,
        logger: &Logger,
    ) -> HealthReport {
        let mut report = HealthReport::default();
        for &byte in data {
            match self.parser.feed(byte) {
                FrameResult::Frame { message_type, .. } => {
                    self.valid_frames += 1;
                    self.last_health_ms = now_ms;
                    report.frames += 1;
                    report.last_message_type = message_type;
                    logger.debug(
                        TAG,
                        &format!(
                            "Valid RTCM {} ({}/{})",
                            message_type, self.valid_frames, required_valid_frames
                        ),
                    );
                    if self.valid_frames >= required_valid_frames {
                        self.phase = StreamPhase::Streaming;
                        self.last_sample_ms = now_ms;
                        report.validated = true;
                        logger.info(
                            TAG,
                            &format!(
                                "Stream validated in {} ms",
                                now_ms.saturating_sub(self.phase_start_ms)
                            ),
                        );
                        break;
                    }
                }
                FrameResult::CrcError { .. } => {
                    report.crc_errors += 1;
                }
                FrameResult::Progress => {}
            }
        }
        report
    }

    fn sample(
        &mut self,
        data: &[u8],
        now_ms: u64,
        passive_sample_ms: u64,
        logger: &Logger,
    ) -> HealthReport {
        let mut report = HealthReport::default();
        if now_ms.saturating_sub(self.last_sample_ms) <= passive_sample_ms {
            return report;
        }

        let scan = &data[..data.len().min(PASSIVE_SCAN_BYTES)];
        if scan.contains(&RTCM3_PREAMBLE) {
            self.last_health_ms = now_ms;
            self.last_sample_ms = now_ms;
            report.preamble_seen = true;
        } else {
            // A single miss is only a warning; the sample window stays open
            // so the next read gets probed again.
            logger.warn(TAG, "No RTCM preamble in passive sample");
        }
        report
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}
