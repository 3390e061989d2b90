use std::net::IpAddr;

use super::timer::PhaseTimings;
use crate::error::ProbeError;
use crate::tcpinfo::Snapshot;

/// Everything one probe cycle produced. Built once at the end of the cycle
/// and moved whole to the consumers.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    /// Target label.
    pub target: String,
    /// Address the cycle dialed, if resolution got that far.
    pub ip: Option<IpAddr>,
    /// Wall clock at the end of the cycle, epoch seconds.
    pub timestamp: i64,
    pub seq: u64,
    pub snapshot: Snapshot,
    pub timings: PhaseTimings,
    /// 0 when no response was received.
    pub http_status: u16,
    pub http_rcvd_bytes: u64,
    /// Failures of this target since startup.
    pub dns_errors: u64,
    pub connect_errors: u64,
    pub tls_errors: u64,
    /// Why this cycle failed, if it did.
    pub error: Option<ProbeError>,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
