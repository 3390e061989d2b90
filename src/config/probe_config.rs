use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::ConfigError;
use crate::output::format::OutputMode;
use crate::probe::target::Target;

pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_PROM_PORT: u16 = 8081;

/// Which address family a target may be reached over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IpFamily {
    #[default]
    Any,
    V4,
    V6,
}

impl IpFamily {
    pub fn from_flags(ipv4: bool, ipv6: bool) -> Result<Self, ConfigError> {
        match (ipv4, ipv6) {
            (true, true) => Err(ConfigError::ConflictingFamilies),
            (true, false) => Ok(IpFamily::V4),
            (false, true) => Ok(IpFamily::V6),
            (false, false) => Ok(IpFamily::Any),
        }
    }

    pub fn allows(self, ip: IpAddr) -> bool {
        match self {
            IpFamily::Any => true,
            IpFamily::V4 => ip.is_ipv4(),
            IpFamily::V6 => ip.is_ipv6(),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            IpFamily::Any => "any",
            IpFamily::V4 => "IPv4-only",
            IpFamily::V6 => "IPv6-only",
        }
    }
}

/// Socket options applied before connecting. `None` keeps the OS default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketTuning {
    /// IP type of service (IPv4) / traffic class (IPv6).
    pub tos: Option<u32>,
    /// IP time to live (IPv4) / unicast hop limit (IPv6).
    pub ttl: Option<u32>,
    /// `SO_PRIORITY` queuing discipline priority. Linux only.
    pub priority: Option<u32>,
    /// `TCP_MAXSEG`.
    pub mss: Option<u32>,
    /// `TCP_CONGESTION` algorithm name. Linux only.
    pub congestion: Option<String>,
    pub send_buffer: Option<usize>,
    pub recv_buffer: Option<usize>,
    /// Set `TCP_NODELAY`, turning Nagle's algorithm off.
    pub nodelay: bool,
    /// Clear `TCP_QUICKACK`. Linux only.
    pub quickack_disabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Accept any certificate and host name.
    pub insecure: bool,
    /// Name to send in SNI and verify against, instead of the target host.
    pub server_name: Option<String>,
}

/// Process-wide probe settings. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub family: IpFamily,
    pub source_addr: Option<IpAddr>,
    pub dial_timeout: Duration,
    pub http_timeout: Duration,
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Cycles per target, 0 for unlimited.
    pub count: u64,
    pub socket: SocketTuning,
    pub tls: TlsOptions,
    /// Offer HTTP/2 through ALPN. Plain HTTP stays on HTTP/1.1.
    pub http2: bool,
    /// Field names to output, empty for all exportable fields.
    pub filter: Vec<String>,
    pub output: OutputMode,
    /// Metrics listener, `None` when exposition is disabled.
    pub prom_addr: Option<SocketAddr>,
    /// Resolvers to query instead of the system configuration.
    pub dns_servers: Vec<IpAddr>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            family: IpFamily::Any,
            source_addr: None,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            count: 0,
            socket: SocketTuning::default(),
            tls: TlsOptions::default(),
            http2: false,
            filter: Vec::new(),
            output: OutputMode::default(),
            prom_addr: Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                DEFAULT_PROM_PORT,
            )),
            dns_servers: Vec::new(),
        }
    }
}

impl ProbeConfig {
    /// Pre-flight checks. Runs before any socket exists.
    pub fn validate(&self, targets: &[Target]) -> Result<(), ConfigError> {
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        if let Some(source) = self.source_addr {
            if !self.family.allows(source) {
                return Err(ConfigError::SourceFamilyMismatch(source));
            }
        }
        for target in targets {
            target.check_family(self.family)?;
        }
        Ok(())
    }
}
