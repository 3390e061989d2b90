use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use super::probe_config::{IpFamily, ProbeConfig, SocketTuning, TlsOptions};
use crate::error::ConfigError;
use crate::output::filter::MetricFilter;
use crate::output::format::OutputMode;
use crate::probe::target::Target;

/// Probe TCP, TLS and HTTP targets and report kernel TCP state and phase
/// latencies.
#[derive(Debug, Parser)]
#[command(name = "oxyprobe", version, override_usage = "oxyprobe [OPTIONS] <TARGET>...")]
pub struct Cli {
    /// host:port, [v6]:port, or an http:// / https:// URL
    pub targets: Vec<String>,

    /// Connect only to IPv4 addresses
    #[arg(short = '4', long, env = "OXYPROBE_IPV4")]
    pub ipv4: bool,

    /// Connect only to IPv6 addresses
    #[arg(short = '6', long, env = "OXYPROBE_IPV6")]
    pub ipv6: bool,

    /// Stop after this many probes per target [0 is unlimited]
    #[arg(short, long, default_value_t = 0, env = "OXYPROBE_COUNT")]
    pub count: u64,

    /// Force HTTP version 2
    #[arg(long, env = "OXYPROBE_HTTP2")]
    pub http2: bool,

    /// Disable the Prometheus exporter
    #[arg(long, env = "OXYPROBE_PROM_DISABLED")]
    pub prom_disabled: bool,

    /// Don't validate the server's certificate
    #[arg(long, env = "OXYPROBE_INSECURE")]
    pub insecure: bool,

    /// Server name used to verify the host name (TLS)
    #[arg(short = 'n', long, env = "OXYPROBE_SERVER_NAME")]
    pub server_name: Option<String>,

    /// Source address of outgoing connections
    #[arg(short = 'S', long, env = "OXYPROBE_SOURCE_ADDR")]
    pub source_addr: Option<IpAddr>,

    /// Prometheus exporter listen address
    #[arg(short = 'p', long, default_value = ":8081", env = "OXYPROBE_PROM_ADDR")]
    pub prom_addr: String,

    /// Metric names to print, semicolon delimited
    #[arg(short, long, env = "OXYPROBE_FILTER")]
    pub filter: Option<String>,

    /// Timeout for dialing targets
    #[arg(short, long, default_value = "5s", value_parser = parse_duration, env = "OXYPROBE_TIMEOUT")]
    pub timeout: Duration,

    /// Timeout for the HTTP exchange
    #[arg(long, default_value = "30s", value_parser = parse_duration, env = "OXYPROBE_HTTP_TIMEOUT")]
    pub http_timeout: Duration,

    /// Time to wait after each probe
    #[arg(short, long, default_value = "1s", value_parser = parse_duration, env = "OXYPROBE_INTERVAL")]
    pub interval: Duration,

    /// IP type of service [default: depends on the OS]
    #[arg(short = 'z', long, env = "OXYPROBE_TOS")]
    pub tos: Option<u32>,

    /// IP time to live [default: depends on the OS]
    #[arg(short = 'm', long, env = "OXYPROBE_TTL")]
    pub ttl: Option<u32>,

    /// Socket queuing priority [default: depends on the OS]
    #[arg(short = 'r', long, env = "OXYPROBE_SOCKET_PRIORITY")]
    pub socket_priority: Option<u32>,

    /// TCP maximum segment size [default: depends on the OS]
    #[arg(short = 'M', long, env = "OXYPROBE_MSS")]
    pub mss: Option<u32>,

    /// TCP congestion control algorithm [default: depends on the OS]
    #[arg(long, env = "OXYPROBE_CONGESTION_ALG")]
    pub congestion_alg: Option<String>,

    /// Socket send buffer in bytes [default: depends on the OS]
    #[arg(long, env = "OXYPROBE_SEND_BUFFER")]
    pub send_buffer: Option<usize>,

    /// Socket receive buffer in bytes [default: depends on the OS]
    #[arg(long, env = "OXYPROBE_RCVD_BUFFER")]
    pub rcvd_buffer: Option<usize>,

    /// Disable Nagle's algorithm (set TCP_NODELAY)
    #[arg(short = 'o', long, env = "OXYPROBE_TCP_NODELAY_DISABLED")]
    pub tcp_nodelay_disabled: bool,

    /// Disable quick ack mode
    #[arg(short = 'k', long, env = "OXYPROBE_TCP_QUICKACK_DISABLED")]
    pub tcp_quickack_disabled: bool,

    /// Turn off probe output
    #[arg(short, long, env = "OXYPROBE_QUIET")]
    pub quiet: bool,

    /// Print in JSON format
    #[arg(long, env = "OXYPROBE_JSON")]
    pub json: bool,

    /// Pretty print in JSON format
    #[arg(long, env = "OXYPROBE_JSON_PRETTY")]
    pub json_pretty: bool,

    /// Show metric descriptions and exit
    #[arg(long)]
    pub metrics: bool,

    /// YAML file with additional targets
    #[arg(long, env = "OXYPROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// DNS servers to use instead of the system resolver, comma delimited
    #[arg(long, value_delimiter = ',', env = "OXYPROBE_DNS_SERVERS")]
    pub dns_servers: Vec<IpAddr>,

    /// Log progress at info level
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        if self.quiet {
            OutputMode::Quiet
        } else if self.json_pretty {
            OutputMode::JsonPretty
        } else if self.json {
            OutputMode::Json
        } else {
            OutputMode::Text
        }
    }

    pub fn probe_config(&self) -> Result<ProbeConfig, ConfigError> {
        let prom_addr = if self.prom_disabled {
            None
        } else {
            Some(parse_prom_addr(&self.prom_addr)?)
        };

        Ok(ProbeConfig {
            family: IpFamily::from_flags(self.ipv4, self.ipv6)?,
            source_addr: self.source_addr,
            dial_timeout: self.timeout,
            http_timeout: self.http_timeout,
            interval: self.interval,
            count: self.count,
            socket: SocketTuning {
                tos: self.tos,
                ttl: self.ttl,
                priority: self.socket_priority,
                mss: self.mss,
                congestion: self.congestion_alg.clone(),
                send_buffer: self.send_buffer,
                recv_buffer: self.rcvd_buffer,
                nodelay: self.tcp_nodelay_disabled,
                quickack_disabled: self.tcp_quickack_disabled,
            },
            tls: TlsOptions {
                insecure: self.insecure,
                server_name: self.server_name.clone(),
            },
            http2: self.http2,
            filter: self
                .filter
                .as_deref()
                .map(MetricFilter::split)
                .unwrap_or_default(),
            output: self.output_mode(),
            prom_addr,
            dns_servers: self.dns_servers.clone(),
        })
    }

    /// Targets given on the command line.
    pub fn targets(&self) -> Result<Vec<Target>, ConfigError> {
        self.targets.iter().map(|addr| Target::parse(addr)).collect()
    }
}

/// An empty host, as in `:8081`, listens on every interface.
pub fn parse_prom_addr(addr: &str) -> Result<SocketAddr, ConfigError> {
    let invalid = || ConfigError::InvalidAddress(addr.to_string());
    match addr.strip_prefix(':') {
        Some(port) => {
            let port = port.parse().map_err(|_| invalid())?;
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
        }
        None => addr.parse().map_err(|_| invalid()),
    }
}

/// Accepts `250ms`, `5s`, `2m`, `1h`, or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let number: f64 = number
        .parse()
        .map_err(|_| ConfigError::InvalidDuration(value.to_string()).to_string())?;
    let seconds = match unit {
        "ms" => number / 1000.0,
        "" | "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return Err(ConfigError::InvalidDuration(value.to_string()).to_string()),
    };
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| ConfigError::InvalidDuration(value.to_string()).to_string())
}
