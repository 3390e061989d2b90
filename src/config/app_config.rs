use std::net::IpAddr;

use log::{info, warn};
use tokio_native_tls::TlsConnector as TokioTlsConnector;
use trust_dns_resolver::{
    TokioAsyncResolver,
    config::{
        LookupIpStrategy, NameServerConfig, NameServerConfigGroup, Protocol, ResolverConfig,
        ResolverOpts,
    },
    system_conf::read_system_conf,
};

use super::cli::Cli;
use super::model::TargetFile;
use super::probe_config::{IpFamily, ProbeConfig, TlsOptions};
use crate::error::ConfigError;
use crate::probe::target::Target;

pub struct AppConfig {
    pub probe: ProbeConfig,
    pub targets: Vec<Target>,
}

/// Builds the validated configuration from the command line and, if given,
/// the `--config` target file. Fails before any socket is created.
pub fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    let probe = cli.probe_config()?;
    let mut targets = cli.targets()?;

    if let Some(path) = &cli.config {
        let file_targets = TargetFile::load(path)?.into_targets()?;
        info!(
            "Loaded {} target(s) from {}",
            file_targets.len(),
            path.display()
        );
        targets.extend(file_targets);
    }

    probe.validate(&targets)?;

    Ok(AppConfig { probe, targets })
}

/// Setup the TLS connector used for every handshake.
/// `insecure` skips certificate and host name verification; with `http2` the
/// handshake offers `h2` through ALPN.
pub fn setup_tls_connector(
    tls: &TlsOptions,
    http2: bool,
) -> Result<TokioTlsConnector, native_tls::Error> {
    let mut builder = native_tls::TlsConnector::builder();
    builder.danger_accept_invalid_certs(tls.insecure);
    builder.danger_accept_invalid_hostnames(tls.insecure);
    if http2 {
        builder.request_alpns(&["h2", "http/1.1"]);
    }
    let connector = builder.build()?;
    Ok(TokioTlsConnector::from(connector))
}

/// Setup the DNS resolver honoring the family constraint.
/// With explicit `dns_servers` those are queried over UDP, otherwise the system
/// configuration is used. Answers are never served from cache, so every cycle
/// measures a real lookup.
pub fn setup_resolver(config: &ProbeConfig) -> TokioAsyncResolver {
    let (resolver_config, mut opts) = if config.dns_servers.is_empty() {
        match read_system_conf() {
            Ok(system) => system,
            Err(e) => {
                warn!("Failed to read system resolver configuration, using defaults: {e}");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        }
    } else {
        (name_servers(&config.dns_servers), ResolverOpts::default())
    };

    opts.ip_strategy = match config.family {
        IpFamily::Any => LookupIpStrategy::Ipv4thenIpv6,
        IpFamily::V4 => LookupIpStrategy::Ipv4Only,
        IpFamily::V6 => LookupIpStrategy::Ipv6Only,
    };
    opts.timeout = config.dial_timeout;
    opts.attempts = 1;
    opts.positive_max_ttl = Some(std::time::Duration::ZERO);
    opts.negative_max_ttl = Some(std::time::Duration::ZERO);

    TokioAsyncResolver::tokio(resolver_config, opts)
}

fn name_servers(hosts: &[IpAddr]) -> ResolverConfig {
    let mut name_servers = NameServerConfigGroup::new();

    for ip in hosts {
        name_servers.push(NameServerConfig {
            socket_addr: (*ip, 53).into(),
            protocol: Protocol::Udp,
            tls_dns_name: None,
            trust_negative_responses: false,
            bind_addr: None,
        });
    }

    ResolverConfig::from_parts(None, vec![], name_servers)
}
