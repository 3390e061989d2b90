use std::fmt;
use std::net::{IpAddr, SocketAddr};

use url::{Host, Url};

use crate::config::probe_config::IpFamily;
use crate::error::ConfigError;

/// What a probe cycle does once the TCP connection is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Connect only.
    Tcp,
    /// Connect, then `GET` over plain HTTP.
    Http,
    /// Connect, TLS handshake, then `GET`.
    Https,
}

impl Scheme {
    pub fn is_tls(self) -> bool {
        matches!(self, Scheme::Https)
    }

    pub fn is_http(self) -> bool {
        matches!(self, Scheme::Http | Scheme::Https)
    }

    fn default_port(self) -> u16 {
        match self {
            Scheme::Https => 443,
            _ => 80,
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Tcp => "tcp",
            Scheme::Http => "http",
            Scheme::Https => "https",
        })
    }
}

/// One endpoint under observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Address exactly as the user wrote it.
    pub addr: String,
    /// Name used in output and as the metrics `target` label.
    pub label: String,
    /// Host name or IP literal, without brackets.
    pub host: String,
    pub port: u16,
    pub scheme: Scheme,
    /// Path and query sent in the HTTP request line.
    pub path: String,
}

impl Target {
    /// Accepts `host:port`, `[v6]:port`, or an `http://`, `https://` or
    /// `tcp://` URL.
    pub fn parse(addr: &str) -> Result<Self, ConfigError> {
        let addr = addr.trim();
        let invalid = |reason: &str| ConfigError::InvalidTarget {
            target: addr.to_string(),
            reason: reason.to_string(),
        };

        if addr.contains("://") {
            let url = Url::parse(addr).map_err(|e| invalid(&e.to_string()))?;
            let scheme = match url.scheme() {
                "tcp" => Scheme::Tcp,
                "http" => Scheme::Http,
                "https" => Scheme::Https,
                other => return Err(invalid(&format!("unsupported scheme {other}"))),
            };
            let host = match url.host() {
                Some(Host::Domain(name)) => name.to_string(),
                Some(Host::Ipv4(ip)) => ip.to_string(),
                Some(Host::Ipv6(ip)) => ip.to_string(),
                None => return Err(invalid("missing host")),
            };
            let port = match (url.port(), scheme) {
                (Some(port), _) => port,
                (None, Scheme::Tcp) => return Err(invalid("missing port")),
                (None, scheme) => scheme.default_port(),
            };
            let path = match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            };

            return Ok(Target {
                addr: addr.to_string(),
                label: addr.to_string(),
                host,
                port,
                scheme,
                path,
            });
        }

        let (host, port) = match addr.parse::<SocketAddr>() {
            Ok(sa) => (sa.ip().to_string(), sa.port()),
            Err(_) => {
                let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
                if host.is_empty() || host.contains(':') || host.contains('[') {
                    return Err(invalid("invalid host"));
                }
                let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;
                (host.to_string(), port)
            }
        };
        if port == 0 {
            return Err(invalid("port cannot be 0"));
        }

        Ok(Target {
            addr: addr.to_string(),
            label: addr.to_string(),
            host,
            port,
            scheme: Scheme::Tcp,
            path: "/".to_string(),
        })
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// The host, when it is an IP literal and needs no resolution.
    pub fn literal_ip(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }

    /// Rejects a literal address of the wrong family before anything is dialed.
    pub fn check_family(&self, family: IpFamily) -> Result<(), ConfigError> {
        match self.literal_ip() {
            Some(ip) if !family.allows(ip) => Err(ConfigError::FamilyMismatch {
                target: self.addr.clone(),
                ip,
                family: family.name(),
            }),
            _ => Ok(()),
        }
    }

    /// `Host` header value.
    pub fn authority(&self) -> String {
        let host = match self.literal_ip() {
            Some(IpAddr::V6(ip)) => format!("[{ip}]"),
            _ => self.host.clone(),
        };
        if self.port == self.scheme.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    /// Absolute request URI, as HTTP/2 requires.
    pub fn uri(&self) -> String {
        format!("{}://{}{}", self.scheme, self.authority(), self.path)
    }
}
