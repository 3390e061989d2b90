use std::io::Error as IoError;
use std::net::IpAddr;

use thiserror::Error;

/// Startup-time configuration problems. Any of these aborts the process
/// before a single socket is opened.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("--ipv4 and --ipv6 are mutually exclusive")]
    ConflictingFamilies,

    #[error("target {target} is {ip}, which contradicts the {family} constraint")]
    FamilyMismatch {
        target: String,
        ip: IpAddr,
        family: &'static str,
    },

    #[error("source address {0} contradicts the configured IP family")]
    SourceFamilyMismatch(IpAddr),

    #[error("invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("no targets configured")]
    NoTargets,

    #[error("failed to read target file {path}: {source}")]
    TargetFile { path: String, source: IoError },

    #[error("invalid target file {path}: {source}")]
    TargetFileFormat {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("failed to build TLS connector: {0}")]
    Tls(#[from] native_tls::Error),
}

/// Failure of one probe cycle. Recorded in the result, never fatal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProbeError {
    #[error("dns resolution failed: {0}")]
    Dns(String),

    #[error("tcp connect failed: {message}")]
    Dial { code: Option<i32>, message: String },

    #[error("tls handshake failed: {message}")]
    Tls { code: Option<i32>, message: String },

    #[error("http exchange failed: {0}")]
    Http(String),

    #[error("probe cancelled")]
    Cancelled,
}

impl ProbeError {
    pub fn dial(err: &IoError) -> Self {
        ProbeError::Dial {
            code: err.raw_os_error(),
            message: err.to_string(),
        }
    }

    pub fn dial_timeout() -> Self {
        ProbeError::Dial {
            code: Some(libc::ETIMEDOUT),
            message: "connection timed out".to_string(),
        }
    }

    pub fn tls(err: &native_tls::Error) -> Self {
        let code = std::error::Error::source(err)
            .and_then(|src| src.downcast_ref::<IoError>())
            .and_then(IoError::raw_os_error);
        ProbeError::Tls {
            code,
            message: err.to_string(),
        }
    }

    pub fn tls_timeout() -> Self {
        ProbeError::Tls {
            code: Some(libc::ETIMEDOUT),
            message: "handshake timed out".to_string(),
        }
    }

    /// OS error code behind the failure, if the OS reported one.
    pub fn code(&self) -> Option<i32> {
        match self {
            ProbeError::Dial { code, .. } | ProbeError::Tls { code, .. } => *code,
            _ => None,
        }
    }
}

/// The kernel refused to describe the socket at all.
#[derive(Debug, Error)]
#[error("tcp_info read failed: {0}")]
pub struct SnapshotError(#[from] pub IoError);

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to bind metrics listener on {addr}: {source}")]
    Bind { addr: String, source: IoError },

    #[error(transparent)]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics exposition is not valid utf-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}
