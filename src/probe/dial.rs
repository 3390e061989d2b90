use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::timeout;
use tokio_native_tls::{TlsConnector as TokioTlsConnector, TlsStream};
use trust_dns_resolver::TokioAsyncResolver;

use super::socket::tuned_socket;
use super::target::Target;
use super::timer::{Checkpoint, PhaseTimer};
use crate::config::app_config::{setup_resolver, setup_tls_connector};
use crate::config::probe_config::ProbeConfig;
use crate::error::{ConfigError, ProbeError};

/// Any byte stream an HTTP exchange can run over.
pub trait ProbeStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ProbeStream for T {}

/// Opens tuned connections to targets. Shared read-only by every probe loop.
pub struct Dialer {
    config: Arc<ProbeConfig>,
    resolver: TokioAsyncResolver,
    tls: TokioTlsConnector,
}

impl Dialer {
    pub fn new(config: Arc<ProbeConfig>) -> Result<Self, ConfigError> {
        let tls = setup_tls_connector(&config.tls, config.http2)?;
        let resolver = setup_resolver(&config);
        Ok(Dialer {
            config,
            resolver,
            tls,
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Resolves the target to one address of the allowed family.
    /// IP literals are returned as is and leave the DNS phase at zero.
    pub async fn resolve(&self, target: &Target, timer: &mut PhaseTimer) -> Result<IpAddr, ProbeError> {
        if let Some(ip) = target.literal_ip() {
            return Ok(ip);
        }

        timer.mark(Checkpoint::DnsStart);
        let lookup = timeout(
            self.config.dial_timeout,
            self.resolver.lookup_ip(target.host.as_str()),
        )
        .await;
        timer.mark(Checkpoint::DnsDone);

        let lookup = match lookup {
            Ok(Ok(lookup)) => lookup,
            Ok(Err(e)) => return Err(ProbeError::Dns(e.to_string())),
            Err(_) => return Err(ProbeError::Dns("lookup timed out".to_string())),
        };
        let family = self.config.family;
        lookup
            .iter()
            .find(|ip| family.allows(*ip))
            .ok_or_else(|| ProbeError::Dns(format!("no {} address for {}", family.name(), target.host)))
    }

    /// One connect attempt under the dial timeout.
    pub async fn connect(&self, peer: SocketAddr, timer: &mut PhaseTimer) -> Result<TcpStream, ProbeError> {
        timer.mark(Checkpoint::ConnectStart);

        let socket = tuned_socket(peer, self.config.source_addr, &self.config.socket)
            .map_err(|e| ProbeError::dial(&e))?;
        let socket = TcpSocket::from_std_stream(socket.into());

        let stream = match timeout(self.config.dial_timeout, socket.connect(peer)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ProbeError::dial(&e)),
            Err(_) => return Err(ProbeError::dial_timeout()),
        };
        timer.mark(Checkpoint::ConnectDone);

        Ok(stream)
    }

    /// TLS handshake over an established connection, bounded by the dial timeout.
    pub async fn handshake(
        &self,
        target: &Target,
        stream: TcpStream,
        timer: &mut PhaseTimer,
    ) -> Result<TlsStream<TcpStream>, ProbeError> {
        let domain = self
            .config
            .tls
            .server_name
            .as_deref()
            .unwrap_or(target.host.as_str());

        timer.mark(Checkpoint::TlsStart);
        let tls = match timeout(self.config.dial_timeout, self.tls.connect(domain, stream)).await {
            Ok(Ok(tls)) => tls,
            Ok(Err(e)) => return Err(ProbeError::tls(&e)),
            Err(_) => return Err(ProbeError::tls_timeout()),
        };
        timer.mark(Checkpoint::TlsDone);

        Ok(tls)
    }
}

/// Duplicates the socket descriptor so its TCP state stays readable after
/// the stream itself has been handed off and dropped.
pub fn duplicate_fd(stream: &TcpStream) -> Result<OwnedFd, ProbeError> {
    stream
        .as_fd()
        .try_clone_to_owned()
        .map_err(|e| ProbeError::dial(&e))
}

/// Whether the server picked HTTP/2 during the TLS handshake.
pub fn negotiated_h2(tls: &TlsStream<TcpStream>) -> bool {
    matches!(tls.get_ref().negotiated_alpn(), Ok(Some(proto)) if proto == b"h2")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::probe_config::TlsOptions;
    use openssl::asn1::Asn1Time;
    use openssl::bn::BigNum;
    use openssl::hash::MessageDigest;
    use openssl::pkey::{PKey, Private};
    use openssl::rsa::Rsa;
    use openssl::ssl::{AlpnError, NameType, SslAcceptor, SslMethod, select_next_proto};
    use openssl::x509::extension::SubjectAlternativeName;
    use openssl::x509::{X509, X509NameBuilder};
    use std::io::Read;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn dialer(config: ProbeConfig) -> Dialer {
        Dialer::new(Arc::new(config)).expect("dialer")
    }

    fn self_signed(name: &str) -> (X509, PKey<Private>) {
        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let mut subject = X509NameBuilder::new().unwrap();
        subject.append_entry_by_text("CN", name).unwrap();
        let subject = subject.build();

        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        let serial = BigNum::from_u32(1).unwrap().to_asn1_integer().unwrap();
        builder.set_serial_number(&serial).unwrap();
        builder.set_subject_name(&subject).unwrap();
        builder.set_issuer_name(&subject).unwrap();
        builder.set_pubkey(&key).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder.set_not_after(&Asn1Time::days_from_now(1).unwrap()).unwrap();
        let san = SubjectAlternativeName::new()
            .dns(name)
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(&key, MessageDigest::sha256()).unwrap();
        (builder.build(), key)
    }

    /// TLS server on a blocking thread with a self-signed certificate for
    /// `name`. Reports the SNI of every completed handshake; with `h2` it
    /// selects HTTP/2 through ALPN.
    fn tls_server(name: &str, h2: bool) -> (SocketAddr, mpsc::UnboundedReceiver<Option<String>>) {
        let (cert, key) = self_signed(name);
        let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls()).unwrap();
        acceptor.set_certificate(&cert).unwrap();
        acceptor.set_private_key(&key).unwrap();
        if h2 {
            acceptor.set_alpn_select_callback(|_, offered| {
                select_next_proto(b"\x02h2", offered).ok_or(AlpnError::NOACK)
            });
        }
        let acceptor = acceptor.build();

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || {
            for socket in listener.incoming().flatten() {
                if let Ok(mut tls) = acceptor.accept(socket) {
                    let sni = tls.ssl().servername(NameType::HOST_NAME).map(str::to_string);
                    let _ = tx.send(sni);
                    // Hold the session until the client goes away.
                    let _ = tls.read(&mut [0u8; 1]);
                }
            }
        });
        (addr, rx)
    }

    fn tls_config(insecure: bool, server_name: Option<&str>, http2: bool) -> ProbeConfig {
        ProbeConfig {
            dial_timeout: Duration::from_secs(5),
            http2,
            tls: TlsOptions {
                insecure,
                server_name: server_name.map(str::to_string),
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn literal_targets_skip_dns() {
        let dialer = dialer(ProbeConfig::default());
        let target = Target::parse("127.0.0.1:80").unwrap();
        let mut timer = PhaseTimer::new();

        let ip = dialer.resolve(&target, &mut timer).await.unwrap();
        assert_eq!(ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert!(timer.get(Checkpoint::DnsStart).is_none());
        assert_eq!(timer.timings().dns, Duration::ZERO);
    }

    #[tokio::test]
    async fn connects_and_marks_checkpoints() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let dialer = dialer(ProbeConfig::default());
        let mut timer = PhaseTimer::new();

        let stream = dialer.connect(addr, &mut timer).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert!(timer.get(Checkpoint::ConnectStart).is_some());
        assert!(timer.get(Checkpoint::ConnectDone).is_some());
        assert!(duplicate_fd(&stream).is_ok());
    }

    #[tokio::test]
    async fn refused_connection_carries_os_code() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut timer = PhaseTimer::new();
        let err = dialer(ProbeConfig::default())
            .connect(addr, &mut timer)
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(libc::ECONNREFUSED));
        assert!(timer.get(Checkpoint::ConnectDone).is_none());
    }

    #[tokio::test]
    async fn unroutable_peer_fails_within_dial_timeout() {
        let config = ProbeConfig {
            dial_timeout: Duration::from_millis(100),
            ..Default::default()
        };
        let mut timer = PhaseTimer::new();
        let started = std::time::Instant::now();
        let err = dialer(config)
            .connect("192.0.2.1:81".parse().unwrap(), &mut timer)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Dial { code: Some(_), .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn handshake_against_plain_tcp_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept and hang up without speaking TLS.
            let _ = listener.accept().await;
        });

        let config = ProbeConfig {
            dial_timeout: Duration::from_secs(2),
            ..Default::default()
        };
        let dialer = dialer(config);
        let target = Target::parse(&format!("https://{addr}")).unwrap();
        let mut timer = PhaseTimer::new();

        let stream = dialer.connect(addr, &mut timer).await.unwrap();
        let err = dialer.handshake(&target, stream, &mut timer).await.unwrap_err();
        assert!(matches!(err, ProbeError::Tls { .. }));
        assert!(timer.get(Checkpoint::TlsStart).is_some());
        assert!(timer.get(Checkpoint::TlsDone).is_none());
    }

    #[tokio::test]
    async fn insecure_handshake_accepts_self_signed_certificate() {
        let (addr, mut sni) = tls_server("localhost", false);
        let dialer = dialer(tls_config(true, None, false));
        let target = Target::parse(&format!("https://{addr}")).unwrap();
        let mut timer = PhaseTimer::new();

        let stream = dialer.connect(addr, &mut timer).await.unwrap();
        let tls = dialer.handshake(&target, stream, &mut timer).await.unwrap();
        assert!(timer.get(Checkpoint::TlsStart).is_some());
        assert!(timer.get(Checkpoint::TlsDone).is_some());
        assert!(timer.timings().tls > Duration::ZERO);
        assert!(!negotiated_h2(&tls));
        // IP literals are never sent as SNI.
        assert_eq!(sni.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn self_signed_certificate_fails_verification() {
        let (addr, _sni) = tls_server("localhost", false);
        let dialer = dialer(tls_config(false, Some("localhost"), false));
        let target = Target::parse(&format!("https://{addr}")).unwrap();
        let mut timer = PhaseTimer::new();

        let stream = dialer.connect(addr, &mut timer).await.unwrap();
        let err = dialer.handshake(&target, stream, &mut timer).await.unwrap_err();
        assert!(matches!(err, ProbeError::Tls { .. }));
        assert!(timer.get(Checkpoint::TlsStart).is_some());
        assert!(timer.get(Checkpoint::TlsDone).is_none());
        assert_eq!(timer.timings().tls, Duration::ZERO);
    }

    #[tokio::test]
    async fn server_name_override_is_sent_as_sni() {
        let (addr, mut sni) = tls_server("probe.test", false);
        let dialer = dialer(tls_config(true, Some("probe.test"), false));
        let target = Target::parse(&format!("https://{addr}")).unwrap();
        let mut timer = PhaseTimer::new();

        let stream = dialer.connect(addr, &mut timer).await.unwrap();
        let _tls = dialer.handshake(&target, stream, &mut timer).await.unwrap();
        assert_eq!(sni.recv().await.unwrap().as_deref(), Some("probe.test"));
    }

    #[tokio::test]
    async fn alpn_negotiates_h2_when_offered() {
        let (addr, _sni) = tls_server("localhost", true);
        let dialer = dialer(tls_config(true, None, true));
        let target = Target::parse(&format!("https://{addr}")).unwrap();
        let mut timer = PhaseTimer::new();

        let stream = dialer.connect(addr, &mut timer).await.unwrap();
        let tls = dialer.handshake(&target, stream, &mut timer).await.unwrap();
        assert!(negotiated_h2(&tls));
    }
}
