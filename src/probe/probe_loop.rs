use std::net::{IpAddr, SocketAddr};
use std::os::fd::{AsFd, OwnedFd};
use std::sync::Arc;

use chrono::Utc;
use log::{trace, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep, timeout};

use super::dial::{Dialer, ProbeStream, duplicate_fd, negotiated_h2};
use super::http::{HttpOutcome, exchange};
use super::result::ProbeResult;
use super::target::Target;
use super::timer::{PhaseTimer, PhaseTimings};
use crate::error::ProbeError;
use crate::tcpinfo::{self, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Resolving,
    Connecting,
    TlsHandshaking,
    Requesting,
    AwaitingResponse,
    Completed,
    Waiting,
    Terminated,
}

/// What one cycle observed, before the loop stamps it with sequence number
/// and error totals.
struct Cycle {
    ip: Option<IpAddr>,
    snapshot: Snapshot,
    timings: PhaseTimings,
    http: HttpOutcome,
    error: Option<ProbeError>,
}

impl Cycle {
    fn new() -> Self {
        Cycle {
            ip: None,
            snapshot: Snapshot::unsupported(),
            timings: PhaseTimings::default(),
            http: HttpOutcome::default(),
            error: None,
        }
    }

    fn failed(error: ProbeError) -> Self {
        Cycle {
            error: Some(error),
            ..Cycle::new()
        }
    }
}

/// Repeatedly probes a single target.
pub struct ProbeLoop {
    target: Target,
    dialer: Arc<Dialer>,
    seq: u64,
    dns_errors: u64,
    connect_errors: u64,
    tls_errors: u64,
}

impl ProbeLoop {
    pub fn new(target: Target, dialer: Arc<Dialer>) -> Self {
        ProbeLoop {
            target,
            dialer,
            seq: 0,
            dns_errors: 0,
            connect_errors: 0,
            tls_errors: 0,
        }
    }

    fn enter(&self, state: LoopState) {
        trace!("[{}] seq {} -> {:?}", self.target.label, self.seq, state);
    }

    /// Runs cycles until the configured count is reached, `shutdown` flips,
    /// or nobody is listening on `tx` any more.
    pub async fn run(mut self, tx: mpsc::Sender<ProbeResult>, mut shutdown: watch::Receiver<bool>) {
        let count = self.dialer.config().count;
        let interval = self.dialer.config().interval;
        self.enter(LoopState::Idle);

        loop {
            if *shutdown.borrow() || (count > 0 && self.seq >= count) {
                break;
            }

            let (cycle, cancelled) = tokio::select! {
                cycle = self.cycle() => (cycle, false),
                _ = shutdown.changed() => (Cycle::failed(ProbeError::Cancelled), true),
            };
            self.enter(LoopState::Completed);

            let result = self.finish(cycle);
            if let Some(err) = &result.error {
                if !cancelled {
                    warn!("[{}] seq {}: {err}", self.target.label, result.seq);
                }
            }
            if tx.send(result).await.is_err() || cancelled {
                break;
            }
            if count > 0 && self.seq >= count {
                break;
            }

            self.enter(LoopState::Waiting);
            tokio::select! {
                _ = sleep(interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.enter(LoopState::Terminated);
    }

    /// Stamps a cycle with the next sequence number and the running error
    /// totals.
    fn finish(&mut self, cycle: Cycle) -> ProbeResult {
        match &cycle.error {
            Some(ProbeError::Dns(_)) => self.dns_errors += 1,
            Some(ProbeError::Dial { .. }) => self.connect_errors += 1,
            Some(ProbeError::Tls { .. }) => self.tls_errors += 1,
            _ => {}
        }

        let result = ProbeResult {
            target: self.target.label.clone(),
            ip: cycle.ip,
            timestamp: Utc::now().timestamp(),
            seq: self.seq,
            snapshot: cycle.snapshot,
            timings: cycle.timings,
            http_status: cycle.http.status,
            http_rcvd_bytes: cycle.http.received,
            dns_errors: self.dns_errors,
            connect_errors: self.connect_errors,
            tls_errors: self.tls_errors,
            error: cycle.error,
        };
        self.seq += 1;
        result
    }

    async fn cycle(&self) -> Cycle {
        let mut timer = PhaseTimer::new();
        let mut cycle = Cycle::new();
        let mut fd = None;

        if let Err(err) = self.attempt(&mut timer, &mut cycle, &mut fd).await {
            // Failures after connect still report the connection state.
            if let Some(fd) = &fd {
                cycle.snapshot = self.snapshot(fd);
            }
            cycle.error = Some(err);
        }
        cycle.timings = timer.timings();
        cycle
    }

    fn snapshot(&self, fd: &OwnedFd) -> Snapshot {
        match tcpinfo::snapshot(fd.as_fd()) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("[{}] {err}", self.target.label);
                Snapshot::unsupported()
            }
        }
    }

    async fn attempt(
        &self,
        timer: &mut PhaseTimer,
        cycle: &mut Cycle,
        fd: &mut Option<OwnedFd>,
    ) -> Result<(), ProbeError> {
        let target = &self.target;
        let config = self.dialer.config();

        self.enter(LoopState::Resolving);
        let ip = self.dialer.resolve(target, timer).await?;
        cycle.ip = Some(ip);

        self.enter(LoopState::Connecting);
        let tcp = self.dialer.connect(SocketAddr::new(ip, target.port), timer).await?;
        let fd = fd.insert(duplicate_fd(&tcp)?);

        let (stream, http2): (Box<dyn ProbeStream>, bool) = if target.scheme.is_tls() {
            self.enter(LoopState::TlsHandshaking);
            let tls = self.dialer.handshake(target, tcp, timer).await?;
            let http2 = config.http2 && negotiated_h2(&tls);
            (Box::new(tls), http2)
        } else {
            (Box::new(tcp), false)
        };

        // Plain TCP targets keep the connection open until the snapshot.
        let _held = if target.scheme.is_http() {
            self.enter(LoopState::Requesting);
            let exchanged = timeout(config.http_timeout, exchange(stream, target, http2, timer)).await;
            self.enter(LoopState::AwaitingResponse);
            cycle.http = match exchanged {
                Ok(outcome) => outcome?,
                Err(_) => return Err(ProbeError::Http("request timed out".to_string())),
            };
            None
        } else {
            Some(stream)
        };

        cycle.snapshot = self.snapshot(fd);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::probe_config::ProbeConfig;
    use crate::tcpinfo::UNSUPPORTED;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn dialer(config: ProbeConfig) -> Arc<Dialer> {
        Arc::new(Dialer::new(Arc::new(config)).unwrap())
    }

    fn fast(count: u64) -> ProbeConfig {
        ProbeConfig {
            count,
            interval: Duration::from_millis(10),
            dial_timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    /// Accepts connections forever and holds each one open briefly.
    async fn sink() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    sleep(Duration::from_millis(200)).await;
                    drop(socket);
                });
            }
        });
        addr
    }

    async fn collect(mut rx: mpsc::Receiver<ProbeResult>) -> Vec<ProbeResult> {
        let mut results = Vec::new();
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results
    }

    #[tokio::test]
    async fn count_bounds_the_number_of_cycles() {
        let addr = sink().await;
        let target = Target::parse(&addr.to_string()).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (_stop, shutdown) = watch::channel(false);

        ProbeLoop::new(target, dialer(fast(3))).run(tx, shutdown).await;

        let results = collect(rx).await;
        let seqs: Vec<u64> = results.iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
        for result in &results {
            assert!(result.is_success(), "{:?}", result.error);
            assert_eq!(result.ip, Some(addr.ip()));
            assert_eq!(result.http_status, 0);
            assert_eq!(result.connect_errors, 0);
        }
        #[cfg(target_os = "linux")]
        assert_eq!(results[0].snapshot.state, 1);
    }

    #[tokio::test]
    async fn unlimited_loop_stops_on_shutdown() {
        let addr = sink().await;
        let target = Target::parse(&addr.to_string()).unwrap();
        let (tx, rx) = mpsc::channel(64);
        let (stop, shutdown) = watch::channel(false);

        let handle = tokio::spawn(ProbeLoop::new(target, dialer(fast(0))).run(tx, shutdown));
        sleep(Duration::from_millis(100)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();

        let results = collect(rx).await;
        assert!(results.len() >= 2);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.seq, i as u64);
        }
    }

    #[tokio::test]
    async fn unroutable_target_counts_connect_errors() {
        let target = Target::parse("192.0.2.1:81").unwrap();
        let config = ProbeConfig {
            dial_timeout: Duration::from_millis(50),
            ..fast(2)
        };
        let (tx, rx) = mpsc::channel(8);
        let (_stop, shutdown) = watch::channel(false);

        ProbeLoop::new(target, dialer(config)).run(tx, shutdown).await;

        let results = collect(rx).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].connect_errors, 1);
        assert_eq!(results[1].connect_errors, 2);
        assert_eq!(results[1].seq, 1);
        for result in &results {
            assert!(matches!(result.error, Some(ProbeError::Dial { .. })));
            assert_eq!(result.http_status, 0);
            assert_eq!(result.snapshot.rtt, UNSUPPORTED);
            assert_eq!(result.dns_errors, 0);
        }
    }

    #[tokio::test]
    async fn failed_lookups_count_dns_errors() {
        let target = Target::parse("name.invalid:80").unwrap();
        let config = ProbeConfig {
            dns_servers: vec!["127.0.0.1".parse().unwrap()],
            dial_timeout: Duration::from_millis(200),
            ..fast(2)
        };
        let (tx, rx) = mpsc::channel(8);
        let (_stop, shutdown) = watch::channel(false);

        ProbeLoop::new(target, dialer(config)).run(tx, shutdown).await;

        let results = collect(rx).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].dns_errors, 1);
        assert_eq!(results[1].dns_errors, 2);
        for result in &results {
            assert!(matches!(result.error, Some(ProbeError::Dns(_))), "{:?}", result.error);
            assert_eq!(result.ip, None);
            assert!(result.timings.dns > Duration::ZERO);
            assert_eq!(result.timings.connect, Duration::ZERO);
            assert_eq!(result.connect_errors, 0);
            assert_eq!(result.snapshot.rtt, UNSUPPORTED);
        }
    }

    #[tokio::test]
    async fn tls_failure_keeps_the_connection_snapshot() {
        // Accepts and hangs up without speaking TLS.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let target = Target::parse(&format!("https://{addr}/")).unwrap();
        let config = ProbeConfig {
            dial_timeout: Duration::from_secs(2),
            ..fast(1)
        };
        let (tx, rx) = mpsc::channel(8);
        let (_stop, shutdown) = watch::channel(false);

        ProbeLoop::new(target, dialer(config)).run(tx, shutdown).await;

        let results = collect(rx).await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].error, Some(ProbeError::Tls { .. })));
        assert_eq!(results[0].tls_errors, 1);
        assert!(results[0].timings.connect > Duration::ZERO);
        #[cfg(target_os = "linux")]
        assert_ne!(results[0].snapshot.state, UNSUPPORTED);
    }

    #[tokio::test]
    async fn http_target_reports_status_and_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok")
                .await
                .unwrap();
        });

        let target = Target::parse(&format!("http://{addr}/")).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (_stop, shutdown) = watch::channel(false);

        ProbeLoop::new(target, dialer(fast(1))).run(tx, shutdown).await;

        let results = collect(rx).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_success(), "{:?}", results[0].error);
        assert_eq!(results[0].http_status, 200);
        assert_eq!(results[0].http_rcvd_bytes, 2);
        assert!(results[0].timings.response >= results[0].timings.first_byte);
    }

    #[tokio::test]
    async fn cancellation_mid_cycle_emits_cancelled_result() {
        // A server that accepts but never answers keeps the cycle in flight.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            sleep(Duration::from_secs(30)).await;
        });

        let target = Target::parse(&format!("http://{addr}/")).unwrap();
        let (tx, rx) = mpsc::channel(8);
        let (stop, shutdown) = watch::channel(false);

        let handle = tokio::spawn(ProbeLoop::new(target, dialer(fast(0))).run(tx, shutdown));
        sleep(Duration::from_millis(100)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();

        let results = collect(rx).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].seq, 0);
        assert_eq!(results[0].error, Some(ProbeError::Cancelled));
    }
}
