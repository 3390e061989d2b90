//! Kernel TCP state extraction.
//!
//! A [`Snapshot`] is one `getsockopt` read of a live socket, taken at a single
//! instant and never modified afterwards. What the kernel can report differs
//! per platform, so every platform provides a [`TcpInfoSource`] and the rest
//! of the crate only ever calls [`snapshot`].

use std::os::fd::BorrowedFd;

use crate::error::SnapshotError;

#[cfg(not(target_os = "linux"))]
mod fallback;
#[cfg(target_os = "linux")]
mod linux;

/// Value of a field the running kernel does not report.
///
/// Zero is a legitimate reading for most fields, so it cannot double as
/// "unknown".
pub const UNSUPPORTED: i64 = -1;

macro_rules! snapshot {
    ($($field:ident),* $(,)?) => {
        /// Raw kernel units, no smoothing beyond what the kernel applies.
        /// Time fields are microseconds, except `last_*` (milliseconds).
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct Snapshot {
            $(pub $field: i64,)*
            /// Congestion control algorithm, empty when unknown.
            pub congestion_alg: String,
        }

        impl Snapshot {
            /// A snapshot where nothing is known: every field is [`UNSUPPORTED`].
            pub fn unsupported() -> Self {
                Snapshot {
                    $($field: UNSUPPORTED,)*
                    congestion_alg: String::new(),
                }
            }
        }
    };
}

snapshot! {
    state,
    ca_state,
    retransmits,
    probes,
    backoff,
    options,
    snd_wscale,
    rcv_wscale,
    rto,
    ato,
    snd_mss,
    rcv_mss,
    unacked,
    sacked,
    lost,
    retrans,
    fackets,
    last_data_sent,
    last_ack_sent,
    last_data_recv,
    last_ack_recv,
    pmtu,
    rcv_ssthresh,
    rtt,
    rttvar,
    snd_ssthresh,
    snd_cwnd,
    advmss,
    reordering,
    rcv_rtt,
    rcv_space,
    total_retrans,
    pacing_rate,
    max_pacing_rate,
    bytes_acked,
    bytes_received,
    segs_out,
    segs_in,
    notsent_bytes,
    min_rtt,
    data_segs_in,
    data_segs_out,
    delivery_rate,
    busy_time,
    rwnd_limited,
    sndbuf_limited,
    delivered,
    delivered_ce,
    bytes_sent,
    bytes_retrans,
    dsack_dups,
    reord_seen,
    rcv_ooopack,
    snd_wnd,
}

/// Per-platform access to the kernel's view of a TCP socket.
pub trait TcpInfoSource {
    /// Reads the socket state. Fields the platform cannot provide are set to
    /// [`UNSUPPORTED`]; only a failure to read the socket at all is an error.
    fn read(fd: BorrowedFd<'_>) -> Result<Snapshot, SnapshotError>;
}

#[cfg(target_os = "linux")]
type Platform = linux::LinuxTcpInfo;

#[cfg(not(target_os = "linux"))]
type Platform = fallback::FallbackTcpInfo;

/// Takes a snapshot of `fd` using the current platform's source.
pub fn snapshot(fd: BorrowedFd<'_>) -> Result<Snapshot, SnapshotError> {
    Platform::read(fd)
}
