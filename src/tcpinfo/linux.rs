use std::io;
use std::mem::{offset_of, size_of, size_of_val};
use std::os::fd::{AsRawFd, BorrowedFd};

use super::{Snapshot, TcpInfoSource, UNSUPPORTED};
use crate::error::SnapshotError;

/// `TCP_CA_NAME_MAX` from `include/net/tcp.h`.
const CA_NAME_MAX: usize = 16;

/// `struct tcp_info` as of Linux 5.4 (`include/uapi/linux/tcp.h`).
///
/// Older kernels fill a prefix of it; `getsockopt` reports how much.
#[repr(C)]
#[derive(Default)]
struct RawTcpInfo {
    tcpi_state: u8,
    tcpi_ca_state: u8,
    tcpi_retransmits: u8,
    tcpi_probes: u8,
    tcpi_backoff: u8,
    tcpi_options: u8,
    /// `tcpi_snd_wscale : 4, tcpi_rcv_wscale : 4`
    tcpi_wscale: u8,
    tcpi_flags: u8,

    tcpi_rto: u32,
    tcpi_ato: u32,
    tcpi_snd_mss: u32,
    tcpi_rcv_mss: u32,

    tcpi_unacked: u32,
    tcpi_sacked: u32,
    tcpi_lost: u32,
    tcpi_retrans: u32,
    tcpi_fackets: u32,

    tcpi_last_data_sent: u32,
    tcpi_last_ack_sent: u32,
    tcpi_last_data_recv: u32,
    tcpi_last_ack_recv: u32,

    tcpi_pmtu: u32,
    tcpi_rcv_ssthresh: u32,
    tcpi_rtt: u32,
    tcpi_rttvar: u32,
    tcpi_snd_ssthresh: u32,
    tcpi_snd_cwnd: u32,
    tcpi_advmss: u32,
    tcpi_reordering: u32,

    tcpi_rcv_rtt: u32,
    tcpi_rcv_space: u32,

    tcpi_total_retrans: u32,

    tcpi_pacing_rate: u64,
    tcpi_max_pacing_rate: u64,
    tcpi_bytes_acked: u64,
    tcpi_bytes_received: u64,
    tcpi_segs_out: u32,
    tcpi_segs_in: u32,

    tcpi_notsent_bytes: u32,
    tcpi_min_rtt: u32,
    tcpi_data_segs_in: u32,
    tcpi_data_segs_out: u32,

    tcpi_delivery_rate: u64,

    tcpi_busy_time: u64,
    tcpi_rwnd_limited: u64,
    tcpi_sndbuf_limited: u64,

    tcpi_delivered: u32,
    tcpi_delivered_ce: u32,

    tcpi_bytes_sent: u64,
    tcpi_bytes_retrans: u64,
    tcpi_dsack_dups: u32,
    tcpi_reord_seen: u32,

    tcpi_rcv_ooopack: u32,

    tcpi_snd_wnd: u32,
}

fn clamp(value: impl Into<u64>) -> i64 {
    i64::try_from(value.into()).unwrap_or(i64::MAX)
}

/// Reads `$field` only if the kernel wrote all of it.
macro_rules! field {
    ($raw:expr, $len:expr, $field:ident) => {{
        let end = offset_of!(RawTcpInfo, $field) + size_of_val(&$raw.$field);
        if end <= $len {
            clamp($raw.$field)
        } else {
            UNSUPPORTED
        }
    }};
}

pub struct LinuxTcpInfo;

impl LinuxTcpInfo {
    fn raw(fd: BorrowedFd<'_>) -> io::Result<(RawTcpInfo, usize)> {
        let mut raw = RawTcpInfo::default();
        let mut len = size_of::<RawTcpInfo>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_INFO,
                (&mut raw as *mut RawTcpInfo).cast(),
                &mut len,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((raw, len as usize))
    }

    fn congestion(fd: BorrowedFd<'_>) -> String {
        let mut name = [0u8; CA_NAME_MAX];
        let mut len = CA_NAME_MAX as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_CONGESTION,
                name.as_mut_ptr().cast(),
                &mut len,
            )
        };
        if rc != 0 {
            return String::new();
        }
        let name = &name[..(len as usize).min(CA_NAME_MAX)];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        String::from_utf8_lossy(&name[..end]).into_owned()
    }
}

impl TcpInfoSource for LinuxTcpInfo {
    fn read(fd: BorrowedFd<'_>) -> Result<Snapshot, SnapshotError> {
        let (raw, len) = Self::raw(fd)?;

        let wscale_known = offset_of!(RawTcpInfo, tcpi_wscale) < len;
        #[cfg(target_endian = "little")]
        let (snd_wscale, rcv_wscale) = (raw.tcpi_wscale & 0x0f, raw.tcpi_wscale >> 4);
        #[cfg(target_endian = "big")]
        let (snd_wscale, rcv_wscale) = (raw.tcpi_wscale >> 4, raw.tcpi_wscale & 0x0f);

        Ok(Snapshot {
            state: field!(raw, len, tcpi_state),
            ca_state: field!(raw, len, tcpi_ca_state),
            retransmits: field!(raw, len, tcpi_retransmits),
            probes: field!(raw, len, tcpi_probes),
            backoff: field!(raw, len, tcpi_backoff),
            options: field!(raw, len, tcpi_options),
            snd_wscale: if wscale_known { clamp(snd_wscale) } else { UNSUPPORTED },
            rcv_wscale: if wscale_known { clamp(rcv_wscale) } else { UNSUPPORTED },
            rto: field!(raw, len, tcpi_rto),
            ato: field!(raw, len, tcpi_ato),
            snd_mss: field!(raw, len, tcpi_snd_mss),
            rcv_mss: field!(raw, len, tcpi_rcv_mss),
            unacked: field!(raw, len, tcpi_unacked),
            sacked: field!(raw, len, tcpi_sacked),
            lost: field!(raw, len, tcpi_lost),
            retrans: field!(raw, len, tcpi_retrans),
            fackets: field!(raw, len, tcpi_fackets),
            last_data_sent: field!(raw, len, tcpi_last_data_sent),
            last_ack_sent: field!(raw, len, tcpi_last_ack_sent),
            last_data_recv: field!(raw, len, tcpi_last_data_recv),
            last_ack_recv: field!(raw, len, tcpi_last_ack_recv),
            pmtu: field!(raw, len, tcpi_pmtu),
            rcv_ssthresh: field!(raw, len, tcpi_rcv_ssthresh),
            rtt: field!(raw, len, tcpi_rtt),
            rttvar: field!(raw, len, tcpi_rttvar),
            snd_ssthresh: field!(raw, len, tcpi_snd_ssthresh),
            snd_cwnd: field!(raw, len, tcpi_snd_cwnd),
            advmss: field!(raw, len, tcpi_advmss),
            reordering: field!(raw, len, tcpi_reordering),
            rcv_rtt: field!(raw, len, tcpi_rcv_rtt),
            rcv_space: field!(raw, len, tcpi_rcv_space),
            total_retrans: field!(raw, len, tcpi_total_retrans),
            pacing_rate: field!(raw, len, tcpi_pacing_rate),
            max_pacing_rate: field!(raw, len, tcpi_max_pacing_rate),
            bytes_acked: field!(raw, len, tcpi_bytes_acked),
            bytes_received: field!(raw, len, tcpi_bytes_received),
            segs_out: field!(raw, len, tcpi_segs_out),
            segs_in: field!(raw, len, tcpi_segs_in),
            notsent_bytes: field!(raw, len, tcpi_notsent_bytes),
            min_rtt: field!(raw, len, tcpi_min_rtt),
            data_segs_in: field!(raw, len, tcpi_data_segs_in),
            data_segs_out: field!(raw, len, tcpi_data_segs_out),
            delivery_rate: field!(raw, len, tcpi_delivery_rate),
            busy_time: field!(raw, len, tcpi_busy_time),
            rwnd_limited: field!(raw, len, tcpi_rwnd_limited),
            sndbuf_limited: field!(raw, len, tcpi_sndbuf_limited),
            delivered: field!(raw, len, tcpi_delivered),
            delivered_ce: field!(raw, len, tcpi_delivered_ce),
            bytes_sent: field!(raw, len, tcpi_bytes_sent),
            bytes_retrans: field!(raw, len, tcpi_bytes_retrans),
            dsack_dups: field!(raw, len, tcpi_dsack_dups),
            reord_seen: field!(raw, len, tcpi_reord_seen),
            rcv_ooopack: field!(raw, len, tcpi_rcv_ooopack),
            snd_wnd: field!(raw, len, tcpi_snd_wnd),
            congestion_alg: Self::congestion(fd),
        })
    }
}
