//! Pre-connect socket tuning.
//!
//! Every option is best effort: one the host rejects or lacks is logged and
//! skipped, and the connection proceeds with the OS default.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::os::fd::AsRawFd;

use log::debug;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

use crate::config::probe_config::SocketTuning;

/// Creates a TCP socket for `peer` with `tuning` applied and, if given, bound
/// to `source`. Only creating and binding the socket can fail.
pub fn tuned_socket(
    peer: SocketAddr,
    source: Option<IpAddr>,
    tuning: &SocketTuning,
) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(peer), Type::STREAM, Some(Protocol::TCP))?;

    apply(&socket, peer.is_ipv6(), tuning);

    if let Some(ip) = source {
        socket.bind(&SockAddr::from(SocketAddr::new(ip, 0)))?;
    }
    socket.set_nonblocking(true)?;

    Ok(socket)
}

fn skip(option: &str, result: io::Result<()>) {
    if let Err(e) = result {
        debug!("Skipping socket option {option}: {e}");
    }
}

fn apply(socket: &Socket, ipv6: bool, tuning: &SocketTuning) {
    if let Some(tos) = tuning.tos {
        if ipv6 {
            skip(
                "IPV6_TCLASS",
                setsockopt_int(socket, libc::IPPROTO_IPV6, libc::IPV6_TCLASS, tos as libc::c_int),
            );
        } else {
            skip("IP_TOS", socket.set_tos(tos));
        }
    }
    if let Some(ttl) = tuning.ttl {
        if ipv6 {
            skip("IPV6_UNICAST_HOPS", socket.set_unicast_hops_v6(ttl));
        } else {
            skip("IP_TTL", socket.set_ttl(ttl));
        }
    }
    if let Some(mss) = tuning.mss {
        skip("TCP_MAXSEG", socket.set_mss(mss));
    }
    if let Some(size) = tuning.send_buffer {
        skip("SO_SNDBUF", socket.set_send_buffer_size(size));
    }
    if let Some(size) = tuning.recv_buffer {
        skip("SO_RCVBUF", socket.set_recv_buffer_size(size));
    }
    if tuning.nodelay {
        skip("TCP_NODELAY", socket.set_nodelay(true));
    }

    apply_linux(socket, tuning);
}

#[cfg(target_os = "linux")]
fn apply_linux(socket: &Socket, tuning: &SocketTuning) {
    if let Some(priority) = tuning.priority {
        skip(
            "SO_PRIORITY",
            setsockopt_int(socket, libc::SOL_SOCKET, libc::SO_PRIORITY, priority as libc::c_int),
        );
    }
    if tuning.quickack_disabled {
        skip(
            "TCP_QUICKACK",
            setsockopt_int(socket, libc::IPPROTO_TCP, libc::TCP_QUICKACK, 0),
        );
    }
    if let Some(name) = &tuning.congestion {
        let rc = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::IPPROTO_TCP,
                libc::TCP_CONGESTION,
                name.as_ptr().cast(),
                name.len() as libc::socklen_t,
            )
        };
        skip("TCP_CONGESTION", check(rc));
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_linux(_socket: &Socket, tuning: &SocketTuning) {
    if tuning.priority.is_some() || tuning.quickack_disabled || tuning.congestion.is_some() {
        debug!("Skipping Linux-only socket options");
    }
}

fn check(rc: libc::c_int) -> io::Result<()> {
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

fn setsockopt_int(
    socket: &Socket,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            (&value as *const libc::c_int).cast(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    check(rc)
}
