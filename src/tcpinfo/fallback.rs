use std::io;
use std::mem::size_of;
use std::os::fd::{AsRawFd, BorrowedFd};

use super::{Snapshot, TcpInfoSource};
use crate::error::SnapshotError;

/// Platforms without a `struct tcp_info` we understand. The socket is still
/// checked so a dead descriptor is reported as such.
pub struct FallbackTcpInfo;

impl TcpInfoSource for FallbackTcpInfo {
    fn read(fd: BorrowedFd<'_>) -> Result<Snapshot, SnapshotError> {
        let mut kind: libc::c_int = 0;
        let mut len = size_of::<libc::c_int>() as libc::socklen_t;
        let rc = unsafe {
            libc::getsockopt(
                fd.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_TYPE,
                (&mut kind as *mut libc::c_int).cast(),
                &mut len,
            )
        };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }
        Ok(Snapshot::unsupported())
    }
}
