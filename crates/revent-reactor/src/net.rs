//! Socket setup helpers
//!
//! Raw-libc plumbing for the listening socket and per-socket options.
//! Everything here is setup-time; the hot path never allocates or
//! formats.

use std::os::unix::io::RawFd;

use revent_core::error::{ReactorError, ReactorResult};
use revent_core::rwarn;

/// Errno of the calling thread's last failed syscall.
#[inline]
pub fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

/// Create a non-blocking listening socket on `port` (all interfaces).
///
/// `SO_REUSEADDR` and `SO_REUSEPORT` are set so restarts and multi-process
/// experiments do not trip over TIME_WAIT. Pass port 0 to let the kernel
/// pick one; read it back with [`local_port`].
pub fn bind_listen(port: u16) -> ReactorResult<RawFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_INET,
            libc::SOCK_STREAM | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
            0,
        )
    };
    if fd < 0 {
        return Err(ReactorError::Os(last_errno()));
    }

    unsafe {
        let opt: i32 = 1;
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEADDR,
            &opt as *const _ as *const _,
            4,
        );
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_REUSEPORT,
            &opt as *const _ as *const _,
            4,
        );
    }

    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_addr.s_addr = libc::INADDR_ANY.to_be();
    addr.sin_port = port.to_be();

    let ret = unsafe {
        libc::bind(
            fd,
            &addr as *const _ as *const libc::sockaddr,
            std::mem::size_of_val(&addr) as libc::socklen_t,
        )
    };
    if ret != 0 {
        let errno = last_errno();
        unsafe {
            libc::close(fd);
        }
        return Err(ReactorError::Os(errno));
    }

    let ret = unsafe { libc::listen(fd, 4096) };
    if ret != 0 {
        let errno = last_errno();
        unsafe {
            libc::close(fd);
        }
        return Err(ReactorError::Os(errno));
    }

    Ok(fd)
}

/// Disable send coalescing on a connected socket. Best effort: a failure
/// costs latency, not correctness.
pub fn set_nodelay(fd: RawFd) {
    let opt: i32 = 1;
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::IPPROTO_TCP,
            libc::TCP_NODELAY,
            &opt as *const _ as *const _,
            4,
        )
    };
    if ret != 0 {
        rwarn!(
            "revent-net: TCP_NODELAY failed for descriptor {}: errno {}",
            fd,
            last_errno()
        );
    }
}

/// The local port a bound socket ended up on.
pub fn local_port(fd: RawFd) -> ReactorResult<u16> {
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockname(
            fd,
            &mut addr as *mut _ as *mut libc::sockaddr,
            &mut len,
        )
    };
    if ret != 0 {
        return Err(ReactorError::Os(last_errno()));
    }
    Ok(u16::from_be(addr.sin_port))
}

/// "a.b.c.d:port" for accept logging.
pub(crate) fn format_peer(addr: &libc::sockaddr_in) -> String {
    let ip = u32::from_be(addr.sin_addr.s_addr);
    format!(
        "{}.{}.{}.{}:{}",
        (ip >> 24) & 0xff,
        (ip >> 16) & 0xff,
        (ip >> 8) & 0xff,
        ip & 0xff,
        u16::from_be(addr.sin_port)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_listen_ephemeral_port() {
        let fd = bind_listen(0).expect("bind");
        let port = local_port(fd).expect("getsockname");
        assert!(port > 0);
        unsafe {
            libc::close(fd);
        }
    }

    #[test]
    fn test_bind_same_port_twice_with_reuseport() {
        let a = bind_listen(0).expect("bind a");
        let port = local_port(a).expect("port");
        let b = bind_listen(port).expect("bind b");
        unsafe {
            libc::close(a);
            libc::close(b);
        }
    }

    #[test]
    fn test_format_peer() {
        let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        addr.sin_addr.s_addr = u32::from_be_bytes([127, 0, 0, 1]).to_be();
        addr.sin_port = 8080u16.to_be();
        assert_eq!(format_peer(&addr), "127.0.0.1:8080");
    }
}
