//! Recovery of the pre-redirection destination.
//!
//! Two kernel mechanisms are supported:
//! - `SO_ORIGINAL_DST` on an accepted stream socket (NAT `REDIRECT` rules).
//! - the `IP_ORIGDSTADDR` control message delivered with each datagram when
//!   `IP_RECVORIGDSTADDR` is enabled on a UDP socket (`TPROXY` rules).
//!
//! Stream sockets accepted through `TPROXY` keep the original destination as
//! their local address, so falling back to `local_addr` when the socket option
//! is unavailable still yields the right answer there.

use std::fmt;
use std::io;
use std::net::SocketAddr;
#[cfg(unix)]
use std::os::fd::{AsRawFd, RawFd};

use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::error_handling::types::ResolveError;

/// A connection that exposes the socket it runs on.
pub trait SocketEndpoint {
    fn peer_addr(&self) -> io::Result<SocketAddr>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
    #[cfg(unix)]
    fn raw_fd(&self) -> RawFd;
}

impl SocketEndpoint for TcpStream {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::peer_addr(self)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        TcpStream::local_addr(self)
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> RawFd {
        self.as_raw_fd()
    }
}

impl<IO: SocketEndpoint> SocketEndpoint for TlsStream<IO> {
    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().0.peer_addr()
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.get_ref().0.local_addr()
    }

    #[cfg(unix)]
    fn raw_fd(&self) -> RawFd {
        self.get_ref().0.raw_fd()
    }
}

/// How the destination of a stream session was obtained.
#[derive(Debug)]
pub enum Resolution {
    Original,
    Fallback(ResolveError),
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Original => write!(f, "original destination"),
            Resolution::Fallback(e) => write!(f, "local address ({})", e),
        }
    }
}

/// Destination of a stream session: the original destination when the kernel
/// knows it, the local address of the socket otherwise.
///
/// Only fails when the socket has no local address at all.
pub fn resolve_or_local<S: SocketEndpoint + ?Sized>(
    sock: &S,
) -> io::Result<(SocketAddr, Resolution)> {
    match original_dst(sock) {
        Ok(addr) => Ok((addr, Resolution::Original)),
        Err(e) => Ok((sock.local_addr()?, Resolution::Fallback(e))),
    }
}

#[cfg(target_os = "linux")]
pub use linux::{original_dst, parse_orig_dst_cmsg};

#[cfg(not(target_os = "linux"))]
pub fn original_dst<S: SocketEndpoint + ?Sized>(_sock: &S) -> Result<SocketAddr, ResolveError> {
    Err(ResolveError::Unsupported)
}

#[cfg(not(target_os = "linux"))]
pub fn parse_orig_dst_cmsg(_control: &[u8]) -> Result<SocketAddr, ResolveError> {
    Err(ResolveError::Unsupported)
}

#[cfg(target_os = "linux")]
mod linux {
    use std::io;
    use std::mem;
    use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
    use std::ptr;

    use crate::error_handling::types::ResolveError;

    use super::SocketEndpoint;

    /// `linux/netfilter_ipv4.h`
    const SO_ORIGINAL_DST: libc::c_int = 80;

    pub(crate) fn cmsg_align(len: usize) -> usize {
        let align = mem::size_of::<usize>();
        (len + align - 1) & !(align - 1)
    }

    /// Queries `SO_ORIGINAL_DST` on the socket beneath `sock`.
    pub fn original_dst<S: SocketEndpoint + ?Sized>(
        sock: &S,
    ) -> Result<SocketAddr, ResolveError> {
        let fd = sock.raw_fd();
        // SAFETY: sockaddr_in is plain old data.
        let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
        let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        // SAFETY: `addr` and `len` are valid for writes and `len` matches the buffer.
        let rc = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_IP,
                SO_ORIGINAL_DST,
                &mut addr as *mut libc::sockaddr_in as *mut libc::c_void,
                &mut len,
            )
        };
        if rc != 0 {
            return Err(ResolveError::SockOptFailed(io::Error::last_os_error()));
        }
        sockaddr_in_to_addr(&addr)
    }

    /// Extracts the `IP_ORIGDSTADDR` address from a `recvmsg` control buffer.
    pub fn parse_orig_dst_cmsg(control: &[u8]) -> Result<SocketAddr, ResolveError> {
        let hdr_len = mem::size_of::<libc::cmsghdr>();
        let mut offset = 0;

        while offset + hdr_len <= control.len() {
            // SAFETY: at least `hdr_len` bytes remain; the read tolerates misalignment.
            let hdr: libc::cmsghdr = unsafe {
                ptr::read_unaligned(control[offset..].as_ptr() as *const libc::cmsghdr)
            };
            let len = hdr.cmsg_len as usize;
            if len < hdr_len || offset + len > control.len() {
                return Err(ResolveError::MalformedControl(format!(
                    "control message of length {} at offset {} exceeds buffer of {} bytes",
                    len,
                    offset,
                    control.len()
                )));
            }

            if hdr.cmsg_level == libc::SOL_IP && hdr.cmsg_type == libc::IP_ORIGDSTADDR {
                let data_start = offset + cmsg_align(hdr_len);
                let data_end = offset + len;
                if data_start > data_end {
                    return Err(ResolveError::MalformedControl(
                        "IP_ORIGDSTADDR without data".to_string(),
                    ));
                }
                return sockaddr_bytes_to_addr(&control[data_start..data_end]);
            }

            offset += cmsg_align(len);
        }

        Err(ResolveError::Missing)
    }

    fn sockaddr_bytes_to_addr(data: &[u8]) -> Result<SocketAddr, ResolveError> {
        let family_len = mem::size_of::<libc::sa_family_t>();
        if data.len() < family_len {
            return Err(ResolveError::MalformedControl(format!(
                "{} bytes of address data",
                data.len()
            )));
        }
        // SAFETY: `family_len` bytes are available.
        let family: libc::sa_family_t =
            unsafe { ptr::read_unaligned(data.as_ptr() as *const libc::sa_family_t) };
        if libc::c_int::from(family) != libc::AF_INET {
            return Err(ResolveError::UnsupportedFamily(family));
        }
        if data.len() < mem::size_of::<libc::sockaddr_in>() {
            return Err(ResolveError::MalformedControl(format!(
                "{} bytes are too short for sockaddr_in",
                data.len()
            )));
        }
        // SAFETY: the length was checked above.
        let addr: libc::sockaddr_in =
            unsafe { ptr::read_unaligned(data.as_ptr() as *const libc::sockaddr_in) };
        sockaddr_in_to_addr(&addr)
    }

    fn sockaddr_in_to_addr(addr: &libc::sockaddr_in) -> Result<SocketAddr, ResolveError> {
        if libc::c_int::from(addr.sin_family) != libc::AF_INET {
            return Err(ResolveError::UnsupportedFamily(addr.sin_family));
        }
        let ip = Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr));
        let port = u16::from_be(addr.sin_port);
        Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
    }
}
