//! Listening sockets for kernel-redirected traffic.
//!
//! Both listeners need `IP_TRANSPARENT` (accept traffic addressed to
//! non-local addresses) and `IP_RECVORIGDSTADDR` (original destination of each
//! datagram). Setting either option requires `CAP_NET_ADMIN`.

use std::net::SocketAddr;

use log::debug;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, UdpSocket};

use crate::error_handling::types::NetworkError;

pub const LISTEN_BACKLOG: i32 = 1024;

/// Binds a TCP listener with the transparent-proxy options set.
pub fn bind_transparent_tcp(addr: SocketAddr) -> Result<TcpListener, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(NetworkError::SockError)?;
    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::SockOptError("SO_REUSEADDR", e))?;
    set_transparent_options(&socket)?;
    socket
        .set_nonblocking(true)
        .map_err(NetworkError::SockError)?;
    socket.bind(&addr.into()).map_err(NetworkError::BindError)?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(NetworkError::BindError)?;

    debug!("Transparent TCP socket bound to {}", addr);
    TcpListener::from_std(socket.into()).map_err(NetworkError::SockError)
}

/// Binds a UDP socket with the transparent-proxy options set.
pub fn bind_transparent_udp(addr: SocketAddr) -> Result<UdpSocket, NetworkError> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(NetworkError::SockError)?;
    socket
        .set_reuse_address(true)
        .map_err(|e| NetworkError::SockOptError("SO_REUSEADDR", e))?;
    set_transparent_options(&socket)?;
    socket
        .set_nonblocking(true)
        .map_err(NetworkError::SockError)?;
    socket.bind(&addr.into()).map_err(NetworkError::BindError)?;

    debug!("Transparent UDP socket bound to {}", addr);
    UdpSocket::from_std(socket.into()).map_err(NetworkError::SockError)
}

#[cfg(target_os = "linux")]
fn set_transparent_options(socket: &Socket) -> Result<(), NetworkError> {
    socket
        .set_ip_transparent(true)
        .map_err(|e| NetworkError::SockOptError("IP_TRANSPARENT", e))?;
    enable_original_dst(socket)
}

#[cfg(not(target_os = "linux"))]
fn set_transparent_options(_socket: &Socket) -> Result<(), NetworkError> {
    Err(NetworkError::Unsupported("IP_TRANSPARENT"))
}

/// Asks the kernel to attach `IP_ORIGDSTADDR` to every received datagram.
///
/// Needs no privileges, unlike `IP_TRANSPARENT`.
#[cfg(target_os = "linux")]
pub fn enable_original_dst<S: std::os::fd::AsRawFd>(socket: &S) -> Result<(), NetworkError> {
    set_int_option(socket, libc::SOL_IP, libc::IP_RECVORIGDSTADDR, 1)
        .map_err(|e| NetworkError::SockOptError("IP_RECVORIGDSTADDR", e))
}

#[cfg(not(target_os = "linux"))]
pub fn enable_original_dst<S>(_socket: &S) -> Result<(), NetworkError> {
    Err(NetworkError::Unsupported("IP_RECVORIGDSTADDR"))
}

#[cfg(target_os = "linux")]
fn set_int_option<S: std::os::fd::AsRawFd>(
    socket: &S,
    level: libc::c_int,
    name: libc::c_int,
    value: libc::c_int,
) -> std::io::Result<()> {
    // SAFETY: `value` outlives the call and the length matches its type.
    let rc = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            level,
            name,
            &value as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn original_dst_option_needs_no_privileges() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        enable_original_dst(&socket).unwrap();
    }

    #[tokio::test]
    async fn transparent_bind_succeeds_or_reports_the_option() {
        // IP_TRANSPARENT is refused without CAP_NET_ADMIN
        match bind_transparent_tcp("127.0.0.1:0".parse().unwrap()) {
            Ok(listener) => {
                assert!(listener.local_addr().unwrap().port() > 0);
                assert!(socket2::SockRef::from(&listener).ip_transparent().unwrap());
            }
            Err(NetworkError::SockOptError(opt, _)) => assert_eq!(opt, "IP_TRANSPARENT"),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}
