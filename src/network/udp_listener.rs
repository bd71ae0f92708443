use std::io;
use std::mem;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::os::fd::{AsRawFd, RawFd};

use log::{error, info, warn};
use tokio::io::Interest;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::data_capture::recorder::SessionRecorder;
use crate::data_capture::udp_capture::capture_datagram;
use crate::error_handling::types::NetworkError;

use super::original_dst::parse_orig_dst_cmsg;
use super::transparent::bind_transparent_udp;

/// Largest datagram accepted; longer ones are truncated by the kernel.
pub const UDP_BUFFER_SIZE: usize = 65535;

/// Room for `IP_ORIGDSTADDR` plus a few unrelated control messages.
const CONTROL_BUFFER_SIZE: usize = 256;

/// Receive loop of the UDP listener.
pub struct UdpCaptureListener {
    socket: UdpSocket,
    recorder: SessionRecorder,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

struct Received {
    len: usize,
    src: SocketAddr,
    control_len: usize,
    flags: libc::c_int,
}

impl UdpCaptureListener {
    pub fn bind(
        addr: SocketAddr,
        recorder: SessionRecorder,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Result<Self, NetworkError> {
        let socket = bind_transparent_udp(addr)?;
        Ok(Self::from_socket(socket, recorder, tracker, shutdown))
    }

    /// Wraps an already bound socket, which must have `IP_RECVORIGDSTADDR`
    /// enabled for datagrams to be captured.
    pub fn from_socket(
        socket: UdpSocket,
        recorder: SessionRecorder,
        tracker: TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            socket,
            recorder,
            tracker,
            shutdown,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket.local_addr().map_err(NetworkError::SockError)
    }

    /// Receives datagrams until shutdown. Receive errors are logged and the
    /// loop keeps going.
    pub async fn run(self) -> Result<(), NetworkError> {
        info!("Listening UDP on {}", self.local_addr()?);
        let fd = self.socket.as_raw_fd();
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        let mut control = [0u8; CONTROL_BUFFER_SIZE];

        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("UDP listener stopped");
                    return Ok(());
                }
                received = self.socket.async_io(Interest::READABLE, || {
                    recv_with_control(fd, &mut buf, &mut control)
                }) => received,
            };

            let received = match received {
                Ok(received) => received,
                Err(e) => {
                    error!("Failed to receive UDP datagram: {}", e);
                    continue;
                }
            };
            if received.flags & libc::MSG_CTRUNC != 0 {
                warn!("Control data of datagram from {} was truncated", received.src);
            }
            if received.flags & libc::MSG_TRUNC != 0 {
                warn!("Datagram from {} was truncated to {} bytes", received.src, received.len);
            }

            let data = buf[..received.len].to_vec();
            let control_data = control[..received.control_len].to_vec();
            let recorder = self.recorder.clone();
            let src = received.src;
            self.tracker.spawn(async move {
                match parse_orig_dst_cmsg(&control_data) {
                    Ok(dst) => {
                        capture_datagram(&recorder, src, dst, data);
                    }
                    Err(e) => warn!("Dropping datagram from {}: {}", src, e),
                }
            });
        }
    }
}

fn recv_with_control(fd: RawFd, buf: &mut [u8], control: &mut [u8]) -> io::Result<Received> {
    // SAFETY: all-zero is a valid sockaddr_storage and msghdr.
    let mut src: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    msg.msg_name = &mut src as *mut libc::sockaddr_storage as *mut libc::c_void;
    msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = control.len() as _;

    // SAFETY: every pointer in `msg` refers to a live buffer of the stated size.
    let n = unsafe { libc::recvmsg(fd, &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(Received {
        len: n as usize,
        src: storage_to_addr(&src)?,
        control_len: (msg.msg_controllen as usize).min(control.len()),
        flags: msg.msg_flags,
    })
}

fn storage_to_addr(storage: &libc::sockaddr_storage) -> io::Result<SocketAddr> {
    match libc::c_int::from(storage.ss_family) {
        libc::AF_INET => {
            // SAFETY: the family says the storage holds a sockaddr_in.
            let addr = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            Ok(SocketAddr::V4(SocketAddrV4::new(
                Ipv4Addr::from(u32::from_be(addr.sin_addr.s_addr)),
                u16::from_be(addr.sin_port),
            )))
        }
        libc::AF_INET6 => {
            // SAFETY: the family says the storage holds a sockaddr_in6.
            let addr = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            Ok(SocketAddr::V6(SocketAddrV6::new(
                Ipv6Addr::from(addr.sin6_addr.s6_addr),
                u16::from_be(addr.sin6_port),
                addr.sin6_flowinfo,
                addr.sin6_scope_id,
            )))
        }
        family => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("datagram from unsupported address family {}", family),
        )),
    }
}
