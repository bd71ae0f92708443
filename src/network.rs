//! Network subsystem
//!
//! Listening sockets for redirected traffic and recovery of the destination
//! each client originally asked for.
//!
//! Components:
//! - `transparent`: sockets with `IP_TRANSPARENT` and `IP_RECVORIGDSTADDR`.
//! - `original_dst`: `SO_ORIGINAL_DST` and `IP_ORIGDSTADDR` decoding.
//! - `tcp_listener`, `tls_listener`, `udp_listener`: the accept/receive loops.
//! - `tls_config`: certificate and key loading for the TLS listener.

pub mod original_dst;
pub mod tcp_listener;
pub mod tls_config;
pub mod tls_listener;
pub mod transparent;
pub mod udp_listener;

pub use original_dst::{Resolution, SocketEndpoint};
pub use tcp_listener::TcpCaptureListener;
pub use tls_listener::TlsCaptureListener;
pub use udp_listener::UdpCaptureListener;
