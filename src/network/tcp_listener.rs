use std::net::SocketAddr;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::task::TaskTracker;

use crate::data_capture::tcp_capture::TcpCapture;
use crate::data_capture::types::{Flow, Protocol};
use crate::error_handling::types::NetworkError;

use super::original_dst::{resolve_or_local, Resolution};
use super::transparent::bind_transparent_tcp;

/// Accept loop of the plain TCP listener.
pub struct TcpCaptureListener {
    listener: TcpListener,
    capture: TcpCapture,
    tracker: TaskTracker,
}

impl TcpCaptureListener {
    /// Binds a transparent listening socket on `addr`.
    pub fn bind(
        addr: SocketAddr,
        capture: TcpCapture,
        tracker: TaskTracker,
    ) -> Result<Self, NetworkError> {
        let listener = bind_transparent_tcp(addr)?;
        Ok(Self::from_listener(listener, capture, tracker))
    }

    pub fn from_listener(listener: TcpListener, capture: TcpCapture, tracker: TaskTracker) -> Self {
        Self {
            listener,
            capture,
            tracker,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::SockError)
    }

    /// Accepts connections until shutdown. Every connection is captured in its
    /// own tracked task. An accept error ends the loop and is returned.
    pub async fn run(self) -> Result<(), NetworkError> {
        info!("Listening TCP on {}", self.local_addr()?);
        let shutdown = self.capture.shutdown_token().clone();
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("TCP listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept TCP connection: {}", e);
                        return Err(NetworkError::AcceptFailed(e));
                    }
                },
            };

            let capture = self.capture.clone();
            self.tracker.spawn(handle_connection(capture, stream, peer));
        }
    }
}

async fn handle_connection(capture: TcpCapture, stream: TcpStream, peer: SocketAddr) {
    let (dst, resolution) = match resolve_or_local(&stream) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("Dropping TCP connection from {}: no local address: {}", peer, e);
            return;
        }
    };
    if let Resolution::Fallback(e) = &resolution {
        warn!("Original destination of {} unavailable, using {}: {}", peer, dst, e);
    }

    let flow = Flow::new(Protocol::Tcp, peer, dst);
    capture.capture(stream, flow, resolution).await;
}
