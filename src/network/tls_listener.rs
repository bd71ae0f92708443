use std::net::SocketAddr;

use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::task::TaskTracker;

use crate::data_capture::tcp_capture::TcpCapture;
use crate::data_capture::types::{Flow, Protocol};
use crate::error_handling::types::{CaptureError, NetworkError};

use super::original_dst::{resolve_or_local, Resolution};
use super::transparent::bind_transparent_tcp;

/// Accept loop of the TLS listener. Connections are decrypted with the
/// configured certificate before entering the same read loop as plain TCP.
pub struct TlsCaptureListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    capture: TcpCapture,
    tracker: TaskTracker,
}

impl TlsCaptureListener {
    pub fn bind(
        addr: SocketAddr,
        acceptor: TlsAcceptor,
        capture: TcpCapture,
        tracker: TaskTracker,
    ) -> Result<Self, NetworkError> {
        let listener = bind_transparent_tcp(addr)?;
        Ok(Self::from_listener(listener, acceptor, capture, tracker))
    }

    pub fn from_listener(
        listener: TcpListener,
        acceptor: TlsAcceptor,
        capture: TcpCapture,
        tracker: TaskTracker,
    ) -> Self {
        Self {
            listener,
            acceptor,
            capture,
            tracker,
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.listener.local_addr().map_err(NetworkError::SockError)
    }

    pub async fn run(self) -> Result<(), NetworkError> {
        info!("Listening TLS on {}", self.local_addr()?);
        let shutdown = self.capture.shutdown_token().clone();
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("TLS listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept TLS connection: {}", e);
                        return Err(NetworkError::AcceptFailed(e));
                    }
                },
            };

            let acceptor = self.acceptor.clone();
            let capture = self.capture.clone();
            self.tracker
                .spawn(handle_connection(acceptor, capture, stream, peer));
        }
    }
}

async fn handle_connection(
    acceptor: TlsAcceptor,
    capture: TcpCapture,
    stream: TcpStream,
    peer: SocketAddr,
) {
    let handshake = tokio::select! {
        _ = capture.shutdown_token().cancelled() => return,
        handshake = tokio::time::timeout(capture.idle_timeout(), acceptor.accept(stream)) => handshake,
    };
    let stream = match handshake {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            warn!("{} from {}", CaptureError::HandshakeError(e), peer);
            return;
        }
        Err(_) => {
            warn!("TLS handshake with {} timed out", peer);
            return;
        }
    };

    let (dst, resolution) = match resolve_or_local(&stream) {
        Ok(resolved) => resolved,
        Err(e) => {
            warn!("Dropping TLS connection from {}: no local address: {}", peer, e);
            return;
        }
    };
    if let Resolution::Fallback(e) = &resolution {
        warn!("Original destination of {} unavailable, using {}: {}", peer, dst, e);
    }

    let flow = Flow::new(Protocol::Tls, peer, dst);
    capture.capture(stream, flow, resolution).await;
}
