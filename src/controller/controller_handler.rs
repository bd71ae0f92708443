//! Top-level wiring of a capture instance.
//!
//! The controller owns everything that lives for the whole process: the
//! session writer, the session counter, the task tracker of per-connection
//! tasks and the shutdown token. `run` starts the listeners and the rotation
//! task, waits for a shutdown request or a fatal error, and then shuts down in
//! order: listeners stop accepting, open sessions are interrupted and persisted
//! (bounded by the grace period), and the writer is closed last.

use std::future::Future;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::{JoinError, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::resource_limits::{fd_limit, raise_fd_limit};
use crate::configuration::config::Config;
use crate::configuration::types::ServerMode;
use crate::data_capture::recorder::SessionRecorder;
use crate::data_capture::storage::Storage;
use crate::data_capture::tcp_capture::TcpCapture;
use crate::error_handling::types::ControllerError;
use crate::network::tcp_listener::TcpCaptureListener;
use crate::network::tls_config::load_tls_acceptor;
use crate::network::tls_listener::TlsCaptureListener;
use crate::network::transparent::{bind_transparent_tcp, bind_transparent_udp};
use crate::network::udp_listener::UdpCaptureListener;
use crate::session_management::SessionCounter;
use crate::storage::RotWriter;

/// Sockets the controller serves. `None` means the listener is disabled.
pub struct Listeners {
    pub tcp: Option<TcpListener>,
    pub udp: Option<UdpSocket>,
}

pub struct Controller {
    config: Config,
    counter: Arc<SessionCounter>,
    writer: Option<Arc<RotWriter>>,
    acceptor: Option<TlsAcceptor>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl Controller {
    /// Prepares everything that can fail before traffic is accepted: the open
    /// files limit, the TLS credentials and the first session file.
    pub fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Configuration: {}", config);

        if config.max_fd > 0 {
            raise_fd_limit(config.max_fd)?;
        } else {
            match fd_limit() {
                Ok(limit) => info!("Open files limit: {} (hard {})", limit.soft, limit.hard),
                Err(e) => warn!("Unable to read the open files limit: {}", e),
            }
        }

        let acceptor = match &config.mode {
            ServerMode::Tls(files) if config.tcp_enabled => Some(load_tls_acceptor(files)?),
            _ => None,
        };

        let writer = match &config.output {
            Some(output) => Some(Arc::new(RotWriter::new(
                output.template.clone(),
                output.rotation,
            )?)),
            None => {
                warn!("************************************************************");
                warn!("* No output template given: captured sessions are NOT saved *");
                warn!("************************************************************");
                None
            }
        };

        Ok(Self {
            config,
            counter: Arc::new(SessionCounter::new()),
            writer,
            acceptor,
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session_counter(&self) -> Arc<SessionCounter> {
        Arc::clone(&self.counter)
    }

    /// Cancelling this token has the same effect as the shutdown signal.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Binds the transparent listening sockets of the enabled listeners.
    pub fn bind(&self) -> Result<Listeners, ControllerError> {
        let addr = self.config.listen_addr;
        let tcp = if self.config.tcp_enabled {
            Some(bind_transparent_tcp(addr)?)
        } else {
            None
        };
        let udp = if self.config.udp_enabled {
            Some(bind_transparent_udp(addr)?)
        } else {
            None
        };
        Ok(Listeners { tcp, udp })
    }

    /// Binds the listeners and captures until `shutdown_signal` resolves or a
    /// fatal error occurs.
    pub async fn run<F>(self, shutdown_signal: F) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        let listeners = self.bind()?;
        self.run_with(listeners, shutdown_signal).await
    }

    pub async fn run_with<F>(self, listeners: Listeners, shutdown_signal: F) -> Result<(), ControllerError>
    where
        F: Future<Output = ()>,
    {
        let recorder = SessionRecorder::new(
            self.writer
                .clone()
                .map(|writer| writer as Arc<dyn Storage>),
        );
        let capture = TcpCapture::new(
            Arc::clone(&self.counter),
            recorder.clone(),
            self.config.idle_timeout,
            self.shutdown.clone(),
        );

        let mut tasks: JoinSet<Result<(), ControllerError>> = JoinSet::new();

        if let Some(writer) = &self.writer {
            let rotation = Arc::clone(writer).run_rotation(self.shutdown.clone());
            tasks.spawn(async move { rotation.await.map_err(ControllerError::from) });
        }

        if let Some(listener) = listeners.tcp {
            match self.acceptor.clone() {
                Some(acceptor) => {
                    let listener = TlsCaptureListener::from_listener(
                        listener,
                        acceptor,
                        capture.clone(),
                        self.tracker.clone(),
                    );
                    tasks.spawn(async move { listener.run().await.map_err(ControllerError::from) });
                }
                None => {
                    let listener = TcpCaptureListener::from_listener(
                        listener,
                        capture.clone(),
                        self.tracker.clone(),
                    );
                    tasks.spawn(async move { listener.run().await.map_err(ControllerError::from) });
                }
            }
        }

        if let Some(socket) = listeners.udp {
            let listener = UdpCaptureListener::from_socket(
                socket,
                recorder.clone(),
                self.tracker.clone(),
                self.shutdown.clone(),
            );
            tasks.spawn(async move { listener.run().await.map_err(ControllerError::from) });
        }

        info!("Capture started");

        let mut result = Ok(());
        tokio::select! {
            biased;
            _ = shutdown_signal => info!("Shutdown requested"),
            _ = self.shutdown.cancelled() => info!("Shutdown requested"),
            Some(joined) = tasks.join_next() => {
                error!("A capture task ended unexpectedly, shutting down");
                record_failure(&mut result, joined);
            }
        }

        self.shutdown.cancel();
        while let Some(joined) = tasks.join_next().await {
            record_failure(&mut result, joined);
        }

        self.tracker.close();
        let grace = self.config.shutdown_grace;
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                "{} session tasks still running after {}s, abandoning them",
                self.tracker.len(),
                grace.as_secs()
            );
        }

        if let Some(writer) = &self.writer {
            if let Err(e) = writer.close() {
                error!("Failed to close the session file: {}", e);
                if result.is_ok() {
                    result = Err(e.into());
                }
            }
        }

        info!("Capture stopped");
        result
    }
}

/// Keeps the first failure of the controller's tasks.
fn record_failure(
    result: &mut Result<(), ControllerError>,
    joined: Result<Result<(), ControllerError>, JoinError>,
) {
    let failure = match joined {
        Ok(Ok(())) => return,
        Ok(Err(e)) => e,
        Err(e) => ControllerError::TaskFailed(e.to_string()),
    };
    error!("{}", failure);
    if result.is_ok() {
        *result = Err(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::configuration::config::OutputConfig;
    use crate::configuration::types::{Timezone, TlsFiles};
    use crate::error_handling::types::{ConfigError, StorageError};
    use crate::storage::{PathTemplate, RotationPolicy};

    fn config() -> Config {
        Config {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            idle_timeout: Duration::from_secs(60),
            mode: ServerMode::Tcp,
            output: None,
            tcp_enabled: true,
            udp_enabled: true,
            max_fd: 0,
            shutdown_grace: Duration::from_secs(1),
        }
    }

    #[test]
    fn unwritable_output_fails_at_startup() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("file"), b"").unwrap();
        let mut config = config();
        config.output = Some(OutputConfig {
            template: PathTemplate::new(
                format!("{}/file/sessions.jsonl", dir.path().display()),
                Timezone::Local,
            )
            .unwrap(),
            rotation: RotationPolicy::disabled(),
        });
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::StorageError(StorageError::OpenFailed(_, _)))
        ));
    }

    #[test]
    fn missing_tls_credentials_fail_at_startup() {
        let mut config = config();
        config.mode = ServerMode::Tls(TlsFiles {
            cert: "/nonexistent/cert.pem".into(),
            key: "/nonexistent/key.pem".into(),
        });
        assert!(matches!(
            Controller::new(config),
            Err(ControllerError::ConfigurationError(ConfigError::TlsCredentials(_)))
        ));
    }

    #[tokio::test]
    async fn cancelling_the_token_stops_the_controller() {
        let controller = Controller::new(config()).unwrap();
        let token = controller.shutdown_token();
        let listeners = Listeners {
            tcp: Some(TcpListener::bind("127.0.0.1:0").await.unwrap()),
            udp: None,
        };
        let run = tokio::spawn(controller.run_with(listeners, std::future::pending()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
