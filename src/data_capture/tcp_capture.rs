use std::fmt;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use log::{info, trace, warn};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::network::original_dst::Resolution;
use crate::session_management::SessionCounter;

use super::recorder::SessionRecorder;
use super::types::{Flow, Session};

/// Size of a single read from a captured stream.
pub const READ_BUFFER_SIZE: usize = 4096;

const PREVIEW_LEN: usize = 64;

/// Why a stream session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// The peer closed the connection.
    Closed,
    /// A read failed.
    Aborted(io::Error),
    /// Nothing arrived within the idle timeout.
    TimedOut,
    /// The capture instance is shutting down.
    Interrupted,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Closed => write!(f, "Closed"),
            SessionOutcome::Aborted(e) => write!(f, "Aborted ({})", e),
            SessionOutcome::TimedOut => write!(f, "Closed (idle timeout)"),
            SessionOutcome::Interrupted => write!(f, "Interrupted"),
        }
    }
}

/// Summary of a finished stream session.
#[derive(Debug)]
pub struct CaptureReport {
    pub outcome: SessionOutcome,
    pub resolution: Resolution,
    pub payloads: usize,
    pub bytes: usize,
    pub persisted: bool,
}

impl fmt::Display for CaptureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} payloads, {} bytes, destination from {}",
            self.outcome, self.payloads, self.bytes, self.resolution
        )
    }
}

/// Read side of a TCP or TLS session: everything the peer sends is recorded,
/// nothing is ever written back.
#[derive(Clone)]
pub struct TcpCapture {
    counter: Arc<SessionCounter>,
    recorder: SessionRecorder,
    idle_timeout: Duration,
    shutdown: CancellationToken,
}

impl TcpCapture {
    pub fn new(
        counter: Arc<SessionCounter>,
        recorder: SessionRecorder,
        idle_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            counter,
            recorder,
            idle_timeout,
            shutdown,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn counter(&self) -> &Arc<SessionCounter> {
        &self.counter
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Records `stream` until it closes, fails, idles out or shutdown starts,
    /// then hands the session to the recorder.
    pub async fn capture<S>(&self, mut stream: S, flow: Flow, resolution: Resolution) -> CaptureReport
    where
        S: AsyncRead + Unpin,
    {
        let mut session = Session::new(flow);
        let guard = self.counter.enter();
        info!(
            "[{}] Established: {} via {} ({} active)",
            session.id(),
            flow,
            resolution,
            self.counter.current()
        );

        let outcome = self.read_until_done(&mut stream, &mut session).await;
        drop(guard);

        let report = CaptureReport {
            outcome,
            resolution,
            payloads: session.payloads().len(),
            bytes: session.total_bytes(),
            persisted: self.recorder.finalize(&session),
        };
        match &report.outcome {
            SessionOutcome::Aborted(_) => warn!(
                "[{}] {}, {} ({} active)",
                session.id(),
                report,
                flow,
                self.counter.current()
            ),
            _ => info!(
                "[{}] {}, {} ({} active)",
                session.id(),
                report,
                flow,
                self.counter.current()
            ),
        }
        report
    }

    async fn read_until_done<S>(&self, stream: &mut S, session: &mut Session) -> SessionOutcome
    where
        S: AsyncRead + Unpin,
    {
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let read = tokio::select! {
                _ = self.shutdown.cancelled() => return SessionOutcome::Interrupted,
                read = tokio::time::timeout(self.idle_timeout, stream.read(&mut buf)) => read,
            };
            let n = match read {
                Err(_) => return SessionOutcome::TimedOut,
                Ok(Err(e)) => return SessionOutcome::Aborted(e),
                Ok(Ok(0)) => return SessionOutcome::Closed,
                Ok(Ok(n)) => n,
            };

            let index = session.add_payload(buf[..n].to_vec()).index;
            let preview = &buf[..n.min(PREVIEW_LEN)];
            trace!(
                "[{}] captured payload #{} {} bytes: {}{}",
                session.id(),
                index,
                n,
                String::from_utf8_lossy(preview),
                if n > PREVIEW_LEN { " ..." } else { "" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio_test::io::Builder;

    use crate::data_capture::storage::MemoryStorage;
    use crate::data_capture::types::Protocol;
    use crate::error_handling::types::ResolveError;

    fn flow() -> Flow {
        Flow::new(
            Protocol::Tcp,
            "203.0.113.9:41000".parse().unwrap(),
            "198.51.100.1:23".parse().unwrap(),
        )
    }

    fn capture(storage: &Arc<MemoryStorage>, timeout: Duration) -> TcpCapture {
        TcpCapture::new(
            Arc::new(SessionCounter::new()),
            SessionRecorder::new(Some(storage.clone())),
            timeout,
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connection_is_closed_with_its_payloads() {
        let storage = Arc::new(MemoryStorage::default());
        let capture = capture(&storage, Duration::from_secs(1));
        let stream = Builder::new()
            .read(b"hello")
            .read(b"world")
            .wait(Duration::from_secs(5))
            .build();

        let report = capture.capture(stream, flow(), Resolution::Original).await;
        assert!(matches!(report.outcome, SessionOutcome::TimedOut));
        assert_eq!(report.payloads, 2);
        assert_eq!(report.bytes, 10);
        assert!(report.persisted);

        let records = storage.json();
        assert_eq!(records.len(), 1);
        let payloads = records[0]["payloads"].as_array().unwrap();
        assert_eq!(payloads[0]["index"], 0);
        assert_eq!(payloads[0]["data"], "aGVsbG8=");
        assert_eq!(payloads[1]["index"], 1);
        assert_eq!(payloads[1]["data"], "d29ybGQ=");
        assert_eq!(records[0]["flow"]["proto"], "tcp");
        assert_eq!(records[0]["flow"]["dport"], 23);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_deadline_restarts_after_every_read() {
        let storage = Arc::new(MemoryStorage::default());
        let capture = capture(&storage, Duration::from_secs(10));
        // each gap is shorter than the timeout, their sum is not
        let stream = Builder::new()
            .read(b"a")
            .wait(Duration::from_secs(8))
            .read(b"b")
            .wait(Duration::from_secs(8))
            .read(b"c")
            .build();

        let report = capture.capture(stream, flow(), Resolution::Original).await;
        assert!(matches!(report.outcome, SessionOutcome::Closed));
        assert_eq!(report.payloads, 3);
    }

    #[tokio::test]
    async fn peer_close_ends_the_session() {
        let storage = Arc::new(MemoryStorage::default());
        let capture = capture(&storage, Duration::from_secs(60));
        let stream = Builder::new().read(b"USER root\r\n").build();

        let report = capture
            .capture(
                stream,
                flow(),
                Resolution::Fallback(ResolveError::Unsupported),
            )
            .await;
        assert!(matches!(report.outcome, SessionOutcome::Closed));
        assert_eq!(report.payloads, 1);
        assert_eq!(capture.counter().current(), 0);
        assert!(matches!(
            report.resolution,
            Resolution::Fallback(ResolveError::Unsupported)
        ));
        let line = report.to_string();
        assert!(line.starts_with("Closed: 1 payloads, 11 bytes"), "{}", line);
        assert!(line.contains("destination from local address"), "{}", line);
    }

    #[tokio::test]
    async fn read_errors_abort_but_still_persist() {
        let storage = Arc::new(MemoryStorage::default());
        let capture = capture(&storage, Duration::from_secs(60));
        let stream = Builder::new()
            .read(b"partial")
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let report = capture.capture(stream, flow(), Resolution::Original).await;
        assert!(matches!(report.outcome, SessionOutcome::Aborted(_)));
        assert_eq!(report.payloads, 1);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn silent_connection_is_persisted_without_payloads() {
        let storage = Arc::new(MemoryStorage::default());
        let capture = capture(&storage, Duration::from_secs(60));

        let report = capture
            .capture(Builder::new().build(), flow(), Resolution::Original)
            .await;
        assert!(matches!(report.outcome, SessionOutcome::Closed));
        let records = storage.json();
        assert_eq!(records[0]["payloads"].as_array().unwrap().len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_open_sessions() {
        let storage = Arc::new(MemoryStorage::default());
        let capture = capture(&storage, Duration::from_secs(600));
        let stream = Builder::new()
            .read(b"data")
            .wait(Duration::from_secs(300))
            .build();

        let token = capture.shutdown_token().clone();
        let counter = capture.counter().clone();
        let task = tokio::spawn({
            let capture = capture.clone();
            async move { capture.capture(stream, flow(), Resolution::Original).await }
        });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(counter.current(), 1);
        token.cancel();

        let report = task.await.unwrap();
        assert!(matches!(report.outcome, SessionOutcome::Interrupted));
        assert_eq!(report.payloads, 1);
        assert!(report.persisted);
        assert_eq!(counter.current(), 0);
    }
}
