//! Data capture subsystem
//!
//! Turns captured traffic into [`Session`]s and hands finished sessions to a
//! [`Storage`] backend.
//!
//! Components:
//! - `types`: the Flow/Payload/Session model persisted as JSON lines.
//! - `tcp_capture`: the read loop shared by the TCP and TLS listeners.
//! - `udp_capture`: single-datagram sessions.
//! - `recorder`: serialization and submission of finished sessions.
//! - `storage`: the trait persistence backends implement.

pub mod recorder;
pub mod storage;
pub mod tcp_capture;
pub mod types;
pub mod udp_capture;

pub use recorder::SessionRecorder;
pub use storage::Storage;
pub use tcp_capture::{CaptureReport, SessionOutcome, TcpCapture};
pub use types::{Flow, Payload, Protocol, Session};
pub use udp_capture::capture_datagram;
