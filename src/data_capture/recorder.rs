//! Session persistence hand-off.
//!
//! `SessionRecorder` is the last step of every capture path: once a TCP/TLS
//! connection has ended or a UDP datagram has been wrapped into a session, the
//! session is encoded as a single JSON line and submitted to the injected
//! [`Storage`] implementation (the rotating writer in production).
//!
//! Highlights
//! - Persistence is optional: without a storage backend, sessions are only logged
//! - Encoding failures are reported and the session is skipped, never retried
//! - Cheap to clone; every connection task holds its own copy
//!
//! Minimal usage
//! ```no_run
//! use std::sync::Arc;
//! use redcap::data_capture::{Flow, Protocol, Session, SessionRecorder, Storage};
//! use redcap::error_handling::types::StorageError;
//!
//! struct Stdout;
//! impl Storage for Stdout {
//!     fn submit(&self, record: &[u8]) -> Result<(), StorageError> {
//!         println!("{}", String::from_utf8_lossy(record));
//!         Ok(())
//!     }
//! }
//!
//! let recorder = SessionRecorder::new(Some(Arc::new(Stdout)));
//! let flow = Flow::new(
//!     Protocol::Udp,
//!     "192.0.2.1:5353".parse().unwrap(),
//!     "192.0.2.2:53".parse().unwrap(),
//! );
//! let mut session = Session::new(flow);
//! session.add_payload(b"ping".to_vec());
//! recorder.record(&session).unwrap();
//! ```

use std::sync::Arc;

use log::{debug, error};

use crate::error_handling::types::CaptureError;

use super::storage::Storage;
use super::types::Session;

#[derive(Clone)]
pub struct SessionRecorder {
    /// Pluggable persistence backend; `None` disables persistence.
    storage: Option<Arc<dyn Storage>>,
}

impl SessionRecorder {
    pub fn new(storage: Option<Arc<dyn Storage>>) -> Self {
        Self { storage }
    }

    pub fn disabled() -> Self {
        Self { storage: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.storage.is_some()
    }

    /// Encodes `session` and submits it to the storage backend.
    ///
    /// Returns `Ok(false)` when persistence is disabled.
    ///
    /// Errors
    /// - [`CaptureError::SerializationError`] if the session cannot be encoded.
    /// - [`CaptureError::StorageError`] if the backend rejects the record.
    pub fn record(&self, session: &Session) -> Result<bool, CaptureError> {
        let Some(storage) = &self.storage else {
            return Ok(false);
        };

        let line = serde_json::to_vec(session).map_err(CaptureError::SerializationError)?;
        storage.submit(&line).map_err(CaptureError::StorageError)?;

        debug!(
            "[{}] Wrote data: {} ({} bytes encoded)",
            session.id(),
            session,
            line.len()
        );
        Ok(true)
    }

    /// Same as [`record`](Self::record), but failures are only logged.
    ///
    /// Capture tasks call this: a session that cannot be persisted must not
    /// affect the listener or the session counter.
    pub fn finalize(&self, session: &Session) -> bool {
        match self.record(session) {
            Ok(written) => written,
            Err(e) => {
                error!("[{}] Session not persisted: {}: {}", session.id(), session, e);
                false
            }
        }
    }
}
