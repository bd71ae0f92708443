use std::net::SocketAddr;

use log::info;

use super::recorder::SessionRecorder;
use super::types::{Flow, Protocol, Session};

/// Wraps one datagram into a single-payload `udp` session and persists it.
///
/// Returns the session so callers can report on it.
pub fn capture_datagram(
    recorder: &SessionRecorder,
    src: SocketAddr,
    dst: SocketAddr,
    data: Vec<u8>,
) -> Session {
    let mut session = Session::new(Flow::new(Protocol::Udp, src, dst));
    session.add_payload(data);
    recorder.finalize(&session);
    info!(
        "[{}] Received: {} ({} bytes)",
        session.id(),
        session.flow(),
        session.total_bytes()
    );
    session
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::data_capture::storage::MemoryStorage;

    #[test]
    fn datagram_becomes_one_udp_session() {
        let storage = Arc::new(MemoryStorage::default());
        let recorder = SessionRecorder::new(Some(storage.clone()));

        let session = capture_datagram(
            &recorder,
            "192.0.2.10:5353".parse().unwrap(),
            "192.0.2.53:53".parse().unwrap(),
            b"ping".to_vec(),
        );
        assert_eq!(session.payloads().len(), 1);
        assert_eq!(session.flow().proto, Protocol::Udp);

        let records = storage.json();
        assert_eq!(records.len(), 1);
        let value = &records[0];
        assert_eq!(value["flow"]["proto"], "udp");
        assert_eq!(value["flow"]["dst"], "192.0.2.53");
        assert_eq!(value["flow"]["dport"], 53);
        assert_eq!(value["payloads"][0]["index"], 0);
        assert_eq!(value["payloads"][0]["data"], "cGluZw==");
    }

    #[test]
    fn empty_datagram_is_still_recorded() {
        let storage = Arc::new(MemoryStorage::default());
        let recorder = SessionRecorder::new(Some(storage.clone()));
        let session = capture_datagram(
            &recorder,
            "192.0.2.10:5353".parse().unwrap(),
            "192.0.2.53:53".parse().unwrap(),
            Vec::new(),
        );
        assert_eq!(session.payloads().len(), 1);
        assert_eq!(session.total_bytes(), 0);
        assert_eq!(storage.len(), 1);
    }
}
