//! Common data types used across the data_capture subsystem.
//!
//! A [`Session`] is what ends up as one JSON line in the session files:
//!
//! ```text
//! {"timestamp":"2026-10-19T08:00:00.123456Z",
//!  "flow":{"proto":"tcp","src":"203.0.113.7","sport":50122,"dst":"198.51.100.1","dport":23},
//!  "payloads":[{"index":0,"timestamp":"2026-10-19T08:00:00.200000Z","data":"aGVsbG8="}]}
//! ```

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transport a session was captured on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Tls,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Tls => write!(f, "tls"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Endpoints of one captured conversation.
///
/// `dst` is the destination the client originally asked for, i.e. the address
/// recovered from the kernel, not the address this process listens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub proto: Protocol,
    pub src: IpAddr,
    pub sport: u16,
    pub dst: IpAddr,
    pub dport: u16,
}

impl Flow {
    pub fn new(proto: Protocol, src: SocketAddr, dst: SocketAddr) -> Self {
        Self {
            proto,
            src: src.ip(),
            sport: src.port(),
            dst: dst.ip(),
            dport: dst.port(),
        }
    }

    pub fn src_addr(&self) -> SocketAddr {
        SocketAddr::new(self.src, self.sport)
    }

    pub fn dst_addr(&self) -> SocketAddr {
        SocketAddr::new(self.dst, self.dport)
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} <-> {}", self.proto, self.src_addr(), self.dst_addr())
    }
}

/// One successful read (or one datagram) of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
}

/// A captured conversation and its ordered payload history.
///
/// Index assignment is owned by [`Session::add_payload`], so indices are always
/// `0..n` in arrival order. The `id` only correlates log lines and is not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    #[serde(skip, default = "Uuid::new_v4")]
    id: Uuid,
    timestamp: DateTime<Utc>,
    flow: Flow,
    payloads: Vec<Payload>,
}

impl Session {
    pub fn new(flow: Flow) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            flow,
            payloads: Vec::new(),
        }
    }

    /// Appends `data` as the next payload, stamped with the current time.
    pub fn add_payload(&mut self, data: Vec<u8>) -> &Payload {
        let index = self.payloads.len() as u64;
        self.payloads.push(Payload {
            index,
            timestamp: Utc::now(),
            data,
        });
        &self.payloads[self.payloads.len() - 1]
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn payloads(&self) -> &[Payload] {
        &self.payloads
    }

    pub fn total_bytes(&self) -> usize {
        self.payloads.iter().map(|p| p.data.len()).sum()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} ({} payloads)",
            self.timestamp.format("%Y-%m-%dT%H:%M:%S"),
            self.flow,
            self.payloads.len()
        )
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
