use crate::error_handling::types::StorageError;

/// Sink for serialized session records.
///
/// `submit` receives one encoded session without a trailing newline; the
/// implementation is responsible for framing. It is called concurrently from
/// every connection and datagram task.
pub trait Storage: Send + Sync {
    fn submit(&self, record: &[u8]) -> Result<(), StorageError>;
}

#[cfg(test)]
pub(crate) use memory::MemoryStorage;
