//! QUIC stream identity
//!
//! The registry never looks inside a stream object. All it needs is a
//! stable identifier, which is what [`QuicStream`] provides.

/// Stream identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct StreamId(u64);

impl StreamId {
    /// Create a new stream ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Check if this is a client-initiated stream
    pub fn is_client_initiated(&self) -> bool {
        (self.0 & 0x1) == 0
    }

    /// Check if this is a server-initiated stream
    pub fn is_server_initiated(&self) -> bool {
        (self.0 & 0x1) == 1
    }

    /// Check if this is a bidirectional stream
    pub fn is_bidirectional(&self) -> bool {
        (self.0 & 0x2) == 0
    }

    /// Check if this is a unidirectional stream
    pub fn is_unidirectional(&self) -> bool {
        (self.0 & 0x2) == 2
    }
}

impl From<u64> for StreamId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Anything the registry can hold: it only has to know its own ID.
pub trait QuicStream {
    fn stream_id(&self) -> StreamId;
}
