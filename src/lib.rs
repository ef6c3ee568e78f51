// Stream identity, errors and the per-connection stream registry
pub mod quic;

// Registry configuration
pub mod config;

// Re-export main types
pub use quic::{QuicError, QuicStream, Result, StreamError, StreamId, StreamStatus, StreamsMap, StreamsMapStats};
pub use crate::config::StreamsConfig;

pub mod prelude {
    pub use crate::quic::{QuicError, QuicStream, Result, StreamError, StreamId, StreamStatus, StreamsMap, StreamsMapGuard};
    pub use crate::config::{ConfigBuilder, StreamsConfig};
}
