//! QUIC stream bookkeeping
//!
//! Stream identity, the error taxonomy, and the per-connection stream
//! registry used by the send loop.

pub mod error;
pub mod stream;
pub mod streams_map;

// Re-export commonly used items
pub use error::{ErrorSeverity, QuicError, RecoveryAction, Result, StreamError, TransportErrorCode};
pub use stream::{QuicStream, StreamId};
pub use streams_map::{NewStreamFn, StreamStatus, StreamsMap, StreamsMapGuard, StreamsMapStats};
