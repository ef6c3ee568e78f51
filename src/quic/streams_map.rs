//! Per-connection stream registry
//!
//! [`StreamsMap`] tracks every stream opened on a single connection, caps the
//! number of concurrently open streams, and hands streams to the send loop
//! either in insertion order or round-robin with a cursor that persists
//! between calls.
//!
//! A stream ID is in one of three states: never seen, open, or closed. Closed
//! is terminal. The entry stays in the map so that a late frame for a closed
//! stream does not reopen it.
//!
//! All state sits behind one `RwLock`. Lookups share it; opening, removal and
//! both iteration protocols take it exclusively. Visitors run while the lock
//! is held and must not call back into the map.

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use super::error::{QuicError, Result, StreamError};
use super::stream::{QuicStream, StreamId};
use crate::config::StreamsConfig;

/// Factory invoked to create the stream object for a never-seen ID
pub type NewStreamFn<S> = Box<dyn Fn(StreamId) -> Result<Arc<S>> + Send + Sync>;

/// Lifecycle of a stream ID on this connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StreamStatus {
    /// Never opened; eligible for creation
    Unseen,
    /// Currently open
    Open,
    /// Was open, now closed for good
    Closed,
}

enum StreamEntry<S> {
    Open(Arc<S>),
    Closed,
}

impl<S> StreamEntry<S> {
    fn stream(&self) -> Option<Arc<S>> {
        match self {
            StreamEntry::Open(stream) => Some(stream.clone()),
            StreamEntry::Closed => None,
        }
    }

    fn status(&self) -> StreamStatus {
        match self {
            StreamEntry::Open(_) => StreamStatus::Open,
            StreamEntry::Closed => StreamStatus::Closed,
        }
    }
}

/// Result of the optimistic, read-locked phase of `get_or_open_stream`
enum Lookup<S> {
    /// The ID has an entry; `None` means it is closed
    Known(Option<Arc<S>>),
    Unseen,
}

/// Snapshot of registry bookkeeping
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StreamsMapStats {
    pub open_streams: usize,
    pub closed_streams: usize,
    pub max_open_streams: usize,
    pub round_robin_index: usize,
    pub streams_opened: u64,
}

struct StreamsMapInner<S> {
    streams: HashMap<StreamId, StreamEntry<S>>,
    open_streams: Vec<StreamId>,
    round_robin_index: usize,
    max_open_streams: usize,
    streams_opened: u64,
}

impl<S: QuicStream> StreamsMapInner<S> {
    fn new(max_open_streams: usize) -> Self {
        Self {
            streams: HashMap::new(),
            open_streams: Vec::with_capacity(max_open_streams),
            round_robin_index: 0,
            max_open_streams,
            streams_opened: 0,
        }
    }

    fn lookup(&self, id: StreamId) -> Lookup<S> {
        match self.streams.get(&id) {
            Some(entry) => Lookup::Known(entry.stream()),
            None => Lookup::Unseen,
        }
    }

    fn status(&self, id: StreamId) -> StreamStatus {
        self.streams.get(&id).map_or(StreamStatus::Unseen, StreamEntry::status)
    }

    /// Resolve an ID taken from the open sequence. Anything but an open entry
    /// means the map and the sequence disagree.
    fn resolve(&self, id: StreamId) -> Result<&Arc<S>> {
        match self.streams.get(&id) {
            Some(StreamEntry::Open(stream)) => Ok(stream),
            Some(StreamEntry::Closed) => Err(invariant_violation(format!(
                "Stream {} is closed, but still in the open stream list",
                id
            ))),
            None => Err(invariant_violation(format!(
                "Stream {} is in the open stream list, but missing from the streams map",
                id
            ))),
        }
    }

    fn put_stream(&mut self, stream: Arc<S>) -> Result<()> {
        let id = stream.stream_id();
        if self.streams.contains_key(&id) {
            return Err(StreamError::AlreadyExists(id).into());
        }

        self.streams.insert(id, StreamEntry::Open(stream));
        self.open_streams.push(id);
        self.streams_opened += 1;
        Ok(())
    }

    fn remove_stream(&mut self, id: StreamId) -> Result<()> {
        if self.status(id) != StreamStatus::Open {
            return Err(StreamError::NotFound(id).into());
        }

        let position = self
            .open_streams
            .iter()
            .position(|&open| open == id)
            .ok_or_else(|| {
                invariant_violation(format!("Stream {} is open, but missing from the open stream list", id))
            })?;

        self.streams.insert(id, StreamEntry::Closed);
        self.open_streams.remove(position);

        // keep the cursor on the same logical stream
        if position < self.round_robin_index {
            self.round_robin_index -= 1;
        }
        if self.round_robin_index >= self.open_streams.len() {
            self.round_robin_index = 0;
        }

        debug!("Closed stream {} ({} still open)", id, self.open_streams.len());
        Ok(())
    }

    fn iterate<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&Arc<S>) -> Result<bool>,
    {
        for &id in &self.open_streams {
            let stream = self.resolve(id)?;
            if !f(stream)? {
                break;
            }
        }
        Ok(())
    }

    fn round_robin_iterate<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(&Arc<S>) -> Result<bool>,
    {
        let num_streams = self.open_streams.len();
        if num_streams == 0 {
            return Ok(());
        }
        let start_index = self.round_robin_index;

        for i in 0..num_streams {
            let id = self.open_streams[(i + start_index) % num_streams];
            let stream = self.resolve(id)?;
            if !f(stream)? {
                trace!("Round robin stopped at stream {}", id);
                break;
            }
            self.round_robin_index = (self.round_robin_index + 1) % num_streams;
        }
        Ok(())
    }

    fn stats(&self) -> StreamsMapStats {
        StreamsMapStats {
            open_streams: self.open_streams.len(),
            closed_streams: self
                .streams
                .values()
                .filter(|entry| matches!(entry, StreamEntry::Closed))
                .count(),
            max_open_streams: self.max_open_streams,
            round_robin_index: self.round_robin_index,
            streams_opened: self.streams_opened,
        }
    }
}

fn invariant_violation(reason: String) -> QuicError {
    error!("streams map out of sync: {}", reason);
    StreamError::InvariantViolation(reason).into()
}

/// Registry of all streams on one connection
pub struct StreamsMap<S> {
    inner: RwLock<StreamsMapInner<S>>,
    new_stream: NewStreamFn<S>,
}

impl<S: QuicStream> StreamsMap<S> {
    /// Create an empty registry that allows at most `max_open_streams` open streams
    pub fn new<F>(max_open_streams: usize, new_stream: F) -> Self
    where
        F: Fn(StreamId) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        Self {
            inner: RwLock::new(StreamsMapInner::new(max_open_streams)),
            new_stream: Box::new(new_stream),
        }
    }

    /// Create an empty registry with the cap derived from `config`
    pub fn from_config<F>(config: &StreamsConfig, new_stream: F) -> Result<Self>
    where
        F: Fn(StreamId) -> Result<Arc<S>> + Send + Sync + 'static,
    {
        config.validate()?;
        Ok(Self::new(config.max_open_streams(), new_stream))
    }

    /// Return the stream for `id`, opening it if it was never seen.
    ///
    /// `Ok(None)` means the stream was opened before and has since been
    /// closed; it must not be recreated.
    pub fn get_or_open_stream(&self, id: StreamId) -> Result<Option<Arc<S>>> {
        if let Lookup::Known(stream) = self.lookup(id) {
            return Ok(stream);
        }
        self.open_verified(id)
    }

    fn lookup(&self, id: StreamId) -> Lookup<S> {
        self.inner.read().lookup(id)
    }

    fn open_verified(&self, id: StreamId) -> Result<Option<Arc<S>>> {
        let mut inner = self.inner.write();

        // another caller may have opened it between the read and the write lock
        if let Lookup::Known(stream) = inner.lookup(id) {
            return Ok(stream);
        }

        if inner.open_streams.len() >= inner.max_open_streams {
            warn!("Refusing to open stream {}: {} streams already open", id, inner.open_streams.len());
            return Err(StreamError::TooManyOpenStreams {
                limit: inner.max_open_streams,
            }
            .into());
        }

        let stream = (self.new_stream)(id)?;
        if stream.stream_id() != id {
            return Err(invariant_violation(format!(
                "stream factory returned stream {} for ID {}",
                stream.stream_id(),
                id
            )));
        }
        inner.put_stream(stream.clone())?;

        debug!("Opened stream {} ({} open)", id, inner.open_streams.len());
        Ok(Some(stream))
    }

    /// Look up a stream without opening it
    pub fn get_stream(&self, id: StreamId) -> Option<Arc<S>> {
        match self.inner.read().lookup(id) {
            Lookup::Known(stream) => stream,
            Lookup::Unseen => None,
        }
    }

    /// Whether `id` was never seen, is open, or is closed
    pub fn status(&self, id: StreamId) -> StreamStatus {
        self.inner.read().status(id)
    }

    /// Visit open streams in insertion order until the visitor returns
    /// `Ok(false)` or fails.
    pub fn iterate<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&Arc<S>) -> Result<bool>,
    {
        self.inner.write().iterate(f)
    }

    /// Visit open streams starting where the previous round-robin pass left
    /// off.
    ///
    /// Each stream whose visit returns `Ok(true)` moves the cursor forward by
    /// one. A stream that returns `Ok(false)` (nothing to send, or blocked)
    /// leaves the cursor on itself, so it goes first next time. A failing
    /// visitor leaves the cursor where it was.
    pub fn round_robin_iterate<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&Arc<S>) -> Result<bool>,
    {
        self.inner.write().round_robin_iterate(f)
    }

    /// Close an open stream. The ID stays known so it is never reopened.
    pub fn remove_stream(&self, id: StreamId) -> Result<()> {
        self.inner.write().remove_stream(id)
    }

    /// Remove every open stream matching `finished` in a single critical
    /// section. Returns the removed IDs in open order.
    pub fn garbage_collect<F>(&self, mut finished: F) -> Result<Vec<StreamId>>
    where
        F: FnMut(&Arc<S>) -> bool,
    {
        let mut inner = self.inner.write();

        let mut removed = Vec::new();
        inner.iterate(|stream| {
            if finished(stream) {
                removed.push(stream.stream_id());
            }
            Ok(true)
        })?;

        for &id in &removed {
            inner.remove_stream(id)?;
        }
        Ok(removed)
    }

    /// Take the exclusive lock for a sequence of operations
    pub fn lock(&self) -> StreamsMapGuard<'_, S> {
        StreamsMapGuard {
            inner: self.inner.write(),
        }
    }

    /// Number of currently open streams
    pub fn number_of_streams(&self) -> usize {
        self.inner.read().open_streams.len()
    }

    /// IDs of open streams in iteration order
    pub fn open_stream_ids(&self) -> Vec<StreamId> {
        self.inner.read().open_streams.clone()
    }

    pub fn max_open_streams(&self) -> usize {
        self.inner.read().max_open_streams
    }

    pub fn stats(&self) -> StreamsMapStats {
        self.inner.read().stats()
    }
}

impl<S> fmt::Debug for StreamsMap<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("StreamsMap")
            .field("open_streams", &inner.open_streams)
            .field("round_robin_index", &inner.round_robin_index)
            .field("max_open_streams", &inner.max_open_streams)
            .finish_non_exhaustive()
    }
}

/// Exclusive access to a [`StreamsMap`].
///
/// Holding the guard proves the registry lock is held, so the mutators on it
/// never lock again. Do not call methods on the `StreamsMap` itself while a
/// guard is alive; that deadlocks.
pub struct StreamsMapGuard<'a, S> {
    inner: RwLockWriteGuard<'a, StreamsMapInner<S>>,
}

impl<S: QuicStream> StreamsMapGuard<'_, S> {
    pub fn remove_stream(&mut self, id: StreamId) -> Result<()> {
        self.inner.remove_stream(id)
    }

    pub fn get_stream(&self, id: StreamId) -> Option<Arc<S>> {
        match self.inner.lookup(id) {
            Lookup::Known(stream) => stream,
            Lookup::Unseen => None,
        }
    }

    pub fn status(&self, id: StreamId) -> StreamStatus {
        self.inner.status(id)
    }

    pub fn iterate<F>(&self, f: F) -> Result<()>
    where
        F: FnMut(&Arc<S>) -> Result<bool>,
    {
        self.inner.iterate(f)
    }

    pub fn round_robin_iterate<F>(&mut self, f: F) -> Result<()>
    where
        F: FnMut(&Arc<S>) -> Result<bool>,
    {
        self.inner.round_robin_iterate(f)
    }

    pub fn number_of_streams(&self) -> usize {
        self.inner.open_streams.len()
    }

    pub fn open_stream_ids(&self) -> &[StreamId] {
        &self.inner.open_streams
    }
}
