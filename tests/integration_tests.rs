//! Integration tests for the GQUIC stream registry
//!
//! These drive the registry through its public API the way a connection's
//! send loop would.

use gquic_streams::prelude::*;
use gquic_streams::StreamsMapStats;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[derive(Debug)]
struct TestStream {
    id: StreamId,
    pending_frames: AtomicUsize,
}

impl TestStream {
    fn new(id: StreamId) -> Self {
        Self {
            id,
            pending_frames: AtomicUsize::new(0),
        }
    }

    /// Pop one frame; false once drained
    fn send_frame(&self) -> bool {
        self.pending_frames
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl QuicStream for TestStream {
    fn stream_id(&self) -> StreamId {
        self.id
    }
}

fn counting_map(max_open_streams: usize) -> (Arc<StreamsMap<TestStream>>, Arc<AtomicUsize>) {
    let created = Arc::new(AtomicUsize::new(0));
    let counter = created.clone();
    let map = StreamsMap::new(max_open_streams, move |id| {
        counter.fetch_add(1, Ordering::SeqCst);
        // widen the window between the read and write lock
        std::thread::sleep(Duration::from_millis(2));
        Ok(Arc::new(TestStream::new(id)))
    });
    (Arc::new(map), created)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_open_creates_one_stream() {
    const CALLERS: usize = 32;
    let (map, created) = counting_map(10);
    let barrier = Arc::new(Barrier::new(CALLERS));

    let mut handles = Vec::with_capacity(CALLERS);
    for _ in 0..CALLERS {
        let map = map.clone();
        let barrier = barrier.clone();
        handles.push(tokio::task::spawn_blocking(move || {
            barrier.wait();
            map.get_or_open_stream(StreamId::new(7))
        }));
    }

    let mut streams = Vec::with_capacity(CALLERS);
    for handle in handles {
        let stream = assert_ok!(handle.await.unwrap());
        streams.push(stream.expect("stream 7 is open"));
    }

    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert!(streams.iter().all(|s| Arc::ptr_eq(s, &streams[0])));
    assert_eq!(map.number_of_streams(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_opens_respect_limit() {
    let (map, created) = counting_map(8);

    let mut handles = Vec::new();
    for id in 0..32u64 {
        let map = map.clone();
        handles.push(tokio::task::spawn_blocking(move || map.get_or_open_stream(StreamId::new(id))));
    }

    let mut refused = 0;
    for handle in handles {
        if let Err(err) = handle.await.unwrap() {
            assert!(matches!(err, QuicError::Stream(StreamError::TooManyOpenStreams { limit: 8 })));
            refused += 1;
        }
    }

    assert_eq!(map.number_of_streams(), 8);
    assert_eq!(created.load(Ordering::SeqCst), 8);
    assert_eq!(refused, 24);
}

#[test]
fn test_limit_from_config() {
    let config = ConfigBuilder::new()
        .max_streams_per_connection(2)
        .max_streams_multiplier(1.0)
        .build()
        .unwrap();
    let map = StreamsMap::from_config(&config, |id| Ok(Arc::new(TestStream::new(id)))).unwrap();

    assert_ok!(map.get_or_open_stream(StreamId::new(1)));
    assert_ok!(map.get_or_open_stream(StreamId::new(2)));
    let err = assert_err!(map.get_or_open_stream(StreamId::new(3)));
    assert_eq!(err.transport_error_code().map(|code| code.value()), Some(0x4));

    assert!(map.get_stream(StreamId::new(1)).is_some());
    assert!(map.get_stream(StreamId::new(2)).is_some());
    assert_eq!(map.status(StreamId::new(3)), StreamStatus::Unseen);
}

#[test]
fn test_closed_stream_stays_closed() {
    let (map, created) = counting_map(10);

    assert_ok!(map.get_or_open_stream(StreamId::new(5)));
    assert_ok!(map.remove_stream(StreamId::new(5)));

    let reopened = assert_ok!(map.get_or_open_stream(StreamId::new(5)));
    assert!(reopened.is_none());
    assert_eq!(created.load(Ordering::SeqCst), 1);
    assert_eq!(map.status(StreamId::new(5)), StreamStatus::Closed);
}

/// Drain every stream with a fixed frame budget per round and record the
/// order frames go out in.
#[test]
fn test_send_loop_shares_bandwidth_fairly() {
    let (map, _) = counting_map(10);
    for (id, frames) in [(1u64, 3usize), (2, 1), (3, 2)] {
        let stream = map.get_or_open_stream(StreamId::new(id)).unwrap().unwrap();
        stream.pending_frames.store(frames, Ordering::SeqCst);
    }

    let mut sent = Vec::new();
    for _ in 0..3 {
        let mut budget = 2;
        assert_ok!(map.round_robin_iterate(|stream| {
            if budget == 0 {
                return Ok(false);
            }
            if stream.send_frame() {
                sent.push(stream.stream_id().value());
                budget -= 1;
            }
            Ok(true)
        }));
        assert_ok!(map.garbage_collect(|stream| stream.pending_frames.load(Ordering::SeqCst) == 0));
    }

    // every stream gets a turn before any stream goes twice
    assert_eq!(sent, vec![1, 2, 3, 1, 3, 1]);
    assert_eq!(map.number_of_streams(), 0);
    assert_eq!(map.stats().closed_streams, 3);
}

#[test]
fn test_guard_iterate_then_remove() {
    let (map, _) = counting_map(10);
    for id in [4u64, 8, 12] {
        assert_ok!(map.get_or_open_stream(StreamId::new(id)));
    }

    let mut guard = map.lock();
    let mut finished = Vec::new();
    assert_ok!(guard.iterate(|stream| {
        if stream.stream_id().value() != 8 {
            finished.push(stream.stream_id());
        }
        Ok(true)
    }));
    for id in finished {
        assert_ok!(guard.remove_stream(id));
    }
    assert_eq!(guard.open_stream_ids(), &[StreamId::new(8)]);
    drop(guard);

    assert_eq!(map.number_of_streams(), 1);
}

#[test]
fn test_empty_registry() {
    let (map, _) = counting_map(10);

    assert_eq!(map.number_of_streams(), 0);
    assert_ok!(map.iterate(|_| Ok(true)));
    assert_ok!(map.round_robin_iterate(|_| Ok(true)));
    assert_eq!(
        map.stats(),
        StreamsMapStats {
            max_open_streams: 10,
            ..Default::default()
        }
    );
}
