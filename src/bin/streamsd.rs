use anyhow::Result;
use bytes::{Bytes, BytesMut};
use clap::{Parser, Subcommand};
use gquic_streams::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "streamsd")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open streams from a synthetic peer and drain them with the round-robin send loop
    Simulate {
        #[arg(short, long, default_value_t = 16)]
        streams: u64,

        #[arg(long, default_value_t = 4096)]
        bytes_per_stream: usize,

        #[arg(long, default_value_t = 1200)]
        packet_size: usize,

        #[arg(long, default_value_t = 512)]
        max_frame_size: usize,

        #[arg(long, default_value_t = 5)]
        tick_ms: u64,
    },

    /// Print the effective registry configuration
    Config,
}

/// Stream with a send buffer filled by the peer side of the simulation
#[derive(Debug)]
struct SyntheticStream {
    id: StreamId,
    pending: Mutex<BytesMut>,
    fin: AtomicBool,
}

impl SyntheticStream {
    fn new(id: StreamId) -> Self {
        Self {
            id,
            pending: Mutex::new(BytesMut::new()),
            fin: AtomicBool::new(false),
        }
    }

    fn write_all_and_finish(&self, data: &[u8]) {
        self.pending.lock().extend_from_slice(data);
        self.fin.store(true, Ordering::Release);
    }

    fn pop_frame(&self, max_len: usize) -> Option<Bytes> {
        let mut pending = self.pending.lock();
        if pending.is_empty() || max_len == 0 {
            return None;
        }
        let len = pending.len().min(max_len);
        Some(pending.split_to(len).freeze())
    }

    fn is_finished(&self) -> bool {
        self.fin.load(Ordering::Acquire) && self.pending.lock().is_empty()
    }
}

impl QuicStream for SyntheticStream {
    fn stream_id(&self) -> StreamId {
        self.id
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let log_level = match cli.log_level.as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    info!("streamsd v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = match &cli.config {
        Some(path) => StreamsConfig::load_from_file(path)?,
        None => StreamsConfig::load_from_env()?,
    };

    match cli.command {
        Commands::Simulate {
            streams,
            bytes_per_stream,
            packet_size,
            max_frame_size,
            tick_ms,
        } => {
            let tick = Duration::from_millis(tick_ms);
            run_simulation(config, streams, bytes_per_stream, packet_size, max_frame_size, tick).await?;
        }

        Commands::Config => {
            println!("{}", config.to_json()?);
            println!("max_open_streams = {}", config.max_open_streams());
        }
    }

    Ok(())
}

async fn run_simulation(
    config: StreamsConfig,
    streams: u64,
    bytes_per_stream: usize,
    packet_size: usize,
    max_frame_size: usize,
    tick: Duration,
) -> Result<()> {
    if packet_size == 0 || max_frame_size == 0 {
        anyhow::bail!("packet_size and max_frame_size must be greater than 0");
    }

    let map = Arc::new(StreamsMap::from_config(&config, |id| Ok(Arc::new(SyntheticStream::new(id))))?);
    info!("Registry allows {} open streams", map.max_open_streams());

    let peer = tokio::spawn(run_peer(map.clone(), streams, bytes_per_stream, tick));

    let mut interval = tokio::time::interval(tick);
    let mut packets = 0u64;
    loop {
        interval.tick().await;

        let mut budget = packet_size;
        let mut frames = Vec::new();
        map.round_robin_iterate(|stream| {
            if budget == 0 {
                // packet full; this stream goes first next time
                return Ok(false);
            }
            if let Some(frame) = stream.pop_frame(budget.min(max_frame_size)) {
                budget -= frame.len();
                frames.push((stream.stream_id(), frame.len()));
            }
            Ok(true)
        })?;

        if !frames.is_empty() {
            packets += 1;
            debug!("Packet {}: {:?}", packets, frames);
        }

        for id in map.garbage_collect(|stream| stream.is_finished())? {
            debug!("Stream {} fully sent", id);
        }

        if peer.is_finished() && map.number_of_streams() == 0 {
            break;
        }
    }

    peer.await?;
    info!("Sent {} packets", packets);
    println!("{}", serde_json::to_string_pretty(&map.stats())?);
    Ok(())
}

/// Client-initiated bidirectional streams, as a peer would open them
async fn run_peer(map: Arc<StreamsMap<SyntheticStream>>, streams: u64, bytes_per_stream: usize, tick: Duration) {
    for n in 0..streams {
        let id = StreamId::new(n * 4);
        match map.get_or_open_stream(id) {
            Ok(Some(stream)) => stream.write_all_and_finish(&vec![n as u8; bytes_per_stream]),
            Ok(None) => warn!("Peer sent data on closed stream {}", id),
            Err(err) => {
                warn!("Peer opened too many streams: {} ({:?})", err, err.recovery_action());
                return;
            }
        }
        tokio::time::sleep(tick / 2).await;
    }
}
