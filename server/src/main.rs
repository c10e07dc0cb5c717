use clap::{Parser, Subcommand};
use log::{debug, error, info};
use server::config::{LandConfig, ReplayConfig};
use server::game::{self, ArenaState};
use server::land::{spawn_land, Land};
use server::network::Server;
use server::replay::ReplaySession;
use server::source::ActionSource;
use server::storage::JsonLinesStorage;
use server::utils::tick_interval;
use std::path::PathBuf;
use tokio::sync::watch;

// Command line arguments
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a live arena land behind the UDP server
    Serve {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "8080")]
        port: u16,
        /// Tick rate (ticks per second), 0 disables automatic ticking
        #[clap(short, long, default_value = "20")]
        tick_rate: u32,
        /// Recorded frames are flushed every this many ticks
        #[clap(short, long, default_value = "60")]
        flush_interval: u64,
        /// Identifier of the land, also used for the recording file name
        #[clap(long, default_value = "arena-1")]
        land_id: String,
        /// Recording file, defaults to `<land-id>.jsonl`
        #[clap(short, long)]
        recording: Option<PathBuf>,
        /// Maximum number of connected clients
        #[clap(short, long, default_value = "32")]
        max_clients: usize,
    },
    /// Replay a recording and verify its state hashes
    Replay {
        /// Recording file to replay
        path: PathBuf,
        /// Stop at the first hash mismatch
        #[clap(short, long)]
        strict: bool,
    },
}

/// Main-method of the application.
/// Parses command-line arguments, then either serves a live land or replays a recording.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    match Args::parse().command {
        Command::Serve {
            host,
            port,
            tick_rate,
            flush_interval,
            land_id,
            recording,
            max_clients,
        } => {
            let recording =
                recording.unwrap_or_else(|| PathBuf::from(format!("{}.jsonl", land_id)));
            let address = format!("{}:{}", host, port);
            serve(&address, land_id, tick_rate, flush_interval, recording, max_clients).await
        }
        Command::Replay { path, strict } => replay(path, strict).await,
    }
}

async fn serve(
    address: &str,
    land_id: String,
    tick_rate: u32,
    flush_interval: u64,
    recording: PathBuf,
    max_clients: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = Server::new(address, max_clients).await?;

    let mut config = LandConfig::new(land_id, game::LAND_TYPE).with_flush_interval(flush_interval);
    if let Some(interval) = tick_interval(tick_rate) {
        config = config.with_tick_interval(interval);
    }

    let storage = JsonLinesStorage::create(&recording)?;
    info!("Recording to {}", recording.display());

    let land = Land::live(
        config,
        ArenaState::new(),
        game::registry()?,
        Box::new(storage),
        Some(server.event_sink()),
    )?;
    let (handle, land_task) = spawn_land(land);

    let served = server.run(handle).await;

    match land_task.await {
        Ok(Ok(())) => info!("Land stopped"),
        Ok(Err(e)) => error!("Land stopped with error: {}", e),
        Err(e) => error!("Land task panicked: {}", e),
    }

    served
}

async fn replay(path: PathBuf, strict: bool) -> Result<(), Box<dyn std::error::Error>> {
    let source = ActionSource::load(&path)?;
    info!(
        "Replaying {} ({} frames)",
        path.display(),
        source.frame_count()
    );

    let session = ReplaySession::new(
        source,
        game::registry()?,
        ReplayConfig { strict },
        ArenaState::from_metadata,
    )?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("Received Ctrl+C, cancelling replay...");
            if cancel_tx.send(true).is_err() {
                debug!("Replay finished before it could be cancelled");
            }
        }
    });

    let summary = session.run(cancel_rx).await?;

    println!("Ticks replayed:        {}", summary.ticks_replayed);
    println!("Hash matches:          {}", summary.hash_matches);
    println!("Ticks without hash:    {}", summary.ticks_without_hash);
    println!("Hash mismatches:       {:?}", summary.mismatches);
    println!("Event mismatches:      {:?}", summary.server_event_mismatches);
    if summary.initial_state_mismatch {
        println!("Initial state hash did not match");
    }
    if summary.cancelled {
        println!("Replay was cancelled");
    }

    if summary.passed() {
        println!("Replay verified");
        Ok(())
    } else {
        Err("replay did not match the recording".into())
    }
}
