//! # Land Server Library
//!
//! This library provides the authoritative runtime for a land: a shared
//! simulation that many clients submit actions, client events and lifecycle
//! events to. Every submission is assigned a place in one deterministic
//! order, executed on a tick, and written to a recording that can later be
//! replayed and verified tick by tick.
//!
//! ## Core Responsibilities
//!
//! ### Deterministic Ordering
//! Each admitted submission carries a `(resolved_at_tick, sequence)` pair.
//! Ticks execute items in exactly that order, so a live run and a replay of
//! its recording apply the same handlers to the same state in the same order.
//!
//! ### Resolvers
//! Some actions need data from outside the simulation (a spawn point, a
//! database lookup) before they can run. Those submissions wait on resolver
//! tasks and enter the queue only once every resolver has finished. Their
//! outputs are recorded so that replay never calls a resolver again.
//!
//! ### Recording
//! Executed ticks become frames. Frames are buffered and flushed to storage
//! on a fixed tick interval by a background writer, keeping I/O off the
//! tick path.
//!
//! ### Replay
//! A replaying land takes its inputs only from the recording, recomputes
//! each tick's state hash, and compares it with the recorded one.
//!
//! ## Module Organization
//!
//! ### Land Module (`land`)
//! The land actor: submission admission, tick execution, live and replay
//! modes, and the [`land::LandHandle`] used to talk to a land on its own task.
//!
//! ### Ordering Modules (`sequence`, `pending`, `resolver`, `tick`)
//! Sequence allocation, the pending queue, resolver execution and the tick
//! processor that drains the queue into handlers.
//!
//! ### Recording Modules (`recorder`, `storage`, `source`, `verifier`, `replay`)
//! The buffered recorder and its storage backends, the recording reader used
//! by replay, hash verification and the replay driver.
//!
//! ### Network Module (`network`)
//! UDP transport that maps client packets onto land submissions and delivers
//! server events back to their targets, with `client_manager` tracking
//! connected sessions.
//!
//! ### Game Module (`game`)
//! The arena land: a small deterministic game used by the server binary.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::LandConfig;
//! use server::game::{self, ArenaState};
//! use server::land::{spawn_land, Land};
//! use server::network::Server;
//! use server::storage::JsonLinesStorage;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", 32).await?;
//!
//!     let config = LandConfig::new("arena-1", game::LAND_TYPE)
//!         .with_tick_interval(Duration::from_millis(50));
//!     let land = Land::live(
//!         config,
//!         ArenaState::new(),
//!         game::registry()?,
//!         Box::new(JsonLinesStorage::create("arena-1.jsonl")?),
//!         Some(server.event_sink()),
//!     )?;
//!     let (handle, _task) = spawn_land(land);
//!
//!     server.run(handle).await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod error;
pub mod game;
pub mod hash;
pub mod land;
pub mod network;
pub mod pending;
pub mod recorder;
pub mod registry;
pub mod replay;
pub mod resolver;
pub mod sequence;
pub mod source;
pub mod storage;
pub mod tick;
pub mod utils;
pub mod verifier;

pub use config::{LandConfig, ReplayConfig};
pub use error::LandError;
pub use land::{spawn_land, Land, LandHandle, LandMode};
pub use registry::{HandlerRegistry, LandState};
pub use replay::ReplaySession;
