//! # Peer Session Library
//!
//! Everything one process needs to take part in a two-player session: play
//! alone, host a session for one joining player, or join someone else's.
//!
//! ## Roles
//!
//! ### Single-player (`Role::None`)
//! The local world is authoritative and there is no transport. Enemies spawn,
//! think and fight locally.
//!
//! ### Host
//! Also authoritative. Accepts exactly one Client over TCP, assigns it player
//! id 1, simulates its player from the intent it reports, and publishes a full
//! snapshot of both players and every living enemy at a fixed interval.
//!
//! ### Client
//! Non-authoritative. Moves its own player locally, reports position, facing
//! and attack state to the Host, and mirrors everything else from the Host's
//! snapshots. Enemies missing from a snapshot are removed.
//!
//! ## Module Organization
//!
//! ### Simulation (`world`, `player`, `enemy`, `projectile`, `combat`, `map`)
//! The entity store, per-kind enemy behavior, player movement and attacks,
//! projectiles, and the authoritative hit resolution that runs after each
//! world update. Walkability is supplied from outside through
//! [`map::Passability`].
//!
//! ### Networking (`transport`, `session`)
//! Length-prefixed frames over TCP with one reader and one writer task per
//! connection. The [`session::Session`] coordinator owns the role state
//! machine and applies inbound messages to the world.
//!
//! ### Driving (`game_loop`, `config`, `persistence`)
//! The fixed-rate tick driver, the tunables, and a serializable snapshot for
//! saving and restoring a game.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use peer::{GameLoop, OpenArena, Session, SessionConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SessionConfig::default();
//!     let map = Arc::new(OpenArena::new(config.world_width, config.world_height));
//!     let (session, mut events) = Session::new(config, map);
//!
//!     let addr = session.start_host(5555).await?;
//!     println!("Hosting on {}", addr);
//!
//!     GameLoop::new(session.clone(), 60).spawn();
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod combat;
pub mod config;
pub mod enemy;
pub mod error;
pub mod game_loop;
pub mod map;
pub mod persistence;
pub mod player;
pub mod projectile;
pub mod session;
pub mod transport;
pub mod world;

pub use config::SessionConfig;
pub use error::{ConnectionError, FrameError};
pub use game_loop::GameLoop;
pub use map::{OpenArena, Passability, TileGrid};
pub use persistence::SaveState;
pub use player::MovementIntent;
pub use session::{Session, SessionEvent};
pub use world::World;

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
