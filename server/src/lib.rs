//! # Movement Server Library
//!
//! The authoritative side of the movement netcode. The server owns the
//! canonical timeline of every client-controlled entity, replays client
//! inputs through the same deterministic simulator the clients predict with,
//! and sends the results back so clients can reconcile.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Each entity has an [`authority::EntityAuthority`]. Inputs received between
//! ticks are queued, then replayed in tick order at the next tick. Ticks whose
//! input never arrived are simulated with an idle input, so a lossy link never
//! stalls the entity. The state of the highest tick processed is published as
//! the entity's snapshot.
//!
//! ### Forced Corrections
//! Gameplay can teleport an entity (the kill plane respawn does). The
//! correction is sent as an override every tick until the client
//! acknowledges it.
//!
//! ### Client Management
//! Connection establishment, capacity limits, disconnects and timeouts. Each
//! client controls exactly one entity with the same id.
//!
//! ## Tick Pipeline
//!
//! 1. Packets received since the last tick are handled: inputs queued, acks
//!    applied, connections opened or closed.
//! 2. Dynamic colliders are rebuilt from where every entity stands.
//! 3. Every entity drains its queue and simulates.
//! 4. Entities below the kill plane are forced back to a spawn point.
//! 5. Each client receives its own snapshot and pending override; everyone
//!    receives the world state.
//!
//! The simulator always steps with the fixed `dt` of the configured tick
//! rate. Late timer ticks run back to back instead of being skipped.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut server = Server::new("127.0.0.1:8080", ServerConfig::default()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod authority;
pub mod client_manager;
pub mod game;
pub mod network;
