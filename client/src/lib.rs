//! # Movement Client Library
//!
//! The predicting side of the movement netcode. The client simulates its own
//! entity immediately with the same deterministic step the server uses, so
//! movement responds without waiting a round trip, and quietly repairs its
//! history whenever the server disagrees.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Every local tick the client samples an input, stamps it with the next
//! tick number, simulates it and sends it to the server. Inputs and the
//! states they produced are kept in tick-indexed ring buffers.
//!
//! ### Server Reconciliation
//! Authoritative snapshots are cached as they arrive and handled at the next
//! tick boundary. A snapshot that matches the prediction for its tick is
//! dropped. One that does not is written into the history, and every
//! buffered input after it is replayed to rebuild the present. When the
//! history cannot help (the snapshot is too old, or ahead of the local
//! timeline) the client snaps to the server state and restarts its timeline.
//!
//! ### Overrides
//! Server-forced teleports are applied as soon as they arrive and always
//! acknowledged, so retransmitted duplicates are harmless.
//!
//! ## Module Organization
//!
//! - `prediction`: the predictor, its reconcile outcomes and statistics
//! - `game`: the local entity plus replicated remote entities used as
//!   collision obstacles
//! - `input`: scripted input sources and the tick-stamping sampler
//! - `latency`: artificial delay for testing on a local link
//! - `network`: the UDP client loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::input::InputPattern;
//! use client::network::{Client, ClientConfig};
//! use shared::TickConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut client = Client::new(ClientConfig {
//!         server: "127.0.0.1:8080".to_string(),
//!         fake_ping_ms: 100,
//!         tick: TickConfig::default(),
//!         pattern: InputPattern::Circle,
//!         seed: 1,
//!         run_for: None,
//!     })
//!     .await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod game;
pub mod input;
pub mod latency;
pub mod network;
pub mod prediction;
