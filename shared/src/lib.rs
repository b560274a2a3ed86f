//! Types and simulation shared by the client and the server.
//!
//! Everything that must produce identical results on both ends of the
//! connection lives here: the tick data model, the ring buffer that holds
//! tick history, the collision queries, the movement step and the wire
//! protocol.

pub mod config;
pub mod error;
pub mod math;
pub mod protocol;
pub mod ring_buffer;
pub mod simulator;
pub mod types;
pub mod world;

pub use config::{MovementConfig, TickConfig};
pub use error::{ConfigError, ProtocolError};
pub use math::{Quat, Vec2, Vec3};
pub use protocol::{decode, encode, Packet, MAX_PACKET_SIZE, PROTOCOL_VERSION};
pub use ring_buffer::RingBuffer;
pub use simulator::{MovementMode, MovementSimulator};
pub use types::{
    GameplayState, InputSample, RemoteEntity, StateOverride, StatePayload, Tick, Ticked,
    Transform,
};
pub use world::{Aabb, CollisionWorld, DynamicCollider, EntityView, RayHit, WorldQueries};

/// Slots in every per-entity tick history.
pub const BUFFER_SIZE: usize = 1024;

/// Height of an entity's collision capsule.
pub const ENTITY_HEIGHT: f32 = 1.8;

/// Entities below this height are respawned by the server.
pub const KILL_PLANE_Y: f32 = -20.0;
