//! Wire protocol between client and server.
//!
//! Every datagram carries exactly one bincode-encoded [`Packet`].

use crate::config::MovementConfig;
use crate::error::ProtocolError;
use crate::types::{GameplayState, InputSample, RemoteEntity, StateOverride, StatePayload, Tick};
use serde::{Deserialize, Serialize};

/// Receive buffer size on both ends. Larger packets are refused at encode.
pub const MAX_PACKET_SIZE: usize = 2048;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Client to server
    Connect {
        client_version: u32,
    },
    /// One per client tick; may arrive late, twice or never.
    Input {
        sample: InputSample,
    },
    /// Sent for every override received, duplicates included.
    OverrideAck {
        override_id: u32,
    },
    Disconnect,

    // Server to client
    Connected {
        client_id: u32,
        tick_rate: u32,
        movement: MovementConfig,
        spawn: StatePayload,
    },
    /// Latest authoritative state of the receiving client's own entity.
    Snapshot {
        state: StatePayload,
        gameplay: GameplayState,
    },
    /// Everyone's entity, used as collision obstacles by clients.
    WorldState {
        server_tick: Tick,
        entities: Vec<RemoteEntity>,
    },
    /// Forced correction, resent every tick until acknowledged.
    Override {
        correction: StateOverride,
    },
    Disconnected {
        reason: String,
    },
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, ProtocolError> {
    let data = bincode::serialize(packet).map_err(ProtocolError::Encode)?;
    if data.len() > MAX_PACKET_SIZE {
        return Err(ProtocolError::Oversize {
            size: data.len(),
            max: MAX_PACKET_SIZE,
        });
    }
    Ok(data)
}

pub fn decode(data: &[u8]) -> Result<Packet, ProtocolError> {
    bincode::deserialize(data).map_err(ProtocolError::Decode)
}
