use thiserror::Error;

/// Failures encoding or decoding a datagram.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode packet: {0}")]
    Encode(#[source] bincode::Error),
    #[error("failed to decode packet: {0}")]
    Decode(#[source] bincode::Error),
    #[error("packet of {size} bytes exceeds the {max} byte datagram limit")]
    Oversize { size: usize, max: usize },
}

/// Rejected configuration values.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("tick rate must be between 1 and {max} Hz, got {value}")]
    TickRate { value: u32, max: u32 },
    #[error("movement parameter `{name}` must be finite and non-negative, got {value}")]
    Parameter { name: &'static str, value: f32 },
    #[error("avoidance cone must be within 0..=90 degrees, got {0}")]
    AvoidanceCone(f32),
}
