/// Link-layer error types.
///
/// Only invalid calls and construction failures are errors. A full send
/// window is reported as `Ok(0)`, and corrupt or lost frames never reach the
/// caller at all.

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("payload is empty")]
    EmptyPayload,

    #[error("payload too large: {len} bytes (max {max})")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("invalid packet: {0}")]
    InvalidPacket(#[from] WireError),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("transport frame size {frame_len} leaves no room for payload (header is {header_len} bytes)")]
    FrameTooSmall { frame_len: usize, header_len: usize },

    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("receive buffer too small: {len} bytes for a {needed}-byte payload")]
    BufferTooSmall { len: usize, needed: usize },

    #[error("link engine is shut down")]
    Closed,
}

/// Reasons a packet cannot be checksummed, encoded or accepted off the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("frame shorter than header ({0} bytes)")]
    TooShort(usize),

    #[error("frame of {len} bytes exceeds maximum {max}")]
    TooLong { len: usize, max: usize },

    #[error("declared data length {declared} exceeds maximum {max}")]
    DataLengthTooLarge { declared: usize, max: usize },

    #[error("declared data length {declared} but {actual} payload bytes present")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("checksum mismatch: header {expected:#06x}, computed {computed:#06x}")]
    ChecksumMismatch { expected: u32, computed: u32 },
}

pub type Result<T> = std::result::Result<T, LinkError>;
