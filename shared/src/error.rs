//! Error taxonomy shared by the server and the client
//!
//! Errors are split by how far they propagate:
//! - [`ProtocolError`]: one frame or message could not be encoded/decoded.
//!   The message is dropped, the connection stays open (except for framing
//!   errors, which leave the stream unusable).
//! - [`HandshakeError`]: the join exchange failed; the connection attempt ends.
//! - [`ValidationError`]: a well-formed message carried values the receiver
//!   refuses. The message is dropped without any state change.
//! - Transport errors are plain `std::io::Error`s and end the connection.

use crate::protocol::MessageTag;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Bytes that are not a valid encoded message: unknown tag, truncated
    /// payload, trailing garbage, bad UTF-8 and so on.
    #[error("malformed message: {0}")]
    Malformed(#[source] bincode::Error),

    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("frame length {len} exceeds maximum of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("expected {expected} but received {received}")]
    UnexpectedMessage {
        expected: MessageTag,
        received: MessageTag,
    },

    #[error("protocol version mismatch (local {local}, remote {remote})")]
    VersionMismatch { local: u32, remote: u32 },

    #[error("server is full ({max_players} players)")]
    ServerFull { max_players: usize },

    #[error("handshake timed out")]
    Timeout,

    #[error("connection closed during handshake")]
    Closed,
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("input addressed to {claimed} on connection bound to {bound}")]
    PlayerMismatch { claimed: String, bound: String },

    #[error("{field} must be finite and within [-1, 1], got {value}")]
    AxisOutOfRange { field: &'static str, value: f32 },

    #[error("vehicle report contains a non-finite component")]
    NonFinitePose,

    #[error("lap must be at least 1, got {0}")]
    InvalidLap(u32),

    #[error("checkpoint {checkpoint} out of range for {checkpoint_count} checkpoints")]
    CheckpointOutOfRange {
        checkpoint: u32,
        checkpoint_count: u32,
    },

    #[error("chat text is empty")]
    EmptyChat,

    #[error("chat text is {len} characters, limit is {max}")]
    ChatTooLong { len: usize, max: usize },
}

/// Umbrella error for anything that can go wrong on a connection
#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

impl NetError {
    /// True when the error leaves the connection unusable
    pub fn is_fatal(&self) -> bool {
        match self {
            NetError::Protocol(ProtocolError::FrameTooLarge { .. }) => true,
            NetError::Protocol(_) | NetError::Validation(_) => false,
            NetError::Handshake(_) | NetError::Transport(_) => true,
        }
    }
}
