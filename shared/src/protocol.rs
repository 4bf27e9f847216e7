//! Wire messages exchanged between the race server and its clients
//!
//! Every frame on the wire holds exactly one [`Message`]. The enum
//! discriminant acts as the type tag and the variant fields as the payload,
//! so dispatch is an exhaustive `match` rather than string comparison.
//! Encoding uses bincode with varint integers, which keeps the many small
//! per-tick messages compact.

use crate::error::{ProtocolError, ValidationError};
use crate::{Vec3, MAX_CHAT_LEN, MAX_FRAME_SIZE, MAX_NAME_LEN};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned player identity, unique for the lifetime of a connection
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity derived from the server's monotonically increasing counter
    pub fn from_counter(counter: u64) -> Self {
        Self(format!("player_{}", counter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public projection of a player as carried in state snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: PlayerId,
    pub name: String,
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub lap: u32,
    pub checkpoint: u32,
}

/// Pose and race progress reported by the client's local physics model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleReport {
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub lap: u32,
    pub checkpoint: u32,
}

impl VehicleReport {
    /// Checks that the pose is finite and the progress counters are in range
    pub fn validate(&self, checkpoint_count: u32) -> Result<(), ValidationError> {
        let finite = [self.position, self.rotation, self.velocity]
            .iter()
            .flatten()
            .all(|component| component.is_finite());
        if !finite {
            return Err(ValidationError::NonFinitePose);
        }

        if self.lap < 1 {
            return Err(ValidationError::InvalidLap(self.lap));
        }

        if self.checkpoint >= checkpoint_count {
            return Err(ValidationError::CheckpointOutOfRange {
                checkpoint: self.checkpoint,
                checkpoint_count,
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub player_id: PlayerId,
    pub throttle: f32,
    pub steer: f32,
    pub brake: bool,
    pub handbrake: bool,
    pub boost: bool,
    pub timestamp: f64,
    pub report: Option<VehicleReport>,
}

impl PlayerInput {
    /// Checks the analog axes; identity and report checks need server context
    pub fn validate_axes(&self) -> Result<(), ValidationError> {
        for (field, value) in [("throttle", self.throttle), ("steer", self.steer)] {
            if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
                return Err(ValidationError::AxisOutOfRange { field, value });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub timestamp: f64,
    pub players: Vec<PlayerView>,
}

impl StateSnapshot {
    pub fn player(&self, id: &PlayerId) -> Option<&PlayerView> {
        self.players.iter().find(|p| &p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub name: String,
    pub text: String,
    pub timestamp: f64,
}

impl ChatMessage {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let len = self.text.chars().count();
        if self.text.trim().is_empty() {
            Err(ValidationError::EmptyChat)
        } else if len > MAX_CHAT_LEN {
            Err(ValidationError::ChatTooLong {
                len,
                max: MAX_CHAT_LEN,
            })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyPlayer {
    pub id: PlayerId,
    pub name: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LobbyState {
    pub players: Vec<LobbyPlayer>,
    pub track: String,
    pub ready_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standing {
    pub player_id: PlayerId,
    pub name: String,
    pub position: u32,
    pub laps: u32,
    pub best_lap: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceResults {
    pub standings: Vec<Standing>,
}

/// Every message that can travel between client and server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    // Client -> server
    Join { name: String, version: u32 },
    Input(PlayerInput),
    Ready { ready: bool },

    // Server -> client
    JoinResponse { player_id: PlayerId },
    StateSnapshot(StateSnapshot),
    LobbyState(LobbyState),
    Results(RaceResults),

    // Both directions
    Chat(ChatMessage),
}

/// Payload-free discriminant of [`Message`], used for logging and errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    Join,
    Input,
    Ready,
    JoinResponse,
    StateSnapshot,
    LobbyState,
    Results,
    Chat,
}

impl MessageTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageTag::Join => "join",
            MessageTag::Input => "input",
            MessageTag::Ready => "ready",
            MessageTag::JoinResponse => "join_response",
            MessageTag::StateSnapshot => "state",
            MessageTag::LobbyState => "lobby_state",
            MessageTag::Results => "results",
            MessageTag::Chat => "chat",
        }
    }
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Message {
    pub fn tag(&self) -> MessageTag {
        match self {
            Message::Join { .. } => MessageTag::Join,
            Message::Input(_) => MessageTag::Input,
            Message::Ready { .. } => MessageTag::Ready,
            Message::JoinResponse { .. } => MessageTag::JoinResponse,
            Message::StateSnapshot(_) => MessageTag::StateSnapshot,
            Message::LobbyState(_) => MessageTag::LobbyState,
            Message::Results(_) => MessageTag::Results,
            Message::Chat(_) => MessageTag::Chat,
        }
    }
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_varint_encoding()
        .with_little_endian()
        .with_limit(MAX_FRAME_SIZE as u64)
        .reject_trailing_bytes()
}

/// Encodes a message into a frame payload
pub fn encode(message: &Message) -> Result<Vec<u8>, ProtocolError> {
    wire_options()
        .serialize(message)
        .map_err(ProtocolError::Encode)
}

/// Decodes a frame payload, rejecting anything `encode` could not have produced
pub fn decode(bytes: &[u8]) -> Result<Message, ProtocolError> {
    wire_options()
        .deserialize(bytes)
        .map_err(ProtocolError::Malformed)
}

/// Normalizes a client-supplied display name
///
/// Names are trimmed and cut to [`MAX_NAME_LEN`] characters. Names are not
/// required to be unique; an empty name falls back to `Player`.
pub fn sanitize_name(name: &str) -> String {
    let trimmed: String = name.trim().chars().take(MAX_NAME_LEN).collect();
    let trimmed = trimmed.trim_end();
    if trimmed.is_empty() {
        "Player".to_string()
    } else {
        trimmed.to_string()
    }
}
