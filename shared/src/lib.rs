//! Types and constants shared by the race server and client
//!
//! - [`protocol`]: the closed set of wire messages and their binary encoding
//! - [`codec`]: length-prefixed framing of encoded messages over a stream
//! - [`error`]: the error taxonomy used on both ends of a connection

pub mod codec;
pub mod error;
pub mod protocol;

pub use error::{HandshakeError, NetError, ProtocolError, ValidationError};
pub use protocol::{
    decode, encode, ChatMessage, LobbyPlayer, LobbyState, Message, MessageTag, PlayerId,
    PlayerInput, PlayerView, RaceResults, Standing, StateSnapshot, VehicleReport,
};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const PROTOCOL_VERSION: u32 = 1;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 7777;
pub const DEFAULT_TICK_RATE: u32 = 60;
pub const DEFAULT_SNAPSHOT_RATE: u32 = 20;
pub const DEFAULT_SEND_RATE: u32 = 30;
pub const DEFAULT_MAX_PLAYERS: usize = 8;
pub const DEFAULT_TRACK: &str = "Default Track";
pub const DEFAULT_CHECKPOINT_COUNT: u32 = 8;

/// Seconds the client renders behind the newest snapshot
pub const DEFAULT_INTERPOLATION_DELAY: f64 = 0.1;
pub const SNAPSHOT_BUFFER_CAPACITY: usize = 30;
pub const INPUT_HISTORY_CAPACITY: usize = 60;

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const MAX_FRAME_SIZE: usize = 64 * 1024;
pub const MAX_NAME_LEN: usize = 32;
pub const MAX_CHAT_LEN: usize = 256;

pub const SPAWN_POSITION: Vec3 = [0.0, 1.0, 0.0];

pub type Vec3 = [f32; 3];

/// Component-wise linear interpolation: `a + (b - a) * t`
pub fn lerp3(a: &Vec3, b: &Vec3, t: f32) -> Vec3 {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Wall-clock seconds since the UNIX epoch, used for all message timestamps
pub fn timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs_f64()
}
