//! Server configuration from command-line arguments and environment

use clap::Parser;
use shared::{
    DEFAULT_CHECKPOINT_COUNT, DEFAULT_HOST, DEFAULT_MAX_PLAYERS, DEFAULT_PORT,
    DEFAULT_SNAPSHOT_RATE, DEFAULT_TICK_RATE, DEFAULT_TRACK, HANDSHAKE_TIMEOUT,
};
use std::time::Duration;
use thiserror::Error;

/// Highest accepted tick rate; a 1 ms tick is the finest the loop supports
pub const MAX_TICK_RATE: u32 = 1000;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Authoritative race server", long_about = None)]
pub struct ServerConfig {
    /// Server IP address to bind to
    #[arg(short = 'H', long, env = "RACENET_HOST", default_value = DEFAULT_HOST)]
    pub host: String,

    /// Server port to listen on
    #[arg(short, long, env = "RACENET_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Game loop ticks per second
    #[arg(short, long, env = "RACENET_TICK_RATE", default_value_t = DEFAULT_TICK_RATE)]
    pub tick_rate: u32,

    /// State snapshots broadcast per second (must not exceed the tick rate)
    #[arg(short, long, env = "RACENET_SNAPSHOT_RATE", default_value_t = DEFAULT_SNAPSHOT_RATE)]
    pub snapshot_rate: u32,

    /// Maximum number of joined players
    #[arg(short, long, env = "RACENET_MAX_PLAYERS", default_value_t = DEFAULT_MAX_PLAYERS)]
    pub max_players: usize,

    /// Track name announced in the lobby
    #[arg(long, env = "RACENET_TRACK", default_value = DEFAULT_TRACK)]
    pub track: String,

    /// Number of checkpoints on the track
    #[arg(long = "checkpoints", env = "RACENET_CHECKPOINTS", default_value_t = DEFAULT_CHECKPOINT_COUNT)]
    pub checkpoint_count: u32,

    /// Seconds a new connection has to send its Join
    #[arg(long, env = "RACENET_HANDSHAKE_TIMEOUT", default_value_t = HANDSHAKE_TIMEOUT.as_secs_f64())]
    pub handshake_timeout: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("tick rate must be positive")]
    ZeroTickRate,

    #[error("tick rate {tick_rate} exceeds the maximum of {max}")]
    TickRateTooHigh { tick_rate: u32, max: u32 },

    #[error("snapshot rate must be positive")]
    ZeroSnapshotRate,

    #[error("snapshot rate {snapshot_rate} exceeds tick rate {tick_rate}")]
    SnapshotFasterThanTick { snapshot_rate: u32, tick_rate: u32 },

    #[error("max players must be at least 1")]
    NoPlayerSlots,

    #[error("a track needs at least one checkpoint")]
    NoCheckpoints,

    #[error("handshake timeout must be a positive number of seconds, got {0}")]
    InvalidHandshakeTimeout(f64),
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tick_rate: DEFAULT_TICK_RATE,
            snapshot_rate: DEFAULT_SNAPSHOT_RATE,
            max_players: DEFAULT_MAX_PLAYERS,
            track: DEFAULT_TRACK.to_string(),
            checkpoint_count: DEFAULT_CHECKPOINT_COUNT,
            handshake_timeout: HANDSHAKE_TIMEOUT.as_secs_f64(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 {
            return Err(ConfigError::ZeroTickRate);
        }
        if self.tick_rate > MAX_TICK_RATE {
            return Err(ConfigError::TickRateTooHigh {
                tick_rate: self.tick_rate,
                max: MAX_TICK_RATE,
            });
        }
        if self.snapshot_rate == 0 {
            return Err(ConfigError::ZeroSnapshotRate);
        }
        if self.snapshot_rate > self.tick_rate {
            return Err(ConfigError::SnapshotFasterThanTick {
                snapshot_rate: self.snapshot_rate,
                tick_rate: self.tick_rate,
            });
        }
        if self.max_players == 0 {
            return Err(ConfigError::NoPlayerSlots);
        }
        if self.checkpoint_count == 0 {
            return Err(ConfigError::NoCheckpoints);
        }
        if !(self.handshake_timeout.is_finite() && self.handshake_timeout > 0.0) {
            return Err(ConfigError::InvalidHandshakeTimeout(self.handshake_timeout));
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate.clamp(1, MAX_TICK_RATE) as f64)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.snapshot_rate.clamp(1, MAX_TICK_RATE) as f64)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.handshake_timeout).unwrap_or(HANDSHAKE_TIMEOUT)
    }
}
