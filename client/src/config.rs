//! Client configuration from command-line arguments and environment

use clap::Parser;
use shared::{DEFAULT_HOST, DEFAULT_INTERPOLATION_DELAY, DEFAULT_PORT, DEFAULT_SEND_RATE};
use std::time::Duration;

/// Highest input rate the send task will run at
pub const MAX_SEND_RATE: u32 = 1000;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Headless race client", long_about = None)]
pub struct ClientConfig {
    /// Server address to connect to
    #[arg(short = 's', long, env = "RACENET_SERVER", default_value_t = default_server())]
    pub server: String,

    /// Display name announced on join
    #[arg(short = 'n', long, env = "RACENET_NAME", default_value = "Player")]
    pub name: String,

    /// Seconds to render remote cars behind the newest snapshot
    #[arg(long, env = "RACENET_INTERPOLATION_DELAY", default_value_t = DEFAULT_INTERPOLATION_DELAY)]
    pub interpolation_delay: f64,

    /// Input messages sent per second
    #[arg(
        long,
        env = "RACENET_SEND_RATE",
        default_value_t = DEFAULT_SEND_RATE,
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_SEND_RATE))
    )]
    pub send_rate: u32,

    /// Seconds to wait for the TCP connection
    #[arg(long, default_value_t = 5.0)]
    pub connect_timeout: f64,

    /// Seconds to wait for the join response
    #[arg(long, default_value_t = 5.0)]
    pub handshake_timeout: f64,
}

fn default_server() -> String {
    format!("{}:{}", DEFAULT_HOST, DEFAULT_PORT)
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            name: "Player".to_string(),
            interpolation_delay: DEFAULT_INTERPOLATION_DELAY,
            send_rate: DEFAULT_SEND_RATE,
            connect_timeout: 5.0,
            handshake_timeout: 5.0,
        }
    }
}

impl ClientConfig {
    /// Period of the send task, with the rate held to `1..=MAX_SEND_RATE`
    pub fn send_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.send_rate.clamp(1, MAX_SEND_RATE) as f64)
    }

    pub fn connect_timeout(&self) -> Duration {
        seconds(self.connect_timeout)
    }

    pub fn handshake_timeout(&self) -> Duration {
        seconds(self.handshake_timeout)
    }
}

/// Negative, NaN or overflowing values fall back to the 5 second default
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::from_secs(5))
}
