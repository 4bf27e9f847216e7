//! # Race Server Library
//!
//! Authoritative server for the multiplayer racing session. It owns the
//! table of joined players, relays chat and lobby changes, and broadcasts
//! state snapshots at a fixed rate.
//!
//! ## Architecture
//!
//! Every TCP connection gets its own session task. A session performs the
//! `Join` handshake, then reads messages and applies them to its own row of
//! the shared [`player_table::PlayerTable`]. Outbound traffic goes through a
//! bounded queue per player, drained by a dedicated writer task, so a slow
//! peer never blocks a broadcast to the others.
//!
//! The game loop ([`game::run_game_loop`]) ticks at the configured rate and
//! sends a [`shared::StateSnapshot`] whenever a snapshot interval has passed.
//!
//! Vehicle poses are client-reported: the server validates each report and
//! stores it as-is.
//!
//! ## Modules
//!
//! - [`config`]: command-line and environment configuration
//! - [`player_table`]: player rows, id allocation and fan-out
//! - [`game`]: shared server state, message dispatch and the game loop
//! - [`network`]: listener, per-connection sessions and shutdown
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod game;
pub mod network;
pub mod player_table;
