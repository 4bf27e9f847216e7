//! # Race Client Library
//!
//! Client side of the multiplayer racing session: one connection to the
//! server, periodic input transmission, and smooth reconstruction of the
//! other players' cars from irregularly timed snapshots.
//!
//! ## Architecture Overview
//!
//! ### Client-Reported Pose
//! The local car is simulated by the game's own physics model. The client
//! sends its controls together with the resulting pose, and the server
//! relays that pose to everyone else in its snapshots.
//!
//! ### Snapshot Interpolation
//! Remote cars are rendered a fixed delay behind the newest snapshot. The
//! [`sync::StateSynchronizer`] finds the two snapshots around that instant
//! and blends them, hiding network jitter.
//!
//! ### Prediction Hooks
//! [`prediction::ClientPrediction`] keeps a bounded history of sent inputs
//! and the latest authoritative view of the local player. Reconciliation is
//! currently a no-op.
//!
//! ## Module Organization
//!
//! - [`config`]: command-line and environment configuration
//! - [`network`]: connection, handshake, background send and receive tasks
//! - [`sync`]: snapshot buffer and interpolation
//! - [`prediction`]: input history and reconciliation hook
//! - [`world`]: traits connecting the client to the physics model and scene
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::network::NetworkClient;
//! use client::world::{Controls, LocalState};
//!
//! # async fn run() -> Result<(), shared::NetError> {
//! let mut client = NetworkClient::connect(ClientConfig::default()).await?;
//!
//! client.set_local_state(LocalState {
//!     controls: Controls { throttle: 1.0, ..Controls::default() },
//!     report: None,
//! });
//! client.send_chat("gl hf")?;
//!
//! for car in client.remote_players().await {
//!     println!("{} at {:?}", car.name, car.position);
//! }
//!
//! client.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod network;
pub mod prediction;
pub mod sync;
pub mod world;
