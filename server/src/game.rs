//! Authoritative server state, message dispatch and the fixed-rate game loop

use crate::config::ServerConfig;
use crate::player_table::{Frame, Outbound, Player, PlayerTable};
use log::{debug, error, info, warn};
use shared::{
    protocol, ChatMessage, HandshakeError, LobbyState, Message, PlayerId, PlayerInput,
    StateSnapshot, ValidationError,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// State shared by every connection task and the game loop
pub struct ServerState {
    config: ServerConfig,
    players: RwLock<PlayerTable>,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        let players = RwLock::new(PlayerTable::new(config.max_players));
        Self { config, players }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub async fn player_count(&self) -> usize {
        self.players.read().await.len()
    }

    pub async fn player_ids(&self) -> Vec<PlayerId> {
        self.players.read().await.ids()
    }

    /// Binds a new player to a connection's outbound queue
    ///
    /// The `JoinResponse` is queued before the row becomes visible to
    /// broadcasts, so it is always the first frame the client receives.
    pub async fn join(
        &self,
        name: &str,
        addr: SocketAddr,
        outbound: Outbound,
    ) -> Result<PlayerId, HandshakeError> {
        let player_id = {
            let mut players = self.players.write().await;
            let player_id = players.next_id().ok_or(HandshakeError::ServerFull {
                max_players: players.max_players(),
            })?;

            let response = Message::JoinResponse {
                player_id: player_id.clone(),
            };
            let frame = protocol::encode(&response).map(Frame::from).map_err(|e| {
                error!("Failed to encode join response: {}", e);
                HandshakeError::Closed
            })?;
            outbound.try_send(frame).map_err(|_| HandshakeError::Closed)?;

            let name = protocol::sanitize_name(name);
            players.insert(Player::new(player_id.clone(), name, addr, outbound));
            player_id
        };

        self.broadcast_lobby().await;
        Ok(player_id)
    }

    /// Removes a player after their connection ended
    pub async fn leave(&self, player_id: &PlayerId) {
        let removed = self.players.write().await.remove_player(player_id);
        if removed {
            self.broadcast_lobby().await;
        }
    }

    /// Drops every player, which ends each session and closes its socket
    pub async fn disconnect_all(&self) {
        let count = self.players.write().await.clear();
        if count > 0 {
            info!("Disconnected {} players", count);
        }
    }

    /// Dispatches one message from a bound connection
    ///
    /// Errors describe a dropped message; they never end the connection.
    pub async fn handle_message(
        &self,
        player_id: &PlayerId,
        message: Message,
    ) -> Result<(), ValidationError> {
        match message {
            Message::Input(input) => {
                self.validate_input(player_id, &input)?;
                self.players.write().await.apply_input(player_id, input);
            }

            Message::Chat(chat) => {
                chat.validate()?;
                let name = match self.players.read().await.get(player_id) {
                    Some(player) => player.name.clone(),
                    None => return Ok(()),
                };
                let relayed = Message::Chat(ChatMessage { name, ..chat });
                self.broadcast(&relayed).await;
            }

            Message::Ready { ready } => {
                let changed = self.players.write().await.set_ready(player_id, ready);
                if changed {
                    debug!("Player {} ready: {}", player_id, ready);
                    self.broadcast_lobby().await;
                }
            }

            Message::Join { .. } => {
                warn!("Ignoring repeated join from bound player {}", player_id);
            }

            Message::JoinResponse { .. }
            | Message::StateSnapshot(_)
            | Message::LobbyState(_)
            | Message::Results(_) => {
                debug!(
                    "Ignoring server-bound {} from player {}",
                    message.tag(),
                    player_id
                );
            }
        }

        Ok(())
    }

    fn validate_input(&self, player_id: &PlayerId, input: &PlayerInput) -> Result<(), ValidationError> {
        if &input.player_id != player_id {
            return Err(ValidationError::PlayerMismatch {
                claimed: input.player_id.to_string(),
                bound: player_id.to_string(),
            });
        }

        input.validate_axes()?;

        if let Some(report) = &input.report {
            report.validate(self.config.checkpoint_count)?;
        }

        Ok(())
    }

    pub async fn snapshot(&self) -> StateSnapshot {
        let players = self.players.read().await.views();
        StateSnapshot {
            timestamp: shared::timestamp(),
            players,
        }
    }

    pub async fn lobby_state(&self) -> LobbyState {
        let players = self.players.read().await;
        LobbyState {
            players: players.lobby_players(),
            track: self.config.track.clone(),
            ready_count: players.ready_count(),
        }
    }

    /// Sends a message to every joined player
    ///
    /// Players whose queue rejected the frame are removed, and the remaining
    /// players are told about the new lobby.
    pub async fn broadcast(&self, message: &Message) {
        let removed = self.fan_out(message).await;
        if !removed.is_empty() {
            let lobby = Message::LobbyState(self.lobby_state().await);
            self.fan_out(&lobby).await;
        }
    }

    async fn broadcast_lobby(&self) {
        let lobby = Message::LobbyState(self.lobby_state().await);
        self.broadcast(&lobby).await;
    }

    async fn fan_out(&self, message: &Message) -> Vec<PlayerId> {
        let frame: Frame = match protocol::encode(message) {
            Ok(bytes) => Frame::from(bytes),
            Err(e) => {
                error!("Failed to encode {} broadcast: {}", message.tag(), e);
                return Vec::new();
            }
        };

        let failed = self.players.read().await.broadcast(&frame);
        if failed.is_empty() {
            return failed;
        }

        let mut players = self.players.write().await;
        for player_id in &failed {
            warn!(
                "Dropping player {}: outbound queue closed or full during {} broadcast",
                player_id,
                message.tag()
            );
            players.remove_player(player_id);
        }
        failed
    }
}

/// Runs the fixed-rate loop until the task is cancelled
///
/// Every tick checks the time since the last snapshot and broadcasts a new
/// one once a full snapshot interval has passed.
pub async fn run_game_loop(state: Arc<ServerState>) {
    let tick_interval = state.config().tick_interval();
    let snapshot_interval = state.config().snapshot_interval();
    let stats_every = u64::from(state.config().tick_rate.max(1)) * 5;

    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Game loop running at {} Hz, snapshots at {} Hz",
        state.config().tick_rate,
        state.config().snapshot_rate
    );

    let mut tick: u64 = 0;
    let mut last_tick = Instant::now();
    let mut last_snapshot = Instant::now();

    loop {
        ticker.tick().await;
        tick += 1;

        let now = Instant::now();
        let dt = now.duration_since(last_tick).as_secs_f32();
        last_tick = now;

        if now.duration_since(last_snapshot) >= snapshot_interval {
            last_snapshot = now;
            let snapshot = state.snapshot().await;
            if !snapshot.players.is_empty() {
                state.broadcast(&Message::StateSnapshot(snapshot)).await;
            }
        }

        if tick % stats_every == 0 {
            let players = state.player_count().await;
            if players > 0 && dt > 0.0 {
                debug!("Tick {}: {} players, {:.1}Hz", tick, players, 1.0 / dt);
            }
        }
    }
}
