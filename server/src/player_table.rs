//! Authoritative table of joined players
//!
//! This module owns the server's only shared mutable state:
//! - Player identity allocation (monotonic counter, ids are never reused)
//! - Per-player pose, race progress, ready flag and last received input
//! - The outbound queue of each player's connection, used for fan-out
//!
//! Removing a row also tells its session to close the connection, so a peer
//! dropped during fan-out does not keep a socket open.
//!
//! Each connection task writes only its own row; the game loop only reads.

use log::info;
use shared::{
    LobbyPlayer, PlayerId, PlayerInput, PlayerView, Vec3, SPAWN_POSITION,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};

/// One encoded message, shared between all recipients of a broadcast
pub type Frame = Arc<[u8]>;

/// A connection's handle inside its player row
///
/// Dropping it closes the frame queue and resolves the eviction receiver
/// held by the session.
#[derive(Debug)]
pub struct Outbound {
    frames: mpsc::Sender<Frame>,
    _evicted: oneshot::Sender<()>,
}

impl Outbound {
    /// Wraps a frame queue; the receiver resolves once the handle is dropped
    pub fn new(frames: mpsc::Sender<Frame>) -> (Self, oneshot::Receiver<()>) {
        let (evicted_tx, evicted_rx) = oneshot::channel();
        let outbound = Self {
            frames,
            _evicted: evicted_tx,
        };
        (outbound, evicted_rx)
    }

    pub fn try_send(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        self.frames.try_send(frame)
    }
}

/// Server-side player state
///
/// Holds everything the server knows about a joined player, including
/// connection details that never leave the server. Use [`Player::view`] for
/// the public projection sent to clients.
#[derive(Debug)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub addr: SocketAddr,
    pub position: Vec3,
    pub rotation: Vec3,
    pub velocity: Vec3,
    pub ready: bool,
    pub lap: u32,
    pub checkpoint: u32,
    /// Most recent controls received from this player's client
    pub last_input: Option<PlayerInput>,
    outbound: Outbound,
}

impl Player {
    /// Creates a player at the spawn point on lap 1, checkpoint 0
    pub fn new(id: PlayerId, name: String, addr: SocketAddr, outbound: Outbound) -> Self {
        Self {
            id,
            name,
            addr,
            position: SPAWN_POSITION,
            rotation: [0.0; 3],
            velocity: [0.0; 3],
            ready: false,
            lap: 1,
            checkpoint: 0,
            last_input: None,
            outbound,
        }
    }

    pub fn view(&self) -> PlayerView {
        PlayerView {
            id: self.id.clone(),
            name: self.name.clone(),
            position: self.position,
            rotation: self.rotation,
            velocity: self.velocity,
            lap: self.lap,
            checkpoint: self.checkpoint,
        }
    }

    pub fn lobby_entry(&self) -> LobbyPlayer {
        LobbyPlayer {
            id: self.id.clone(),
            name: self.name.clone(),
            ready: self.ready,
        }
    }

    /// Stores the input and adopts the vehicle report it carries, if any
    ///
    /// The input must already be validated; positions are taken as reported.
    pub fn apply_input(&mut self, input: PlayerInput) {
        if let Some(report) = &input.report {
            self.position = report.position;
            self.rotation = report.rotation;
            self.velocity = report.velocity;
            self.lap = report.lap;
            self.checkpoint = report.checkpoint;
        }
        self.last_input = Some(input);
    }
}

/// All joined players, keyed by id
///
/// Iteration order is the id order of the map, which keeps snapshot and
/// lobby listings stable between broadcasts.
pub struct PlayerTable {
    players: BTreeMap<PlayerId, Player>,
    /// Counter behind the next `player_<n>` id
    next_player_id: u64,
    max_players: usize,
}

impl PlayerTable {
    pub fn new(max_players: usize) -> Self {
        Self {
            players: BTreeMap::new(),
            next_player_id: 0,
            max_players,
        }
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Allocates a fresh id, or `None` when the table is full
    ///
    /// The counter only moves forward, so an id is never handed out twice
    /// even after its player left.
    pub fn next_id(&mut self) -> Option<PlayerId> {
        if self.players.len() >= self.max_players {
            return None;
        }

        let id = PlayerId::from_counter(self.next_player_id);
        self.next_player_id += 1;
        Some(id)
    }

    pub fn insert(&mut self, player: Player) {
        info!(
            "Player {} ({}) joined from {}",
            player.id, player.name, player.addr
        );
        self.players.insert(player.id.clone(), player);
    }

    /// Removes a player; returns false if they were already gone
    ///
    /// Dropping the row signals the player's session to close its connection.
    pub fn remove_player(&mut self, id: &PlayerId) -> bool {
        if let Some(player) = self.players.remove(id) {
            info!("Player {} ({}) removed", player.id, player.name);
            true
        } else {
            false
        }
    }

    /// Removes every player, closing all outbound queues and sessions
    pub fn clear(&mut self) -> usize {
        let count = self.players.len();
        self.players.clear();
        count
    }

    pub fn get(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn contains(&self, id: &PlayerId) -> bool {
        self.players.contains_key(id)
    }

    pub fn apply_input(&mut self, id: &PlayerId, input: PlayerInput) -> bool {
        if let Some(player) = self.players.get_mut(id) {
            player.apply_input(input);
            true
        } else {
            false
        }
    }

    pub fn set_ready(&mut self, id: &PlayerId, ready: bool) -> bool {
        if let Some(player) = self.players.get_mut(id) {
            player.ready = ready;
            true
        } else {
            false
        }
    }

    pub fn views(&self) -> Vec<PlayerView> {
        self.players.values().map(Player::view).collect()
    }

    pub fn lobby_players(&self) -> Vec<LobbyPlayer> {
        self.players.values().map(Player::lobby_entry).collect()
    }

    pub fn ready_count(&self) -> u32 {
        self.players.values().filter(|p| p.ready).count() as u32
    }

    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.keys().cloned().collect()
    }

    /// Queues a frame for every player without waiting on any of them
    ///
    /// Returns the ids whose queue was closed or full. Those players missed
    /// this frame; the others received it regardless.
    pub fn broadcast(&self, frame: &Frame) -> Vec<PlayerId> {
        self.players
            .values()
            .filter(|player| player.outbound.try_send(Arc::clone(frame)).is_err())
            .map(|player| player.id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::VehicleReport;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:7777".parse().unwrap()
    }

    fn link(tx: mpsc::Sender<Frame>) -> Outbound {
        Outbound::new(tx).0
    }

    fn join(table: &mut PlayerTable, name: &str) -> (PlayerId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(4);
        let id = table.next_id().unwrap();
        table.insert(Player::new(id.clone(), name.to_string(), test_addr(), link(tx)));
        (id, rx)
    }

    fn input_with_report(id: &PlayerId, x: f32) -> PlayerInput {
        PlayerInput {
            player_id: id.clone(),
            throttle: 1.0,
            steer: 0.0,
            brake: false,
            handbrake: false,
            boost: false,
            timestamp: 10.0,
            report: Some(VehicleReport {
                position: [x, 1.0, 0.0],
                rotation: [0.0, 30.0, 0.0],
                velocity: [5.0, 0.0, 0.0],
                lap: 2,
                checkpoint: 3,
            }),
        }
    }

    #[test]
    fn test_player_creation_defaults() {
        let (tx, _rx) = mpsc::channel(1);
        let player = Player::new(PlayerId::new("player_0"), "Alice".to_string(), test_addr(), link(tx));

        assert_eq!(player.position, SPAWN_POSITION);
        assert_eq!(player.lap, 1);
        assert_eq!(player.checkpoint, 0);
        assert!(!player.ready);
        assert!(player.last_input.is_none());
    }

    #[test]
    fn test_ids_are_monotonic_and_never_reused() {
        let mut table = PlayerTable::new(4);
        let (first, _rx1) = join(&mut table, "Alice");
        let (second, _rx2) = join(&mut table, "Bob");
        assert_eq!(first.as_str(), "player_0");
        assert_eq!(second.as_str(), "player_1");

        assert!(table.remove_player(&first));
        let (third, _rx3) = join(&mut table, "Carol");
        assert_eq!(third.as_str(), "player_2");
        assert_ne!(third, first);
    }

    #[test]
    fn test_capacity_limit() {
        let mut table = PlayerTable::new(1);
        let (_id, _rx) = join(&mut table, "Alice");
        assert!(table.next_id().is_none());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_nonexistent_player() {
        let mut table = PlayerTable::new(2);
        assert!(!table.remove_player(&PlayerId::new("player_99")));
        assert!(table.is_empty());
    }

    #[test]
    fn test_apply_input_adopts_report() {
        let mut table = PlayerTable::new(2);
        let (id, _rx) = join(&mut table, "Alice");

        assert!(table.apply_input(&id, input_with_report(&id, 42.0)));

        let player = table.get(&id).unwrap();
        assert_eq!(player.position, [42.0, 1.0, 0.0]);
        assert_eq!(player.lap, 2);
        assert_eq!(player.checkpoint, 3);
        assert!(player.last_input.is_some());
    }

    #[test]
    fn test_apply_input_without_report_keeps_pose() {
        let mut table = PlayerTable::new(2);
        let (id, _rx) = join(&mut table, "Alice");

        let mut input = input_with_report(&id, 42.0);
        input.report = None;
        assert!(table.apply_input(&id, input));

        let player = table.get(&id).unwrap();
        assert_eq!(player.position, SPAWN_POSITION);
        assert_eq!(player.last_input.as_ref().map(|i| i.throttle), Some(1.0));
    }

    #[test]
    fn test_input_for_unknown_player() {
        let mut table = PlayerTable::new(2);
        let id = PlayerId::new("player_5");
        assert!(!table.apply_input(&id, input_with_report(&id, 1.0)));
    }

    #[test]
    fn test_ready_count() {
        let mut table = PlayerTable::new(3);
        let (a, _rx_a) = join(&mut table, "Alice");
        let (b, _rx_b) = join(&mut table, "Bob");

        assert_eq!(table.ready_count(), 0);
        assert!(table.set_ready(&a, true));
        assert!(table.set_ready(&b, true));
        assert!(table.set_ready(&b, false));
        assert_eq!(table.ready_count(), 1);

        let lobby = table.lobby_players();
        assert_eq!(lobby.len(), 2);
        assert!(lobby.iter().any(|p| p.id == a && p.ready));
    }

    #[test]
    fn test_views_follow_table() {
        let mut table = PlayerTable::new(3);
        let (a, _rx_a) = join(&mut table, "Alice");
        let (b, _rx_b) = join(&mut table, "Bob");

        let ids: Vec<PlayerId> = table.views().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![a.clone(), b.clone()]);

        table.remove_player(&a);
        let ids: Vec<PlayerId> = table.views().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec![b]);
    }

    #[test]
    fn test_broadcast_reaches_healthy_peer_when_one_fails() {
        let mut table = PlayerTable::new(3);
        let (a, rx_a) = join(&mut table, "Alice");
        let (_b, mut rx_b) = join(&mut table, "Bob");
        drop(rx_a);

        let frame: Frame = Arc::from(vec![1u8, 2, 3]);
        let failed = table.broadcast(&frame);

        assert_eq!(failed, vec![a]);
        assert_eq!(rx_b.try_recv().unwrap().as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_clear_closes_queues() {
        let mut table = PlayerTable::new(2);
        let (_a, mut rx_a) = join(&mut table, "Alice");

        assert_eq!(table.clear(), 1);
        assert!(table.is_empty());
        assert!(matches!(
            rx_a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_broadcast_reports_full_queue() {
        let mut table = PlayerTable::new(2);
        let (tx, _rx) = mpsc::channel(1);
        let id = table.next_id().unwrap();
        table.insert(Player::new(id.clone(), "Slow".to_string(), test_addr(), link(tx)));

        let frame: Frame = Arc::from(vec![0u8]);
        assert!(table.broadcast(&frame).is_empty());
        assert_eq!(table.broadcast(&frame), vec![id]);
    }

    #[test]
    fn test_removal_signals_session() {
        let mut table = PlayerTable::new(2);
        let (tx, _rx) = mpsc::channel(1);
        let (outbound, mut evicted) = Outbound::new(tx);
        let id = table.next_id().unwrap();
        table.insert(Player::new(id.clone(), "Stuck".to_string(), test_addr(), outbound));

        assert!(matches!(
            evicted.try_recv(),
            Err(oneshot::error::TryRecvError::Empty)
        ));
        assert!(table.remove_player(&id));
        assert!(matches!(
            evicted.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }
}
