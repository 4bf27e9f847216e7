//! Snapshot buffering and time-based interpolation of remote players
//!
//! The server sends snapshots at a fixed rate, but they arrive with jitter.
//! Rendering a fixed delay behind the newest snapshot means there is almost
//! always a pair of snapshots on either side of the render time, and remote
//! cars can be blended smoothly between them.

use log::trace;
use shared::{lerp3, PlayerId, PlayerView, StateSnapshot, SNAPSHOT_BUFFER_CAPACITY};
use std::collections::VecDeque;

/// Bounded, time-ordered history of received snapshots
///
/// Once full, the oldest snapshot is evicted for every new one.
#[derive(Debug, Clone)]
pub struct SnapshotBuffer {
    snapshots: VecDeque<StateSnapshot>,
    capacity: usize,
}

impl SnapshotBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds a snapshot, keeping the buffer sorted by timestamp
    ///
    /// Snapshots normally arrive in order and land at the tail. A late one is
    /// placed by timestamp rather than appended.
    pub fn push(&mut self, snapshot: StateSnapshot) {
        if self.capacity == 0 {
            return;
        }

        let in_order = self
            .snapshots
            .back()
            .map_or(true, |last| last.timestamp <= snapshot.timestamp);

        if in_order {
            self.snapshots.push_back(snapshot);
        } else {
            let index = self
                .snapshots
                .partition_point(|s| s.timestamp <= snapshot.timestamp);
            self.snapshots.insert(index, snapshot);
        }

        while self.snapshots.len() > self.capacity {
            self.snapshots.pop_front();
        }
    }

    pub fn latest(&self) -> Option<&StateSnapshot> {
        self.snapshots.back()
    }

    /// Finds adjacent snapshots `(s0, s1)` with `s0.timestamp <= t <= s1.timestamp`
    pub fn bracketing(&self, render_time: f64) -> Option<(&StateSnapshot, &StateSnapshot)> {
        self.snapshots
            .iter()
            .zip(self.snapshots.iter().skip(1))
            .find(|(s0, s1)| s0.timestamp <= render_time && render_time <= s1.timestamp)
    }

    pub fn iter(&self) -> impl Iterator<Item = &StateSnapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}

impl Default for SnapshotBuffer {
    fn default() -> Self {
        Self::new(SNAPSHOT_BUFFER_CAPACITY)
    }
}

/// Turns buffered snapshots into a pose for every remote player
#[derive(Debug, Clone)]
pub struct StateSynchronizer {
    buffer: SnapshotBuffer,
    interpolation_delay: f64,
}

impl StateSynchronizer {
    pub fn new(interpolation_delay: f64) -> Self {
        Self::with_capacity(interpolation_delay, SNAPSHOT_BUFFER_CAPACITY)
    }

    pub fn with_capacity(interpolation_delay: f64, capacity: usize) -> Self {
        Self {
            buffer: SnapshotBuffer::new(capacity),
            interpolation_delay,
        }
    }

    pub fn interpolation_delay(&self) -> f64 {
        self.interpolation_delay
    }

    pub fn buffer(&self) -> &SnapshotBuffer {
        &self.buffer
    }

    pub fn add_snapshot(&mut self, snapshot: StateSnapshot) {
        trace!(
            "Buffered snapshot at {:.3} with {} players",
            snapshot.timestamp,
            snapshot.players.len()
        );
        self.buffer.push(snapshot);
    }

    /// World state as seen `interpolation_delay` seconds before `now`
    pub fn interpolated(&self, now: f64) -> Option<StateSnapshot> {
        self.interpolated_at(now - self.interpolation_delay)
    }

    /// World state at an explicit render time
    ///
    /// Blends the bracketing pair when there is one. Otherwise returns the
    /// newest snapshot unchanged, or `None` for an empty buffer.
    pub fn interpolated_at(&self, render_time: f64) -> Option<StateSnapshot> {
        match self.buffer.bracketing(render_time) {
            Some((s0, s1)) => Some(interpolate(s0, s1, render_time)),
            None => self.buffer.latest().cloned(),
        }
    }

    /// Interpolated poses of every player except `local_id`
    pub fn remote_players(&self, now: f64, local_id: &PlayerId) -> Vec<PlayerView> {
        self.remote_players_at(now - self.interpolation_delay, local_id)
    }

    pub fn remote_players_at(&self, render_time: f64, local_id: &PlayerId) -> Vec<PlayerView> {
        self.interpolated_at(render_time)
            .map(|snapshot| {
                snapshot
                    .players
                    .into_iter()
                    .filter(|player| &player.id != local_id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for StateSynchronizer {
    fn default() -> Self {
        Self::new(shared::DEFAULT_INTERPOLATION_DELAY)
    }
}

/// Blends two snapshots at `render_time`
///
/// Only players present in both are emitted. Lap and checkpoint are counters
/// and come from `s1` unblended.
fn interpolate(s0: &StateSnapshot, s1: &StateSnapshot, render_time: f64) -> StateSnapshot {
    let span = s1.timestamp - s0.timestamp;
    let alpha = if span.abs() < 1e-9 {
        0.0
    } else {
        ((render_time - s0.timestamp) / span) as f32
    };

    let players = s1
        .players
        .iter()
        .filter_map(|p1| {
            let p0 = s0.player(&p1.id)?;
            Some(PlayerView {
                id: p1.id.clone(),
                name: p1.name.clone(),
                position: lerp3(&p0.position, &p1.position, alpha),
                rotation: lerp3(&p0.rotation, &p1.rotation, alpha),
                velocity: lerp3(&p0.velocity, &p1.velocity, alpha),
                lap: p1.lap,
                checkpoint: p1.checkpoint,
            })
        })
        .collect();

    StateSnapshot {
        timestamp: render_time,
        players,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn view(id: &str, x: f32, lap: u32, checkpoint: u32) -> PlayerView {
        PlayerView {
            id: PlayerId::new(id),
            name: id.to_uppercase(),
            position: [x, 0.0, 0.0],
            rotation: [0.0, x * 2.0, 0.0],
            velocity: [x / 10.0, 0.0, 0.0],
            lap,
            checkpoint,
        }
    }

    fn snapshot(timestamp: f64, players: Vec<PlayerView>) -> StateSnapshot {
        StateSnapshot { timestamp, players }
    }

    #[test]
    fn test_buffer_keeps_most_recent() {
        let mut buffer = SnapshotBuffer::new(30);
        for i in 0..45 {
            buffer.push(snapshot(i as f64, vec![]));
        }

        assert_eq!(buffer.len(), 30);
        let timestamps: Vec<f64> = buffer.iter().map(|s| s.timestamp).collect();
        let expected: Vec<f64> = (15..45).map(|i| i as f64).collect();
        assert_eq!(timestamps, expected);
    }

    #[test]
    fn test_buffer_places_late_snapshot_in_order() {
        let mut buffer = SnapshotBuffer::new(4);
        buffer.push(snapshot(1.0, vec![]));
        buffer.push(snapshot(3.0, vec![]));
        buffer.push(snapshot(2.0, vec![]));

        let timestamps: Vec<f64> = buffer.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_zero_capacity_buffer_stays_empty() {
        let mut buffer = SnapshotBuffer::new(0);
        buffer.push(snapshot(1.0, vec![]));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_midpoint_interpolation() {
        let mut sync = StateSynchronizer::new(0.1);
        sync.add_snapshot(snapshot(1.0, vec![view("p1", 0.0, 1, 0)]));
        sync.add_snapshot(snapshot(2.0, vec![view("p1", 10.0, 1, 0)]));

        let result = sync.interpolated_at(1.5).unwrap();
        let p1 = result.player(&PlayerId::new("p1")).unwrap();
        assert_approx_eq!(p1.position[0], 5.0, 1e-5);
        assert_approx_eq!(p1.position[1], 0.0, 1e-5);
        assert_approx_eq!(p1.rotation[1], 10.0, 1e-5);
        assert_approx_eq!(p1.velocity[0], 0.5, 1e-5);
    }

    #[test]
    fn test_interpolated_applies_delay() {
        let mut sync = StateSynchronizer::new(0.5);
        sync.add_snapshot(snapshot(1.0, vec![view("p1", 0.0, 1, 0)]));
        sync.add_snapshot(snapshot(2.0, vec![view("p1", 10.0, 1, 0)]));

        let result = sync.interpolated(2.25).unwrap();
        assert_approx_eq!(result.players[0].position[0], 7.5, 1e-5);
    }

    #[test]
    fn test_counters_taken_from_newer_snapshot() {
        let mut sync = StateSynchronizer::new(0.1);
        sync.add_snapshot(snapshot(1.0, vec![view("p1", 0.0, 1, 7)]));
        sync.add_snapshot(snapshot(2.0, vec![view("p1", 10.0, 2, 0)]));

        let result = sync.interpolated_at(1.1).unwrap();
        let p1 = &result.players[0];
        assert_approx_eq!(p1.position[0], 1.0, 1e-4);
        assert_eq!(p1.lap, 2);
        assert_eq!(p1.checkpoint, 0);
    }

    #[test]
    fn test_equal_timestamps_use_older_pose() {
        let mut sync = StateSynchronizer::new(0.1);
        sync.add_snapshot(snapshot(1.0, vec![view("p1", 0.0, 1, 0)]));
        sync.add_snapshot(snapshot(1.0, vec![view("p1", 10.0, 1, 0)]));

        let result = sync.interpolated_at(1.0).unwrap();
        assert_eq!(result.players[0].position, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_single_snapshot_returned_verbatim() {
        let mut sync = StateSynchronizer::new(0.1);
        let only = snapshot(5.0, vec![view("p1", 3.0, 1, 2)]);
        sync.add_snapshot(only.clone());

        assert_eq!(sync.interpolated_at(4.0), Some(only.clone()));
        assert_eq!(sync.interpolated_at(6.0), Some(only));
    }

    #[test]
    fn test_render_time_outside_buffer_returns_latest() {
        let mut sync = StateSynchronizer::new(0.1);
        let newest = snapshot(2.0, vec![view("p1", 10.0, 1, 0)]);
        sync.add_snapshot(snapshot(1.0, vec![view("p1", 0.0, 1, 0)]));
        sync.add_snapshot(newest.clone());

        assert_eq!(sync.interpolated_at(0.5), Some(newest.clone()));
        assert_eq!(sync.interpolated_at(3.0), Some(newest));
    }

    #[test]
    fn test_empty_buffer_yields_nothing() {
        let sync = StateSynchronizer::new(0.1);
        assert!(sync.interpolated_at(1.0).is_none());
        assert!(sync.remote_players_at(1.0, &PlayerId::new("p1")).is_empty());
    }

    #[test]
    fn test_new_player_hidden_until_in_both_snapshots() {
        let mut sync = StateSynchronizer::new(0.1);
        sync.add_snapshot(snapshot(1.0, vec![view("p1", 0.0, 1, 0)]));
        sync.add_snapshot(snapshot(
            2.0,
            vec![view("p1", 10.0, 1, 0), view("p2", 4.0, 1, 0)],
        ));
        sync.add_snapshot(snapshot(
            3.0,
            vec![view("p1", 20.0, 1, 0), view("p2", 6.0, 1, 0)],
        ));

        let early = sync.interpolated_at(1.5).unwrap();
        assert!(early.player(&PlayerId::new("p2")).is_none());

        let later = sync.interpolated_at(2.5).unwrap();
        let p2 = later.player(&PlayerId::new("p2")).unwrap();
        assert_approx_eq!(p2.position[0], 5.0, 1e-5);
    }

    #[test]
    fn test_departed_player_dropped() {
        let mut sync = StateSynchronizer::new(0.1);
        sync.add_snapshot(snapshot(
            1.0,
            vec![view("p1", 0.0, 1, 0), view("p2", 0.0, 1, 0)],
        ));
        sync.add_snapshot(snapshot(2.0, vec![view("p1", 10.0, 1, 0)]));

        let result = sync.interpolated_at(1.5).unwrap();
        assert_eq!(result.players.len(), 1);
        assert_eq!(result.players[0].id, PlayerId::new("p1"));
    }

    #[test]
    fn test_local_player_excluded() {
        let mut sync = StateSynchronizer::new(0.1);
        sync.add_snapshot(snapshot(
            1.0,
            vec![view("me", 0.0, 1, 0), view("rival", 0.0, 1, 0)],
        ));
        sync.add_snapshot(snapshot(
            2.0,
            vec![view("me", 10.0, 1, 0), view("rival", 10.0, 1, 0)],
        ));

        let local = PlayerId::new("me");
        for render_time in [0.0, 1.5, 5.0] {
            let remote = sync.remote_players_at(render_time, &local);
            assert_eq!(remote.len(), 1);
            assert!(remote.iter().all(|p| p.id != local));
        }
    }
}
