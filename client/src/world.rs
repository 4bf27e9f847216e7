//! Seams between the network layer and the game world
//!
//! The physics model and the scene are outside this crate. The client reads
//! the local car through [`VehicleBody`] and pushes interpolated remote poses
//! into the scene through [`RemoteWorld`].

use log::debug;
use shared::{PlayerId, PlayerInput, PlayerView, Vec3, VehicleReport};
use std::collections::HashSet;

/// A physics body with a readable and writable pose
pub trait VehicleBody {
    fn position(&self) -> Vec3;
    fn rotation(&self) -> Vec3;
    fn velocity(&self) -> Vec3;

    fn set_position(&mut self, position: Vec3);
    fn set_rotation(&mut self, rotation: Vec3);
    fn set_velocity(&mut self, velocity: Vec3);

    /// Copies the pose out of a snapshot entry
    fn apply_view(&mut self, view: &PlayerView) {
        self.set_position(view.position);
        self.set_rotation(view.rotation);
        self.set_velocity(view.velocity);
    }
}

/// The set of remote cars shown in the scene, keyed by player id
pub trait RemoteWorld {
    type Body: VehicleBody;

    fn remote_ids(&self) -> Vec<PlayerId>;
    fn body_mut(&mut self, id: &PlayerId) -> Option<&mut Self::Body>;
    /// Creates a car for a player seen for the first time
    fn spawn(&mut self, view: &PlayerView);
    fn despawn(&mut self, id: &PlayerId);
}

/// Synchronises the scene with a set of remote poses
///
/// Cars are spawned for new ids and despawned for ids missing from `views`.
pub fn apply_remote_poses<W: RemoteWorld>(world: &mut W, views: &[PlayerView]) {
    let present: HashSet<&PlayerId> = views.iter().map(|view| &view.id).collect();

    for id in world.remote_ids() {
        if !present.contains(&id) {
            debug!("Removing remote car {}", id);
            world.despawn(&id);
        }
    }

    for view in views {
        match world.body_mut(&view.id) {
            Some(body) => body.apply_view(view),
            None => {
                debug!("Spawning remote car {} ({})", view.id, view.name);
                world.spawn(view);
                if let Some(body) = world.body_mut(&view.id) {
                    body.apply_view(view);
                }
            }
        }
    }
}

/// Driver controls for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Controls {
    pub throttle: f32,
    pub steer: f32,
    pub brake: bool,
    pub handbrake: bool,
    pub boost: bool,
}

impl Controls {
    /// Axes limited to the range the server accepts
    pub fn clamped(self) -> Self {
        let clamp = |v: f32| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
        Self {
            throttle: clamp(self.throttle),
            steer: clamp(self.steer),
            ..self
        }
    }
}

/// What the client currently knows about its own car
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalState {
    pub controls: Controls,
    pub report: Option<VehicleReport>,
}

impl LocalState {
    /// Samples the local physics body together with race progress
    pub fn from_body(controls: Controls, body: &impl VehicleBody, lap: u32, checkpoint: u32) -> Self {
        Self {
            controls,
            report: Some(VehicleReport {
                position: body.position(),
                rotation: body.rotation(),
                velocity: body.velocity(),
                lap,
                checkpoint,
            }),
        }
    }

    pub fn to_input(&self, player_id: &PlayerId, timestamp: f64) -> PlayerInput {
        let controls = self.controls.clamped();
        PlayerInput {
            player_id: player_id.clone(),
            throttle: controls.throttle,
            steer: controls.steer,
            brake: controls.brake,
            handbrake: controls.handbrake,
            boost: controls.boost,
            timestamp,
            report: self.report.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct TestBody {
        position: Vec3,
        rotation: Vec3,
        velocity: Vec3,
    }

    impl VehicleBody for TestBody {
        fn position(&self) -> Vec3 {
            self.position
        }
        fn rotation(&self) -> Vec3 {
            self.rotation
        }
        fn velocity(&self) -> Vec3 {
            self.velocity
        }
        fn set_position(&mut self, position: Vec3) {
            self.position = position;
        }
        fn set_rotation(&mut self, rotation: Vec3) {
            self.rotation = rotation;
        }
        fn set_velocity(&mut self, velocity: Vec3) {
            self.velocity = velocity;
        }
    }

    #[derive(Default)]
    struct TestWorld {
        cars: BTreeMap<PlayerId, TestBody>,
        spawned: usize,
    }

    impl RemoteWorld for TestWorld {
        type Body = TestBody;

        fn remote_ids(&self) -> Vec<PlayerId> {
            self.cars.keys().cloned().collect()
        }
        fn body_mut(&mut self, id: &PlayerId) -> Option<&mut TestBody> {
            self.cars.get_mut(id)
        }
        fn spawn(&mut self, view: &PlayerView) {
            self.spawned += 1;
            self.cars.insert(view.id.clone(), TestBody::default());
        }
        fn despawn(&mut self, id: &PlayerId) {
            self.cars.remove(id);
        }
    }

    fn view(id: &str, x: f32) -> PlayerView {
        PlayerView {
            id: PlayerId::new(id),
            name: id.to_string(),
            position: [x, 1.0, 0.0],
            rotation: [0.0, 90.0, 0.0],
            velocity: [1.0, 0.0, 0.0],
            lap: 1,
            checkpoint: 0,
        }
    }

    #[test]
    fn test_apply_remote_poses_spawns_updates_and_despawns() {
        let mut world = TestWorld::default();

        apply_remote_poses(&mut world, &[view("a", 1.0), view("b", 2.0)]);
        assert_eq!(world.spawned, 2);
        assert_eq!(world.cars[&PlayerId::new("a")].position, [1.0, 1.0, 0.0]);

        apply_remote_poses(&mut world, &[view("a", 5.0)]);
        assert_eq!(world.spawned, 2);
        assert_eq!(world.remote_ids(), vec![PlayerId::new("a")]);
        assert_eq!(world.cars[&PlayerId::new("a")].position, [5.0, 1.0, 0.0]);
        assert_eq!(world.cars[&PlayerId::new("a")].rotation, [0.0, 90.0, 0.0]);
    }

    #[test]
    fn test_local_state_from_body() {
        let body = TestBody {
            position: [1.0, 2.0, 3.0],
            rotation: [0.0, 45.0, 0.0],
            velocity: [4.0, 0.0, 0.0],
        };
        let controls = Controls {
            throttle: 0.8,
            ..Controls::default()
        };

        let state = LocalState::from_body(controls, &body, 2, 5);
        let input = state.to_input(&PlayerId::new("player_3"), 12.5);

        assert_eq!(input.player_id, PlayerId::new("player_3"));
        assert_eq!(input.throttle, 0.8);
        assert_eq!(input.timestamp, 12.5);
        let report = input.report.unwrap();
        assert_eq!(report.position, [1.0, 2.0, 3.0]);
        assert_eq!(report.lap, 2);
        assert_eq!(report.checkpoint, 5);
    }

    #[test]
    fn test_controls_clamped_before_sending() {
        let state = LocalState {
            controls: Controls {
                throttle: 3.0,
                steer: f32::NAN,
                boost: true,
                ..Controls::default()
            },
            report: None,
        };

        let input = state.to_input(&PlayerId::new("player_0"), 0.0);
        assert_eq!(input.throttle, 1.0);
        assert_eq!(input.steer, 0.0);
        assert!(input.boost);
        assert!(input.validate_axes().is_ok());
    }
}
