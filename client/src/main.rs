use clap::Parser;
use client::config::ClientConfig;
use client::network::{ClientEvent, NetworkClient};
use client::world::{apply_remote_poses, Controls, LocalState, RemoteWorld, VehicleBody};
use log::{error, info, warn};
use rand::Rng;
use shared::{PlayerId, PlayerView, Vec3, DEFAULT_CHECKPOINT_COUNT, SPAWN_POSITION};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::interval;

const FRAME_RATE: f64 = 60.0;
const ACCELERATION: f32 = 12.0;
const BOOST_ACCELERATION: f32 = 20.0;
const MAX_SPEED: f32 = 40.0;
const TURN_RATE: f32 = 1.5;
const CHECKPOINT_SPACING: f32 = 50.0;

/// Minimal kinematic car standing in for the game's physics model
#[derive(Debug, Clone)]
struct GhostCar {
    position: Vec3,
    rotation: Vec3,
    velocity: Vec3,
    heading: f32,
    speed: f32,
    distance: f32,
}

impl GhostCar {
    fn new(position: Vec3) -> Self {
        Self {
            position,
            rotation: [0.0; 3],
            velocity: [0.0; 3],
            heading: 0.0,
            speed: 0.0,
            distance: 0.0,
        }
    }

    fn step(&mut self, controls: &Controls, dt: f32) {
        let accel = if controls.boost {
            BOOST_ACCELERATION
        } else {
            ACCELERATION
        };
        self.speed += controls.throttle * accel * dt;
        if controls.brake {
            self.speed *= 0.9;
        }
        if controls.handbrake {
            self.speed *= 0.97;
        }
        self.speed = self.speed.clamp(0.0, MAX_SPEED);

        self.heading += controls.steer * TURN_RATE * dt * (self.speed / MAX_SPEED);
        let direction = [self.heading.sin(), 0.0, self.heading.cos()];

        self.velocity = direction.map(|d| d * self.speed);
        for (p, v) in self.position.iter_mut().zip(self.velocity.iter()) {
            *p += v * dt;
        }
        self.rotation = [0.0, self.heading.to_degrees(), 0.0];
        self.distance += self.speed * dt;
    }

    /// Lap (from 1) and checkpoint derived from distance driven
    fn progress(&self) -> (u32, u32) {
        let passed = (self.distance / CHECKPOINT_SPACING) as u32;
        (
            1 + passed / DEFAULT_CHECKPOINT_COUNT,
            passed % DEFAULT_CHECKPOINT_COUNT,
        )
    }
}

impl VehicleBody for GhostCar {
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
struct RemoteCars {
    cars: HashMap<PlayerId, GhostCar>,
}

impl RemoteWorld for RemoteCars {
    type Body = GhostCar;

    fn remote_ids(&self) -> Vec<PlayerId> {
        self.cars.keys().cloned().collect()
    }

    fn body_mut(&mut self, id: &PlayerId) -> Option<&mut GhostCar> {
        self.cars.get_mut(id)
    }

    fn spawn(&mut self, view: &PlayerView) {
        info!("{} joined the track", view.name);
        self.cars.insert(view.id.clone(), GhostCar::new(view.position));
    }

    fn despawn(&mut self, id: &PlayerId) {
        if self.cars.remove(id).is_some() {
            info!("{} left the track", id);
        }
    }
}

/// Picks new random controls now and then, like a distracted driver
fn vary_controls(rng: &mut impl Rng, current: Controls) -> Controls {
    if !rng.gen_bool(1.0 / FRAME_RATE) {
        return current;
    }
    Controls {
        throttle: rng.gen_range(0.3..=1.0),
        steer: rng.gen_range(-1.0..=1.0),
        brake: rng.gen_bool(0.05),
        handbrake: false,
        boost: rng.gen_bool(0.1),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ClientConfig::parse();
    info!("Starting client...");
    info!("Connecting to: {}", config.server);

    let mut client = match NetworkClient::connect(config).await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to connect: {}", e);
            return Err(e.into());
        }
    };
    let mut events = client.take_events().ok_or("event stream already taken")?;

    client.send_chat("hello from a headless driver")?;
    client.set_ready(true)?;

    let mut rng = rand::thread_rng();
    let mut car = GhostCar::new(SPAWN_POSITION);
    let mut controls = Controls::default();
    let mut remote_cars = RemoteCars::default();

    let dt = (1.0 / FRAME_RATE) as f32;
    let mut frame = interval(Duration::from_secs_f64(1.0 / FRAME_RATE));
    let mut status = interval(Duration::from_secs(2));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = frame.tick() => {
                controls = vary_controls(&mut rng, controls);
                car.step(&controls, dt);
                let (lap, checkpoint) = car.progress();
                client.set_local_state(LocalState::from_body(controls, &car, lap, checkpoint));

                let remote = client.remote_players().await;
                apply_remote_poses(&mut remote_cars, &remote);
            }

            _ = status.tick() => {
                let (lap, checkpoint) = car.progress();
                info!(
                    "Lap {} checkpoint {} at {:.1} m/s, {} remote cars",
                    lap,
                    checkpoint,
                    car.speed,
                    remote_cars.cars.len()
                );
            }

            Some(event) = events.recv() => match event {
                ClientEvent::Connected { player_id } => info!("Joined as {}", player_id),
                ClientEvent::Chat(chat) => info!("{}: {}", chat.name, chat.text),
                ClientEvent::LobbyState(lobby) => info!(
                    "Lobby on {}: {}/{} ready",
                    lobby.track,
                    lobby.ready_count,
                    lobby.players.len()
                ),
                ClientEvent::Results(results) => {
                    for standing in results.standings {
                        info!("#{} {} ({} laps)", standing.position, standing.name, standing.laps);
                    }
                }
                ClientEvent::Disconnected { reason } => {
                    warn!("Lost connection: {}", reason);
                    break;
                }
            },

            _ = &mut ctrl_c => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
