//! Session tunables. Defaults are the reference gameplay values.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Minimum spacing between outbound updates on either side.
    pub broadcast_interval: Duration,
    pub world_width: f32,
    pub world_height: f32,
    /// Seconds between enemy spawn attempts.
    pub spawn_interval: f32,
    pub max_enemies: usize,
    /// Rejection-sampling budget when looking for a passable spawn point.
    pub spawn_attempts: u32,
    pub player_attack_damage: i32,
    /// Damage per tick while an enemy overlaps a player. Zero disables it.
    pub contact_damage: i32,
    pub projectile_damage: i32,
    pub score_per_kill: u32,
    /// Hard cap of joined clients on the Host.
    pub max_clients: usize,
    /// Fixed seed for spawn/wander randomness; `None` seeds from entropy.
    pub rng_seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: Duration::from_millis(50),
            world_width: 1280.0,
            world_height: 720.0,
            spawn_interval: 5.0,
            max_enemies: 5,
            spawn_attempts: 20,
            player_attack_damage: 25,
            contact_damage: 0,
            projectile_damage: 50,
            score_per_kill: 10,
            max_clients: 1,
            rng_seed: None,
        }
    }
}

impl SessionConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }
}
