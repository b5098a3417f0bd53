use crate::map::Passability;
use shared::protocol::{ClientUpdate, PlayerSnapshot};
use shared::{Direction, NetworkId, Rect};
use std::collections::BTreeSet;

pub const PLAYER_MAX_HEALTH: i32 = 100;
pub const PLAYER_SPEED: f32 = 150.0;
/// Rendered body size; the collision box is derived from it.
pub const PLAYER_BODY_SIZE: f32 = 48.0;
pub const ATTACK_DURATION: f32 = 0.3;
pub const ATTACK_COOLDOWN: f32 = 0.5;

const COLLISION_WIDTH_FACTOR: f32 = 0.6;
const COLLISION_HEIGHT_FACTOR: f32 = 0.8;
const COLLISION_Y_OFFSET_FACTOR: f32 = 0.1;
const ATTACK_REACH: f32 = 40.0;
const ATTACK_WIDTH: f32 = 30.0;
/// Movement is locked during the middle of an attack window.
const ATTACK_MOVE_LOCK_START: f32 = 0.7;
const ATTACK_MOVE_LOCK_END: f32 = 0.3;

/// Held movement keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MovementIntent {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl MovementIntent {
    pub fn from_direction(direction: Direction) -> Self {
        let mut intent = Self::default();
        match direction {
            Direction::Up => intent.up = true,
            Direction::Down => intent.down = true,
            Direction::Left => intent.left = true,
            Direction::Right => intent.right = true,
        }
        intent
    }

    pub fn is_moving(&self) -> bool {
        self.up || self.down || self.left || self.right
    }

    /// Horizontal keys win over vertical ones.
    pub fn facing(&self) -> Option<Direction> {
        if self.left {
            Some(Direction::Left)
        } else if self.right {
            Some(Direction::Right)
        } else if self.up {
            Some(Direction::Up)
        } else if self.down {
            Some(Direction::Down)
        } else {
            None
        }
    }

    fn axes(&self) -> (f32, f32) {
        let dx = self.right as i32 - self.left as i32;
        let dy = self.down as i32 - self.up as i32;
        (dx as f32, dy as f32)
    }
}

#[derive(Debug, Clone)]
pub struct PlayerEntity {
    pub id: NetworkId,
    pub is_local: bool,
    pub x: f32,
    pub y: f32,
    pub facing: Direction,
    pub intent: MovementIntent,
    health: i32,
    alive: bool,
    moving: bool,
    attack_requested: bool,
    attack_timer: f32,
    cooldown_timer: f32,
    /// Last `attacking` flag received from the network, for edge detection.
    remote_attacking: bool,
    /// Enemies already damaged by the current attack window.
    struck: BTreeSet<NetworkId>,
}

impl PlayerEntity {
    pub fn new(id: NetworkId, is_local: bool, x: f32, y: f32) -> Self {
        Self {
            id,
            is_local,
            x,
            y,
            facing: Direction::Down,
            intent: MovementIntent::default(),
            health: PLAYER_MAX_HEALTH,
            alive: true,
            moving: false,
            attack_requested: false,
            attack_timer: 0.0,
            cooldown_timer: 0.0,
            remote_attacking: false,
            struck: BTreeSet::new(),
        }
    }

    pub fn health(&self) -> i32 {
        self.health
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_moving(&self) -> bool {
        self.moving
    }

    /// True while the attack window is open.
    pub fn is_attacking(&self) -> bool {
        self.alive && self.attack_timer > 0.0
    }

    /// Returns true when this call killed the player. No-op once dead.
    pub fn take_damage(&mut self, amount: i32) -> bool {
        if !self.alive {
            return false;
        }
        self.health -= amount.max(0);
        if self.health <= 0 {
            self.health = 0;
            self.alive = false;
            self.attack_timer = 0.0;
            return true;
        }
        false
    }

    pub fn set_health(&mut self, health: i32) {
        self.health = health.clamp(0, PLAYER_MAX_HEALTH);
        self.alive = self.health > 0;
        if !self.alive {
            self.attack_timer = 0.0;
        }
    }

    /// Queues an attack for the next simulation step if one may start.
    pub fn request_attack(&mut self) {
        if self.alive && !self.is_attacking() && self.cooldown_timer <= 0.0 {
            self.attack_requested = true;
        }
    }

    /// Treats a rising `attacking` flag from the network as an attack request.
    pub fn apply_remote_attack_flag(&mut self, attacking: bool) {
        if attacking && !self.remote_attacking {
            self.request_attack();
        }
        self.remote_attacking = attacking;
    }

    /// Records a hit on `enemy` for the current attack window.
    /// Returns false when that enemy was already hit by this window.
    pub fn claim_hit(&mut self, enemy: NetworkId) -> bool {
        self.is_attacking() && self.struck.insert(enemy)
    }

    pub fn collision_box(&self) -> Rect {
        self.collision_box_at(self.x, self.y)
    }

    pub fn collision_box_at(&self, x: f32, y: f32) -> Rect {
        let width = PLAYER_BODY_SIZE * COLLISION_WIDTH_FACTOR;
        let height = PLAYER_BODY_SIZE * COLLISION_HEIGHT_FACTOR;
        Rect::centered(x, y + PLAYER_BODY_SIZE * COLLISION_Y_OFFSET_FACTOR, width, height)
    }

    /// Strip in front of the facing edge, present only during the attack window.
    pub fn attack_hitbox(&self) -> Option<Rect> {
        if !self.is_attacking() {
            return None;
        }
        let half = PLAYER_BODY_SIZE / 2.0;
        let rect = match self.facing {
            Direction::Up => Rect::new(
                self.x - ATTACK_WIDTH / 2.0,
                self.y - half - ATTACK_REACH,
                ATTACK_WIDTH,
                ATTACK_REACH,
            ),
            Direction::Down => Rect::new(
                self.x - ATTACK_WIDTH / 2.0,
                self.y + half,
                ATTACK_WIDTH,
                ATTACK_REACH,
            ),
            Direction::Left => Rect::new(
                self.x - half - ATTACK_REACH,
                self.y - ATTACK_WIDTH / 2.0,
                ATTACK_REACH,
                ATTACK_WIDTH,
            ),
            Direction::Right => Rect::new(
                self.x + half,
                self.y - ATTACK_WIDTH / 2.0,
                ATTACK_REACH,
                ATTACK_WIDTH,
            ),
        };
        Some(rect)
    }

    /// One physics step for a player this peer simulates: attack timers,
    /// then intent-driven movement validated against the map, X before Y.
    pub fn simulate(&mut self, dt: f32, map: &dyn Passability, bounds: (f32, f32)) {
        if !self.alive {
            return;
        }

        self.advance_attack_timer(dt);
        if self.cooldown_timer > 0.0 {
            self.cooldown_timer -= dt;
        }
        if self.attack_requested && !self.is_attacking() && self.cooldown_timer <= 0.0 {
            self.start_attack();
            self.cooldown_timer = ATTACK_COOLDOWN;
        }
        self.attack_requested = false;

        if self.can_move() {
            let (dx_axis, dy_axis) = self.intent.axes();
            let mut speed = PLAYER_SPEED;
            if dx_axis != 0.0 && dy_axis != 0.0 {
                speed /= std::f32::consts::SQRT_2;
            }
            self.step_axes(dx_axis * speed * dt, dy_axis * speed * dt, map);
        }

        let half = PLAYER_BODY_SIZE / 2.0;
        self.x = self.x.clamp(half, (bounds.0 - half).max(half));
        self.y = self.y.clamp(half, (bounds.1 - half).max(half));

        self.moving = self.intent.is_moving();
        if let Some(direction) = self.intent.facing() {
            self.facing = direction;
        }
    }

    /// Purely visual progression for a replica driven by snapshots.
    pub fn advance_replica(&mut self, dt: f32) {
        self.advance_attack_timer(dt);
    }

    /// Overwrites this record from a Host snapshot. The local player only
    /// accepts health so local movement is never fought.
    pub fn apply_network_state(&mut self, snapshot: &PlayerSnapshot) {
        if self.is_local {
            if self.health != snapshot.health {
                self.set_health(snapshot.health);
            }
            return;
        }

        self.x = snapshot.x;
        self.y = snapshot.y;
        self.facing = snapshot.direction;
        self.moving = snapshot.is_moving;
        self.set_health(snapshot.health);

        if snapshot.attacking && !self.is_attacking() {
            self.start_attack();
        } else if !snapshot.attacking {
            self.attack_timer = 0.0;
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            x: self.x,
            y: self.y,
            direction: self.facing,
            attacking: self.is_attacking(),
            health: self.health,
            is_moving: self.moving,
        }
    }

    pub fn client_update(&self) -> ClientUpdate {
        ClientUpdate {
            player_id: self.id,
            x: self.x,
            y: self.y,
            direction: self.facing,
            attacking: self.is_attacking(),
            is_moving: self.moving,
        }
    }

    fn can_move(&self) -> bool {
        if !self.intent.is_moving() {
            return false;
        }
        if !self.is_attacking() {
            return true;
        }
        self.attack_timer > ATTACK_DURATION * ATTACK_MOVE_LOCK_START
            || self.attack_timer < ATTACK_DURATION * ATTACK_MOVE_LOCK_END
    }

    fn step_axes(&mut self, dx: f32, dy: f32, map: &dyn Passability) {
        if dx != 0.0 && area_passable(map, &self.collision_box_at(self.x + dx, self.y)) {
            self.x += dx;
        }
        if dy != 0.0 && area_passable(map, &self.collision_box_at(self.x, self.y + dy)) {
            self.y += dy;
        }
    }

    fn start_attack(&mut self) {
        if !self.alive {
            return;
        }
        self.attack_timer = ATTACK_DURATION;
        self.struck.clear();
    }

    fn advance_attack_timer(&mut self, dt: f32) {
        if self.attack_timer > 0.0 {
            self.attack_timer = (self.attack_timer - dt).max(0.0);
        }
    }
}

pub(crate) fn area_passable(map: &dyn Passability, rect: &Rect) -> bool {
    map.is_area_passable(rect.x, rect.y, rect.width, rect.height)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{OpenArena, TileGrid};
    use assert_approx_eq::assert_approx_eq;

    const DT: f32 = 0.1;

    fn arena() -> OpenArena {
        OpenArena::new(1280.0, 720.0)
    }

    #[test]
    fn test_player_creation() {
        let player = PlayerEntity::new(0, true, 320.0, 360.0);
        assert_eq!(player.id, 0);
        assert!(player.is_local);
        assert_eq!(player.health(), PLAYER_MAX_HEALTH);
        assert!(player.is_alive());
        assert!(!player.is_attacking());
        assert_eq!(player.facing, Direction::Down);
    }

    #[test]
    fn test_straight_movement() {
        let mut player = PlayerEntity::new(0, true, 300.0, 300.0);
        player.intent.right = true;
        player.simulate(DT, &arena(), (1280.0, 720.0));

        assert_approx_eq!(player.x, 300.0 + PLAYER_SPEED * DT, 0.001);
        assert_approx_eq!(player.y, 300.0, 0.001);
        assert_eq!(player.facing, Direction::Right);
        assert!(player.is_moving());
    }

    #[test]
    fn test_diagonal_movement_is_normalized() {
        let mut player = PlayerEntity::new(0, true, 300.0, 300.0);
        player.intent.right = true;
        player.intent.down = true;
        player.simulate(DT, &arena(), (1280.0, 720.0));

        let travelled = shared::distance(300.0, 300.0, player.x, player.y);
        assert_approx_eq!(travelled, PLAYER_SPEED * DT, 0.01);
    }

    #[test]
    fn test_axis_independent_sliding() {
        // Wall column at x in [64, 96).
        let grid = TileGrid::from_rows(
            32.0,
            &[
                "..#.....", "..#.....", "..#.....", "..#.....", "..#.....", "..#.....",
            ],
        );
        let mut player = PlayerEntity::new(0, true, 48.0, 80.0);
        let edge = player.collision_box().max_x();
        assert!(edge <= 64.0);

        player.intent.right = true;
        player.intent.down = true;
        for _ in 0..5 {
            player.simulate(DT, &grid, (grid.pixel_width(), grid.pixel_height()));
        }

        assert!(player.collision_box().max_x() <= 64.0);
        assert!(player.y > 80.0);
    }

    #[test]
    fn test_blocked_axis_has_zero_displacement() {
        let grid = TileGrid::from_rows(32.0, &["..#", "..#", "..#"]);
        let mut player = PlayerEntity::new(0, true, 45.0, 40.0);
        player.intent.right = true;
        player.simulate(DT, &grid, (grid.pixel_width(), grid.pixel_height()));
        assert_eq!(player.x, 45.0);
        assert_eq!(player.y, 40.0);
    }

    #[test]
    fn test_attack_window_and_cooldown() {
        let mut player = PlayerEntity::new(0, true, 300.0, 300.0);
        player.request_attack();
        player.simulate(DT, &arena(), (1280.0, 720.0));
        assert!(player.is_attacking());
        assert!(player.attack_hitbox().is_some());

        for _ in 0..4 {
            player.simulate(DT, &arena(), (1280.0, 720.0));
        }
        assert!(!player.is_attacking());
        assert!(player.attack_hitbox().is_none());

        // Still cooling down.
        player.request_attack();
        player.simulate(DT, &arena(), (1280.0, 720.0));
        assert!(!player.is_attacking());
    }

    #[test]
    fn test_attack_hitbox_faces_direction() {
        let mut player = PlayerEntity::new(0, true, 300.0, 300.0);
        player.facing = Direction::Left;
        player.request_attack();
        player.simulate(0.0, &arena(), (1280.0, 720.0));

        let hitbox = player.attack_hitbox().unwrap();
        assert_eq!(hitbox.max_x(), 300.0 - PLAYER_BODY_SIZE / 2.0);
        assert_eq!(hitbox.width, ATTACK_REACH);
        assert_eq!(hitbox.height, ATTACK_WIDTH);
    }

    #[test]
    fn test_claim_hit_once_per_window() {
        let mut player = PlayerEntity::new(0, true, 300.0, 300.0);
        assert!(!player.claim_hit(1000));

        player.request_attack();
        player.simulate(0.0, &arena(), (1280.0, 720.0));
        assert!(player.claim_hit(1000));
        assert!(!player.claim_hit(1000));
        assert!(player.claim_hit(1001));
    }

    #[test]
    fn test_take_damage_clamps_and_is_idempotent() {
        let mut player = PlayerEntity::new(0, true, 0.0, 0.0);
        assert!(!player.take_damage(40));
        assert_eq!(player.health(), 60);
        assert!(player.take_damage(500));
        assert_eq!(player.health(), 0);
        assert!(!player.is_alive());
        assert!(!player.take_damage(10));
        assert_eq!(player.health(), 0);
    }

    #[test]
    fn test_remote_attack_flag_edge() {
        let mut player = PlayerEntity::new(1, false, 300.0, 300.0);
        player.apply_remote_attack_flag(true);
        player.simulate(0.05, &arena(), (1280.0, 720.0));
        assert!(player.is_attacking());

        // Held flag does not queue another attack once the window closes.
        player.apply_remote_attack_flag(true);
        for _ in 0..20 {
            player.simulate(0.05, &arena(), (1280.0, 720.0));
        }
        assert!(!player.is_attacking());
    }

    #[test]
    fn test_local_player_keeps_position_from_snapshot() {
        let mut player = PlayerEntity::new(1, true, 900.0, 300.0);
        let snapshot = PlayerSnapshot {
            x: 10.0,
            y: 10.0,
            direction: Direction::Up,
            attacking: false,
            health: 35,
            is_moving: true,
        };
        player.apply_network_state(&snapshot);
        assert_eq!(player.x, 900.0);
        assert_eq!(player.y, 300.0);
        assert_eq!(player.health(), 35);
    }

    #[test]
    fn test_replica_takes_full_snapshot() {
        let mut player = PlayerEntity::new(0, false, 0.0, 0.0);
        let snapshot = PlayerSnapshot {
            x: 10.0,
            y: 20.0,
            direction: Direction::Right,
            attacking: true,
            health: 0,
            is_moving: true,
        };
        player.apply_network_state(&snapshot);
        assert_eq!(player.x, 10.0);
        assert_eq!(player.y, 20.0);
        assert_eq!(player.facing, Direction::Right);
        assert!(!player.is_alive());
        assert!(!player.is_attacking());
    }
}
