//! Enemy entities and their behavior state machine.
//!
//! Every kind runs the same machine; kinds differ only by the numbers in
//! their [`EnemyStats`] row. On the authoritative side an enemy thinks and
//! moves every tick. Replicas on the Client are updated from snapshots only.

use crate::map::Passability;
use crate::player::area_passable;
use rand::Rng;
use shared::protocol::EnemySnapshot;
use shared::{distance, BehaviorState, Direction, EnemyKind, NetworkId, Rect};

/// Rendered body size of every enemy kind.
pub const ENEMY_BODY_SIZE: f32 = 48.0;

const COLLISION_WIDTH_FACTOR: f32 = 0.7;
const COLLISION_HEIGHT_FACTOR: f32 = 0.9;
const COLLISION_Y_OFFSET_FACTOR: f32 = 0.05;

const WANDER_DISTANCE: f32 = 80.0;
const WANDER_DWELL_MIN: f32 = 2.0;
const WANDER_DWELL_MAX: f32 = 5.0;
const WANDER_TIMEOUT: f32 = WANDER_DWELL_MAX * 1.5;
const WANDER_ARRIVAL: f32 = 10.0;
const WANDER_SPEED_FACTOR: f32 = 0.7;
const STRIKE_TOLERANCE: f32 = 1.1;
/// Chasing stops once this close, relative to attack range.
const CHASE_STOP_FACTOR: f32 = 0.8;

/// Per-kind tuning. Attack range is the gap between the enemy's and the
/// target's collision boxes; detection range is measured between centres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnemyStats {
    pub max_health: i32,
    pub speed: f32,
    pub detection_range: f32,
    pub attack_range: f32,
    pub attack_damage: i32,
    pub windup: f32,
    pub active: f32,
    pub cooldown: f32,
}

const BEAR: EnemyStats = EnemyStats {
    max_health: 150,
    speed: 45.0,
    detection_range: 200.0,
    attack_range: 45.0,
    attack_damage: 10,
    windup: 0.5,
    active: 0.3,
    cooldown: 2.0,
};

const SLIME: EnemyStats = EnemyStats {
    max_health: 100,
    speed: 35.0,
    detection_range: 160.0,
    attack_range: 35.0,
    attack_damage: 5,
    windup: 0.4,
    active: 0.2,
    cooldown: 1.5,
};

const SWIFT: EnemyStats = EnemyStats {
    max_health: 50,
    speed: 150.0,
    detection_range: 240.0,
    attack_range: 30.0,
    attack_damage: 4,
    windup: 0.2,
    active: 0.15,
    cooldown: 1.0,
};

impl EnemyStats {
    pub fn of(kind: EnemyKind) -> &'static EnemyStats {
        match kind {
            EnemyKind::Bear => &BEAR,
            EnemyKind::Slime => &SLIME,
            EnemyKind::Swift => &SWIFT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnemyEntity {
    pub id: NetworkId,
    pub kind: EnemyKind,
    pub x: f32,
    pub y: f32,
    pub facing: Direction,
    health: i32,
    alive: bool,
    state: BehaviorState,
    state_timer: f32,
    action_timer: f32,
    cooldown_timer: f32,
    has_struck: bool,
    dwell: f32,
    wander_target: (f32, f32),
    /// Chasing flag as last reported by the Host; replicas only.
    replica_chasing: bool,
}

impl EnemyEntity {
    /// Creates an enemy at full health, idle, with a minimal dwell.
    pub fn new(id: NetworkId, kind: EnemyKind, x: f32, y: f32) -> Self {
        Self {
            id,
            kind,
            x,
            y,
            facing: Direction::Down,
            health: EnemyStats::of(kind).max_health,
            alive: true,
            state: BehaviorState::Idle,
            state_timer: 0.0,
            action_timer: 0.0,
            cooldown_timer: 0.0,
            has_struck: false,
            dwell: WANDER_DWELL_MIN,
            wander_target: (x, y),
            replica_chasing: false,
        }
    }

    /// Creates an authoritative enemy with randomized wander parameters.
    pub fn spawn<R: Rng + ?Sized>(
        id: NetworkId,
        kind: EnemyKind,
        x: f32,
        y: f32,
        rng: &mut R,
    ) -> Self {
        let mut enemy = Self::new(id, kind, x, y);
        enemy.pick_wander_target(rng);
        enemy.reset_dwell(rng);
        enemy
    }

    /// Materializes a replica from its first snapshot.
    pub fn from_snapshot(snapshot: &EnemySnapshot) -> Self {
        let mut enemy = Self::new(snapshot.id, snapshot.kind, snapshot.x, snapshot.y);
        enemy.apply_snapshot(snapshot);
        enemy
    }

    pub fn stats(&self) -> &'static EnemyStats {
        EnemyStats::of(self.kind)
    }

    pub fn health(&self) -> i32 {
        self.health
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn state(&self) -> BehaviorState {
        self.state
    }

    /// Returns true when this call killed the enemy. No-op once dead.
    pub fn take_damage(&mut self, amount: i32) -> bool {
        if !self.alive {
            return false;
        }
        self.health -= amount.max(0);
        if self.health <= 0 {
            self.health = 0;
            self.alive = false;
            self.state = BehaviorState::Dead;
            return true;
        }
        false
    }

    /// Sets health directly, e.g. when restoring a saved game.
    pub fn set_health(&mut self, health: i32) {
        self.health = health.clamp(0, self.stats().max_health);
        self.alive = self.health > 0;
        if !self.alive {
            self.state = BehaviorState::Dead;
        }
    }

    pub fn collision_box(&self) -> Rect {
        self.collision_box_at(self.x, self.y)
    }

    pub fn collision_box_at(&self, x: f32, y: f32) -> Rect {
        Rect::centered(
            x,
            y + ENEMY_BODY_SIZE * COLLISION_Y_OFFSET_FACTOR,
            ENEMY_BODY_SIZE * COLLISION_WIDTH_FACTOR,
            ENEMY_BODY_SIZE * COLLISION_HEIGHT_FACTOR,
        )
    }

    /// Advances the behavior machine by `dt`. `target` is the shared target's
    /// collision box, if any player is alive. Returns the damage of a strike
    /// that landed on the target this tick.
    pub fn think<R: Rng + ?Sized>(
        &mut self,
        dt: f32,
        target: Option<Rect>,
        rng: &mut R,
    ) -> Option<i32> {
        if !self.alive {
            self.state = BehaviorState::Dead;
            return None;
        }

        let stats = self.stats();
        self.state_timer += dt;
        if self.cooldown_timer > 0.0 {
            self.cooldown_timer -= dt;
        }
        if self.action_timer > 0.0 {
            self.action_timer -= dt;
        }

        let sighted = target.filter(|body| {
            let (tx, ty) = body.center();
            distance(self.x, self.y, tx, ty) <= stats.detection_range
        });

        let mut strike = None;
        if self.state == BehaviorState::Attacking {
            if self.action_timer <= 0.0 {
                self.state = BehaviorState::Idle;
                self.state_timer = 0.0;
                self.cooldown_timer = stats.cooldown;
            } else if self.action_timer <= stats.active && !self.has_struck {
                self.has_struck = true;
                if let Some(body) = sighted {
                    if self.reach_to(&body) <= stats.attack_range * STRIKE_TOLERANCE {
                        strike = Some(stats.attack_damage);
                    }
                }
            }
        } else if let Some(body) = sighted {
            if self.reach_to(&body) <= stats.attack_range && self.cooldown_timer <= 0.0 {
                self.state = BehaviorState::Attacking;
                self.action_timer = stats.windup + stats.active;
                self.has_struck = false;
                self.facing = if self.x > body.center().0 {
                    Direction::Left
                } else {
                    Direction::Right
                };
            } else {
                self.state = BehaviorState::Chasing;
            }
        } else {
            match self.state {
                BehaviorState::Chasing => self.start_wandering(rng),
                BehaviorState::Idle if self.state_timer > self.dwell => self.start_wandering(rng),
                BehaviorState::Wandering => {
                    let (wx, wy) = self.wander_target;
                    if distance(self.x, self.y, wx, wy) < WANDER_ARRIVAL
                        || self.state_timer > WANDER_TIMEOUT
                    {
                        self.state = BehaviorState::Idle;
                        self.state_timer = 0.0;
                        self.reset_dwell(rng);
                    }
                }
                _ => {}
            }
        }

        strike
    }

    /// Displacement the current state wants this tick, before validation.
    pub fn movement_intent(&self, dt: f32, target: Option<Rect>) -> (f32, f32) {
        let stats = self.stats();
        match self.state {
            BehaviorState::Chasing => match target {
                Some(body) => {
                    let (tx, ty) = body.center();
                    let d = distance(self.x, self.y, tx, ty);
                    if d > 0.0 && self.reach_to(&body) > stats.attack_range * CHASE_STOP_FACTOR {
                        let step = stats.speed * dt / d;
                        ((tx - self.x) * step, (ty - self.y) * step)
                    } else {
                        (0.0, 0.0)
                    }
                }
                None => (0.0, 0.0),
            },
            BehaviorState::Wandering => {
                let (wx, wy) = self.wander_target;
                let d = distance(self.x, self.y, wx, wy);
                if d > 1.0 {
                    let step = stats.speed * WANDER_SPEED_FACTOR * dt / d;
                    ((wx - self.x) * step, (wy - self.y) * step)
                } else {
                    (0.0, 0.0)
                }
            }
            _ => (0.0, 0.0),
        }
    }

    /// Applies an intended displacement, X then Y. An axis is dropped when the
    /// moved collision box would overlap any of `blockers` or leave passable
    /// ground.
    pub fn apply_movement(
        &mut self,
        intent: (f32, f32),
        map: &dyn Passability,
        blockers: &[Rect],
        bounds: (f32, f32),
    ) {
        let (dx, dy) = intent;
        let mut moved_x = 0.0;
        let mut moved_y = 0.0;

        if dx != 0.0 && self.can_occupy(self.x + dx, self.y, map, blockers) {
            self.x += dx;
            moved_x = dx;
        }
        if dy != 0.0 && self.can_occupy(self.x, self.y + dy, map, blockers) {
            self.y += dy;
            moved_y = dy;
        }

        let half = ENEMY_BODY_SIZE / 2.0;
        self.x = self.x.clamp(half, (bounds.0 - half).max(half));
        self.y = self.y.clamp(half, (bounds.1 - half).max(half));

        if moved_x > 0.0 {
            self.facing = Direction::Right;
        } else if moved_x < 0.0 {
            self.facing = Direction::Left;
        }
        if moved_y.abs() > moved_x.abs() {
            self.facing = if moved_y > 0.0 {
                Direction::Down
            } else {
                Direction::Up
            };
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: &EnemySnapshot) {
        self.kind = snapshot.kind;
        self.x = snapshot.x;
        self.y = snapshot.y;
        self.facing = snapshot.direction;
        self.replica_chasing = snapshot.chasing;
        if !snapshot.alive {
            self.alive = false;
            self.health = 0;
            self.state = BehaviorState::Dead;
        }
    }

    pub fn snapshot(&self) -> EnemySnapshot {
        EnemySnapshot {
            id: self.id,
            x: self.x,
            y: self.y,
            alive: self.alive,
            kind: self.kind,
            direction: self.facing,
            chasing: self.is_chasing(),
        }
    }

    pub fn is_chasing(&self) -> bool {
        self.state == BehaviorState::Chasing || self.replica_chasing
    }

    fn reach_to(&self, body: &Rect) -> f32 {
        self.collision_box().gap(body)
    }

    fn can_occupy(&self, x: f32, y: f32, map: &dyn Passability, blockers: &[Rect]) -> bool {
        let rect = self.collision_box_at(x, y);
        !blockers.iter().any(|b| rect.intersects(b)) && area_passable(map, &rect)
    }

    fn start_wandering<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.state = BehaviorState::Wandering;
        self.pick_wander_target(rng);
        self.reset_dwell(rng);
        self.state_timer = 0.0;
    }

    fn pick_wander_target<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let angle = rng.gen_range(0.0..std::f32::consts::TAU);
        self.wander_target = (
            self.x + angle.cos() * WANDER_DISTANCE,
            self.y + angle.sin() * WANDER_DISTANCE,
        );
    }

    fn reset_dwell<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.dwell = rng.gen_range(WANDER_DWELL_MIN..WANDER_DWELL_MAX);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::OpenArena;
    use assert_approx_eq::assert_approx_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(42)
    }

    /// A player-sized box centred on `(x, y)`.
    fn body(x: f32, y: f32) -> Option<Rect> {
        Some(Rect::centered(x, y, 28.8, 38.4))
    }

    #[test]
    fn test_stats_table() {
        assert_eq!(EnemyStats::of(EnemyKind::Bear).max_health, 150);
        assert_eq!(EnemyStats::of(EnemyKind::Slime).max_health, 100);
        assert_eq!(EnemyStats::of(EnemyKind::Swift).max_health, 50);
        assert_approx_eq!(EnemyStats::of(EnemyKind::Swift).speed, 150.0, 0.001);
    }

    #[test]
    fn test_enemy_creation() {
        let enemy = EnemyEntity::new(1000, EnemyKind::Slime, 100.0, 100.0);
        assert_eq!(enemy.health(), 100);
        assert!(enemy.is_alive());
        assert_eq!(enemy.state(), BehaviorState::Idle);
    }

    #[test]
    fn test_detects_and_chases() {
        let mut rng = rng();
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Bear, 100.0, 100.0);
        let target = body(250.0, 100.0);

        assert_eq!(enemy.think(0.1, target, &mut rng), None);
        assert_eq!(enemy.state(), BehaviorState::Chasing);

        let (dx, dy) = enemy.movement_intent(0.1, target);
        assert_approx_eq!(dx, 4.5, 0.001);
        assert_approx_eq!(dy, 0.0, 0.001);
    }

    #[test]
    fn test_ignores_target_out_of_range() {
        let mut rng = rng();
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Bear, 100.0, 100.0);
        enemy.think(0.1, body(900.0, 100.0), &mut rng);
        assert_eq!(enemy.state(), BehaviorState::Idle);
    }

    #[test]
    fn test_idle_dwell_then_wander() {
        let mut rng = rng();
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Slime, 300.0, 300.0);
        for _ in 0..21 {
            enemy.think(0.1, None, &mut rng);
        }
        assert_eq!(enemy.state(), BehaviorState::Wandering);

        let (dx, dy) = enemy.movement_intent(0.1, None);
        let step = (dx * dx + dy * dy).sqrt();
        assert_approx_eq!(step, 35.0 * 0.7 * 0.1, 0.001);
    }

    #[test]
    fn test_attack_strikes_once() {
        let mut rng = rng();
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Slime, 100.0, 100.0);
        let target = body(120.0, 100.0);

        enemy.think(0.05, target, &mut rng);
        assert_eq!(enemy.state(), BehaviorState::Attacking);
        assert_eq!(enemy.facing, Direction::Right);
        assert_eq!(enemy.movement_intent(0.05, target), (0.0, 0.0));

        let mut strikes = Vec::new();
        for _ in 0..20 {
            if let Some(damage) = enemy.think(0.05, target, &mut rng) {
                strikes.push(damage);
            }
        }
        assert_eq!(strikes, vec![5]);
    }

    #[test]
    fn test_strike_misses_when_target_left() {
        let mut rng = rng();
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Slime, 100.0, 100.0);
        enemy.think(0.05, body(120.0, 100.0), &mut rng);
        assert_eq!(enemy.state(), BehaviorState::Attacking);

        let mut strikes = 0;
        for _ in 0..12 {
            if enemy.think(0.05, body(200.0, 100.0), &mut rng).is_some() {
                strikes += 1;
            }
        }
        assert_eq!(strikes, 0);
    }

    #[test]
    fn test_reach_measured_between_box_edges() {
        let mut rng = rng();
        // Centres 50 apart, boxes 6.8 apart: within a Swift's 30 reach.
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Swift, 100.0, 100.0);
        enemy.think(0.05, body(100.0, 150.0), &mut rng);
        assert_eq!(enemy.state(), BehaviorState::Attacking);

        // Boxes 20 apart: close enough to stop chasing, cooldown still running.
        let mut chaser = EnemyEntity::new(1001, EnemyKind::Swift, 100.0, 100.0);
        chaser.cooldown_timer = 1.0;
        chaser.think(0.05, body(151.2, 100.0), &mut rng);
        assert_eq!(chaser.state(), BehaviorState::Chasing);
        assert_eq!(chaser.movement_intent(0.05, body(151.2, 100.0)), (0.0, 0.0));
        assert_ne!(chaser.movement_intent(0.05, body(200.0, 100.0)), (0.0, 0.0));
    }

    #[test]
    fn test_cooldown_after_attack() {
        let mut rng = rng();
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Swift, 100.0, 100.0);
        let target = body(110.0, 100.0);
        enemy.think(0.05, target, &mut rng);
        assert_eq!(enemy.state(), BehaviorState::Attacking);

        // windup + active = 0.35s
        for _ in 0..8 {
            enemy.think(0.05, target, &mut rng);
        }
        assert_ne!(enemy.state(), BehaviorState::Attacking);

        // Still cooling down: chases in place instead of attacking again.
        enemy.think(0.05, target, &mut rng);
        assert_eq!(enemy.state(), BehaviorState::Chasing);
    }

    #[test]
    fn test_death_is_terminal() {
        let mut rng = rng();
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Slime, 100.0, 100.0);
        assert!(!enemy.take_damage(50));
        assert!(enemy.take_damage(50));
        assert!(!enemy.take_damage(50));
        assert_eq!(enemy.health(), 0);
        assert_eq!(enemy.state(), BehaviorState::Dead);

        assert_eq!(enemy.think(0.1, body(110.0, 100.0), &mut rng), None);
        assert_eq!(enemy.state(), BehaviorState::Dead);
        assert_eq!(enemy.movement_intent(0.1, body(300.0, 100.0)), (0.0, 0.0));
    }

    #[test]
    fn test_player_blocks_movement_per_axis() {
        let arena = OpenArena::new(1280.0, 720.0);
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Bear, 100.0, 100.0);
        let blocker = Rect::new(130.0, 0.0, 20.0, 300.0);

        enemy.apply_movement((10.0, 5.0), &arena, &[blocker], (1280.0, 720.0));
        assert_eq!(enemy.x, 100.0);
        assert_eq!(enemy.y, 105.0);
        assert_eq!(enemy.facing, Direction::Down);
    }

    #[test]
    fn test_facing_follows_dominant_axis() {
        let arena = OpenArena::new(1280.0, 720.0);
        let mut enemy = EnemyEntity::new(1000, EnemyKind::Bear, 100.0, 100.0);
        enemy.apply_movement((-4.0, 1.0), &arena, &[], (1280.0, 720.0));
        assert_eq!(enemy.facing, Direction::Left);
        enemy.apply_movement((1.0, -4.0), &arena, &[], (1280.0, 720.0));
        assert_eq!(enemy.facing, Direction::Up);
    }

    #[test]
    fn test_replica_snapshot() {
        let snapshot = EnemySnapshot {
            id: 1001,
            x: 40.0,
            y: 50.0,
            alive: true,
            kind: EnemyKind::Swift,
            direction: Direction::Up,
            chasing: true,
        };
        let mut enemy = EnemyEntity::from_snapshot(&snapshot);
        assert_eq!(enemy.id, 1001);
        assert_eq!(enemy.kind, EnemyKind::Swift);
        assert!(enemy.is_chasing());
        assert_eq!(enemy.snapshot(), snapshot);

        enemy.apply_snapshot(&EnemySnapshot {
            alive: false,
            ..snapshot
        });
        assert!(!enemy.is_alive());
    }
}
