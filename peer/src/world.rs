//! The entity store and the per-tick simulation.
//!
//! Players, enemies and projectiles live here keyed by network id. Ordered
//! maps keep iteration, and with it target selection and snapshot layout,
//! deterministic. Whether this world simulates enemies or only mirrors them
//! depends on its [`Role`].

use crate::config::SessionConfig;
use crate::enemy::{EnemyEntity, ENEMY_BODY_SIZE};
use crate::map::Passability;
use crate::player::{MovementIntent, PlayerEntity, PLAYER_BODY_SIZE};
use crate::projectile::Projectile;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::protocol::{ClientUpdate, ServerUpdate};
use shared::{EnemyKind, NetworkId, Rect, Role, CLIENT_PLAYER_ID, FIRST_ENEMY_ID, HOST_PLAYER_ID};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Row step used when searching for a free spawn row.
const START_ROW_STEP: f32 = PLAYER_BODY_SIZE / 2.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GameStatus {
    pub score: u32,
    pub game_over: bool,
}

pub struct World {
    role: Role,
    width: f32,
    height: f32,
    map: Arc<dyn Passability>,
    pub(crate) players: BTreeMap<NetworkId, PlayerEntity>,
    pub(crate) enemies: BTreeMap<NetworkId, EnemyEntity>,
    pub(crate) projectiles: Vec<Projectile>,
    pub(crate) status: GameStatus,
    pub(crate) next_enemy_id: NetworkId,
    pub(crate) time_since_last_spawn: f32,
    spawn_interval: f32,
    max_enemies: usize,
    spawn_attempts: u32,
    pub(crate) rng: StdRng,
}

impl World {
    pub fn new(config: &SessionConfig, map: Arc<dyn Passability>) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            role: Role::None,
            width: config.world_width,
            height: config.world_height,
            map,
            players: BTreeMap::new(),
            enemies: BTreeMap::new(),
            projectiles: Vec::new(),
            status: GameStatus::default(),
            next_enemy_id: FIRST_ENEMY_ID,
            time_since_last_spawn: 0.0,
            spawn_interval: config.spawn_interval,
            max_enemies: config.max_enemies,
            spawn_attempts: config.spawn_attempts,
            rng,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn set_role(&mut self, role: Role) {
        self.role = role;
    }

    pub fn is_authoritative(&self) -> bool {
        self.role.is_authoritative()
    }

    pub fn bounds(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    pub fn map(&self) -> &dyn Passability {
        self.map.as_ref()
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn score(&self) -> u32 {
        self.status.score
    }

    pub fn is_game_over(&self) -> bool {
        self.status.game_over
    }

    pub fn add_score(&mut self, amount: u32) {
        self.status.score += amount;
    }

    pub fn set_game_over(&mut self) {
        if !self.status.game_over {
            info!("Game over, final score {}", self.status.score);
            self.status.game_over = true;
        }
    }

    /// Drops every entity and resets score and spawn bookkeeping.
    pub fn clear(&mut self) {
        self.players.clear();
        self.enemies.clear();
        self.projectiles.clear();
        self.status = GameStatus::default();
        self.next_enemy_id = FIRST_ENEMY_ID;
        self.time_since_last_spawn = 0.0;
    }

    pub fn player(&self, id: NetworkId) -> Option<&PlayerEntity> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: NetworkId) -> Option<&mut PlayerEntity> {
        self.players.get_mut(&id)
    }

    pub fn players(&self) -> impl Iterator<Item = &PlayerEntity> {
        self.players.values()
    }

    pub fn local_player(&self) -> Option<&PlayerEntity> {
        self.players.values().find(|p| p.is_local)
    }

    pub fn local_player_mut(&mut self) -> Option<&mut PlayerEntity> {
        self.players.values_mut().find(|p| p.is_local)
    }

    pub fn enemy(&self, id: NetworkId) -> Option<&EnemyEntity> {
        self.enemies.get(&id)
    }

    pub fn enemy_mut(&mut self, id: NetworkId) -> Option<&mut EnemyEntity> {
        self.enemies.get_mut(&id)
    }

    pub fn enemies(&self) -> impl Iterator<Item = &EnemyEntity> {
        self.enemies.values()
    }

    pub fn enemy_ids(&self) -> BTreeSet<NetworkId> {
        self.enemies.keys().copied().collect()
    }

    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    /// Inserts an enemy under its own id, keeping future ids above it.
    pub fn insert_enemy(&mut self, enemy: EnemyEntity) {
        self.next_enemy_id = self.next_enemy_id.max(enemy.id.saturating_add(1));
        self.enemies.insert(enemy.id, enemy);
    }

    /// Creates the local player at its role's slot: the left quarter for the
    /// authoritative side, the right quarter for a Client.
    pub fn spawn_local_player(&mut self, id: NetworkId) {
        if self.players.contains_key(&id) {
            return;
        }
        let x = if self.is_authoritative() {
            self.width / 4.0
        } else {
            self.width * 3.0 / 4.0
        };
        let y = self.find_start_y(x);
        info!("Spawning local player {} at ({:.1}, {:.1})", id, x, y);
        self.players.insert(id, PlayerEntity::new(id, true, x, y));
    }

    /// Creates the peer's player at the slot opposite ours, if missing.
    pub fn ensure_remote_player(&mut self, id: NetworkId) {
        if self.players.contains_key(&id) {
            return;
        }
        let x = if self.is_authoritative() {
            self.width * 3.0 / 4.0
        } else {
            self.width / 4.0
        };
        let y = self.find_start_y(x);
        debug!("Adding remote player {} at ({:.1}, {:.1})", id, x, y);
        self.players.insert(id, PlayerEntity::new(id, false, x, y));
    }

    pub fn remove_player(&mut self, id: NetworkId) -> Option<PlayerEntity> {
        self.players.remove(&id)
    }

    /// First row, scanning outward from the middle, where a player fits at `x`.
    pub fn find_start_y(&self, x: f32) -> f32 {
        let middle = self.height / 2.0;
        let sample = PlayerEntity::new(0, false, x, 0.0);
        let fits = |y: f32| {
            let rect = sample.collision_box_at(x, y);
            self.map
                .is_area_passable(rect.x, rect.y, rect.width, rect.height)
        };

        if fits(middle) {
            return middle;
        }
        let mut offset = START_ROW_STEP;
        while offset < middle {
            if fits(middle + offset) {
                return middle + offset;
            }
            if fits(middle - offset) {
                return middle - offset;
            }
            offset += START_ROW_STEP;
        }
        warn!("No passable start row at x={:.1}, using the map centre", x);
        middle
    }

    /// The single target shared by every enemy: the local player while alive,
    /// else the first living remote player.
    pub fn current_target(&self) -> Option<NetworkId> {
        if let Some(local) = self.local_player().filter(|p| p.is_alive()) {
            return Some(local.id);
        }
        self.players
            .values()
            .find(|p| !p.is_local && p.is_alive())
            .map(|p| p.id)
    }

    /// Advances every entity by `dt`. Returns the players killed by enemy
    /// strikes during this step.
    pub fn update(&mut self, dt: f32) -> Vec<NetworkId> {
        let authoritative = self.is_authoritative();
        let bounds = self.bounds();

        if authoritative {
            self.enemies.retain(|_, enemy| enemy.is_alive());
            self.tick_spawner(dt);
        }

        for player in self.players.values_mut() {
            if player.is_local || authoritative {
                player.simulate(dt, self.map.as_ref(), bounds);
            } else {
                player.advance_replica(dt);
            }
        }

        let mut deaths = Vec::new();
        if authoritative {
            deaths = self.run_enemies(dt);
        }

        for projectile in &mut self.projectiles {
            projectile.update(dt);
        }
        self.projectiles
            .retain(|p| p.is_alive() && !p.is_out_of_bounds(bounds.0, bounds.1));

        deaths
    }

    fn run_enemies(&mut self, dt: f32) -> Vec<NetworkId> {
        let bounds = self.bounds();
        let target_id = self.current_target();
        let mut deaths = Vec::new();

        for enemy in self.enemies.values_mut() {
            if !enemy.is_alive() {
                continue;
            }

            let target = target_id
                .and_then(|id| self.players.get(&id))
                .filter(|p| p.is_alive())
                .map(|p| p.collision_box());

            if let Some(damage) = enemy.think(dt, target, &mut self.rng) {
                if let Some(player) = target_id.and_then(|id| self.players.get_mut(&id)) {
                    debug!("Enemy {} hits player {} for {}", enemy.id, player.id, damage);
                    if player.take_damage(damage) {
                        deaths.push(player.id);
                    }
                }
            }

            let blockers: Vec<Rect> = self
                .players
                .values()
                .filter(|p| p.is_alive())
                .map(|p| p.collision_box())
                .collect();
            let intent = enemy.movement_intent(dt, target);
            enemy.apply_movement(intent, self.map.as_ref(), &blockers, bounds);
        }

        deaths
    }

    fn tick_spawner(&mut self, dt: f32) {
        self.time_since_last_spawn += dt;
        if self.time_since_last_spawn >= self.spawn_interval
            && self.enemies.len() < self.max_enemies
        {
            self.spawn_enemy();
            self.time_since_last_spawn = 0.0;
        }
    }

    /// Places a random enemy on passable ground. Gives up for this cycle once
    /// the attempt budget is spent.
    pub fn spawn_enemy(&mut self) -> Option<NetworkId> {
        if !self.is_authoritative() {
            return None;
        }

        let size = ENEMY_BODY_SIZE;
        let spot = (0..self.spawn_attempts).find_map(|_| {
            let x = self.rng.gen_range(0.0..(self.width - size).max(1.0)) + size / 2.0;
            let y = self.rng.gen_range(0.0..(self.height - size).max(1.0)) + size / 2.0;
            self.map
                .is_area_passable(x - size / 2.0, y - size / 2.0, size, size)
                .then_some((x, y))
        });

        let Some((x, y)) = spot else {
            warn!(
                "No passable spawn point after {} attempts, skipping",
                self.spawn_attempts
            );
            return None;
        };

        let kind = EnemyKind::ALL[self.rng.gen_range(0..EnemyKind::ALL.len())];
        let id = self.next_enemy_id;
        self.next_enemy_id += 1;
        let enemy = EnemyEntity::spawn(id, kind, x, y, &mut self.rng);
        info!("Spawned {} {} at ({:.1}, {:.1})", kind.name(), id, x, y);
        self.enemies.insert(id, enemy);
        Some(id)
    }

    /// Fires from the local player toward a point. Authoritative side only.
    pub fn fire_projectile(&mut self, target_x: f32, target_y: f32) -> bool {
        if !self.is_authoritative() {
            return false;
        }
        match self.local_player().filter(|p| p.is_alive()) {
            Some(player) => {
                let projectile = Projectile::new(player.x, player.y, target_x, target_y);
                self.projectiles.push(projectile);
                true
            }
            None => false,
        }
    }

    pub fn add_projectile(&mut self, projectile: Projectile) {
        self.projectiles.push(projectile);
    }

    /// Maps a Client's report onto its player's held keys and attack edge.
    /// Never touches a local player. Returns whether anything was applied.
    pub fn apply_client_update(&mut self, update: &ClientUpdate) -> bool {
        let Some(player) = self.players.get_mut(&update.player_id) else {
            debug!("ClientUpdate for unknown player {}", update.player_id);
            return false;
        };
        if player.is_local {
            warn!("Ignoring ClientUpdate aimed at local player {}", update.player_id);
            return false;
        }

        player.intent = if update.is_moving {
            MovementIntent::from_direction(update.direction)
        } else {
            MovementIntent::default()
        };
        player.apply_remote_attack_flag(update.attacking);
        true
    }

    /// Mirrors a Host snapshot: both player slots, then the enemy set.
    /// Enemies missing from the snapshot are dropped.
    pub fn apply_server_update(&mut self, update: &ServerUpdate) {
        if self.is_authoritative() {
            debug!("Ignoring ServerUpdate on the authoritative side");
            return;
        }

        if let Some(p0) = self.players.get_mut(&HOST_PLAYER_ID) {
            p0.apply_network_state(&update.p0);
        }
        if let (Some(snapshot), Some(p1)) = (&update.p1, self.players.get_mut(&CLIENT_PLAYER_ID)) {
            p1.apply_network_state(snapshot);
        }

        let mut seen = BTreeSet::new();
        for snapshot in &update.enemies {
            seen.insert(snapshot.id);
            match self.enemies.get_mut(&snapshot.id) {
                Some(enemy) => enemy.apply_snapshot(snapshot),
                None if snapshot.alive => {
                    self.enemies
                        .insert(snapshot.id, EnemyEntity::from_snapshot(snapshot));
                }
                None => {}
            }
        }

        let before = self.enemies.len();
        self.enemies.retain(|id, _| seen.contains(id));
        if self.enemies.len() < before {
            debug!("Removed {} stale enemies", before - self.enemies.len());
        }
    }

    /// Full snapshot for the Client. `None` until the Host player exists.
    pub fn build_server_update(&self) -> Option<ServerUpdate> {
        let p0 = self.players.get(&HOST_PLAYER_ID)?.snapshot();
        let p1 = self.players.get(&CLIENT_PLAYER_ID).map(|p| p.snapshot());
        let enemies = self
            .enemies
            .values()
            .filter(|e| e.is_alive())
            .map(|e| e.snapshot())
            .collect();

        Some(ServerUpdate { p0, p1, enemies })
    }

    pub fn build_client_update(&self) -> Option<ClientUpdate> {
        self.local_player().map(|p| p.client_update())
    }
}
