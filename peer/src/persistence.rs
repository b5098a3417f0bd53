//! Serializable snapshot of a session, for an external save facility.
//!
//! Enemy kinds are stored by name so saves stay readable and survive enum
//! reordering. Restoring always yields an authoritative world with no peer.

use crate::enemy::EnemyEntity;
use crate::player::PlayerEntity;
use crate::world::World;
use log::warn;
use serde::{Deserialize, Serialize};
use shared::{Direction, EnemyKind, NetworkId, Role, FIRST_ENEMY_ID};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerRecord {
    pub id: NetworkId,
    pub x: f32,
    pub y: f32,
    pub health: i32,
    pub is_local: bool,
    pub facing: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnemyRecord {
    pub id: NetworkId,
    pub kind: String,
    pub x: f32,
    pub y: f32,
    pub health: i32,
    pub facing: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    pub role: Role,
    pub local_id: Option<NetworkId>,
    pub score: u32,
    pub players: Vec<PlayerRecord>,
    pub enemies: Vec<EnemyRecord>,
    pub time_since_last_spawn: f32,
}

impl World {
    pub fn capture(&self, role: Role, local_id: Option<NetworkId>) -> SaveState {
        let players = self
            .players
            .values()
            .map(|p| PlayerRecord {
                id: p.id,
                x: p.x,
                y: p.y,
                health: p.health(),
                is_local: p.is_local,
                facing: p.facing,
            })
            .collect();

        let enemies = self
            .enemies
            .values()
            .filter(|e| e.is_alive())
            .map(|e| EnemyRecord {
                id: e.id,
                kind: e.kind.name().to_string(),
                x: e.x,
                y: e.y,
                health: e.health(),
                facing: e.facing,
            })
            .collect();

        SaveState {
            role,
            local_id,
            score: self.score(),
            players,
            enemies,
            time_since_last_spawn: self.time_since_last_spawn,
        }
    }

    /// Replaces every entity with the saved ones and switches to single-player.
    pub fn restore(&mut self, save: &SaveState) {
        self.clear();
        self.set_role(Role::None);

        for record in &save.players {
            let mut player = PlayerEntity::new(record.id, record.is_local, record.x, record.y);
            player.facing = record.facing;
            player.set_health(record.health);
            self.players.insert(record.id, player);
        }

        for record in &save.enemies {
            let kind = EnemyKind::from_name(&record.kind).unwrap_or_else(|| {
                warn!(
                    "Unknown enemy kind '{}' for enemy {}, restoring as {}",
                    record.kind,
                    record.id,
                    EnemyKind::Bear.name()
                );
                EnemyKind::Bear
            });
            let mut enemy = EnemyEntity::new(record.id, kind, record.x, record.y);
            enemy.facing = record.facing;
            enemy.set_health(record.health);
            self.insert_enemy(enemy);
        }

        self.next_enemy_id = self.next_enemy_id.max(FIRST_ENEMY_ID);
        self.status.score = save.score;
        self.time_since_last_spawn = save.time_since_last_spawn;
    }
}
