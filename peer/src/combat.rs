//! Authoritative hit resolution, run once per tick after the world update.
//!
//! Order is fixed: player melee, enemy contact, projectiles. Resolution stops
//! as soon as a player dies, since that ends the game.

use crate::config::SessionConfig;
use crate::world::World;
use log::{debug, info};
use shared::NetworkId;

#[derive(Debug, Clone, Copy)]
pub struct CombatResolver {
    attack_damage: i32,
    contact_damage: i32,
    projectile_damage: i32,
    score_per_kill: u32,
}

/// What a resolution pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CombatOutcome {
    pub killed_enemies: Vec<NetworkId>,
    pub fallen_players: Vec<NetworkId>,
}

impl CombatResolver {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            attack_damage: config.player_attack_damage,
            contact_damage: config.contact_damage,
            projectile_damage: config.projectile_damage,
            score_per_kill: config.score_per_kill,
        }
    }

    pub fn resolve(&self, world: &mut World) -> CombatOutcome {
        let mut outcome = CombatOutcome::default();
        if world.is_game_over() {
            return outcome;
        }

        self.resolve_melee(world, &mut outcome);
        if world.is_game_over() {
            return outcome;
        }

        self.resolve_contact(world, &mut outcome);
        if world.is_game_over() {
            return outcome;
        }

        self.resolve_projectiles(world, &mut outcome);
        outcome
    }

    fn resolve_melee(&self, world: &mut World, outcome: &mut CombatOutcome) {
        let mut kills = 0;
        let World {
            players, enemies, ..
        } = world;

        for player in players.values_mut() {
            let Some(hitbox) = player.attack_hitbox() else {
                continue;
            };
            for enemy in enemies.values_mut() {
                if !enemy.is_alive() || !hitbox.intersects(&enemy.collision_box()) {
                    continue;
                }
                // One hit per enemy per attack window.
                if !player.claim_hit(enemy.id) {
                    continue;
                }
                debug!("Player {} strikes enemy {}", player.id, enemy.id);
                if enemy.take_damage(self.attack_damage) {
                    info!("Player {} killed enemy {}", player.id, enemy.id);
                    outcome.killed_enemies.push(enemy.id);
                    kills += 1;
                }
            }
        }

        world.add_score(kills * self.score_per_kill);
    }

    fn resolve_contact(&self, world: &mut World, outcome: &mut CombatOutcome) {
        let World {
            players, enemies, ..
        } = world;

        'enemies: for enemy in enemies.values().filter(|e| e.is_alive()) {
            let enemy_box = enemy.collision_box();
            for player in players.values_mut() {
                if !player.is_alive() || !player.collision_box().intersects(&enemy_box) {
                    continue;
                }
                if player.take_damage(self.contact_damage) {
                    info!("Player {} was killed by enemy {}", player.id, enemy.id);
                    outcome.fallen_players.push(player.id);
                    break 'enemies;
                }
            }
        }

        if !outcome.fallen_players.is_empty() {
            world.set_game_over();
        }
    }

    fn resolve_projectiles(&self, world: &mut World, outcome: &mut CombatOutcome) {
        let mut kills = 0;
        let World {
            projectiles,
            enemies,
            ..
        } = world;

        for projectile in projectiles.iter_mut().filter(|p| p.is_alive()) {
            let bounds = projectile.bounds();
            let hit = enemies
                .values_mut()
                .find(|e| e.is_alive() && bounds.intersects(&e.collision_box()));

            if let Some(enemy) = hit {
                projectile.deactivate();
                if enemy.take_damage(self.projectile_damage) {
                    info!("Projectile killed enemy {}", enemy.id);
                    outcome.killed_enemies.push(enemy.id);
                    kills += 1;
                }
            }
        }
        projectiles.retain(|p| p.is_alive());

        world.add_score(kills * self.score_per_kill);
    }
}
