//! Vocabulary shared by both ends of a session: identities, facing, enemy kinds,
//! the collision rectangle and the wire protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

pub mod protocol;

/// Stable identity of an entity for the whole session.
pub type NetworkId = u32;

/// The Host's own player.
pub const HOST_PLAYER_ID: NetworkId = 0;
/// The single joined Client's player.
pub const CLIENT_PLAYER_ID: NetworkId = 1;
/// Enemies are numbered upward from here by the authoritative side.
pub const FIRST_ENEMY_ID: NetworkId = 1000;

/// Which side of the session this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Role {
    /// Single-player: authoritative, no transport.
    #[default]
    None,
    /// Authoritative side that accepts one Client.
    Host,
    /// Non-authoritative side that renders Host snapshots.
    Client,
}

impl Role {
    /// Host and single-player own the simulation.
    pub fn is_authoritative(self) -> bool {
        matches!(self, Role::Host | Role::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Direction::Up => "UP",
            Direction::Down => "DOWN",
            Direction::Left => "LEFT",
            Direction::Right => "RIGHT",
        };
        f.write_str(name)
    }
}

/// Enemy species. Per-kind tuning lives in a data table on the simulation side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnemyKind {
    Bear,
    Slime,
    Swift,
}

impl EnemyKind {
    pub const ALL: [EnemyKind; 3] = [EnemyKind::Bear, EnemyKind::Slime, EnemyKind::Swift];

    pub fn name(self) -> &'static str {
        match self {
            EnemyKind::Bear => "bear",
            EnemyKind::Slime => "slime",
            EnemyKind::Swift => "swift",
        }
    }

    /// Case-insensitive lookup by the name used in saved games.
    pub fn from_name(name: &str) -> Option<EnemyKind> {
        EnemyKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }
}

/// Discrete enemy AI states. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BehaviorState {
    #[default]
    Idle,
    Wandering,
    Chasing,
    Attacking,
    Dead,
}

/// Axis-aligned rectangle used for gameplay collision, origin at the top-left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle of the given size centred on `(cx, cy)`.
    pub fn centered(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    pub fn max_x(&self) -> f32 {
        self.x + self.width
    }

    pub fn max_y(&self) -> f32 {
        self.y + self.height
    }

    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Edges that merely touch do not count as overlap.
    pub fn intersects(&self, other: &Rect) -> bool {
        !(self.max_x() <= other.x
            || other.max_x() <= self.x
            || self.max_y() <= other.y
            || other.max_y() <= self.y)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Shortest distance between the two outlines, zero when they touch or overlap.
    pub fn gap(&self, other: &Rect) -> f32 {
        let dx = (other.x - self.max_x()).max(self.x - other.max_x()).max(0.0);
        let dy = (other.y - self.max_y()).max(self.y - other.max_y()).max(0.0);
        (dx * dx + dy * dy).sqrt()
    }
}

/// Euclidean distance between two points.
pub fn distance(ax: f32, ay: f32, bx: f32, by: f32) -> f32 {
    let dx = bx - ax;
    let dy = by - ay;
    (dx * dx + dy * dy).sqrt()
}
