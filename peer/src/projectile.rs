use shared::{distance, Rect};

pub const PROJECTILE_SPEED: f32 = 350.0;
pub const PROJECTILE_MAX_TRAVEL: f32 = 300.0;
pub const PROJECTILE_RADIUS: f32 = 5.0;

/// Straight-flying shot. Local to whichever peer fired it, never replicated.
#[derive(Debug, Clone)]
pub struct Projectile {
    pub x: f32,
    pub y: f32,
    velocity: (f32, f32),
    origin: (f32, f32),
    alive: bool,
}

impl Projectile {
    /// Aims from `(x, y)` toward `(target_x, target_y)`. A zero-length aim fires upward.
    pub fn new(x: f32, y: f32, target_x: f32, target_y: f32) -> Self {
        let dx = target_x - x;
        let dy = target_y - y;
        let magnitude = (dx * dx + dy * dy).sqrt();
        let velocity = if magnitude > 0.0 {
            (dx / magnitude * PROJECTILE_SPEED, dy / magnitude * PROJECTILE_SPEED)
        } else {
            (0.0, -PROJECTILE_SPEED)
        };

        Self {
            x,
            y,
            velocity,
            origin: (x, y),
            alive: true,
        }
    }

    pub fn update(&mut self, dt: f32) {
        if !self.alive {
            return;
        }
        self.x += self.velocity.0 * dt;
        self.y += self.velocity.1 * dt;
        if self.distance_travelled() > PROJECTILE_MAX_TRAVEL {
            self.alive = false;
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Consumed by an impact.
    pub fn deactivate(&mut self) {
        self.alive = false;
    }

    pub fn distance_travelled(&self) -> f32 {
        distance(self.origin.0, self.origin.1, self.x, self.y)
    }

    pub fn is_out_of_bounds(&self, width: f32, height: f32) -> bool {
        self.x < -PROJECTILE_RADIUS
            || self.x > width + PROJECTILE_RADIUS
            || self.y < -PROJECTILE_RADIUS
            || self.y > height + PROJECTILE_RADIUS
    }

    pub fn bounds(&self) -> Rect {
        Rect::centered(
            self.x,
            self.y,
            PROJECTILE_RADIUS * 2.0,
            PROJECTILE_RADIUS * 2.0,
        )
    }
}
