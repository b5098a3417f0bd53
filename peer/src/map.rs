//! Map passability collaborator.
//!
//! Tile parsing and rendering live outside the session layer; the simulation
//! only ever asks whether an axis-aligned area is walkable.

/// Pure predicate over the level geometry.
pub trait Passability: Send + Sync {
    fn is_area_passable(&self, x: f32, y: f32, width: f32, height: f32) -> bool;
}

/// Obstacle-free map: everything inside the bounds is walkable.
#[derive(Debug, Clone)]
pub struct OpenArena {
    pub width: f32,
    pub height: f32,
}

impl OpenArena {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

impl Passability for OpenArena {
    fn is_area_passable(&self, x: f32, y: f32, width: f32, height: f32) -> bool {
        x >= 0.0 && y >= 0.0 && x + width <= self.width && y + height <= self.height
    }
}

/// Grid of square tiles, `true` meaning blocked. Areas outside the grid are blocked.
#[derive(Debug, Clone)]
pub struct TileGrid {
    tile_size: f32,
    columns: usize,
    rows: usize,
    blocked: Vec<bool>,
}

impl TileGrid {
    /// Builds a grid from text rows where `#` marks a wall and anything else is floor.
    pub fn from_rows(tile_size: f32, rows: &[&str]) -> Self {
        let columns = rows.iter().map(|row| row.len()).max().unwrap_or(0);
        let mut blocked = vec![false; columns * rows.len()];
        for (r, row) in rows.iter().enumerate() {
            for (c, ch) in row.chars().enumerate() {
                blocked[r * columns + c] = ch == '#';
            }
        }

        Self {
            tile_size,
            columns,
            rows: rows.len(),
            blocked,
        }
    }

    pub fn pixel_width(&self) -> f32 {
        self.columns as f32 * self.tile_size
    }

    pub fn pixel_height(&self) -> f32 {
        self.rows as f32 * self.tile_size
    }

    fn is_blocked(&self, column: usize, row: usize) -> bool {
        self.blocked[row * self.columns + column]
    }
}

impl Passability for TileGrid {
    fn is_area_passable(&self, x: f32, y: f32, width: f32, height: f32) -> bool {
        if x < 0.0 || y < 0.0 || x + width > self.pixel_width() || y + height > self.pixel_height()
        {
            return false;
        }

        // The far edge is exclusive so an area flush against a wall stays walkable.
        let first_col = (x / self.tile_size).floor() as usize;
        let first_row = (y / self.tile_size).floor() as usize;
        let last_col = (((x + width) / self.tile_size).ceil() as usize).min(self.columns);
        let last_row = (((y + height) / self.tile_size).ceil() as usize).min(self.rows);

        (first_row..last_row)
            .all(|row| (first_col..last_col).all(|col| !self.is_blocked(col, row)))
    }
}
