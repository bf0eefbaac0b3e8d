//! Bounded integer grid shared by taxis and requests.
//!
//! Distances are Manhattan (L1): taxis move along grid axes, so the number of
//! cells travelled between two points is `|dx| + |dy|`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DispatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GridPos {
    pub x: u32,
    pub y: u32,
}

impl GridPos {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(self, other: GridPos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Grid dimensions `n × m`; valid positions are `[0, n) × [0, m)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridBounds {
    pub n: u32,
    pub m: u32,
}

impl Default for GridBounds {
    fn default() -> Self {
        Self { n: 50, m: 50 }
    }
}

impl GridBounds {
    pub const fn new(n: u32, m: u32) -> Self {
        Self { n, m }
    }

    pub fn contains(&self, pos: GridPos) -> bool {
        pos.x < self.n && pos.y < self.m
    }

    /// Converts raw wire coordinates into a grid position, rejecting anything
    /// outside the configured bounds (including negatives).
    pub fn checked_pos(&self, x: i64, y: i64) -> Result<GridPos, DispatchError> {
        if x < 0 || y < 0 || x >= i64::from(self.n) || y >= i64::from(self.m) {
            return Err(DispatchError::OutOfBounds {
                x,
                y,
                n: self.n,
                m: self.m,
            });
        }
        Ok(GridPos::new(x as u32, y as u32))
    }

    /// Nearest in-bounds position to `(x, y)`.
    pub fn clamp(&self, x: i64, y: i64) -> GridPos {
        let max_x = i64::from(self.n.saturating_sub(1));
        let max_y = i64::from(self.m.saturating_sub(1));
        GridPos::new(x.clamp(0, max_x) as u32, y.clamp(0, max_y) as u32)
    }

    pub fn cell_count(&self) -> u64 {
        u64::from(self.n) * u64::from(self.m)
    }
}
