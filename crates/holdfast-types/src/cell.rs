//! Spatial partition key.
//!
//! The world is cut into fixed-size square cells of `2^CELL_SHIFT` blocks per
//! side. A [`CellId`] names one cell by world name and integer grid
//! coordinates; it is the key of the territory cache and the locality
//! tracker.

use serde::{Deserialize, Serialize};

/// Log2 of the cell edge length in blocks (16 blocks per cell edge).
pub const CELL_SHIFT: u32 = 4;

/// Identifier of one fixed-size spatial partition.
///
/// Immutable and compared by value. Two cells are equal when they share the
/// world name and both grid coordinates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId {
    /// Name of the world the cell belongs to.
    world: String,
    /// Grid coordinate along the x axis.
    x: i32,
    /// Grid coordinate along the z axis.
    z: i32,
}

impl CellId {
    /// Create a cell identifier from grid coordinates.
    pub fn new(world: impl Into<String>, x: i32, z: i32) -> Self {
        Self {
            world: world.into(),
            x,
            z,
        }
    }

    /// Create the identifier of the cell containing the given block position.
    ///
    /// Negative block coordinates round toward negative infinity, so block
    /// `-1` lives in cell `-1`, not cell `0`.
    pub fn from_block(world: impl Into<String>, block_x: i32, block_z: i32) -> Self {
        Self::new(
            world,
            block_x.checked_shr(CELL_SHIFT).unwrap_or_default(),
            block_z.checked_shr(CELL_SHIFT).unwrap_or_default(),
        )
    }

    /// Name of the world this cell belongs to.
    pub fn world(&self) -> &str {
        &self.world
    }

    /// Grid coordinate along the x axis.
    pub const fn x(&self) -> i32 {
        self.x
    }

    /// Grid coordinate along the z axis.
    pub const fn z(&self) -> i32 {
        self.z
    }

    /// The cell displaced by `(dx, dz)` in the same world.
    ///
    /// Returns `None` when the displacement leaves the `i32` grid.
    pub fn offset(&self, dx: i32, dz: i32) -> Option<Self> {
        Some(Self {
            world: self.world.clone(),
            x: self.x.checked_add(dx)?,
            z: self.z.checked_add(dz)?,
        })
    }

    /// Whether this cell belongs to the named world.
    pub fn in_world(&self, world: &str) -> bool {
        self.world == world
    }
}

impl core::fmt::Display for CellId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{},{}", self.world, self.x, self.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_by_value() {
        assert_eq!(CellId::new("w", 10, -3), CellId::new("w", 10, -3));
        assert_ne!(CellId::new("w", 10, -3), CellId::new("nether", 10, -3));
    }

    #[test]
    fn from_block_floors_negative_coordinates() {
        assert_eq!(CellId::from_block("w", 0, 15), CellId::new("w", 0, 0));
        assert_eq!(CellId::from_block("w", 16, -1), CellId::new("w", 1, -1));
        assert_eq!(CellId::from_block("w", -16, -17), CellId::new("w", -1, -2));
    }

    #[test]
    fn offset_rejects_grid_overflow() {
        let edge = CellId::new("w", i32::MAX, 0);
        assert!(edge.offset(1, 0).is_none());
        assert_eq!(edge.offset(-1, 2), Some(CellId::new("w", i32::MAX - 1, 2)));
    }

    #[test]
    fn display_format() {
        assert_eq!(CellId::new("w", 10, -3).to_string(), "w:10,-3");
    }
}
