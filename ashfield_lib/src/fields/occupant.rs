//! Occupant handles and capability profiles.
//!
//! The store never owns the entities standing on it. Callers register an
//! occupant under an opaque id together with a snapshot of its capability
//! flags; everything the flag recache derives comes from these snapshots.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::geometry::Dir;

/// Handle of a critter occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CritterId(pub u32);

impl Display for CritterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "critter {}", self.0)
    }
}

/// Handle of an item occupant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(pub u32);

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "item {}", self.0)
    }
}

/// Orientation of a wall piece, for directional wall lighting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Corner {
    #[default]
    NorthSouth,
    West,
    East,
    South,
    EastWest,
    North,
}

impl Corner {
    /// Whether this orientation counts as a north-south facing for the
    /// wall-lighting rules.
    #[inline]
    #[must_use]
    pub const fn is_north_south(self) -> bool {
        matches!(self, Corner::NorthSouth | Corner::North | Corner::West)
    }
}

/// Capability snapshot of an item occupant.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemProfile {
    /// Stops walkers.
    pub blocks_move: bool,
    /// Stops projectiles and sight.
    pub blocks_shoot: bool,
    /// Stops light.
    pub blocks_light: bool,
    /// Is a wall piece; sets the cell's wall flags and corner.
    pub wall: bool,
    /// Wall orientation, meaningful only with `wall`.
    pub corner: Corner,
    /// Is decorative scenery.
    pub scenery: bool,
    /// Is a roof tile; feeds roof component assignment.
    pub roof_tile: bool,
    /// Pins the viewport when it would scroll past this cell.
    pub scroll_block: bool,
    /// Directions along which this item projects a line of blocked cells
    /// (fences and the like). Each step extends the line by one cell.
    pub block_lines: Vec<Dir>,
}

impl ItemProfile {
    /// A solid wall piece.
    #[must_use]
    pub fn wall(corner: Corner, blocks_light: bool) -> Self {
        ItemProfile {
            blocks_move: true,
            blocks_shoot: true,
            blocks_light,
            wall: true,
            corner,
            ..Default::default()
        }
    }

    /// An impassable but see-through blocker.
    #[must_use]
    pub fn blocker() -> Self {
        ItemProfile {
            blocks_move: true,
            ..Default::default()
        }
    }

    /// Passable decoration.
    #[must_use]
    pub fn scenery() -> Self {
        ItemProfile {
            scenery: true,
            ..Default::default()
        }
    }

    /// A roof tile.
    #[must_use]
    pub fn roof() -> Self {
        ItemProfile {
            roof_tile: true,
            ..Default::default()
        }
    }
}

/// Capability snapshot of a critter occupant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CritterProfile {
    /// Dead critters do not block movement.
    pub dead: bool,
    /// Extra rings of cells this critter occupies around its own.
    pub multihex: u16,
}
