//! Coordinate types for addressing the rectangular map grid.
//!
//! Two coordinate spaces exist and must never be mixed silently:
//! [`RawHex`] is unbounded and used for arithmetic that is allowed to leave
//! the grid (viewport math, light fan perimeter walking), while [`MapHex`]
//! addresses a cell of a concrete grid. The only way to turn a raw
//! coordinate into a grid coordinate is through [`GridSize::contains`]
//! (checked) or [`GridSize::clamp`] (saturating).

use std::fmt::{Display, Formatter};

use derive_more::{Add, AddAssign, Neg, Sub, SubAssign};
use serde::{Deserialize, Serialize};

/// The neighbor arrangement of the grid.
///
/// Hexagonal grids use odd-`x` column staggering with six principal
/// directions; square grids are staggered isometric with eight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topology {
    /// Six neighbors, odd-`x` columns shifted down half a cell.
    #[default]
    Hexagonal,
    /// Eight neighbors on a staggered isometric lattice.
    Square,
}

impl Topology {
    /// The number of principal directions.
    #[inline]
    #[must_use]
    pub const fn dirs(self) -> u8 {
        match self {
            Topology::Hexagonal => 6,
            Topology::Square => 8,
        }
    }

    /// Grid distance between two cells.
    ///
    /// Hexagonal distance accounts for the odd-`x` stagger; square distance
    /// is Chebyshev.
    #[must_use]
    pub fn distance(self, from: RawHex, to: RawHex) -> u32 {
        match self {
            Topology::Hexagonal => {
                let dx = (from.x - to.x).abs();
                let rx = if from.x & 1 == 0 {
                    if to.y <= from.y {
                        from.y - to.y - dx / 2
                    } else {
                        to.y - from.y - (dx + 1) / 2
                    }
                } else if to.y >= from.y {
                    to.y - from.y - dx / 2
                } else {
                    from.y - to.y - (dx + 1) / 2
                };
                (dx + rx.max(0)) as u32
            }
            Topology::Square => {
                let dx = (to.x - from.x).abs();
                let dy = (to.y - from.y).abs();
                dx.max(dy) as u32
            }
        }
    }

    /// Whether `to` lies within `dist` cells of `from`.
    #[inline]
    #[must_use]
    pub fn check_dist(self, from: RawHex, to: RawHex, dist: u32) -> bool {
        self.distance(from, to) <= dist
    }
}

impl Display for Topology {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Topology::Hexagonal => write!(f, "hexagonal"),
            Topology::Square => write!(f, "square"),
        }
    }
}

/// An unbounded grid coordinate.
///
/// Values may point anywhere, including far outside any grid. The viewport
/// keeps one of these per screen cell while scrolling past the map edge,
/// and the light fan walks the radius perimeter in this space before
/// clamping.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    Add,
    AddAssign,
    Sub,
    SubAssign,
    Neg,
    Serialize,
    Deserialize,
)]
pub struct RawHex {
    /// Column.
    pub x: i32,
    /// Row.
    pub y: i32,
}

impl RawHex {
    /// The origin.
    pub const ZERO: RawHex = RawHex::new(0, 0);

    /// Creates a new raw coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        RawHex { x, y }
    }

    /// Whether the column index is odd.
    ///
    /// Odd columns of a hexagonal grid are shifted down half a cell, which
    /// is why almost every stepping rule branches on this.
    #[inline]
    #[must_use]
    pub const fn odd(self) -> bool {
        self.x & 1 != 0
    }
}

impl Display for RawHex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<MapHex> for RawHex {
    #[inline]
    fn from(hex: MapHex) -> Self {
        RawHex::new(hex.x() as i32, hex.y() as i32)
    }
}

/// A coordinate of a cell on a concrete grid.
///
/// Carries no reference to the grid it came from; the field store panics if
/// handed a coordinate from a larger grid. Obtain one from
/// [`GridSize::contains`] or [`GridSize::clamp`] when starting from raw
/// coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MapHex {
    x: u16,
    y: u16,
}

impl MapHex {
    /// Creates a grid coordinate from known-good components.
    #[inline]
    #[must_use]
    pub const fn new(x: u16, y: u16) -> Self {
        MapHex { x, y }
    }

    /// Column.
    #[inline]
    #[must_use]
    pub const fn x(self) -> u16 {
        self.x
    }

    /// Row.
    #[inline]
    #[must_use]
    pub const fn y(self) -> u16 {
        self.y
    }

    /// This cell as an unbounded coordinate.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> RawHex {
        RawHex::new(self.x as i32, self.y as i32)
    }

    /// Whether the column index is odd.
    #[inline]
    #[must_use]
    pub const fn odd(self) -> bool {
        self.x & 1 != 0
    }
}

impl Display for MapHex {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// The dimensions and topology of a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    width: u16,
    height: u16,
    topology: Topology,
}

impl GridSize {
    /// Creates a grid size.
    ///
    /// Zero dimensions are representable so that configuration validation
    /// can report them; the field store refuses to allocate them.
    #[inline]
    #[must_use]
    pub const fn new(width: u16, height: u16, topology: Topology) -> Self {
        GridSize {
            width,
            height,
            topology,
        }
    }

    /// Width in cells.
    #[inline]
    #[must_use]
    pub const fn width(self) -> u16 {
        self.width
    }

    /// Height in cells.
    #[inline]
    #[must_use]
    pub const fn height(self) -> u16 {
        self.height
    }

    /// The grid's topology.
    #[inline]
    #[must_use]
    pub const fn topology(self) -> Topology {
        self.topology
    }

    /// Total number of cells.
    #[inline]
    #[must_use]
    pub const fn count(self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Checked conversion from the unbounded space.
    #[inline]
    #[must_use]
    pub fn contains(self, raw: RawHex) -> Option<MapHex> {
        if raw.x >= 0 && raw.x < self.width as i32 && raw.y >= 0 && raw.y < self.height as i32 {
            Some(MapHex::new(raw.x as u16, raw.y as u16))
        } else {
            None
        }
    }

    /// Saturating conversion from the unbounded space.
    ///
    /// Out-of-range components are pulled to the nearest edge. The light
    /// fan uses this to pin perimeter positions that left the grid.
    #[inline]
    #[must_use]
    pub fn clamp(self, raw: RawHex) -> MapHex {
        MapHex::new(
            raw.x.clamp(0, self.width.saturating_sub(1) as i32) as u16,
            raw.y.clamp(0, self.height.saturating_sub(1) as i32) as u16,
        )
    }

    /// Row-major iteration over every cell.
    pub fn iter(self) -> impl Iterator<Item = MapHex> {
        let (w, h) = (self.width, self.height);
        (0..h).flat_map(move |y| (0..w).map(move |x| MapHex::new(x, y)))
    }

    /// Grid distance between two cells.
    #[inline]
    #[must_use]
    pub fn distance(self, from: MapHex, to: MapHex) -> u32 {
        self.topology.distance(from.raw(), to.raw())
    }
}

impl Display for GridSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.topology)
    }
}
