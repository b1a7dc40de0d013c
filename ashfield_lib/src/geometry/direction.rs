//! Directions and neighbor stepping.
//!
//! Directions are numbered counter-clockwise starting at "left" for both
//! topologies: hexagonal grids use 0..6, square grids 0..8. The stepping
//! rules encode the odd-`x` column stagger, so the same direction moves by
//! different row deltas depending on which column it starts from.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use super::position::{GridSize, MapHex, RawHex, Topology};

/// Degrees-per-radian for bearing math.
const RAD2DEG: f32 = 57.295_78;
/// sqrt(3), the row pitch of a unit hexagonal column in pseudo-pixels.
const SQRT3: f32 = 1.732_050_8;
/// 2 * sqrt(3).
const SQRT3T2: f32 = 3.464_101_6;

/// A principal direction index.
///
/// Plain `u8` under the hood because fan walks and path reconstruction do
/// modular arithmetic on it constantly.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dir(pub u8);

impl Dir {
    /// Direction index as a plain integer.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// The opposite direction under the given topology.
    #[inline]
    #[must_use]
    pub const fn reverse(self, topology: Topology) -> Dir {
        let count = topology.dirs();
        Dir((self.0 + count / 2) % count)
    }
}

impl Display for Dir {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Moves a raw coordinate one cell along `dir`, ignoring grid bounds.
///
/// The hexagonal parity test runs *after* the column changes, which is what
/// makes a step and its reverse land back on the start. A direction index
/// outside the topology's range leaves the coordinate unchanged.
#[must_use]
pub fn step_raw(topology: Topology, hex: RawHex, dir: Dir) -> RawHex {
    let RawHex { mut x, mut y } = hex;
    match topology {
        Topology::Hexagonal => match dir.0 {
            0 => {
                x -= 1;
                if x & 1 == 0 {
                    y -= 1;
                }
            }
            1 => {
                x -= 1;
                if x & 1 != 0 {
                    y += 1;
                }
            }
            2 => y += 1,
            3 => {
                x += 1;
                if x & 1 != 0 {
                    y += 1;
                }
            }
            4 => {
                x += 1;
                if x & 1 == 0 {
                    y -= 1;
                }
            }
            5 => y -= 1,
            _ => {}
        },
        Topology::Square => match dir.0 {
            0 => x -= 1,
            1 => {
                x -= 1;
                y += 1;
            }
            2 => y += 1,
            3 => {
                x += 1;
                y += 1;
            }
            4 => x += 1,
            5 => {
                x += 1;
                y -= 1;
            }
            6 => y -= 1,
            7 => {
                x -= 1;
                y -= 1;
            }
            _ => {}
        },
    }
    RawHex::new(x, y)
}

impl GridSize {
    /// Moves a grid coordinate one cell along `dir`.
    ///
    /// Returns `None` when the step would leave the grid; the coordinate is
    /// then untouched rather than clamped.
    #[inline]
    #[must_use]
    pub fn step(self, hex: MapHex, dir: Dir) -> Option<MapHex> {
        self.contains(step_raw(self.topology(), hex.raw(), dir))
    }
}

/// The direction whose cell-center bearing is closest to the line from
/// `from` to `to`.
///
/// Hex bearings are computed in pseudo-pixel space, so the odd-column
/// stagger shifts the boundary between adjacent sectors exactly as the
/// rendered grid looks.
#[must_use]
pub fn far_dir(topology: Topology, from: RawHex, to: RawHex) -> Dir {
    far_dir_offset(topology, from, to, 0.0)
}

/// [`far_dir`] with an additional bearing offset in degrees.
#[must_use]
pub fn far_dir_offset(topology: Topology, from: RawHex, to: RawHex, offset: f32) -> Dir {
    match topology {
        Topology::Hexagonal => {
            let nx = 3.0 * (to.x - from.x) as f32;
            let ny = (to.y - from.y) as f32 * SQRT3T2 - ((to.x & 1) - (from.x & 1)) as f32 * SQRT3;
            let dir = normalize_degrees(180.0 + RAD2DEG * ny.atan2(nx) + offset);
            if (60.0..120.0).contains(&dir) {
                Dir(5)
            } else if (120.0..180.0).contains(&dir) {
                Dir(4)
            } else if (180.0..240.0).contains(&dir) {
                Dir(3)
            } else if (240.0..300.0).contains(&dir) {
                Dir(2)
            } else if dir >= 300.0 {
                Dir(1)
            } else {
                Dir(0)
            }
        }
        Topology::Square => {
            let dir = normalize_degrees(
                180.0 + RAD2DEG * ((to.x - from.x) as f32).atan2((to.y - from.y) as f32) + offset,
            );
            if (22.5..67.5).contains(&dir) {
                Dir(7)
            } else if (67.5..112.5).contains(&dir) {
                Dir(0)
            } else if (112.5..157.5).contains(&dir) {
                Dir(1)
            } else if (157.5..202.5).contains(&dir) {
                Dir(2)
            } else if (202.5..247.5).contains(&dir) {
                Dir(3)
            } else if (247.5..292.5).contains(&dir) {
                Dir(4)
            } else if (292.5..337.5).contains(&dir) {
                Dir(5)
            } else {
                Dir(6)
            }
        }
    }
}

fn normalize_degrees(mut deg: f32) -> f32 {
    if deg < 0.0 {
        deg = 360.0 - (-deg) % 360.0;
    }
    if deg >= 360.0 {
        deg %= 360.0;
    }
    deg
}

/// The direction of an adjacent (or near-adjacent) cell.
///
/// Decides purely from the component ordering, so it stays cheap for the
/// wall-lighting checks that call it per marked cell.
#[must_use]
pub fn near_dir(topology: Topology, from: RawHex, to: RawHex) -> Dir {
    match topology {
        Topology::Hexagonal => {
            if from.odd() {
                if from.x > to.x && from.y > to.y {
                    Dir(0)
                } else if from.x > to.x && from.y == to.y {
                    Dir(1)
                } else if from.x == to.x && from.y < to.y {
                    Dir(2)
                } else if from.x < to.x && from.y == to.y {
                    Dir(3)
                } else if from.x < to.x && from.y > to.y {
                    Dir(4)
                } else {
                    Dir(5)
                }
            } else if from.x > to.x && from.y == to.y {
                Dir(0)
            } else if from.x > to.x && from.y < to.y {
                Dir(1)
            } else if from.x == to.x && from.y < to.y {
                Dir(2)
            } else if from.x < to.x && from.y < to.y {
                Dir(3)
            } else if from.x < to.x && from.y == to.y {
                Dir(4)
            } else {
                Dir(5)
            }
        }
        Topology::Square => {
            if from.x > to.x && from.y == to.y {
                Dir(0)
            } else if from.x > to.x && from.y < to.y {
                Dir(1)
            } else if from.x == to.x && from.y < to.y {
                Dir(2)
            } else if from.x < to.x && from.y < to.y {
                Dir(3)
            } else if from.x < to.x && from.y == to.y {
                Dir(4)
            } else if from.x < to.x && from.y > to.y {
                Dir(5)
            } else if from.x == to.x && from.y > to.y {
                Dir(6)
            } else {
                Dir(7)
            }
        }
    }
}

/// Per-axis step fractions for walking a straight line from `from` toward
/// `to` in cell space.
///
/// The dominant axis steps by exactly 1.0 per iteration and the other is
/// scaled down, so integer rounding of the accumulated position visits one
/// new cell per step.
#[must_use]
pub fn steps_xy(from: RawHex, to: RawHex) -> (f32, f32) {
    let dx = (to.x - from.x).abs() as f32;
    let dy = (to.y - from.y).abs() as f32;
    if dx == 0.0 && dy == 0.0 {
        return (0.0, 0.0);
    }
    let (mut sx, mut sy) = (1.0_f32, 1.0_f32);
    if dx < dy {
        sx = dx / dy;
    } else {
        sy = dy / dx;
    }
    if to.x < from.x {
        sx = -sx;
    }
    if to.y < from.y {
        sy = -sy;
    }
    (sx, sy)
}

/// Rotates a step fraction pair by `degrees`.
#[must_use]
pub fn rotate_steps(steps: (f32, f32), degrees: f32) -> (f32, f32) {
    let rad = degrees / RAD2DEG;
    let (sin, cos) = rad.sin_cos();
    (
        steps.0 * cos - steps.1 * sin,
        steps.0 * sin + steps.1 * cos,
    )
}

/// Offsets of every cell within `radius` rings of a center, ordered ring by
/// ring walking the perimeter.
///
/// Hexagonal offsets depend on the parity of the center column; pass
/// `odd` accordingly. Square offsets are parity-independent. Ring `i`
/// (1-based) contributes `dirs * i` entries, so the whole table holds
/// `dirs * radius * (radius + 1) / 2`.
#[must_use]
pub fn ring_offsets(topology: Topology, odd: bool, radius: u16) -> Vec<(i16, i16)> {
    let mut offsets = Vec::with_capacity(ring_table_len(topology, radius));
    match topology {
        Topology::Hexagonal => {
            // Both parity walkers advance together; the odd table records
            // the odd walker shifted back onto the center column.
            let mut even = RawHex::ZERO;
            let mut odd_pos = RawHex::new(1, 0);
            for ring in 0..radius as i32 {
                even = step_raw(topology, even, Dir(0));
                odd_pos = step_raw(topology, odd_pos, Dir(0));
                for segment in 0..6 {
                    let dir = Dir(((segment + 2) % 6) as u8);
                    for _ in 0..=ring {
                        if odd {
                            offsets.push(((odd_pos.x - 1) as i16, odd_pos.y as i16));
                        } else {
                            offsets.push((even.x as i16, even.y as i16));
                        }
                        even = step_raw(topology, even, dir);
                        odd_pos = step_raw(topology, odd_pos, dir);
                    }
                }
            }
        }
        Topology::Square => {
            let mut pos = RawHex::ZERO;
            for ring in 0..radius as i32 {
                pos = step_raw(topology, pos, Dir(0));
                let side = ring + 1;
                let segments: [(u8, i32); 5] =
                    [(2, side), (4, side * 2), (6, side * 2), (0, side * 2), (2, side)];
                for (dir, steps) in segments {
                    for _ in 0..steps {
                        offsets.push((pos.x as i16, pos.y as i16));
                        pos = step_raw(topology, pos, Dir(dir));
                    }
                }
            }
        }
    }
    offsets
}

/// Number of entries a ring table of `radius` rings holds.
#[inline]
#[must_use]
pub fn ring_table_len(topology: Topology, radius: u16) -> usize {
    let radius = radius as usize;
    topology.dirs() as usize * (radius * (radius + 1) / 2)
}
