//! Straight-line walking over the staggered grid.
//!
//! [`LineTracer`] yields successive cells along the line between two grid
//! cells. On hexagonal grids the bearing selects the two directions
//! bounding its sextant and every step greedily picks whichever of the two
//! lands closer to the target in pseudo-pixel space. On square grids the
//! walk accumulates fractional per-axis steps and truncates.

use super::direction::Dir;
use super::position::{GridSize, MapHex, Topology};

/// Degrees-per-radian, matching the bearing math in `direction`.
const RAD2DEG: f32 = 57.295_78;
const SQRT3: f32 = 1.732_050_8;
const SQRT3T2: f32 = 3.464_101_6;
/// Nudge applied to pseudo-pixel anchors so ties between the two candidate
/// directions resolve the same way on every platform.
const BIAS: f32 = 0.023_45;

/// Incremental cell walker along a fixed line.
pub struct LineTracer {
    size: GridSize,
    kind: TracerKind,
}

enum TracerKind {
    Hexagonal {
        dir1: Dir,
        dir2: Dir,
        target: (f32, f32),
    },
    Square {
        pos: (f32, f32),
        step: (f32, f32),
    },
}

impl LineTracer {
    /// Prepares a walk from `from` toward `to`, with the bearing rotated by
    /// `angle` degrees.
    #[must_use]
    pub fn new(size: GridSize, from: MapHex, to: MapHex, angle: f32) -> Self {
        let kind = match size.topology() {
            Topology::Hexagonal => {
                let nx = 3.0 * (to.x() as f32 - from.x() as f32);
                let ny = (to.y() as f32 - from.y() as f32) * SQRT3T2
                    - ((to.x() & 1) as f32 - (from.x() & 1) as f32) * SQRT3;
                let mut dir = 180.0 + RAD2DEG * ny.atan2(nx);
                if angle != 0.0 {
                    dir += angle;
                    if dir < 0.0 {
                        dir = 360.0 - (-dir) % 360.0;
                    }
                    if dir >= 360.0 {
                        dir %= 360.0;
                    }
                }
                let (dir1, dir2) = if (30.0..90.0).contains(&dir) {
                    (Dir(5), Dir(0))
                } else if (90.0..150.0).contains(&dir) {
                    (Dir(4), Dir(5))
                } else if (150.0..210.0).contains(&dir) {
                    (Dir(3), Dir(4))
                } else if (210.0..270.0).contains(&dir) {
                    (Dir(2), Dir(3))
                } else if (270.0..330.0).contains(&dir) {
                    (Dir(1), Dir(2))
                } else {
                    (Dir(0), Dir(1))
                };
                TracerKind::Hexagonal {
                    dir1,
                    dir2,
                    target: pseudo_pixel(to),
                }
            }
            Topology::Square => {
                let bearing = (to.y() as f32 - from.y() as f32)
                    .atan2(to.x() as f32 - from.x() as f32)
                    + angle / RAD2DEG;
                let (mut sy, mut sx) = bearing.sin_cos();
                if sx.abs() > sy.abs() {
                    sy /= sx.abs();
                    sx = if sx > 0.0 { 1.0 } else { -1.0 };
                } else {
                    sx /= sy.abs();
                    sy = if sy > 0.0 { 1.0 } else { -1.0 };
                }
                TracerKind::Square {
                    pos: (from.x() as f32 + 0.5, from.y() as f32 + 0.5),
                    step: (sx, sy),
                }
            }
        };
        LineTracer { size, kind }
    }

    /// Advances one cell from `cur` and returns the new cell.
    ///
    /// The walk never leaves the grid: a candidate that would step off the
    /// edge stays put, so repeated calls at a border converge instead of
    /// escaping.
    #[must_use]
    pub fn next(&mut self, cur: MapHex) -> MapHex {
        match &mut self.kind {
            TracerKind::Hexagonal { dir1, dir2, target } => {
                let a = self.size.step(cur, *dir1).unwrap_or(cur);
                let b = self.size.step(cur, *dir2).unwrap_or(cur);
                let da = pixel_dist_sq(pseudo_pixel(a), *target);
                let db = pixel_dist_sq(pseudo_pixel(b), *target);
                if da <= db {
                    a
                } else {
                    b
                }
            }
            TracerKind::Square { pos, step } => {
                pos.0 += step.0;
                pos.1 += step.1;
                let x = (pos.0.floor() as i32).clamp(0, self.size.width() as i32 - 1);
                let y = (pos.1.floor() as i32).clamp(0, self.size.height() as i32 - 1);
                MapHex::new(x as u16, y as u16)
            }
        }
    }
}

/// Pseudo-pixel anchor of a cell: columns 3 units apart, rows `2 * sqrt(3)`
/// with the odd-column half-row shift.
fn pseudo_pixel(hex: MapHex) -> (f32, f32) {
    (
        3.0 * hex.x() as f32 + BIAS,
        SQRT3T2 * hex.y() as f32 - (hex.x() & 1) as f32 * SQRT3 + BIAS,
    )
}

fn pixel_dist_sq(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    dx * dx + dy * dy
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::position::GridSize;

    fn walk(size: GridSize, from: MapHex, to: MapHex, limit: u32) -> Vec<MapHex> {
        let mut tracer = LineTracer::new(size, from, to, 0.0);
        let mut cur = from;
        let mut cells = Vec::new();
        for _ in 0..limit {
            cur = tracer.next(cur);
            cells.push(cur);
            if cur == to {
                break;
            }
        }
        cells
    }

    #[test]
    fn hex_walk_reaches_the_target_within_grid_distance() {
        let size = GridSize::new(30, 30, Topology::Hexagonal);
        for (from, to) in [
            (MapHex::new(2, 2), MapHex::new(25, 2)),
            (MapHex::new(2, 2), MapHex::new(2, 25)),
            (MapHex::new(3, 20), MapHex::new(24, 5)),
            (MapHex::new(14, 14), MapHex::new(15, 14)),
        ] {
            let dist = size.distance(from, to);
            let cells = walk(size, from, to, dist + 1);
            assert_eq!(*cells.last().unwrap(), to, "{from} -> {to}");
            assert!(cells.len() as u32 <= dist + 1, "{from} -> {to}");
        }
    }

    #[test]
    fn hex_walk_advances_distance_one_per_step() {
        let size = GridSize::new(30, 30, Topology::Hexagonal);
        let from = MapHex::new(4, 18);
        let to = MapHex::new(22, 3);
        let mut prev = from;
        for cell in walk(size, from, to, 64) {
            assert_eq!(size.distance(prev, cell), 1);
            prev = cell;
        }
    }

    #[test]
    fn square_walk_follows_a_diagonal() {
        let size = GridSize::new(20, 20, Topology::Square);
        let cells = walk(size, MapHex::new(1, 1), MapHex::new(9, 9), 16);
        assert_eq!(*cells.last().unwrap(), MapHex::new(9, 9));
        for pair in cells.windows(2) {
            assert!(size.distance(pair[0], pair[1]) <= 1);
        }
    }

    #[test]
    fn walk_converges_at_the_border_instead_of_escaping() {
        let size = GridSize::new(10, 10, Topology::Hexagonal);
        let mut tracer = LineTracer::new(size, MapHex::new(8, 5), MapHex::new(9, 5), 0.0);
        let mut cur = MapHex::new(8, 5);
        for _ in 0..8 {
            cur = tracer.next(cur);
            assert!(size.contains(cur.raw()).is_some());
        }
    }
}
