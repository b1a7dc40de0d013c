//! Pixel-space metrics of the staggered grid.
//!
//! Cells are drawn as fixed-size sprites whose rows interlock: each row
//! sits `line_height` pixels below the previous one rather than a full
//! cell height. All conversions between cell deltas and pixel deltas live
//! here so the viewport, light fans and fog borders agree on geometry.

use serde::{Deserialize, Serialize};

use super::position::{RawHex, Topology};

/// Sprite and stagger metrics for one grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridLayout {
    /// Cell sprite width in pixels.
    pub hex_width: i32,
    /// Cell sprite height in pixels.
    pub hex_height: i32,
    /// Vertical pitch between interlocking rows.
    pub line_height: i32,
}

impl GridLayout {
    /// Classic Fallout-style metrics.
    pub const FALLOUT: GridLayout = GridLayout {
        hex_width: 32,
        hex_height: 16,
        line_height: 12,
    };

    /// Offset from a cell's top-left sprite corner to its center.
    #[inline]
    #[must_use]
    pub const fn center_offset(self) -> (i32, i32) {
        (self.hex_width / 2, self.hex_height / 2)
    }

    /// Pixel distance the viewport travels when crossing one whole cell.
    ///
    /// Horizontal crossings move a full cell width; vertical crossings move
    /// two interlocked rows.
    #[inline]
    #[must_use]
    pub const fn scroll_step(self) -> (i32, i32) {
        (self.hex_width, 2 * self.line_height)
    }

    /// Pixel delta between the centers of two cells.
    #[must_use]
    pub fn hex_interval(self, topology: Topology, from: RawHex, to: RawHex) -> (i32, i32) {
        match topology {
            Topology::Hexagonal => {
                let mut dx = to.x - from.x;
                let dy = to.y - from.y;
                let mut x = dy * (self.hex_width / 2) - dx * self.hex_width;
                let mut y = dy * self.line_height;
                if from.odd() {
                    if dx > 0 {
                        dx += 1;
                    }
                } else if dx < 0 {
                    dx -= 1;
                }
                dx /= 2;
                x += (self.hex_width / 2) * dx;
                y += self.line_height * dx;
                (x, y)
            }
            Topology::Square => {
                let dx = to.x - from.x;
                let dy = to.y - from.y;
                (
                    (dy - dx) * self.hex_width / 2,
                    (dy + dx) * self.line_height,
                )
            }
        }
    }

    /// Number of cell columns needed to cover `screen_width` pixels at the
    /// given zoom, rounding partially covered columns in.
    #[inline]
    #[must_use]
    pub fn view_width(self, screen_width: i32, zoom: f32) -> i32 {
        let cells = screen_width / self.hex_width + i32::from(screen_width % self.hex_width != 0);
        (cells as f32 * zoom) as i32
    }

    /// Number of cell rows needed to cover `screen_height` pixels at the
    /// given zoom.
    #[inline]
    #[must_use]
    pub fn view_height(self, screen_height: i32, zoom: f32) -> i32 {
        let cells =
            screen_height / self.line_height + i32::from(screen_height % self.line_height != 0);
        (cells as f32 * zoom) as i32
    }
}

impl Default for GridLayout {
    fn default() -> Self {
        GridLayout::FALLOUT
    }
}

/// Euclidean pixel distance, truncated the way sprite math expects.
#[inline]
#[must_use]
pub fn pixel_dist(from: (i32, i32), to: (i32, i32)) -> u32 {
    let dx = (to.0 - from.0) as f64;
    let dy = (to.1 - from.1) as f64;
    (dx * dx + dy * dy).sqrt() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::direction::{step_raw, Dir};

    #[test]
    fn interval_to_self_is_zero() {
        let layout = GridLayout::FALLOUT;
        for topology in [Topology::Hexagonal, Topology::Square] {
            let hex = RawHex::new(7, 3);
            assert_eq!(layout.hex_interval(topology, hex, hex), (0, 0));
        }
    }

    #[test]
    fn neighbor_intervals_are_one_sprite_apart() {
        // Every single step should land within one sprite diagonal.
        let layout = GridLayout::FALLOUT;
        for topology in [Topology::Hexagonal, Topology::Square] {
            for from in [RawHex::new(6, 6), RawHex::new(7, 6)] {
                for d in 0..topology.dirs() {
                    let to = step_raw(topology, from, Dir(d));
                    let (x, y) = layout.hex_interval(topology, from, to);
                    assert!(
                        x.abs() <= layout.hex_width && y.abs() <= 2 * layout.line_height,
                        "{topology} dir {d}: ({x}, {y})"
                    );
                }
            }
        }
    }

    #[test]
    fn intervals_accumulate_along_a_walk() {
        let layout = GridLayout::FALLOUT;
        let topology = Topology::Hexagonal;
        let start = RawHex::new(4, 4);
        let mut cur = start;
        let mut acc = (0, 0);
        for d in [3, 3, 2, 4, 5, 0] {
            let next = step_raw(topology, cur, Dir(d));
            let step = layout.hex_interval(topology, cur, next);
            acc = (acc.0 + step.0, acc.1 + step.1);
            cur = next;
        }
        assert_eq!(acc, layout.hex_interval(topology, start, cur));
    }

    #[test]
    fn vertical_interval_is_pure_rows() {
        let layout = GridLayout::FALLOUT;
        let (x, y) = layout.hex_interval(
            Topology::Hexagonal,
            RawHex::new(4, 2),
            RawHex::new(4, 7),
        );
        assert_eq!((x, y), (5 * (layout.hex_width / 2), 5 * layout.line_height));
    }

    #[test]
    fn view_extent_rounds_partial_cells_in() {
        let layout = GridLayout::FALLOUT;
        assert_eq!(layout.view_width(320, 1.0), 10);
        assert_eq!(layout.view_width(321, 1.0), 11);
        assert_eq!(layout.view_height(240, 1.0), 20);
        assert_eq!(layout.view_width(320, 1.5), 15);
    }
}
