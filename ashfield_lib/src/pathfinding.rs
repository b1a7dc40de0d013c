//! Wave-propagation routing over the field store.
//!
//! [`Pathfinder`] owns a reusable scratch grid of wave stamps sized for the
//! longest allowed route. A breadth-first wave spreads from the start until
//! it reaches the target (or any cell within the cut distance), then the
//! route is reconstructed backward through fixed probe tables. The probe
//! order is part of the observable behavior: equally short routes always
//! resolve the same way, and the smooth-path switcher deliberately carries
//! its state from one query to the next so consecutive routes along the
//! same diagonal weave instead of stair-stepping identically.

use bevy::prelude::*;

use crate::config::MapConfig;
use crate::fields::{CritterProfile, HexGrid};
use crate::geometry::{near_dir, step_raw, Dir, LineTracer, MapHex, RawHex, Topology};

/// Backward probes: offset from the current cell and the step direction
/// recorded when the probed cell carries the previous wave stamp.
type Probe = (i32, i32, u8);

const HEX_PLAIN_ODD: [Probe; 6] = [
    (-1, 0, 4),
    (1, -1, 1),
    (0, -1, 2),
    (-1, -1, 3),
    (1, 0, 0),
    (0, 1, 5),
];
const HEX_PLAIN_EVEN: [Probe; 6] = [
    (-1, 1, 4),
    (1, 0, 1),
    (0, -1, 2),
    (-1, 0, 3),
    (1, 1, 0),
    (0, 1, 5),
];
const HEX_SWITCHED_ODD: [Probe; 6] = [
    (-1, -1, 3),
    (0, -1, 2),
    (0, 1, 5),
    (1, 0, 0),
    (-1, 0, 4),
    (1, -1, 1),
];
const HEX_SWITCHED_EVEN: [Probe; 6] = [
    (-1, 0, 3),
    (0, -1, 2),
    (0, 1, 5),
    (1, 1, 0),
    (-1, 1, 4),
    (1, 0, 1),
];
const SQUARE_PLAIN: [Probe; 8] = [
    (-1, 0, 4),
    (0, -1, 2),
    (0, 1, 6),
    (1, 0, 0),
    (-1, 1, 5),
    (1, -1, 1),
    (1, 1, 7),
    (-1, -1, 3),
];
const SQUARE_AXIAL: [Probe; 8] = [
    (-1, 0, 4),
    (0, 1, 6),
    (1, 0, 0),
    (0, -1, 2),
    (1, 1, 7),
    (-1, -1, 3),
    (-1, 1, 5),
    (1, -1, 1),
];
const SQUARE_DIAGONAL: [Probe; 8] = [
    (1, 1, 7),
    (-1, -1, 3),
    (-1, 0, 4),
    (0, 1, 6),
    (1, 0, 0),
    (0, -1, 2),
    (-1, 1, 5),
    (1, -1, 1),
];

/// A finished route.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathResult {
    /// One direction per cell transition, start first.
    pub steps: Vec<Dir>,
    /// Exclusive end index into `steps` of each same-direction run.
    pub control_steps: Vec<u16>,
    /// The cell the route stops on; under a cut this is the clamped
    /// target rather than the requested one.
    pub end: MapHex,
}

impl PathResult {
    /// Whether the route has no transitions at all.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Route planner with a persistent scratch grid.
#[derive(Resource)]
pub struct Pathfinder {
    max_dist: i32,
    stride: i32,
    stamps: Vec<i16>,
    origin: RawHex,
    wave: Vec<MapHex>,
    smooth: bool,
    switcher: bool,
}

impl Pathfinder {
    /// Allocates scratch space for routes up to `max_path_length` waves.
    #[must_use]
    pub fn new(config: &MapConfig) -> Self {
        let max_dist = i32::from(config.max_path_length);
        let stride = max_dist * 2 + 2;
        Pathfinder {
            max_dist,
            stride,
            stamps: vec![0; (stride * stride) as usize],
            origin: RawHex::ZERO,
            wave: Vec::new(),
            smooth: config.smooth_path,
            switcher: false,
        }
    }

    /// The longest route the scratch grid can hold, in waves.
    #[inline]
    #[must_use]
    pub fn max_dist(&self) -> u16 {
        self.max_dist as u16
    }

    fn index(&self, raw: RawHex) -> usize {
        let x = self.max_dist + 1 + raw.x - self.origin.x;
        let y = self.max_dist + 1 + raw.y - self.origin.y;
        (y * self.stride + x) as usize
    }

    fn stamp(&self, raw: RawHex) -> i16 {
        self.stamps[self.index(raw)]
    }

    fn set_stamp(&mut self, raw: RawHex, stamp: i16) {
        let index = self.index(raw);
        self.stamps[index] = stamp;
    }

    /// Finds a route from `start` to `target`.
    ///
    /// `cut >= 0` accepts the first reached cell within `cut` of the
    /// target and reports it as the route's end; `cut < 0` demands the
    /// exact target. An `agent` with a multihex radius drags its footprint
    /// border through every step. Returns `None` when the wave exhausts
    /// the reachable area or outgrows the route limit.
    ///
    /// Panics when either endpoint lies outside the grid.
    pub fn find_path(
        &mut self,
        grid: &HexGrid,
        agent: Option<&CritterProfile>,
        start: MapHex,
        target: MapHex,
        cut: i32,
    ) -> Option<PathResult> {
        let size = grid.size();
        assert!(
            size.contains(start.raw()).is_some(),
            "path start {start} outside grid {size}"
        );
        assert!(
            size.contains(target.raw()).is_some(),
            "path target {target} outside grid {size}"
        );

        if start == target {
            return Some(PathResult {
                steps: Vec::new(),
                control_steps: Vec::new(),
                end: start,
            });
        }

        for stamp in &mut self.stamps {
            *stamp = 0;
        }
        self.origin = start.raw();
        self.set_stamp(start.raw(), 1);

        let mut wave = std::mem::take(&mut self.wave);
        wave.clear();
        wave.push(start);

        let multihex = agent.map_or(0u16, |profile| profile.multihex);
        let topology = size.topology();
        let dirs = topology.dirs();

        let mut numindex: i16 = 1;
        let mut reached = None;
        let mut p = 0usize;
        'wave: loop {
            numindex += 1;
            if i32::from(numindex) > self.max_dist {
                break;
            }
            let p_togo = wave.len() - p;
            if p_togo == 0 {
                break;
            }
            for _ in 0..p_togo {
                let cur = wave[p];
                p += 1;
                for j in 0..dirs {
                    let next_raw = step_raw(topology, cur.raw(), Dir(j));
                    let Some(next) = size.contains(next_raw) else {
                        continue;
                    };
                    if self.stamp(next_raw) != 0 {
                        continue;
                    }
                    self.set_stamp(next_raw, -1);
                    if multihex == 0 {
                        if grid.field(next).flags().move_blocked {
                            continue;
                        }
                    } else if !footprint_fits(grid, next, Dir(j), multihex) {
                        continue;
                    }
                    self.set_stamp(next_raw, numindex);
                    wave.push(next);
                    if cut >= 0 && topology.check_dist(next_raw, target.raw(), cut as u32) {
                        reached = Some(next);
                        break 'wave;
                    }
                    if cut < 0 && next == target {
                        reached = Some(next);
                        break 'wave;
                    }
                }
            }
        }
        self.wave = wave;
        let end = reached?;

        let steps = self.backtrack(topology, start, end, numindex)?;
        let control_steps = compress_runs(&steps);
        Some(PathResult {
            steps,
            control_steps,
            end,
        })
    }

    /// Clamps `target` to within `cut` of itself along a walkable route,
    /// without keeping the steps.
    pub fn cut_path(
        &mut self,
        grid: &HexGrid,
        agent: Option<&CritterProfile>,
        start: MapHex,
        target: MapHex,
        cut: i32,
    ) -> Option<MapHex> {
        self.find_path(grid, agent, start, target, cut)
            .map(|path| path.end)
    }

    /// Walks the stamps backward from `end`, emitting directions in route
    /// order.
    fn backtrack(
        &mut self,
        topology: Topology,
        start: MapHex,
        end: MapHex,
        numindex: i16,
    ) -> Option<Vec<Dir>> {
        let mut steps = vec![Dir(0); (numindex - 1) as usize];
        let mut cur = end.raw();
        match topology {
            Topology::Hexagonal => {
                if !self.smooth {
                    self.switcher = false;
                }
                let mut index = numindex;
                while index > 1 {
                    if self.smooth && index & 1 != 0 {
                        self.switcher = !self.switcher;
                    }
                    index -= 1;
                    let probes: &[Probe; 6] = match (self.switcher, cur.x & 1 != 0) {
                        (true, true) => &HEX_SWITCHED_ODD,
                        (true, false) => &HEX_SWITCHED_EVEN,
                        (false, true) => &HEX_PLAIN_ODD,
                        (false, false) => &HEX_PLAIN_EVEN,
                    };
                    cur = self.probe_step(probes, cur, index, &mut steps)?;
                }
            }
            Topology::Square => {
                // Smoothing alternates between the axial-first and
                // diagonal-first tables at a cadence derived from the
                // route's overall shape.
                let (switch_count, switch_begin) = if self.smooth {
                    let dx = (cur.x - start.raw().x).abs();
                    let dy = (cur.y - start.raw().y).abs();
                    let h1 = (dx - dy).abs();
                    let h2 = dx.max(dy) - h1;
                    if h1 != 0 && h2 != 0 {
                        ((h1.max(h2) / h1.min(h2) + 1).max(2), h1.min(h2) % h1.max(h2))
                    } else {
                        (0, 0)
                    }
                } else {
                    (0, 0)
                };
                let mut i = switch_begin;
                let mut index = numindex;
                while index > 1 {
                    index -= 1;
                    let probes: &[Probe; 8] = if !self.smooth {
                        &SQUARE_PLAIN
                    } else if switch_count < 2 || i % switch_count != 0 {
                        &SQUARE_AXIAL
                    } else {
                        &SQUARE_DIAGONAL
                    };
                    cur = self.probe_step(probes, cur, index, &mut steps)?;
                    i += 1;
                }
            }
        }
        Some(steps)
    }

    fn probe_step(
        &self,
        probes: &[Probe],
        cur: RawHex,
        index: i16,
        steps: &mut [Dir],
    ) -> Option<RawHex> {
        for &(dx, dy, dir) in probes {
            let probe = RawHex::new(cur.x + dx, cur.y + dy);
            if self.stamp(probe) == index {
                steps[(index - 1) as usize] = Dir(dir);
                return Some(probe);
            }
        }
        None
    }

    /// Replaces stair-step runs with straight traced glides.
    ///
    /// Each pass tries to trace from the current position to the farthest
    /// control boundary, backing off one boundary at a time; a boundary no
    /// trace can reach cleanly keeps its original flood-fill run.
    pub fn free_movement(&self, grid: &HexGrid, start: MapHex, path: &mut PathResult) {
        if path.control_steps.is_empty() {
            return;
        }
        let size = grid.size();
        let mut boundaries = Vec::with_capacity(path.control_steps.len());
        let mut cur = start;
        let mut step_idx = 0usize;
        for &boundary in &path.control_steps {
            while step_idx < boundary as usize {
                cur = match size.step(cur, path.steps[step_idx]) {
                    Some(hex) => hex,
                    None => return,
                };
                step_idx += 1;
            }
            boundaries.push(cur);
        }

        let mut steps = Vec::with_capacity(path.steps.len());
        let mut controls = Vec::with_capacity(path.control_steps.len());
        let mut pos = start;
        let mut next = 0usize;
        while next < boundaries.len() {
            let mut chosen = boundaries.len() - 1;
            let traced = loop {
                if let Some(segment) = trace_segment(grid, pos, boundaries[chosen]) {
                    break Some((chosen, segment));
                }
                if chosen == next {
                    break None;
                }
                chosen -= 1;
            };
            match traced {
                Some((chosen, segment)) => {
                    steps.extend(segment);
                    controls.push(steps.len() as u16);
                    pos = boundaries[chosen];
                    next = chosen + 1;
                }
                None => {
                    let begin = if next == 0 {
                        0
                    } else {
                        path.control_steps[next - 1] as usize
                    };
                    steps.extend_from_slice(&path.steps[begin..path.control_steps[next] as usize]);
                    controls.push(steps.len() as u16);
                    pos = boundaries[next];
                    next += 1;
                }
            }
        }
        path.steps = steps;
        path.control_steps = controls;
    }
}

/// Whether a multihex body can make the step `dir` onto `hex`.
///
/// The footprint's leading cell sits `radius` steps beyond the candidate;
/// that cell plus the clockwise and counter-clockwise border arcs must be
/// clear. Cells past the grid edge count as blocked.
fn footprint_fits(grid: &HexGrid, hex: MapHex, dir: Dir, radius: u16) -> bool {
    let size = grid.size();
    let topology = size.topology();
    let wheel = topology.dirs();

    let mut base = hex.raw();
    for _ in 0..radius {
        base = step_raw(topology, base, dir);
    }
    let Some(base_hex) = size.contains(base) else {
        return false;
    };
    if grid.field(base_hex).flags().move_blocked {
        return false;
    }

    let square_corner = topology == Topology::Square && dir.0 & 1 != 0;
    let arc_len = if square_corner { radius * 2 } else { radius };

    let mut cw = Dir((dir.0 + 2) % wheel);
    if square_corner {
        cw = Dir((cw.0 + 1) % 8);
    }
    let mut ccw = Dir(match topology {
        Topology::Hexagonal => (dir.0 + 4) % 6,
        Topology::Square => (dir.0 + 6) % 8,
    });
    if square_corner {
        ccw = Dir((ccw.0 + 7) % 8);
    }

    for arc_dir in [cw, ccw] {
        let mut probe = base;
        for _ in 0..arc_len {
            probe = step_raw(topology, probe, arc_dir);
            match size.contains(probe) {
                Some(cell) => {
                    if grid.field(cell).flags().move_blocked {
                        return false;
                    }
                }
                None => return false,
            }
        }
    }
    true
}

/// Run-length boundaries of identical directions, each one past its run.
fn compress_runs(steps: &[Dir]) -> Vec<u16> {
    let mut controls = Vec::new();
    for i in 1..=steps.len() {
        if i == steps.len() || steps[i] != steps[i - 1] {
            controls.push(i as u16);
        }
    }
    controls
}

/// Walks a straight line between two cells, collecting step directions.
///
/// Fails when the line crosses a blocked cell or stalls at a grid border
/// before reaching the target.
fn trace_segment(grid: &HexGrid, from: MapHex, to: MapHex) -> Option<Vec<Dir>> {
    if from == to {
        return Some(Vec::new());
    }
    let size = grid.size();
    let topology = size.topology();
    let mut tracer = LineTracer::new(size, from, to, 0.0);
    let mut cur = from;
    let mut dirs = Vec::new();
    // Square walks may linger in a cell for one fractional step, so allow
    // twice the grid distance before giving up.
    for _ in 0..topology.distance(from.raw(), to.raw()) * 2 + 2 {
        let next = tracer.next(cur);
        if next == cur {
            continue;
        }
        if grid.field(next).flags().move_blocked {
            return None;
        }
        dirs.push(near_dir(topology, cur.raw(), next.raw()));
        cur = next;
        if cur == to {
            return Some(dirs);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{ItemId, ItemProfile};
    use crate::geometry::GridSize;

    fn open_grid(width: u16, height: u16, topology: Topology) -> HexGrid {
        HexGrid::new(GridSize::new(width, height, topology))
    }

    fn finder(topology: Topology, smooth: bool) -> Pathfinder {
        let config = MapConfig {
            width: 20,
            height: 20,
            topology,
            smooth_path: smooth,
            max_path_length: 100,
            ..Default::default()
        };
        Pathfinder::new(&config)
    }

    fn wall(grid: &mut HexGrid, hex: MapHex, id: u32) {
        grid.add_item(hex, ItemId(id), ItemProfile::blocker());
    }

    fn walk(grid: &HexGrid, start: MapHex, steps: &[Dir]) -> MapHex {
        let mut cur = start;
        for &dir in steps {
            cur = grid.size().step(cur, dir).unwrap();
        }
        cur
    }

    #[test]
    fn open_route_length_equals_grid_distance() {
        let grid = open_grid(10, 10, Topology::Hexagonal);
        let mut finder = finder(Topology::Hexagonal, false);
        let start = MapHex::new(0, 0);
        let target = MapHex::new(5, 5);
        let path = finder.find_path(&grid, None, start, target, -1).unwrap();
        assert_eq!(
            path.steps.len() as u32,
            grid.size().distance(start, target)
        );
        assert_eq!(walk(&grid, start, &path.steps), target);
        assert_eq!(path.end, target);
    }

    #[test]
    fn start_equals_target_gives_an_empty_route() {
        let grid = open_grid(10, 10, Topology::Hexagonal);
        let mut finder = finder(Topology::Hexagonal, false);
        let hex = MapHex::new(4, 4);
        let path = finder.find_path(&grid, None, hex, hex, -1).unwrap();
        assert!(path.is_empty());
        assert!(path.control_steps.is_empty());
        assert_eq!(path.end, hex);
    }

    #[test]
    fn straight_column_route_is_two_down_steps() {
        let grid = open_grid(10, 10, Topology::Hexagonal);
        let mut finder = finder(Topology::Hexagonal, false);
        let path = finder
            .find_path(&grid, None, MapHex::new(4, 4), MapHex::new(4, 6), -1)
            .unwrap();
        assert_eq!(path.steps, vec![Dir(2), Dir(2)]);
        assert_eq!(path.control_steps, vec![2]);
    }

    #[test]
    fn equal_routes_resolve_by_probe_order() {
        // Both (4,4)->(4,5)->(5,6) and (4,4)->(5,5)->(5,6) are shortest;
        // the backward probes settle on the latter every time.
        let grid = open_grid(10, 10, Topology::Hexagonal);
        let mut finder = finder(Topology::Hexagonal, false);
        let path = finder
            .find_path(&grid, None, MapHex::new(4, 4), MapHex::new(5, 6), -1)
            .unwrap();
        assert_eq!(path.steps, vec![Dir(3), Dir(2)]);
        assert_eq!(path.control_steps, vec![1, 2]);
    }

    #[test]
    fn smooth_switcher_carries_across_queries() {
        let grid = open_grid(10, 10, Topology::Hexagonal);
        let mut finder = finder(Topology::Hexagonal, true);
        let first = finder
            .find_path(&grid, None, MapHex::new(4, 4), MapHex::new(5, 6), -1)
            .unwrap();
        let second = finder
            .find_path(&grid, None, MapHex::new(4, 4), MapHex::new(5, 6), -1)
            .unwrap();
        assert_eq!(first.steps, vec![Dir(2), Dir(3)]);
        assert_eq!(second.steps, vec![Dir(3), Dir(2)]);
    }

    #[test]
    fn square_routes_prefer_the_diagonal_probe_order() {
        let grid = open_grid(10, 10, Topology::Square);
        let mut finder = finder(Topology::Square, false);
        let path = finder
            .find_path(&grid, None, MapHex::new(3, 3), MapHex::new(4, 5), -1)
            .unwrap();
        assert_eq!(path.steps, vec![Dir(3), Dir(2)]);
        assert_eq!(walk(&grid, MapHex::new(3, 3), &path.steps), MapHex::new(4, 5));
    }

    #[test]
    fn walled_in_target_yields_none() {
        let mut grid = open_grid(12, 12, Topology::Hexagonal);
        let target = MapHex::new(6, 6);
        for (i, dir) in (0..6).enumerate() {
            let ring = grid.size().step(target, Dir(dir)).unwrap();
            wall(&mut grid, ring, i as u32 + 1);
        }
        let mut finder = finder(Topology::Hexagonal, false);
        assert!(finder
            .find_path(&grid, None, MapHex::new(1, 1), target, -1)
            .is_none());
    }

    #[test]
    fn blocked_cells_are_routed_around() {
        let mut grid = open_grid(10, 10, Topology::Hexagonal);
        // Every cell adjacent to both endpoints, so no two-step route is
        // left.
        wall(&mut grid, MapHex::new(4, 5), 1);
        wall(&mut grid, MapHex::new(3, 5), 2);
        wall(&mut grid, MapHex::new(5, 5), 3);
        let mut finder = finder(Topology::Hexagonal, false);
        let start = MapHex::new(4, 4);
        let target = MapHex::new(4, 6);
        let path = finder.find_path(&grid, None, start, target, -1).unwrap();
        assert_eq!(walk(&grid, start, &path.steps), target);
        assert!(path.steps.len() as u32 > grid.size().distance(start, target));
        let mut cur = start;
        for &dir in &path.steps {
            cur = grid.size().step(cur, dir).unwrap();
            assert!(!grid.field(cur).flags().move_blocked);
        }
    }

    #[test]
    fn cut_accepts_the_first_cell_in_range() {
        let grid = open_grid(14, 14, Topology::Hexagonal);
        let mut finder = finder(Topology::Hexagonal, false);
        let start = MapHex::new(2, 2);
        let target = MapHex::new(2, 10);
        let path = finder.find_path(&grid, None, start, target, 2).unwrap();
        assert_ne!(path.end, target);
        assert!(grid
            .size()
            .topology()
            .check_dist(path.end.raw(), target.raw(), 2));
        assert_eq!(
            path.steps.len() as u32,
            grid.size().distance(start, path.end)
        );
        assert_eq!(walk(&grid, start, &path.steps), path.end);
    }

    #[test]
    fn multihex_agent_rejects_a_narrow_corridor() {
        let mut grid = open_grid(20, 20, Topology::Hexagonal);
        let mut id = 1;
        for x in 0..20 {
            for y in [3u16, 5] {
                wall(&mut grid, MapHex::new(x, y), id);
                id += 1;
            }
        }
        let start = MapHex::new(2, 4);
        let target = MapHex::new(17, 4);
        let mut finder = finder(Topology::Hexagonal, false);
        assert!(finder.find_path(&grid, None, start, target, -1).is_some());
        let agent = CritterProfile {
            multihex: 2,
            ..Default::default()
        };
        assert!(finder
            .find_path(&grid, Some(&agent), start, target, -1)
            .is_none());
    }

    #[test]
    fn control_steps_mark_each_direction_change() {
        assert_eq!(
            compress_runs(&[Dir(2), Dir(2), Dir(2), Dir(3), Dir(3), Dir(0)]),
            vec![3, 5, 6]
        );
        assert_eq!(compress_runs(&[]), Vec::<u16>::new());
        assert_eq!(compress_runs(&[Dir(4)]), vec![1]);
    }

    #[test]
    fn free_movement_straightens_an_open_route() {
        let grid = open_grid(20, 20, Topology::Hexagonal);
        let mut finder = finder(Topology::Hexagonal, false);
        let start = MapHex::new(2, 2);
        let target = MapHex::new(9, 7);
        let mut path = finder.find_path(&grid, None, start, target, -1).unwrap();
        assert!(path.control_steps.len() > 1);
        finder.free_movement(&grid, start, &mut path);
        assert_eq!(path.control_steps.len(), 1);
        assert_eq!(walk(&grid, start, &path.steps), target);
        assert!(path.steps.len() as u32 <= grid.size().distance(start, target) + 1);
    }

    #[test]
    fn free_movement_keeps_blocked_segments_on_the_flood_route() {
        let mut grid = open_grid(20, 20, Topology::Hexagonal);
        // A wall across the straight line forces the glide to back off.
        for y in 2..8 {
            wall(&mut grid, MapHex::new(6, y), y as u32);
        }
        let mut finder = finder(Topology::Hexagonal, false);
        let start = MapHex::new(2, 4);
        let target = MapHex::new(10, 4);
        let mut path = finder.find_path(&grid, None, start, target, -1).unwrap();
        finder.free_movement(&grid, start, &mut path);
        let mut cur = start;
        for &dir in &path.steps {
            cur = grid.size().step(cur, dir).unwrap();
            assert!(!grid.field(cur).flags().move_blocked);
        }
        assert_eq!(cur, target);
    }

    #[test]
    #[should_panic(expected = "outside grid")]
    fn out_of_grid_target_panics() {
        let grid = open_grid(10, 10, Topology::Hexagonal);
        let mut finder = finder(Topology::Hexagonal, false);
        let _ = finder.find_path(&grid, None, MapHex::new(1, 1), MapHex::new(11, 1), -1);
    }
}
