//! Dynamic point lights and the shadow-casting fans they throw.
//!
//! Each light source is registered under an owner-supplied [`LightId`] and
//! maintained through a small fade state machine, so intensity changes
//! glide instead of popping. Applying a source walks the perimeter of its
//! radius and traces every boundary cell back toward the center, writing
//! per-channel contributions into the grid's light buffer and collecting
//! the boundary vertices into a triangle fan. Walls catch light on the
//! side facing the source according to their [`Corner`] orientation.
//!
//! [`Lighting::process`] drives everything once per fixed tick: fades
//! advance, finished sources are removed, stale fans are cleaned and
//! re-applied, and the renderer-facing [`LightMesh`] is regenerated at
//! most once per tick.

mod daylight;

pub use daylight::DayPlan;

use std::fmt::{Display, Formatter};

use bevy::prelude::*;
use indexmap::map::Entry;
use indexmap::IndexMap;
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::config::MapConfig;
use crate::fields::{Corner, HexGrid};
use crate::geometry::{
    far_dir, pixel_dist, rotate_steps, step_raw, steps_xy, Dir, GridLayout, MapHex, RawHex,
    Topology,
};

/// Intensity units carried by a source at full strength.
const MAX_LIGHT_VALUE: i32 = 10_000;
/// Largest per-channel value a single source writes into the grid buffer.
const MAX_LIGHT_HEX: i32 = 200;
/// Fan center alpha at full capacity and intensity.
const MAX_LIGHT_ALPHA: i32 = 255;

/// Handle of a light source, chosen by the occupant that owns it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LightId(pub u32);

impl Display for LightId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "light {}", self.0)
    }
}

/// An 8-bit color with alpha, as baked into fan vertices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// One vertex of a light fan, in light-local pixel space.
///
/// Positions are relative to the top-left corner of the center cell's
/// sprite. The renderer translates the whole fan by that cell's current
/// screen position, and additionally by the owner's live sprite offset for
/// vertices tagged `use_offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FanPoint {
    /// Cell this vertex settled on.
    pub hex: MapHex,
    /// Light-local pixel x.
    pub x: i32,
    /// Light-local pixel y.
    pub y: i32,
    /// Baked vertex color.
    pub color: Rgba,
    /// Follow the owner's sprite offset when rendering.
    pub use_offset: bool,
}

/// Behavior bits of a light source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightFlags {
    /// Compute capacity from world time even when the map pins its own.
    pub global: bool,
    /// Invert the computed capacity.
    pub inverse: bool,
    /// Bit per fan segment; a set bit collapses that segment onto the
    /// center, cutting the light to a wedge.
    pub disabled_dirs: u8,
}

impl LightFlags {
    /// Whether every fan segment is disabled.
    #[inline]
    #[must_use]
    pub fn all_directions_disabled(self) -> bool {
        self.disabled_dirs & 0x3F == 0x3F
    }

    /// Whether the given fan segment is disabled.
    #[inline]
    #[must_use]
    pub fn disabled(self, segment: usize) -> bool {
        self.disabled_dirs & (1 << segment.min(5)) != 0
    }
}

/// Renderable description of a light, supplied by its owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightSpec {
    /// Cell the light shines from.
    pub hex: MapHex,
    /// Channel values of the cast color.
    pub color: [u8; 3],
    /// Reach of the fan in cells.
    pub radius: u16,
    /// Behavior bits.
    pub flags: LightFlags,
    /// Strength as a percentage. Negative strength marks a night light
    /// whose capacity is pinned to full regardless of daylight.
    pub intensity: i32,
    /// Anchor full-reach fan vertices to the owner's live sprite offset.
    pub use_offset: bool,
}

impl LightSpec {
    /// Intensity magnitude the fade animates toward.
    #[inline]
    #[must_use]
    pub fn target(&self) -> i32 {
        self.intensity.abs().min(100)
    }

    /// Whether daylight capacity is pinned to full for this source.
    #[inline]
    #[must_use]
    pub fn night_only(&self) -> bool {
        self.intensity < 0
    }
}

/// Lifecycle of a light source's intensity animation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FadeState {
    /// Intensity sits at its target.
    #[default]
    Idle,
    /// Interpolating toward a live target.
    Animating,
    /// Fading to zero ahead of removal.
    Finishing,
}

/// Fade interpolation step.
///
/// Pure so the transitions can be pinned down in tests. Returns the
/// follow-up state and the intensity `elapsed_ms` into the fade; a
/// [`FadeState::Finishing`] source that returns intensity 0 is ready for
/// removal.
fn advance_fade(
    state: FadeState,
    start: i32,
    target: i32,
    elapsed_ms: f64,
    fade_ms: f64,
) -> (FadeState, i32) {
    match state {
        FadeState::Idle => (FadeState::Idle, target),
        FadeState::Animating | FadeState::Finishing => {
            let t = if fade_ms <= 0.0 {
                1.0
            } else {
                (elapsed_ms / fade_ms).clamp(0.0, 1.0)
            };
            if t >= 1.0 {
                match state {
                    FadeState::Animating => (FadeState::Idle, target),
                    _ => (FadeState::Finishing, 0),
                }
            } else {
                (state, start + (f64::from(target - start) * t) as i32)
            }
        }
    }
}

/// One registered light and everything derived from it.
#[derive(Debug)]
pub struct LightSource {
    spec: LightSpec,
    target: i32,
    current: i32,
    start: i32,
    fade_begun: f64,
    state: FadeState,
    applied: bool,
    marked: Vec<MapHex>,
    fan: Vec<FanPoint>,
    visible_marks: u32,
}

impl LightSource {
    fn new(spec: LightSpec, now_ms: f64) -> Self {
        let target = spec.target();
        LightSource {
            spec,
            target,
            current: 0,
            start: 0,
            fade_begun: now_ms,
            state: if target == 0 {
                FadeState::Idle
            } else {
                FadeState::Animating
            },
            applied: false,
            marked: Vec::new(),
            fan: Vec::new(),
            visible_marks: 0,
        }
    }

    /// The owner-supplied description.
    #[inline]
    #[must_use]
    pub fn spec(&self) -> LightSpec {
        self.spec
    }

    /// Animated intensity magnitude, 0..=100.
    #[inline]
    #[must_use]
    pub fn current(&self) -> i32 {
        self.current
    }

    /// Intensity magnitude the fade is heading toward.
    #[inline]
    #[must_use]
    pub fn target(&self) -> i32 {
        self.target
    }

    /// Where the fade state machine currently sits.
    #[inline]
    #[must_use]
    pub fn state(&self) -> FadeState {
        self.state
    }

    /// Whether the grid currently carries this source's marks.
    #[inline]
    #[must_use]
    pub fn applied(&self) -> bool {
        self.applied
    }

    /// The fan vertices recorded by the last apply: the center vertex
    /// followed by the closed boundary loop.
    #[inline]
    #[must_use]
    pub fn fan(&self) -> &[FanPoint] {
        &self.fan
    }

    /// Cells carrying this source's light.
    #[inline]
    #[must_use]
    pub fn marked(&self) -> &[MapHex] {
        &self.marked
    }

    /// How many marked cells currently sit inside the viewport.
    #[inline]
    #[must_use]
    pub fn visible_marks(&self) -> u32 {
        self.visible_marks
    }
}

/// Inclusive raw-coordinate bounds outside which light marking is skipped.
///
/// The viewport publishes its view-field corner coordinates here whenever
/// the window moves, so off-screen cells never pay for mark bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LightWindow {
    pub min_x: i32,
    pub max_x: i32,
    pub min_y: i32,
    pub max_y: i32,
}

impl LightWindow {
    /// A window that never rejects a mark.
    pub const UNBOUNDED: LightWindow = LightWindow {
        min_x: i32::MIN,
        max_x: i32::MAX,
        min_y: i32::MIN,
        max_y: i32::MAX,
    };

    fn contains(self, raw: RawHex) -> bool {
        raw.x >= self.min_x && raw.x <= self.max_x && raw.y >= self.min_y && raw.y <= self.max_y
    }
}

impl Default for LightWindow {
    fn default() -> Self {
        LightWindow::UNBOUNDED
    }
}

/// The light source registry and its animation clock.
#[derive(Resource)]
pub struct Lighting {
    sources: IndexMap<LightId, LightSource>,
    day_plan: DayPlan,
    fade_ms: f64,
    layout: GridLayout,
    map_time: Option<i32>,
    world_minutes: i32,
    window: LightWindow,
    rebuild_requested: bool,
    render_requested: bool,
}

impl Lighting {
    /// Creates an empty registry using the configured fade and day plan.
    #[must_use]
    pub fn new(config: &MapConfig) -> Self {
        Lighting {
            sources: IndexMap::new(),
            day_plan: config.day_plan,
            fade_ms: f64::from(config.light_fade_ms),
            layout: config.layout,
            map_time: None,
            world_minutes: 0,
            window: LightWindow::UNBOUNDED,
            rebuild_requested: false,
            render_requested: false,
        }
    }

    /// Number of registered sources, including ones mid-fade-out.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether no sources are registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Looks up a source by owner id.
    #[inline]
    #[must_use]
    pub fn get(&self, id: LightId) -> Option<&LightSource> {
        self.sources.get(&id)
    }

    /// Registers a light or updates an existing one.
    ///
    /// A value-identical update on a source that is not fading out is
    /// ignored. Any real change leaves the source unapplied until the next
    /// [`Lighting::process`]; a changed intensity target additionally
    /// restarts the fade from the current intensity.
    pub fn upsert(&mut self, id: LightId, spec: LightSpec, now_ms: f64) {
        match self.sources.entry(id) {
            Entry::Occupied(mut entry) => {
                let source = entry.get_mut();
                if source.spec == spec && source.state != FadeState::Finishing {
                    return;
                }
                let target = spec.target();
                let retarget = target != source.target || source.state == FadeState::Finishing;
                source.spec = spec;
                source.applied = false;
                if retarget {
                    source.target = target;
                    source.start = source.current;
                    source.fade_begun = now_ms;
                    source.state = if source.current == target {
                        FadeState::Idle
                    } else {
                        FadeState::Animating
                    };
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(LightSource::new(spec, now_ms));
            }
        }
    }

    /// Starts fading a source out toward removal.
    ///
    /// Returns whether the source existed. Removal happens on the first
    /// [`Lighting::process`] after the fade reaches zero.
    pub fn finish(&mut self, id: LightId, now_ms: f64) -> bool {
        let Some(source) = self.sources.get_mut(&id) else {
            return false;
        };
        if source.state != FadeState::Finishing {
            source.start = source.current;
            source.target = 0;
            source.fade_begun = now_ms;
            source.state = FadeState::Finishing;
        }
        true
    }

    /// Pins the map's own clock, or releases it to follow world time.
    pub fn set_map_time(&mut self, minute: Option<i32>) {
        if self.map_time != minute {
            self.map_time = minute;
            self.rebuild_requested = true;
        }
    }

    /// Updates the world clock feeding daylight capacity.
    pub fn set_world_minutes(&mut self, minute: i32) {
        if self.world_minutes != minute {
            self.world_minutes = minute;
            self.rebuild_requested = true;
        }
    }

    /// Restricts marking to the given raw-coordinate window.
    pub fn set_window(&mut self, window: LightWindow) {
        if self.window != window {
            self.window = window;
            self.rebuild_requested = true;
        }
    }

    /// Flags every fan stale, for occupancy changes that moved walls.
    pub fn request_rebuild(&mut self) {
        self.rebuild_requested = true;
    }

    /// Ambient daylight color for the active clock.
    #[must_use]
    pub fn ambient_color(&self) -> [u8; 3] {
        self.day_plan
            .color_at(self.map_time.unwrap_or(self.world_minutes))
    }

    pub(crate) fn mark_shown(&mut self, id: LightId) {
        if let Some(source) = self.sources.get_mut(&id) {
            source.visible_marks += 1;
        }
    }

    pub(crate) fn mark_hidden(&mut self, id: LightId) {
        if let Some(source) = self.sources.get_mut(&id) {
            source.visible_marks = source.visible_marks.saturating_sub(1);
        }
    }

    /// Advances fades, re-applies stale fans and republishes the mesh.
    pub fn process(&mut self, grid: &mut HexGrid, mesh: &mut LightMesh, now_ms: f64) {
        for source in self.sources.values_mut() {
            if source.state == FadeState::Idle {
                continue;
            }
            let (state, current) = advance_fade(
                source.state,
                source.start,
                source.target,
                now_ms - source.fade_begun,
                self.fade_ms,
            );
            source.state = state;
            if current != source.current {
                source.current = current;
                source.applied = false;
            }
        }

        let finished: Vec<LightId> = self
            .sources
            .iter()
            .filter(|(_, source)| source.state == FadeState::Finishing && source.current == 0)
            .map(|(&id, _)| id)
            .collect();
        for id in finished {
            if let Some(mut source) = self.sources.shift_remove(&id) {
                Self::clean_fan(id, &mut source, grid);
                self.render_requested = true;
            }
        }

        if self.rebuild_requested {
            self.rebuild_requested = false;
            grid.clear_light();
            for source in self.sources.values_mut() {
                source.marked.clear();
                source.fan.clear();
                source.visible_marks = 0;
                source.applied = false;
            }
        }

        for idx in 0..self.sources.len() {
            let stale = self
                .sources
                .get_index(idx)
                .map_or(false, |(_, source)| !source.applied);
            if stale {
                self.refan(idx, grid);
                self.render_requested = true;
            }
        }

        if self.render_requested {
            self.render_requested = false;
            mesh.rebuild(self.sources.values(), self.layout);
        }
    }

    /// Daylight capacity for one source, honoring its flags.
    fn capacity_for(&self, spec: LightSpec) -> i32 {
        let capacity = if spec.flags.global {
            self.day_plan.capacity_at(self.world_minutes)
        } else if !spec.night_only() {
            self.day_plan
                .capacity_at(self.map_time.unwrap_or(self.world_minutes))
        } else {
            100
        };
        if spec.flags.inverse {
            100 - capacity
        } else {
            capacity
        }
    }

    fn refan(&mut self, idx: usize, grid: &mut HexGrid) {
        let Some((&id, source)) = self.sources.get_index(idx) else {
            return;
        };
        let spec = source.spec;
        let current = source.current;
        let capacity = self.capacity_for(spec);
        let layout = self.layout;
        let window = self.window;
        let percent = [
            i32::from(spec.color[0]) * 100 / 255,
            i32::from(spec.color[1]) * 100 / 255,
            i32::from(spec.color[2]) * 100 / 255,
        ];
        let topology = grid.size().topology();
        let Some((_, source)) = self.sources.get_index_mut(idx) else {
            return;
        };
        Self::clean_fan(id, source, grid);
        let pass = FanPass {
            grid,
            id,
            topology,
            window,
            capacity,
            percent,
            marked: Vec::new(),
            visible_marks: 0,
        };
        let (fan, marked, visible_marks) = pass.run(spec, current, layout);
        source.fan = fan;
        source.marked = marked;
        source.visible_marks = visible_marks;
        source.applied = true;
    }

    /// Removes every grid mark of one source, restoring the pre-apply
    /// light buffer exactly.
    fn clean_fan(id: LightId, source: &mut LightSource, grid: &mut HexGrid) {
        for hex in source.marked.drain(..) {
            if grid.unmark_light(hex, id) && grid.field(hex).flags().visible {
                source.visible_marks = source.visible_marks.saturating_sub(1);
            }
        }
        debug_assert_eq!(source.visible_marks, 0);
        source.visible_marks = 0;
        source.fan.clear();
        source.applied = false;
    }
}

/// Scratch state for applying one source's fan to the grid.
struct FanPass<'a> {
    grid: &'a mut HexGrid,
    id: LightId,
    topology: Topology,
    window: LightWindow,
    capacity: i32,
    percent: [i32; 3],
    marked: Vec<MapHex>,
    visible_marks: u32,
}

impl FanPass<'_> {
    /// Walks the radius perimeter, traces every boundary cell and returns
    /// the finished fan plus mark bookkeeping.
    fn run(
        mut self,
        spec: LightSpec,
        current: i32,
        layout: GridLayout,
    ) -> (Vec<FanPoint>, Vec<MapHex>, u32) {
        let mut fan = Vec::new();
        let dist = i32::from(spec.radius);
        if spec.flags.all_directions_disabled() || dist < 1 {
            return (fan, self.marked, self.visible_marks);
        }

        let inten = current.clamp(0, 100) * 100;
        let alpha = MAX_LIGHT_ALPHA * self.capacity / 100 * inten / MAX_LIGHT_VALUE;
        let center = spec.hex;
        let size = self.grid.size();
        self.mark(center, inten);

        let base = layout.center_offset();
        let [r, g, b] = spec.color;
        fan.reserve(3 + dist as usize * self.topology.dirs() as usize);
        fan.push(FanPoint {
            hex: center,
            x: base.0,
            y: base.1,
            color: Rgba {
                r,
                g,
                b,
                a: alpha as u8,
            },
            use_offset: spec.use_offset,
        });

        let (segments, seg_len) = match self.topology {
            Topology::Hexagonal => (6_usize, dist as usize),
            Topology::Square => (4, dist as usize * 2),
        };
        let seek_dir = Dir(match self.topology {
            Topology::Hexagonal => 0,
            Topology::Square => 7,
        });
        let mut far = center.raw();
        let mut last: Option<MapHex> = None;

        for t in 0..segments * seg_len {
            let mut disabled = false;
            if t == 0 {
                for _ in 0..dist {
                    far = step_raw(self.topology, far, seek_dir);
                }
            } else {
                let segment = (t - 1) / seg_len;
                let dir = Dir(match self.topology {
                    Topology::Hexagonal => ((segment + 2) % 6) as u8,
                    Topology::Square => (((segment + 1) * 2) % 8) as u8,
                });
                far = step_raw(self.topology, far, dir);
                disabled = spec.flags.disabled(segment);
            }

            let stop = if disabled {
                center
            } else {
                self.trace_light(center, size.clamp(far), dist, inten)
            };
            if last == Some(stop) {
                continue;
            }
            last = Some(stop);

            let full_reach = stop.raw() == far;
            let a = if full_reach {
                0
            } else {
                let cut = size.distance(center, stop) as i32;
                (alpha - cut * alpha / dist).clamp(0, alpha)
            };
            let (ix, iy) = layout.hex_interval(self.topology, center.raw(), stop.raw());
            fan.push(FanPoint {
                hex: stop,
                x: base.0 + ix,
                y: base.1 + iy,
                color: Rgba { r, g, b, a: a as u8 },
                use_offset: full_reach && spec.use_offset,
            });
        }

        // Close the loop on the first boundary vertex.
        if fan.len() > 1 {
            let close = fan[1];
            if last != Some(close.hex) {
                fan.push(close);
            }
        }

        (fan, self.marked, self.visible_marks)
    }

    /// Float-steps from the center toward `target`, marking traversed
    /// cells, and returns where the ray stopped.
    ///
    /// Diagonal steps between interlocked columns pass two side cells;
    /// both are checked so light cannot thread a sealed zigzag wall.
    fn trace_light(&mut self, from: MapHex, target: MapHex, dist: i32, inten: i32) -> MapHex {
        let size = self.grid.size();
        let sub = inten / dist;
        let mut inten = inten;
        let (step_x, step_y) = steps_xy(from.raw(), target.raw());
        let mut float_x = from.x() as f32;
        let mut float_y = from.y() as f32;
        let mut cur = from.raw();

        loop {
            inten -= sub;
            float_x += step_x;
            float_y += step_y;
            let old = cur;
            cur = RawHex::new(round_half_up(float_x), round_half_up(float_y));
            let can_mark = self.window.contains(cur);

            let (mut side_x, mut side_y) = (0, 0);
            if old.x & 1 != 0 {
                if cur.x == old.x + 1 && cur.y == old.y + 1 {
                    side_x = 1;
                    side_y = 1;
                }
                if cur.x == old.x - 1 && cur.y == old.y + 1 {
                    side_x = -1;
                    side_y = 1;
                }
            } else {
                if cur.x == old.x - 1 && cur.y == old.y - 1 {
                    side_x = -1;
                    side_y = -1;
                }
                if cur.x == old.x + 1 && cur.y == old.y - 1 {
                    side_x = 1;
                    side_y = -1;
                }
            }

            if side_x != 0 {
                let side = RawHex::new(old.x + side_x, old.y);
                match size.contains(side) {
                    Some(hex) if !self.light_blocked(hex) => {
                        if can_mark {
                            self.mark_step(old, hex, inten);
                        }
                    }
                    side_hex => {
                        let stop = side_hex.unwrap_or_else(|| size.clamp(old));
                        if can_mark {
                            self.mark_end(old, stop, inten);
                        }
                        return stop;
                    }
                }
                let below = RawHex::new(old.x, old.y + side_y);
                match size.contains(below) {
                    Some(hex) if !self.light_blocked(hex) => {
                        if can_mark {
                            self.mark_step(old, hex, inten);
                        }
                    }
                    below_hex => {
                        let stop = below_hex.unwrap_or_else(|| size.clamp(old));
                        if can_mark {
                            self.mark_end(old, stop, inten);
                        }
                        return stop;
                    }
                }
            }

            match size.contains(cur) {
                Some(hex) if !self.light_blocked(hex) => {
                    if can_mark {
                        self.mark_end(old, hex, inten);
                    }
                    if hex == target {
                        return target;
                    }
                }
                _ => {
                    let stop = size.clamp(RawHex::new(
                        if cur.x < 0 || cur.x >= i32::from(size.width()) {
                            old.x
                        } else {
                            cur.x
                        },
                        if cur.y < 0 || cur.y >= i32::from(size.height()) {
                            old.y
                        } else {
                            cur.y
                        },
                    ));
                    if can_mark {
                        self.mark_end(old, stop, inten);
                    }
                    return stop;
                }
            }
        }
    }

    fn light_blocked(&self, hex: MapHex) -> bool {
        self.grid.field(hex).flags().light_blocked
    }

    /// End-of-ray marking: the stop cell lights up only when approached
    /// from a bearing its corner orientation accepts, and a lit wall
    /// leaks half intensity to its matching neighbors.
    fn mark_end(&mut self, from: RawHex, to: MapHex, inten: i32) {
        let field = self.grid.field(to);
        let is_wall = field.flags().wall;
        let north_south = is_wall && field.corner().is_north_south();
        let dir = far_dir(self.topology, from, to.raw()).index();
        let allowed =
            dir == 0 || (north_south && dir == 1) || (!north_south && (dir == 4 || dir == 5));
        if !allowed {
            return;
        }
        self.mark(to, inten);
        if !is_wall {
            return;
        }
        let size = self.grid.size();
        let (x, y) = (i32::from(to.x()), i32::from(to.y()));
        if north_south {
            for dy in [-1, 1] {
                if let Some(hex) = size.contains(RawHex::new(x, y + dy)) {
                    self.mark_end_neighbor(hex, true, inten);
                }
            }
        } else {
            for dx in [-1, 1] {
                for dy in [0, -1, 1] {
                    if let Some(hex) = size.contains(RawHex::new(x + dx, y + dy)) {
                        self.mark_end_neighbor(hex, false, inten);
                    }
                }
            }
        }
    }

    /// Wall-to-wall leakage: a neighbor wall with a matching orientation
    /// receives half intensity on top of its current light, capped at the
    /// full contribution.
    fn mark_end_neighbor(&mut self, hex: MapHex, north_south: bool, inten: i32) {
        let field = self.grid.field(hex);
        if !field.flags().wall {
            return;
        }
        let corner = field.corner();
        let matched = (north_south && corner.is_north_south())
            || (!north_south && matches!(corner, Corner::EastWest | Corner::East))
            || corner == Corner::South;
        if !matched {
            return;
        }
        let resolved = field.resolved_light();
        let full = self.channels(inten);
        let half = self.channels(inten / 2);
        let mut rgb = [0_u8; 3];
        for c in 0..3 {
            rgb[c] = (i32::from(resolved[c]) + i32::from(half[c])).min(i32::from(full[c])) as u8;
        }
        self.record(hex, rgb);
    }

    /// Mid-ray marking: transparent walls light only from an accepted
    /// bearing, anything else lights unconditionally.
    fn mark_step(&mut self, from: RawHex, to: MapHex, inten: i32) {
        let field = self.grid.field(to);
        if field.flags().transparent_wall {
            let north_south = field.corner().is_north_south();
            let dir = far_dir(self.topology, from, to.raw()).index();
            let allowed = dir == 0
                || (north_south && dir == 1)
                || (!north_south && (dir == 4 || dir == 5));
            if allowed {
                self.mark(to, inten);
            }
        } else {
            self.mark(to, inten);
        }
    }

    fn mark(&mut self, hex: MapHex, inten: i32) {
        let rgb = self.channels(inten);
        self.record(hex, rgb);
    }

    fn record(&mut self, hex: MapHex, rgb: [u8; 3]) {
        if self.grid.mark_light(hex, self.id, rgb) {
            self.marked.push(hex);
            if self.grid.field(hex).flags().visible {
                self.visible_marks += 1;
            }
        }
    }

    /// Per-channel contribution of `inten` under the current capacity.
    fn channels(&self, inten: i32) -> [u8; 3] {
        let light = inten * MAX_LIGHT_HEX / MAX_LIGHT_VALUE * self.capacity / 100;
        [
            (light * self.percent[0] / 100) as u8,
            (light * self.percent[1] / 100) as u8,
            (light * self.percent[2] / 100) as u8,
        ]
    }
}

/// Exact half-up rounding of the ray walk, matching sprite-grid casts.
fn round_half_up(v: f32) -> i32 {
    let mut i = v as i32;
    if v - i as f32 >= 0.5 {
        i += 1;
    }
    i
}

/// A complete fan for one source.
#[derive(Clone, Debug)]
pub struct LightFan {
    /// Cell the fan is anchored to.
    pub center: MapHex,
    /// Center vertex followed by the closed boundary loop.
    pub points: Vec<FanPoint>,
}

/// Prepared light geometry for the renderer.
///
/// Regenerated by [`Lighting::process`] at most once per tick, and only
/// when something changed; `generation` bumps on every regeneration so
/// render extraction can skip untouched frames.
#[derive(Resource, Clone, Debug, Default)]
pub struct LightMesh {
    fans: Vec<LightFan>,
    soft: Vec<[FanPoint; 3]>,
    generation: u64,
}

impl LightMesh {
    /// Triangle fans, one per applied source.
    #[inline]
    #[must_use]
    pub fn fans(&self) -> &[LightFan] {
        &self.fans
    }

    /// Soft-edge triangles feathering long boundary edges.
    #[inline]
    #[must_use]
    pub fn soft(&self) -> &[[FanPoint; 3]] {
        &self.soft
    }

    /// Bumped every time the buffers are regenerated.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn rebuild<'a>(&mut self, sources: impl Iterator<Item = &'a LightSource>, layout: GridLayout) {
        self.fans.clear();
        self.soft.clear();
        for source in sources {
            if source.fan.is_empty() {
                continue;
            }
            push_soft(&mut self.soft, &source.fan, layout.hex_width as u32);
            self.fans.push(LightFan {
                center: source.spec.hex,
                points: source.fan.clone(),
            });
        }
        self.generation = self.generation.wrapping_add(1);
    }
}

/// Emits feathering triangles along boundary edges longer than
/// `soft_length` pixels, leaning the third vertex slightly outward.
fn push_soft(soft: &mut Vec<[FanPoint; 3]>, points: &[FanPoint], soft_length: u32) {
    let base = (points[0].x, points[0].y);
    for (&cur, &next) in points[1..].iter().tuple_windows() {
        if pixel_dist((cur.x, cur.y), (next.x, next.y)) <= soft_length {
            continue;
        }
        let outward = pixel_dist(base, (cur.x, cur.y)) > pixel_dist(base, (next.x, next.y));
        let (dx, dy) = if outward {
            (next.x - cur.x, next.y - cur.y)
        } else {
            (cur.x - next.x, cur.y - next.y)
        };
        let (rx, ry) = rotate_steps((dx as f32, dy as f32), if outward { -2.5 } else { 2.5 });
        let anchor = if outward { cur } else { next };
        soft.push([
            next,
            cur,
            FanPoint {
                x: anchor.x + rx as i32,
                y: anchor.y + ry as i32,
                ..anchor
            },
        ]);
    }
}

/// Advances light fades against the app clock each fixed tick.
pub(crate) fn process_lights(
    time: Res<Time>,
    mut lighting: ResMut<Lighting>,
    mut grid: ResMut<HexGrid>,
    mut mesh: ResMut<LightMesh>,
) {
    let now_ms = time.elapsed_seconds_f64() * 1000.0;
    lighting.process(&mut grid, &mut mesh, now_ms);
}
