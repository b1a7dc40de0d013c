//! The per-cell field store.
//!
//! [`HexGrid`] owns one [`HexField`] per cell: derived blocking flags,
//! wall orientation, roof component, occupant registrations, accumulated
//! light and the overlay chain the viewport manages. Flags are never
//! edited directly; occupancy changes go through the add/remove methods
//! which re-derive the cache via [`HexGrid::recache`].

mod occupant;

use bevy::prelude::*;
use bevy::utils::HashMap;
use thiserror::Error;

pub use occupant::{Corner, CritterId, CritterProfile, ItemId, ItemProfile};

use crate::geometry::{ring_offsets, ring_table_len, GridSize, LineTracer, MapHex, RawHex, Topology};
use crate::light::LightId;

/// Deepest neighbor ring the cached offset tables cover. Multihex radii
/// and pathfinder probes must stay inside it.
pub const MAX_RING_RADIUS: u16 = 50;

/// Derived blocking flags of one cell.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FieldFlags {
    /// A wall piece stands here.
    pub wall: bool,
    /// The wall passes light despite standing here.
    pub transparent_wall: bool,
    /// Decorative scenery stands here.
    pub scenery: bool,
    /// Walkers cannot enter.
    pub move_blocked: bool,
    /// Projectiles and sight stop here.
    pub shoot_blocked: bool,
    /// Light stops here.
    pub light_blocked: bool,
    /// The viewport refuses to scroll past this cell.
    pub scroll_block: bool,
    /// Covered by the body of a multihex critter centered elsewhere.
    pub multihex: bool,
    /// Currently inside the viewport.
    pub visible: bool,
}

/// A drawable attached to a visible cell.
///
/// The render layer walks these per cell; the engine only decides what
/// exists and where it anchors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overlay {
    /// Cell outline.
    GridLine,
    /// Movement trace mark; `target` distinguishes the endpoint.
    Track { target: bool },
    /// Marker on a scroll-block cell.
    ScrollBlock,
    /// Rain drop with a pixel jitter, either on the ground or a roof.
    RainDrop { jitter: (i8, i8), on_roof: bool },
    /// Roof tile cover.
    Roof,
    /// An item occupant's sprite.
    Item(ItemId),
    /// A dead critter's sprite.
    DeadCritter(CritterId),
    /// A live critter's sprite.
    Critter(CritterId),
}

/// One cell of the store.
#[derive(Clone, Debug, Default)]
pub struct HexField {
    flags: FieldFlags,
    corner: Corner,
    roof_component: u16,
    has_roof: bool,
    critter: Option<(CritterId, CritterProfile)>,
    dead_critters: Vec<CritterId>,
    items: Vec<(ItemId, ItemProfile)>,
    block_lines: Vec<(ItemId, ItemProfile)>,
    light_marks: HashMap<LightId, [u8; 3]>,
    resolved_light: [u8; 3],
    overlays: Vec<Overlay>,
    screen: (i32, i32),
    area_scroll_block: bool,
}

impl HexField {
    /// Derived blocking flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> FieldFlags {
        self.flags
    }

    /// Orientation of the wall standing here, if any.
    #[inline]
    #[must_use]
    pub fn corner(&self) -> Corner {
        self.corner
    }

    /// Roof component this cell belongs to; 0 = none assigned.
    #[inline]
    #[must_use]
    pub fn roof_component(&self) -> u16 {
        self.roof_component
    }

    /// Whether a roof tile covers this cell.
    #[inline]
    #[must_use]
    pub fn has_roof(&self) -> bool {
        self.has_roof
    }

    /// The live critter standing here.
    #[inline]
    #[must_use]
    pub fn critter(&self) -> Option<CritterId> {
        self.critter.map(|(id, _)| id)
    }

    /// Dead critters lying here.
    #[inline]
    #[must_use]
    pub fn dead_critters(&self) -> &[CritterId] {
        &self.dead_critters
    }

    /// Item occupants registered here.
    #[inline]
    #[must_use]
    pub fn items(&self) -> &[(ItemId, ItemProfile)] {
        &self.items
    }

    /// Combined light falling on this cell, per channel.
    #[inline]
    #[must_use]
    pub fn resolved_light(&self) -> [u8; 3] {
        self.resolved_light
    }

    /// Light sources currently contributing here.
    pub fn light_sources(&self) -> impl Iterator<Item = LightId> + '_ {
        self.light_marks.keys().copied()
    }

    /// Overlay chain; populated only while the cell is visible.
    #[inline]
    #[must_use]
    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    /// Sprite anchor in screen pixels; valid only while visible.
    #[inline]
    #[must_use]
    pub fn screen(&self) -> (i32, i32) {
        self.screen
    }

    /// Recomputes the derived flags from the occupant lists.
    fn recache(&mut self) {
        self.flags.wall = false;
        self.flags.transparent_wall = false;
        self.flags.scenery = false;
        self.flags.shoot_blocked = false;
        self.flags.light_blocked = false;
        self.flags.scroll_block = self.area_scroll_block;
        self.corner = Corner::default();
        self.has_roof = false;
        self.flags.move_blocked = self.critter.is_some() || self.flags.multihex;
        for (_, profile) in &self.items {
            if profile.wall {
                self.flags.wall = true;
                self.flags.transparent_wall = !profile.blocks_light;
                self.corner = profile.corner;
            } else if profile.scenery {
                self.flags.scenery = true;
            }
            if profile.roof_tile {
                self.has_roof = true;
            }
            if profile.blocks_move {
                self.flags.move_blocked = true;
            }
            if profile.blocks_shoot {
                self.flags.shoot_blocked = true;
            }
            if profile.blocks_light {
                self.flags.light_blocked = true;
            }
            if profile.scroll_block {
                self.flags.scroll_block = true;
            }
        }
        for (_, profile) in &self.block_lines {
            self.flags.move_blocked = true;
            if profile.blocks_shoot {
                self.flags.shoot_blocked = true;
            }
            if profile.blocks_light {
                self.flags.light_blocked = true;
            }
        }
        // Nothing stops a projectile without also stopping a walker.
        if self.flags.shoot_blocked {
            self.flags.move_blocked = true;
        }
    }
}

/// Endpoints of a passage trace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Trace {
    /// Last cell before the stop.
    pub pre_block: MapHex,
    /// The cell the walk stopped on.
    pub block: MapHex,
}

/// Rectangle (inclusive corners) the viewport is clamped into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScrollArea {
    pub x0: u16,
    pub y0: u16,
    pub x1: u16,
    pub y1: u16,
}

impl ScrollArea {
    #[inline]
    #[must_use]
    pub const fn width(self) -> u16 {
        self.x1 - self.x0 + 1
    }

    #[inline]
    #[must_use]
    pub const fn height(self) -> u16 {
        self.y1 - self.y0 + 1
    }
}

/// Why a resize was refused.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeError {
    #[error("grid dimensions {width}x{height} must both be nonzero")]
    Empty { width: u16, height: u16 },
    #[error("cannot change topology from {from} to {to} while resizing")]
    TopologyChange { from: Topology, to: Topology },
}

/// The field store.
#[derive(Resource)]
pub struct HexGrid {
    size: GridSize,
    fields: Vec<HexField>,
    track: Vec<u8>,
    show_track: bool,
    scroll_area: Option<ScrollArea>,
    // Ring offset tables for even and odd center columns.
    offsets: [Vec<(i16, i16)>; 2],
}

impl HexGrid {
    /// Allocates a store for `size`.
    ///
    /// # Panics
    ///
    /// Panics when either dimension is zero; validate configuration before
    /// building the store.
    #[must_use]
    pub fn new(size: GridSize) -> Self {
        assert!(
            size.width() > 0 && size.height() > 0,
            "cannot allocate an empty grid {size}"
        );
        let topology = size.topology();
        let offsets = match topology {
            Topology::Hexagonal => [
                ring_offsets(topology, false, MAX_RING_RADIUS),
                ring_offsets(topology, true, MAX_RING_RADIUS),
            ],
            Topology::Square => {
                let table = ring_offsets(topology, false, MAX_RING_RADIUS);
                [table.clone(), table]
            }
        };
        HexGrid {
            size,
            fields: vec![HexField::default(); size.count()],
            track: vec![0; size.count()],
            show_track: false,
            scroll_area: None,
            offsets,
        }
    }

    /// The grid dimensions.
    #[inline]
    #[must_use]
    pub fn size(&self) -> GridSize {
        self.size
    }

    #[inline]
    fn index(&self, hex: MapHex) -> usize {
        assert!(
            hex.x() < self.size.width() && hex.y() < self.size.height(),
            "hex {hex} outside grid {}",
            self.size
        );
        hex.y() as usize * self.size.width() as usize + hex.x() as usize
    }

    /// The field of a cell.
    #[inline]
    #[must_use]
    pub fn field(&self, hex: MapHex) -> &HexField {
        &self.fields[self.index(hex)]
    }

    #[inline]
    fn field_mut(&mut self, hex: MapHex) -> &mut HexField {
        let index = self.index(hex);
        &mut self.fields[index]
    }

    /// Re-derives a cell's flags from its occupant lists.
    pub fn recache(&mut self, hex: MapHex) {
        self.field_mut(hex).recache();
    }

    /// Offsets of all cells within `radius` rings of a center of the given
    /// column parity.
    #[must_use]
    pub fn ring_slice(&self, odd: bool, radius: u16) -> &[(i16, i16)] {
        assert!(
            radius <= MAX_RING_RADIUS,
            "ring radius {radius} exceeds the cached {MAX_RING_RADIUS}"
        );
        &self.offsets[usize::from(odd)][..ring_table_len(self.size.topology(), radius)]
    }

    // ---- occupants -------------------------------------------------------

    /// Registers an item occupant and re-derives the touched cells.
    ///
    /// # Panics
    ///
    /// Panics when `id` is already registered on `hex`.
    pub fn add_item(&mut self, hex: MapHex, id: ItemId, profile: ItemProfile) {
        let field = self.field_mut(hex);
        assert!(
            field.items.iter().all(|(other, _)| *other != id),
            "{id} is already registered at {hex}"
        );
        field.items.push((id, profile.clone()));
        field.recache();
        self.place_block_lines(hex, id, &profile);
    }

    /// Removes an item occupant and re-derives the touched cells.
    ///
    /// # Panics
    ///
    /// Panics when `id` is not registered on `hex`.
    pub fn remove_item(&mut self, hex: MapHex, id: ItemId) {
        let field = self.field_mut(hex);
        let position = field
            .items
            .iter()
            .position(|(other, _)| *other == id)
            .unwrap_or_else(|| panic!("{id} is not registered at {hex}"));
        let (_, profile) = field.items.remove(position);
        field.recache();
        self.erase_block_lines(hex, id, &profile);
    }

    fn place_block_lines(&mut self, hex: MapHex, id: ItemId, profile: &ItemProfile) {
        let mut cur = hex;
        for &dir in &profile.block_lines {
            let Some(next) = self.size.step(cur, dir) else {
                break;
            };
            cur = next;
            let field = self.field_mut(cur);
            field.block_lines.push((id, profile.clone()));
            field.recache();
        }
    }

    fn erase_block_lines(&mut self, hex: MapHex, id: ItemId, profile: &ItemProfile) {
        let mut cur = hex;
        for &dir in &profile.block_lines {
            let Some(next) = self.size.step(cur, dir) else {
                break;
            };
            cur = next;
            let field = self.field_mut(cur);
            if let Some(position) = field.block_lines.iter().position(|(other, _)| *other == id) {
                field.block_lines.remove(position);
            }
            field.recache();
        }
    }

    /// Registers a critter occupant, marking its multihex ring.
    ///
    /// # Panics
    ///
    /// Panics when a live critter already stands on `hex`, or when `id` is
    /// already lying there dead.
    pub fn add_critter(&mut self, hex: MapHex, id: CritterId, profile: CritterProfile) {
        let field = self.field_mut(hex);
        if profile.dead {
            assert!(
                !field.dead_critters.contains(&id),
                "{id} is already lying at {hex}"
            );
            field.dead_critters.push(id);
            field.recache();
        } else {
            assert!(
                field.critter.is_none(),
                "{id} cannot stand at {hex}, it is occupied"
            );
            field.critter = Some((id, profile));
            field.recache();
            self.set_multihex(hex, profile.multihex, true);
        }
    }

    /// Removes a critter occupant, clearing its multihex ring.
    ///
    /// # Panics
    ///
    /// Panics when `id` is not registered on `hex`.
    pub fn remove_critter(&mut self, hex: MapHex, id: CritterId) {
        let field = self.field_mut(hex);
        if let Some((standing, profile)) = field.critter {
            if standing == id {
                field.critter = None;
                field.recache();
                self.set_multihex(hex, profile.multihex, false);
                return;
            }
        }
        let field = self.field_mut(hex);
        let position = field
            .dead_critters
            .iter()
            .position(|other| *other == id)
            .unwrap_or_else(|| panic!("{id} is not registered at {hex}"));
        field.dead_critters.remove(position);
        field.recache();
    }

    /// Marks or clears the multihex flag on the rings around a center.
    ///
    /// The center cell itself is untouched; whoever stands there already
    /// blocks it.
    pub fn set_multihex(&mut self, center: MapHex, radius: u16, on: bool) {
        if radius == 0 {
            return;
        }
        assert!(
            radius <= MAX_RING_RADIUS,
            "multihex radius {radius} exceeds the cached {MAX_RING_RADIUS}"
        );
        let count = ring_table_len(self.size.topology(), radius);
        for i in 0..count {
            let (ox, oy) = self.offsets[usize::from(center.odd())][i];
            let raw = RawHex::new(center.x() as i32 + ox as i32, center.y() as i32 + oy as i32);
            if let Some(hex) = self.size.contains(raw) {
                let field = self.field_mut(hex);
                field.flags.multihex = on;
                field.recache();
            }
        }
    }

    // ---- roofs -----------------------------------------------------------

    /// Floods roof component ids over roof-covered cells.
    ///
    /// Roofs are authored on a lattice `stride` cells apart; each connected
    /// patch receives one id so the viewport can hide it as a unit. Runs
    /// once after loading; re-running renumbers from scratch.
    pub fn assign_roof_components(&mut self, stride: u16) {
        assert!(stride > 0, "roof stride must be nonzero");
        for field in &mut self.fields {
            field.roof_component = 0;
        }
        let mut next = 0u16;
        for x in 0..self.size.width() {
            for y in 0..self.size.height() {
                let hex = MapHex::new(x, y);
                if self.field(hex).has_roof && self.field(hex).roof_component == 0 {
                    next += 1;
                    self.flood_roof(hex.raw(), next, stride as i32);
                }
            }
        }
    }

    fn flood_roof(&mut self, start: RawHex, component: u16, stride: i32) {
        let mut pending = vec![start];
        while let Some(origin) = pending.pop() {
            let Some(hex) = self.size.contains(origin) else {
                continue;
            };
            if !self.field(hex).has_roof || self.field(hex).roof_component != 0 {
                continue;
            }
            for dy in 0..stride {
                for dx in 0..stride {
                    let raw = RawHex::new(origin.x + dx, origin.y + dy);
                    if let Some(cell) = self.size.contains(raw) {
                        self.field_mut(cell).roof_component = component;
                    }
                }
            }
            pending.push(RawHex::new(origin.x + stride, origin.y));
            pending.push(RawHex::new(origin.x - stride, origin.y));
            pending.push(RawHex::new(origin.x, origin.y + stride));
            pending.push(RawHex::new(origin.x, origin.y - stride));
        }
    }

    // ---- scroll area -----------------------------------------------------

    /// Installs or clears the viewport clamp area.
    ///
    /// Cells outside the area and the `band`-cell fringe just inside its
    /// boundary receive the scroll-block flag.
    pub fn set_scroll_area(&mut self, area: Option<ScrollArea>, band: u16) {
        if let Some(area) = area {
            assert!(
                area.x0 <= area.x1
                    && area.y0 <= area.y1
                    && area.x1 < self.size.width()
                    && area.y1 < self.size.height(),
                "scroll area out of range for grid {}",
                self.size
            );
        }
        self.scroll_area = area;
        for hex in self.size.iter() {
            let blocked = match area {
                None => false,
                Some(area) => {
                    let inside = hex.x() >= area.x0
                        && hex.x() <= area.x1
                        && hex.y() >= area.y0
                        && hex.y() <= area.y1;
                    !inside
                        || hex.x() - area.x0 < band
                        || area.x1 - hex.x() < band
                        || hex.y() - area.y0 < band
                        || area.y1 - hex.y() < band
                }
            };
            let field = self.field_mut(hex);
            if field.area_scroll_block != blocked {
                field.area_scroll_block = blocked;
                field.recache();
            }
        }
    }

    /// The installed clamp area, if any.
    #[inline]
    #[must_use]
    pub fn scroll_area(&self) -> Option<ScrollArea> {
        self.scroll_area
    }

    // ---- track -----------------------------------------------------------

    /// Enables or disables movement track recording.
    pub fn set_show_track(&mut self, on: bool) {
        self.show_track = on;
        if !on {
            self.clear_track();
        }
    }

    /// Whether track recording is on.
    #[inline]
    #[must_use]
    pub fn show_track(&self) -> bool {
        self.show_track
    }

    /// Track mark of a cell: 0 none, 1 trace target, 2 trace step.
    #[inline]
    #[must_use]
    pub fn track(&self, hex: MapHex) -> u8 {
        self.track[self.index(hex)]
    }

    /// Wipes all track marks.
    pub fn clear_track(&mut self) {
        self.track.fill(0);
    }

    // ---- tracing ---------------------------------------------------------

    /// Walks the line from `from` toward `to` and reports where it stopped.
    ///
    /// `dist` limits the walk in cells; zero means the full grid distance.
    /// With `stop_at_shoot_block` the walk ends on the first cell whose
    /// shoot flag is set, otherwise it runs its whole length. A `collect`
    /// buffer receives every visited cell and suppresses blocking checks.
    pub fn trace_passage(
        &mut self,
        from: MapHex,
        to: MapHex,
        dist: u32,
        angle: f32,
        stop_at_shoot_block: bool,
        mut collect: Option<&mut Vec<MapHex>>,
    ) -> Trace {
        let dist = if dist == 0 {
            self.size.distance(from, to)
        } else {
            dist
        };
        if self.show_track {
            self.clear_track();
        }
        let mut tracer = LineTracer::new(self.size, from, to, angle);
        let mut cur = from;
        let mut old = from;
        for _ in 0..dist {
            cur = tracer.next(cur);
            if self.show_track {
                let index = self.index(cur);
                self.track[index] = if cur == to { 1 } else { 2 };
            }
            if let Some(steps) = collect.as_deref_mut() {
                steps.push(cur);
                continue;
            }
            if stop_at_shoot_block && self.field(cur).flags.shoot_blocked {
                break;
            }
            old = cur;
        }
        Trace {
            pre_block: old,
            block: cur,
        }
    }

    // ---- light accumulation ---------------------------------------------

    /// Merges a source's contribution into a cell, per-channel max.
    ///
    /// Returns whether this was the source's first mark on the cell.
    pub(crate) fn mark_light(&mut self, hex: MapHex, id: LightId, rgb: [u8; 3]) -> bool {
        let field = self.field_mut(hex);
        let newly = !field.light_marks.contains_key(&id);
        let slot = field.light_marks.entry(id).or_insert([0; 3]);
        for channel in 0..3 {
            slot[channel] = slot[channel].max(rgb[channel]);
            field.resolved_light[channel] = field.resolved_light[channel].max(rgb[channel]);
        }
        newly
    }

    /// Removes a source's contribution from a cell and re-resolves the
    /// remainder. Returns whether an entry existed.
    pub(crate) fn unmark_light(&mut self, hex: MapHex, id: LightId) -> bool {
        let field = self.field_mut(hex);
        if field.light_marks.remove(&id).is_none() {
            return false;
        }
        let mut resolved = [0u8; 3];
        for rgb in field.light_marks.values() {
            for channel in 0..3 {
                resolved[channel] = resolved[channel].max(rgb[channel]);
            }
        }
        field.resolved_light = resolved;
        true
    }

    /// Wipes every light contribution; used by full relights.
    pub(crate) fn clear_light(&mut self) {
        for field in &mut self.fields {
            field.light_marks.clear();
            field.resolved_light = [0; 3];
        }
    }

    // ---- viewport bookkeeping -------------------------------------------

    pub(crate) fn set_visible(&mut self, hex: MapHex, visible: bool) {
        self.field_mut(hex).flags.visible = visible;
    }

    pub(crate) fn set_screen(&mut self, hex: MapHex, screen: (i32, i32)) {
        self.field_mut(hex).screen = screen;
    }

    pub(crate) fn push_overlay(&mut self, hex: MapHex, overlay: Overlay) {
        self.field_mut(hex).overlays.push(overlay);
    }

    pub(crate) fn clear_overlays(&mut self, hex: MapHex) {
        self.field_mut(hex).overlays.clear();
    }

    // ---- resize ----------------------------------------------------------

    /// Reallocates the store for new dimensions (editor mode).
    ///
    /// All occupants, marks and caches are dropped; the caller re-adds
    /// occupants afterward.
    pub fn resize(&mut self, size: GridSize) -> Result<(), ResizeError> {
        if size.width() == 0 || size.height() == 0 {
            return Err(ResizeError::Empty {
                width: size.width(),
                height: size.height(),
            });
        }
        if size.topology() != self.size.topology() {
            return Err(ResizeError::TopologyChange {
                from: self.size.topology(),
                to: size.topology(),
            });
        }
        info!("Resizing field store from {} to {size}", self.size);
        self.size = size;
        self.fields = vec![HexField::default(); size.count()];
        self.track = vec![0; size.count()];
        self.scroll_area = None;
        Ok(())
    }
}
