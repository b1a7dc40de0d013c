//! The rendered window over the grid.
//!
//! A [`Viewport`] keeps a lattice of [`ViewEntry`] records, one per screen
//! position, each naming the raw cell drawn there and its pixel anchor.
//! Scrolling accumulates sub-cell pixel offsets; when a whole-cell boundary
//! is crossed the lattice is shifted in place and only the edge strips are
//! hidden and re-shown. Full rebuilds are reserved for zoom or screen-size
//! changes and explicit invalidation. Showing a cell instantiates its
//! decorative overlays on the store and bumps the visible-refcount of every
//! light source marked there; hiding reverses both.

use bevy::prelude::*;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::MapConfig;
use crate::fields::{HexGrid, Overlay};
use crate::geometry::{pixel_dist, Dir, GridLayout, MapHex, RawHex, Topology};
use crate::light::{LightWindow, Lighting};

/// One screen position of the view lattice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewEntry {
    /// Cell drawn at this position; may lie outside the grid near edges.
    pub raw: RawHex,
    /// Sprite anchor in zoomed screen pixels.
    pub screen: (i32, i32),
}

impl Default for ViewEntry {
    fn default() -> Self {
        ViewEntry {
            raw: RawHex::ZERO,
            screen: (0, 0),
        }
    }
}

/// Edge-scroll intent for the current tick, written by the embedding
/// input layer and consumed by [`Viewport::tick`].
#[derive(Resource, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScrollInput {
    pub left: bool,
    pub right: bool,
    pub up: bool,
    pub down: bool,
}

impl ScrollInput {
    fn any(self) -> bool {
        self.left || self.right || self.up || self.down
    }
}

/// In-flight smooth scroll toward a pixel target.
#[derive(Clone, Copy, Debug, Default)]
struct AutoScroll {
    active: bool,
    can_stop: bool,
    speed: f32,
    offs_x: f32,
    offs_y: f32,
    step_x: f32,
    step_y: f32,
}

/// The view-field manager.
#[derive(Resource)]
pub struct Viewport {
    layout: GridLayout,
    screen_width: i32,
    screen_height: i32,
    zoom: f32,
    zoom_min: f32,
    zoom_max: f32,
    scroll_step: i32,
    scroll_delay: u32,
    scroll_check_on: bool,
    show_hex_grid: bool,
    show_scroll_block: bool,
    entries: Vec<ViewEntry>,
    // View extent in lattice cells, before and after border margins.
    view_width: i32,
    view_height: i32,
    w_visible: i32,
    h_visible: i32,
    h_top: i32,
    h_bottom: i32,
    w_left: i32,
    w_right: i32,
    screen_hex: RawHex,
    offset: (i32, i32),
    auto: AutoScroll,
    last_scroll_ms: Option<f64>,
    rain_capacity: u8,
    roof_skip: u16,
    rng: SmallRng,
    dirty: bool,
    needs_resize: bool,
}

impl Viewport {
    /// Builds the manager for a configuration, centered on the grid middle.
    ///
    /// The border margins start at one scroll step of slack per side so
    /// edge cells stay resident while a crossing is in flight; callers
    /// with taller art grow them through [`Viewport::cover_overhang`].
    #[must_use]
    pub fn new(config: &MapConfig) -> Self {
        let mut viewport = Viewport {
            layout: config.layout,
            screen_width: config.screen_width,
            screen_height: config.screen_height,
            zoom: 1.0,
            zoom_min: config.zoom_min,
            zoom_max: config.zoom_max,
            scroll_step: config.scroll_step,
            scroll_delay: config.scroll_delay,
            scroll_check_on: config.scroll_check,
            show_hex_grid: config.show_hex_grid,
            show_scroll_block: config.show_scroll_block,
            entries: Vec::new(),
            view_width: 0,
            view_height: 0,
            w_visible: 0,
            h_visible: 0,
            h_top: 0,
            h_bottom: 0,
            w_left: 0,
            w_right: 0,
            screen_hex: RawHex::new(i32::from(config.width / 2), i32::from(config.height / 2)),
            offset: (0, 0),
            auto: AutoScroll::default(),
            last_scroll_ms: None,
            rain_capacity: 0,
            roof_skip: 0,
            rng: SmallRng::seed_from_u64(config.rng_seed),
            dirty: true,
            needs_resize: false,
        };
        viewport.cover_overhang(0, 0, 0, 0);
        viewport.apply_view_size();
        viewport.needs_resize = false;
        viewport
    }

    // ---- accessors -------------------------------------------------------

    /// Current zoom factor; larger shows more cells.
    #[inline]
    #[must_use]
    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    /// Sub-cell scroll offset in pixels.
    #[inline]
    #[must_use]
    pub fn offset(&self) -> (i32, i32) {
        self.offset
    }

    /// Cell under the view center.
    #[inline]
    #[must_use]
    pub fn screen_hex(&self) -> RawHex {
        self.screen_hex
    }

    /// Lattice extent including border margins, columns then rows.
    #[inline]
    #[must_use]
    pub fn visible_extent(&self) -> (i32, i32) {
        (self.w_visible, self.h_visible)
    }

    /// The whole view lattice, row-major.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[ViewEntry] {
        &self.entries
    }

    /// One lattice position.
    #[must_use]
    pub fn entry(&self, x: i32, y: i32) -> ViewEntry {
        assert!(
            x >= 0 && x < self.w_visible && y >= 0 && y < self.h_visible,
            "view position ({x}, {y}) outside {}x{}",
            self.w_visible,
            self.h_visible
        );
        self.entries[(y * self.w_visible + x) as usize]
    }

    /// Whether a smooth scroll is still in flight.
    #[inline]
    #[must_use]
    pub fn auto_scrolling(&self) -> bool {
        self.auto.active
    }

    /// Screen pixel position of a cell, from the view-center anchor.
    #[must_use]
    pub fn screen_position_of(&self, grid: &HexGrid, hex: MapHex) -> (i32, i32) {
        let center = self.entry(self.w_visible / 2, self.h_visible / 2);
        let (x, y) = self
            .layout
            .hex_interval(grid.size().topology(), center.raw, hex.raw());
        (x + center.screen.0, y + center.screen.1)
    }

    // ---- requests --------------------------------------------------------

    /// Flags the whole view stale; the next tick rebuilds it.
    pub fn request_rebuild(&mut self) {
        self.dirty = true;
    }

    /// Re-centers the view on a cell at the next tick.
    pub fn center_on(&mut self, hex: MapHex) {
        self.screen_hex = hex.raw();
        self.dirty = true;
    }

    /// Sets the rain overlay density, 0 disables.
    pub fn set_rain(&mut self, capacity: u8) {
        if self.rain_capacity != capacity {
            self.rain_capacity = capacity;
            self.dirty = true;
        }
    }

    /// Toggles the cell outline overlay.
    pub fn set_show_hex_grid(&mut self, on: bool) {
        if self.show_hex_grid != on {
            self.show_hex_grid = on;
            self.dirty = true;
        }
    }

    /// Toggles markers on scroll-block cells.
    pub fn set_show_scroll_block(&mut self, on: bool) {
        if self.show_scroll_block != on {
            self.show_scroll_block = on;
            self.dirty = true;
        }
    }

    /// Hides the roof patch the viewer stands under.
    ///
    /// Passing a roofless cell restores all roofs.
    pub fn set_skip_roof(&mut self, grid: &HexGrid, hex: MapHex) {
        let component = grid.field(hex).roof_component();
        if self.roof_skip != component {
            self.roof_skip = component;
            self.dirty = true;
        }
    }

    /// Adopts a new screen size; the view is resized at the next tick.
    pub fn set_screen_size(&mut self, width: i32, height: i32) {
        assert!(
            width > 0 && height > 0,
            "screen {width}x{height} must be positive"
        );
        self.screen_width = width;
        self.screen_height = height;
        self.needs_resize = true;
    }

    /// Grows the border margins to cover sprite overhangs, in pixels past
    /// the cell anchor per side. Returns whether anything grew; growth
    /// queues a view resize.
    pub fn cover_overhang(&mut self, top: i32, bottom: i32, left: i32, right: i32) -> bool {
        let (scroll_ox, scroll_oy) = self.layout.scroll_step();
        let top = (top - self.h_top * self.layout.line_height + scroll_oy).max(0);
        let bottom = (bottom - self.h_bottom * self.layout.line_height + scroll_oy).max(0);
        let left = (left - self.w_left * self.layout.hex_width + scroll_ox).max(0);
        let right = (right - self.w_right * self.layout.hex_width + scroll_ox).max(0);
        if top == 0 && bottom == 0 && left == 0 && right == 0 {
            return false;
        }
        let line = self.layout.line_height;
        let width = self.layout.hex_width;
        self.h_top += top / line + i32::from(top % line != 0);
        self.h_bottom += bottom / line + i32::from(bottom % line != 0);
        self.w_left += left / width + i32::from(left % width != 0);
        self.w_right += right / width + i32::from(right % width != 0);
        self.needs_resize = true;
        true
    }

    // ---- auto scroll -----------------------------------------------------

    /// Starts or extends a smooth scroll by a pixel offset.
    ///
    /// A running scroll keeps its accumulated remainder; the offsets add
    /// up rather than replace.
    pub fn scroll_offset(&mut self, ox: i32, oy: i32, speed: f32, can_stop: bool) {
        if !self.auto.active {
            self.auto.active = true;
            self.auto.offs_x = 0.0;
            self.auto.offs_y = 0.0;
            self.auto.step_x = 0.0;
            self.auto.step_y = 0.0;
        }
        self.auto.can_stop = can_stop;
        self.auto.speed = speed;
        self.auto.offs_x += -(ox as f32);
        self.auto.offs_y += -(oy as f32);
    }

    /// Smoothly scrolls until a cell sits under the view center.
    pub fn scroll_to_hex(&mut self, grid: &HexGrid, hex: MapHex, speed: f32, can_stop: bool) {
        let (ox, oy) =
            self.layout
                .hex_interval(grid.size().topology(), self.screen_hex, hex.raw());
        self.auto.active = false;
        self.scroll_offset(ox, oy, speed, can_stop);
    }

    // ---- per-tick drive --------------------------------------------------

    /// Applies pending resizes and rebuilds, then advances scrolling.
    ///
    /// Returns whether the view crossed a whole-cell boundary this tick.
    pub fn tick(
        &mut self,
        grid: &mut HexGrid,
        lighting: &mut Lighting,
        input: ScrollInput,
        now_ms: f64,
    ) -> bool {
        if self.needs_resize {
            self.resize_view(grid, lighting);
            self.needs_resize = false;
            self.dirty = true;
        }
        if self.dirty {
            self.rebuild(grid, lighting);
        }
        self.scroll(grid, lighting, input, now_ms)
    }

    fn scroll(
        &mut self,
        grid: &mut HexGrid,
        lighting: &mut Lighting,
        input: ScrollInput,
        now_ms: f64,
    ) -> bool {
        let mut time_k = 1.0f32;
        if self.scroll_delay > 0 {
            let last = *self.last_scroll_ms.get_or_insert(now_ms);
            if now_ms - last < f64::from(self.scroll_delay) / 2.0 {
                return false;
            }
            time_k = ((now_ms - last) / f64::from(self.scroll_delay)) as f32;
            self.last_scroll_ms = Some(now_ms);
        }

        let is_scroll = input.any();
        let mut scr_ox = self.offset.0;
        let mut scr_oy = self.offset.1;

        if is_scroll && self.auto.can_stop {
            self.auto.active = false;
        }

        let (scroll_ox, scroll_oy) = self.layout.scroll_step();
        let mut xscroll;
        let mut yscroll;
        if self.auto.active {
            self.auto.step_x += self.auto.offs_x * self.auto.speed * time_k;
            self.auto.step_y += self.auto.offs_y * self.auto.speed * time_k;
            xscroll = self.auto.step_x as i32;
            yscroll = self.auto.step_y as i32;
            if xscroll > scroll_ox {
                xscroll = scroll_ox;
                self.auto.step_x = scroll_ox as f32;
            }
            if xscroll < -scroll_ox {
                xscroll = -scroll_ox;
                self.auto.step_x = -(scroll_ox as f32);
            }
            if yscroll > scroll_oy {
                yscroll = scroll_oy;
                self.auto.step_y = scroll_oy as f32;
            }
            if yscroll < -scroll_oy {
                yscroll = -scroll_oy;
                self.auto.step_y = -(scroll_oy as f32);
            }
            self.auto.offs_x -= xscroll as f32;
            self.auto.offs_y -= yscroll as f32;
            self.auto.step_x -= xscroll as f32;
            self.auto.step_y -= yscroll as f32;
            if xscroll == 0 && yscroll == 0 {
                return false;
            }
            if pixel_dist((0, 0), (self.auto.offs_x as i32, self.auto.offs_y as i32)) == 0 {
                self.auto.active = false;
            }
        } else {
            if !is_scroll {
                return false;
            }
            let mut dx = 0i32;
            let mut dy = 0i32;
            if input.left {
                dx += 1;
            }
            if input.right {
                dx -= 1;
            }
            if input.up {
                dy += 1;
            }
            if input.down {
                dy -= 1;
            }
            if dx == 0 && dy == 0 {
                return false;
            }
            let y_step = self.scroll_step * scroll_oy / scroll_ox;
            xscroll = (dx as f32 * self.scroll_step as f32 * self.zoom * time_k) as i32;
            yscroll = (dy as f32 * y_step as f32 * self.zoom * time_k) as i32;
        }
        scr_ox += xscroll;
        scr_oy += yscroll;

        if self.scroll_check_on {
            let mut xmod = 0;
            let mut ymod = 0;
            if scr_ox - self.offset.0 > 0 {
                xmod = 1;
            }
            if scr_ox - self.offset.0 < 0 {
                xmod = -1;
            }
            if scr_oy - self.offset.1 > 0 {
                ymod = -1;
            }
            if scr_oy - self.offset.1 < 0 {
                ymod = 1;
            }
            if (xmod != 0 || ymod != 0) && self.scroll_check(grid, xmod, ymod) {
                // Corner deadlock: retry with one axis zeroed before
                // giving up on both.
                if xmod != 0 && ymod != 0 && !self.scroll_check(grid, 0, ymod) {
                    scr_ox = 0;
                } else if xmod != 0 && ymod != 0 && !self.scroll_check(grid, xmod, 0) {
                    scr_oy = 0;
                } else {
                    if xmod != 0 {
                        scr_ox = 0;
                    }
                    if ymod != 0 {
                        scr_oy = 0;
                    }
                }
            }
        }

        let mut xmod = 0i32;
        let mut ymod = 0i32;
        if scr_ox >= scroll_ox {
            xmod = 1;
            scr_ox -= scroll_ox;
            scr_ox = scr_ox.min(scroll_ox);
        } else if scr_ox <= -scroll_ox {
            xmod = -1;
            scr_ox += scroll_ox;
            scr_ox = scr_ox.max(-scroll_ox);
        }
        if scr_oy >= scroll_oy {
            ymod = -2;
            scr_oy -= scroll_oy;
            scr_oy = scr_oy.min(scroll_oy);
        } else if scr_oy <= -scroll_oy {
            ymod = 2;
            scr_oy += scroll_oy;
            scr_oy = scr_oy.max(-scroll_oy);
        }

        self.offset = (scr_ox, scr_oy);
        if xmod != 0 || ymod != 0 {
            self.shift_view(grid, lighting, xmod, ymod);

            if self.scroll_check_on {
                if self.offset.0 > 0 && self.scroll_check(grid, 1, 0) {
                    self.offset.0 = 0;
                } else if self.offset.0 < 0 && self.scroll_check(grid, -1, 0) {
                    self.offset.0 = 0;
                }
                if self.offset.1 > 0 && self.scroll_check(grid, 0, -1) {
                    self.offset.1 = 0;
                } else if self.offset.1 < 0 && self.scroll_check(grid, 0, 1) {
                    self.offset.1 = 0;
                }
            }
        }
        xmod != 0 || ymod != 0
    }

    // ---- rebuild ---------------------------------------------------------

    /// Hides everything, re-derives the lattice around the screen hex and
    /// shows the result.
    pub fn rebuild(&mut self, grid: &mut HexGrid, lighting: &mut Lighting) {
        for i in 0..self.entries.len() {
            Self::hide_cell(grid, lighting, self.entries[i].raw);
        }
        self.init_view(grid.size().topology(), self.screen_hex);
        lighting.request_rebuild();
        for i in 0..self.entries.len() {
            let entry = self.entries[i];
            self.show_cell(grid, lighting, entry.raw, entry.screen);
        }
        self.publish_window(lighting);
        self.dirty = false;
        debug!(
            "view rebuilt around {} ({} positions)",
            self.screen_hex,
            self.entries.len()
        );
    }

    /// Populates the lattice so the requested cell sits at the view center.
    fn init_view(&mut self, topology: Topology, center: RawHex) {
        let hex_w = self.layout.hex_width;
        let line_h = self.layout.line_height;
        let wx = (self.screen_width as f32 * self.zoom) as i32;
        match topology {
            Topology::Hexagonal => {
                let mut cx = center.x;
                let mut cy = center.y;
                // Walk half the view through the row stagger to find how
                // far the top-left lattice corner sits from the center.
                let hw = self.view_width / 2 + self.w_right;
                let hv = self.view_height / 2 + self.h_top;
                let mut vw = hv / 2 + (hv & 1) + 1;
                let mut vh = hv - vw / 2 - 1;
                for _ in 0..hw {
                    if vw & 1 != 0 {
                        vh -= 1;
                    }
                    vw += 1;
                }
                cx -= vw.abs();
                cy -= vh.abs();

                let xa = -(self.w_right * hex_w);
                let xb = -(hex_w / 2) - self.w_right * hex_w;
                let mut oy = -line_h * self.h_top;
                for yv in 0..self.h_visible {
                    let mut hx = cx + yv / 2 + (yv & 1);
                    let mut hy = cy + (yv - (hx - cx - (cx & 1)) / 2);
                    let mut ox = if yv & 1 != 0 { xa } else { xb };
                    if yv == 0 && (cx & 1) != 0 {
                        hy += 1;
                    }
                    for xv in 0..self.w_visible {
                        let entry = &mut self.entries[(yv * self.w_visible + xv) as usize];
                        entry.screen = (wx - ox, oy);
                        entry.raw = RawHex::new(hx, hy);
                        if hx & 1 != 0 {
                            hy -= 1;
                        }
                        hx += 1;
                        ox += hex_w;
                    }
                    oy += line_h;
                }
            }
            Topology::Square => {
                let halfw = self.view_width / 2 + self.w_right;
                let halfh = self.view_height / 2 + self.h_top;
                let mut basehx = center.x - halfh / 2 - halfw;
                let mut basehy = center.y - halfh / 2 + halfw;
                let xa = -hex_w * self.w_right;
                let xb = -hex_w * self.w_right - hex_w / 2;
                let mut y = -line_h * self.h_top;
                for j in 0..self.h_visible {
                    let mut x = if j & 1 != 0 { xa } else { xb };
                    let mut hx = basehx;
                    let mut hy = basehy;
                    for i in 0..self.w_visible {
                        let entry = &mut self.entries[(j * self.w_visible + i) as usize];
                        entry.screen = (wx - x, y);
                        entry.raw = RawHex::new(hx, hy);
                        hx += 1;
                        hy -= 1;
                        x += hex_w;
                    }
                    if j & 1 != 0 {
                        basehy += 1;
                    } else {
                        basehx += 1;
                    }
                    y += line_h;
                }
            }
        }
    }

    /// Shifts the lattice by one crossing without a rebuild.
    ///
    /// `ox` is 0 or ±1 column, `oy` 0 or ±2 rows; only the edge strips
    /// change visibility, every other cell keeps its overlays.
    pub(crate) fn shift_view(
        &mut self,
        grid: &mut HexGrid,
        lighting: &mut Lighting,
        ox: i32,
        oy: i32,
    ) {
        debug_assert!(ox == 0 || ox == -1 || ox == 1);
        debug_assert!(oy == 0 || oy == -2 || oy == 2);

        let w = self.w_visible;
        let h = self.h_visible;
        if ox != 0 {
            let (from_x, to_x) = if ox > 0 { (0, ox) } else { (w + ox, w) };
            for x in from_x..to_x {
                for y in 0..h {
                    Self::hide_cell(grid, lighting, self.entries[(y * w + x) as usize].raw);
                }
            }
        }
        if oy != 0 {
            let (from_y, to_y) = if oy > 0 { (0, oy) } else { (h + oy, h) };
            for y in from_y..to_y {
                for x in 0..w {
                    Self::hide_cell(grid, lighting, self.entries[(y * w + x) as usize].raw);
                }
            }
        }

        // The screen hex moves by the same delta as between the reference
        // lattice position and its shifted counterpart.
        let vpos1 = (5 * w + 4) as usize;
        let vpos2 = ((5 + oy) * w + 4 + ox) as usize;
        self.screen_hex = self.screen_hex + (self.entries[vpos2].raw - self.entries[vpos1].raw);

        for entry in &mut self.entries {
            let raw = &mut entry.raw;
            if ox < 0 {
                raw.x -= 1;
                if raw.x & 1 != 0 {
                    raw.y += 1;
                }
            } else if ox > 0 {
                raw.x += 1;
                if raw.x & 1 == 0 {
                    raw.y -= 1;
                }
            }
            if oy < 0 {
                raw.x -= 1;
                raw.y -= 1;
                if raw.x & 1 == 0 {
                    raw.y -= 1;
                }
            } else if oy > 0 {
                raw.x += 1;
                raw.y += 1;
                if raw.x & 1 != 0 {
                    raw.y += 1;
                }
            }
            if let Some(hex) = grid.size().contains(entry.raw) {
                grid.set_screen(hex, entry.screen);
            }
        }

        if ox != 0 {
            let (from_x, to_x) = if ox > 0 { (w - ox, w) } else { (0, -ox) };
            for x in from_x..to_x {
                for y in 0..h {
                    let entry = self.entries[(y * w + x) as usize];
                    self.show_cell(grid, lighting, entry.raw, entry.screen);
                }
            }
        }
        if oy != 0 {
            let (from_y, to_y) = if oy > 0 { (h - oy, h) } else { (0, -oy) };
            for y in from_y..to_y {
                for x in 0..w {
                    let entry = self.entries[(y * w + x) as usize];
                    self.show_cell(grid, lighting, entry.raw, entry.screen);
                }
            }
        }

        lighting.request_rebuild();
        self.publish_window(lighting);
    }

    /// Hides every cell, then re-derives the lattice dimensions for the
    /// current screen size and zoom.
    fn resize_view(&mut self, grid: &mut HexGrid, lighting: &mut Lighting) {
        for i in 0..self.entries.len() {
            Self::hide_cell(grid, lighting, self.entries[i].raw);
        }
        self.apply_view_size();
        debug!(
            "view resized to {}x{} at zoom {}",
            self.w_visible, self.h_visible, self.zoom
        );
    }

    fn apply_view_size(&mut self) {
        self.view_width = self.layout.view_width(self.screen_width, self.zoom);
        self.view_height = self.layout.view_height(self.screen_height, self.zoom);
        self.w_visible = self.view_width + self.w_left + self.w_right;
        self.h_visible = self.view_height + self.h_top + self.h_bottom;
        self.entries =
            vec![ViewEntry::default(); (self.w_visible * self.h_visible).max(0) as usize];
    }

    fn publish_window(&self, lighting: &mut Lighting) {
        let mut window = LightWindow {
            min_x: i32::MAX,
            max_x: i32::MIN,
            min_y: i32::MAX,
            max_y: i32::MIN,
        };
        for entry in &self.entries {
            window.min_x = window.min_x.min(entry.raw.x);
            window.max_x = window.max_x.max(entry.raw.x);
            window.min_y = window.min_y.min(entry.raw.y);
            window.max_y = window.max_y.max(entry.raw.y);
        }
        lighting.set_window(window);
    }

    // ---- show / hide -----------------------------------------------------

    fn hide_cell(grid: &mut HexGrid, lighting: &mut Lighting, raw: RawHex) {
        let Some(hex) = grid.size().contains(raw) else {
            return;
        };
        if !grid.field(hex).flags().visible {
            return;
        }
        for id in grid.field(hex).light_sources() {
            lighting.mark_hidden(id);
        }
        grid.set_visible(hex, false);
        grid.clear_overlays(hex);
    }

    fn show_cell(
        &mut self,
        grid: &mut HexGrid,
        lighting: &mut Lighting,
        raw: RawHex,
        screen: (i32, i32),
    ) {
        let Some(hex) = grid.size().contains(raw) else {
            return;
        };
        if grid.field(hex).flags().visible {
            return;
        }
        grid.set_visible(hex, true);
        grid.set_screen(hex, screen);
        for id in grid.field(hex).light_sources() {
            lighting.mark_shown(id);
        }

        if grid.show_track() {
            let mark = grid.track(hex);
            if mark != 0 {
                grid.push_overlay(hex, Overlay::Track { target: mark == 1 });
            }
        }
        if self.show_hex_grid {
            grid.push_overlay(hex, Overlay::GridLine);
        }
        if self.show_scroll_block && grid.field(hex).flags().scroll_block {
            grid.push_overlay(hex, Overlay::ScrollBlock);
        }
        if self.rain_capacity > 0 && self.rain_capacity >= self.rng.gen_range(0..=255u8) {
            // Drops are decided per even-snapped cell so one roof patch
            // sheds consistently.
            let snapped = RawHex::new(raw.x & !1, raw.y & !1);
            if let Some(anchor) = grid.size().contains(snapped) {
                let jitter = (self.rng.gen_range(-10..=10i8), self.rng.gen_range(-100..=0i8));
                if !grid.field(anchor).has_roof() {
                    grid.push_overlay(
                        hex,
                        Overlay::RainDrop {
                            jitter,
                            on_roof: false,
                        },
                    );
                } else if self.roof_skip == 0
                    || self.roof_skip != grid.field(anchor).roof_component()
                {
                    grid.push_overlay(
                        hex,
                        Overlay::RainDrop {
                            jitter,
                            on_roof: true,
                        },
                    );
                }
            }
        }

        let field = grid.field(hex);
        let items: Vec<_> = field.items().iter().map(|(id, _)| *id).collect();
        let critter = field.critter();
        let dead: Vec<_> = field.dead_critters().to_vec();
        let roofed = field.has_roof()
            && (self.roof_skip == 0 || field.roof_component() != self.roof_skip);
        for id in items {
            grid.push_overlay(hex, Overlay::Item(id));
        }
        if let Some(id) = critter {
            grid.push_overlay(hex, Overlay::Critter(id));
        }
        for id in dead {
            grid.push_overlay(hex, Overlay::DeadCritter(id));
        }
        if roofed {
            grid.push_overlay(hex, Overlay::Roof);
        }
    }

    // ---- scroll checks ---------------------------------------------------

    fn scroll_check_pos(
        &self,
        grid: &HexGrid,
        positions: [i32; 4],
        dir1: Dir,
        dir2: Option<Dir>,
    ) -> bool {
        let max_pos = self.w_visible * self.h_visible;
        for pos in positions {
            if pos < 0 || pos >= max_pos {
                return true;
            }
            let Some(hex) = grid.size().contains(self.entries[pos as usize].raw) else {
                return true;
            };
            // Steps that leave the grid re-test the same cell.
            let hex = grid.size().step(hex, dir1).unwrap_or(hex);
            if grid.field(hex).flags().scroll_block {
                return true;
            }
            if let Some(dir2) = dir2 {
                let hex = grid.size().step(hex, dir2).unwrap_or(hex);
                if grid.field(hex).flags().scroll_block {
                    return true;
                }
            }
        }
        false
    }

    /// Whether scrolling one crossing toward (`xmod`, `ymod`) would run
    /// into a scroll-block cell or off the grid.
    fn scroll_check(&self, grid: &HexGrid, xmod: i32, ymod: i32) -> bool {
        let w = self.w_visible;
        let vw = self.view_width;
        let vh = self.view_height;
        let mut left = [
            self.h_top * w + self.w_right + vw,
            (self.h_top + vh - 1) * w + self.w_right + vw,
            (self.h_top + 1) * w + self.w_right + vw,
            (self.h_top + vh - 2) * w + self.w_right + vw,
        ];
        let mut right = [
            (self.h_top + vh - 1) * w + self.w_right + 1,
            self.h_top * w + self.w_right + 1,
            (self.h_top + vh - 2) * w + self.w_right + 1,
            (self.h_top + 1) * w + self.w_right + 1,
        ];
        for pass in 0..2 {
            if pass == 1 {
                // Precision pass for the sub-cell rounding at non-unit
                // zoom: the same tests one position further out.
                if self.zoom == 1.0 {
                    break;
                }
                for pos in &mut left {
                    *pos -= 1;
                }
                for pos in &mut right {
                    *pos += 1;
                }
            }
            let blocked = match grid.size().topology() {
                Topology::Hexagonal => {
                    (ymod < 0
                        && (self.scroll_check_pos(grid, left, Dir(0), Some(Dir(5)))
                            || self.scroll_check_pos(grid, right, Dir(5), Some(Dir(0)))))
                        || (ymod > 0
                            && (self.scroll_check_pos(grid, left, Dir(2), Some(Dir(3)))
                                || self.scroll_check_pos(grid, right, Dir(3), Some(Dir(2)))))
                        || (xmod > 0
                            && (self.scroll_check_pos(grid, left, Dir(4), None)
                                || self.scroll_check_pos(grid, right, Dir(4), None)))
                        || (xmod < 0
                            && (self.scroll_check_pos(grid, right, Dir(1), None)
                                || self.scroll_check_pos(grid, left, Dir(1), None)))
                }
                Topology::Square => {
                    (ymod < 0
                        && (self.scroll_check_pos(grid, left, Dir(0), Some(Dir(6)))
                            || self.scroll_check_pos(grid, right, Dir(6), Some(Dir(0)))))
                        || (ymod > 0
                            && (self.scroll_check_pos(grid, left, Dir(2), Some(Dir(4)))
                                || self.scroll_check_pos(grid, right, Dir(4), Some(Dir(2)))))
                        || (xmod > 0
                            && (self.scroll_check_pos(grid, left, Dir(6), Some(Dir(4)))
                                || self.scroll_check_pos(grid, right, Dir(4), Some(Dir(6)))))
                        || (xmod < 0
                            && (self.scroll_check_pos(grid, right, Dir(0), Some(Dir(2)))
                                || self.scroll_check_pos(grid, left, Dir(2), Some(Dir(0)))))
                }
            };
            if blocked {
                return true;
            }
        }
        false
    }

    // ---- zoom ------------------------------------------------------------

    /// Steps the zoom out (`step > 0`), in (`step < 0`), or snaps back to
    /// 1 (`step == 0`), rebuilding the view on success.
    ///
    /// Zooming out is refused while any neighboring crossing is blocked,
    /// and past the point where the scroll clamp area would show smaller
    /// than the screen.
    pub fn change_zoom(&mut self, grid: &mut HexGrid, lighting: &mut Lighting, step: i32) {
        let (zoom_min, zoom_max) = self.zoom_bounds(grid);
        if zoom_min == zoom_max {
            return;
        }
        if step == 0 && self.zoom == 1.0 {
            return;
        }
        if step > 0 && self.zoom >= zoom_max {
            return;
        }
        if step < 0 && self.zoom <= zoom_min {
            return;
        }

        if self.scroll_check_on && (step > 0 || (step == 0 && self.zoom < 1.0)) {
            for x in -1..=1 {
                for y in -1..=1 {
                    if (x != 0 || y != 0) && self.scroll_check(grid, x, y) {
                        return;
                    }
                }
            }
        }

        if step != 0 || self.zoom < 1.0 {
            let old = self.zoom;
            let w = (self.screen_width / self.layout.hex_width
                + i32::from(self.screen_width % self.layout.hex_width != 0))
                as f32;
            self.zoom = (w * self.zoom + if step >= 0 { 2.0 } else { -2.0 }) / w;
            if self.zoom < zoom_min || self.zoom > zoom_max {
                self.zoom = old;
                return;
            }
        } else {
            self.zoom = 1.0;
        }

        self.resize_view(grid, lighting);
        self.rebuild(grid, lighting);

        if step == 0 && self.zoom != 1.0 {
            self.change_zoom(grid, lighting, 0);
        }
    }

    fn zoom_bounds(&self, grid: &HexGrid) -> (f32, f32) {
        let mut max = self.zoom_max;
        if let Some(area) = grid.scroll_area() {
            // Past these caps the view holds more cells than the clamp
            // area, deadlocking every scroll check.
            let (scroll_ox, scroll_oy) = self.layout.scroll_step();
            let w_cap = f32::from(area.width()) * scroll_ox as f32 / self.screen_width as f32;
            let h_cap = f32::from(area.height()) * scroll_oy as f32 / self.screen_height as f32;
            max = max.min(w_cap).min(h_cap);
        }
        (self.zoom_min, max.max(self.zoom_min))
    }
}

/// Advances the viewport each fixed tick: pending rebuilds, then scroll.
pub(crate) fn tick_viewport(
    time: Res<Time>,
    input: Res<ScrollInput>,
    mut viewport: ResMut<Viewport>,
    mut grid: ResMut<HexGrid>,
    mut lighting: ResMut<Lighting>,
) {
    let now_ms = time.elapsed_seconds_f64() * 1000.0;
    viewport.tick(&mut grid, &mut lighting, *input, now_ms);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{ItemId, ItemProfile, ScrollArea};
    use crate::light::{LightFlags, LightId, LightMesh, LightSpec};

    fn small_config() -> MapConfig {
        MapConfig {
            width: 60,
            height: 60,
            screen_width: 320,
            screen_height: 240,
            scroll_check: false,
            ..Default::default()
        }
    }

    fn setup(config: &MapConfig) -> (Viewport, HexGrid, Lighting) {
        let grid = HexGrid::new(config.grid_size());
        let lighting = Lighting::new(config);
        let viewport = Viewport::new(config);
        (viewport, grid, lighting)
    }

    fn rebuilt(config: &MapConfig) -> (Viewport, HexGrid, Lighting) {
        let (mut viewport, mut grid, mut lighting) = setup(config);
        viewport.rebuild(&mut grid, &mut lighting);
        (viewport, grid, lighting)
    }

    #[test]
    fn lattice_steps_one_cell_per_column() {
        let config = small_config();
        let (viewport, _, _) = rebuilt(&config);
        let (w, h) = viewport.visible_extent();
        for y in 0..h {
            for x in 0..w - 1 {
                let cur = viewport.entry(x, y);
                let next = viewport.entry(x + 1, y);
                assert_eq!(next.raw.x, cur.raw.x + 1);
                let expect_y = cur.raw.y - i32::from(cur.raw.x & 1 != 0);
                assert_eq!(next.raw.y, expect_y, "at ({x}, {y})");
                assert_eq!(next.screen.0, cur.screen.0 - config.layout.hex_width);
                assert_eq!(next.screen.1, cur.screen.1);
            }
        }
        for y in 0..h - 1 {
            assert_eq!(
                viewport.entry(0, y + 1).screen.1,
                viewport.entry(0, y).screen.1 + config.layout.line_height
            );
        }
    }

    #[test]
    fn center_entry_sits_near_the_screen_hex() {
        let config = small_config();
        let (viewport, grid, _) = rebuilt(&config);
        let (w, h) = viewport.visible_extent();
        let center = viewport.entry(w / 2, h / 2).raw;
        let dist = grid
            .size()
            .topology()
            .distance(center, viewport.screen_hex());
        assert!(dist <= 2, "center entry {center} is {dist} cells off");
    }

    #[test]
    fn visible_flags_track_the_lattice() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = rebuilt(&config);
        for entry in viewport.entries() {
            if let Some(hex) = grid.size().contains(entry.raw) {
                assert!(grid.field(hex).flags().visible);
                assert_eq!(grid.field(hex).screen(), entry.screen);
            }
        }
        viewport.shift_view(&mut grid, &mut lighting, 1, 0);
        let shown: Vec<_> = viewport
            .entries()
            .iter()
            .filter_map(|entry| grid.size().contains(entry.raw))
            .collect();
        for hex in &shown {
            assert!(grid.field(*hex).flags().visible);
        }
        let mut total = 0;
        for hex in grid.size().iter() {
            if grid.field(hex).flags().visible {
                total += 1;
            }
        }
        assert_eq!(total, shown.len());
    }

    #[test]
    fn full_width_shift_translates_the_lattice() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = rebuilt(&config);
        let before: Vec<ViewEntry> = viewport.entries().to_vec();
        let width = i32::from(grid.size().width());
        for _ in 0..width {
            viewport.shift_view(&mut grid, &mut lighting, 1, 0);
        }
        for (old, new) in before.iter().zip(viewport.entries()) {
            assert_eq!(new.raw.x, old.raw.x + width);
            assert_eq!(new.raw.y, old.raw.y - width / 2);
            assert_eq!(new.screen, old.screen);
        }
    }

    #[test]
    fn shift_moves_the_screen_hex_with_the_lattice() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = rebuilt(&config);
        let before = viewport.screen_hex();
        viewport.shift_view(&mut grid, &mut lighting, 1, 0);
        let after = viewport.screen_hex();
        assert_eq!(after.x, before.x + 1);
        assert!([before.y, before.y - 1].contains(&after.y));
    }

    #[test]
    fn manual_scroll_crosses_after_enough_ticks() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = rebuilt(&config);
        let start = viewport.screen_hex();
        let input = ScrollInput {
            right: true,
            ..Default::default()
        };
        let mut crossed = false;
        for tick in 0..8 {
            if viewport.tick(&mut grid, &mut lighting, input, tick as f64 * 100.0) {
                crossed = true;
                break;
            }
        }
        assert!(crossed, "32 px of crossing never happened at 12 px per tick");
        assert_eq!(viewport.screen_hex().x, start.x - 1);
    }

    #[test]
    fn auto_scroll_is_clamped_to_one_crossing_per_tick() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = rebuilt(&config);
        viewport.scroll_offset(320, 0, 1.0, false);
        assert!(viewport.auto_scrolling());
        let mut crossings = 0;
        let mut ticks = 0;
        while viewport.auto_scrolling() && ticks < 100 {
            let input = ScrollInput::default();
            if viewport.tick(&mut grid, &mut lighting, input, ticks as f64 * 100.0) {
                crossings += 1;
            }
            ticks += 1;
        }
        assert!(!viewport.auto_scrolling());
        // 320 px at 32 px per crossing, never more than one per tick.
        assert_eq!(crossings, 10);
        assert!(ticks >= crossings);
    }

    #[test]
    fn scroll_checks_refuse_to_leave_the_clamp_area() {
        let mut config = small_config();
        config.scroll_check = true;
        let (mut viewport, mut grid, mut lighting) = setup(&config);
        // An area smaller than the screen leaves every edge sample on a
        // blocked cell, so no direction may cross.
        grid.set_scroll_area(
            Some(ScrollArea {
                x0: 28,
                y0: 28,
                x1: 32,
                y1: 32,
            }),
            0,
        );
        viewport.rebuild(&mut grid, &mut lighting);
        let input = ScrollInput {
            right: true,
            down: true,
            ..Default::default()
        };
        for tick in 0..40 {
            assert!(!viewport.tick(&mut grid, &mut lighting, input, tick as f64 * 100.0));
        }
        assert_eq!(viewport.offset(), (0, 0));
    }

    #[test]
    fn open_grid_passes_the_scroll_check() {
        let mut config = small_config();
        config.scroll_check = true;
        let (mut viewport, mut grid, mut lighting) = rebuilt(&config);
        let input = ScrollInput {
            right: true,
            ..Default::default()
        };
        let mut crossed = false;
        for tick in 0..8 {
            if viewport.tick(&mut grid, &mut lighting, input, tick as f64 * 100.0) {
                crossed = true;
            }
        }
        assert!(crossed);
    }

    #[test]
    fn zoom_steps_by_two_screen_columns() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = rebuilt(&config);
        let columns = (config.screen_width / config.layout.hex_width) as f32;
        viewport.change_zoom(&mut grid, &mut lighting, 1);
        assert!((viewport.zoom() - (columns + 2.0) / columns).abs() < 1e-6);
        let (w, _) = viewport.visible_extent();
        assert!(w > config.screen_width / config.layout.hex_width + 2);
        viewport.change_zoom(&mut grid, &mut lighting, 0);
        assert_eq!(viewport.zoom(), 1.0);
    }

    #[test]
    fn zoom_out_respects_the_clamp_area_cap() {
        let mut config = small_config();
        config.scroll_check = false;
        let (mut viewport, mut grid, mut lighting) = setup(&config);
        // Eleven columns cover 352 px, barely above the 320 px screen;
        // one zoom-out step would already show more than the area.
        grid.set_scroll_area(
            Some(ScrollArea {
                x0: 20,
                y0: 20,
                x1: 30,
                y1: 41,
            }),
            0,
        );
        viewport.rebuild(&mut grid, &mut lighting);
        viewport.change_zoom(&mut grid, &mut lighting, 1);
        assert_eq!(viewport.zoom(), 1.0);
    }

    #[test]
    fn showing_and_hiding_tracks_light_refcounts() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = setup(&config);
        let mut mesh = LightMesh::default();
        let center = MapHex::new(30, 30);
        lighting.upsert(
            LightId(1),
            LightSpec {
                hex: center,
                color: [255, 240, 200],
                radius: 4,
                flags: LightFlags::default(),
                intensity: 100,
                use_offset: false,
            },
            0.0,
        );
        lighting.process(&mut grid, &mut mesh, 0.0);
        let marked = lighting.get(LightId(1)).unwrap().marked().len();
        assert!(marked > 0);
        assert_eq!(lighting.get(LightId(1)).unwrap().visible_marks(), 0);

        viewport.center_on(center);
        viewport.rebuild(&mut grid, &mut lighting);
        assert_eq!(
            lighting.get(LightId(1)).unwrap().visible_marks() as usize,
            marked
        );

        viewport.center_on(MapHex::new(2, 2));
        viewport.rebuild(&mut grid, &mut lighting);
        assert_eq!(lighting.get(LightId(1)).unwrap().visible_marks(), 0);
    }

    #[test]
    fn occupants_become_overlays_on_show() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = setup(&config);
        let hex = MapHex::new(30, 30);
        grid.add_item(hex, ItemId(5), ItemProfile::scenery());
        viewport.center_on(hex);
        viewport.rebuild(&mut grid, &mut lighting);
        assert!(grid
            .field(hex)
            .overlays()
            .contains(&Overlay::Item(ItemId(5))));
        viewport.center_on(MapHex::new(2, 2));
        viewport.rebuild(&mut grid, &mut lighting);
        assert!(grid.field(hex).overlays().is_empty());
        assert!(!grid.field(hex).flags().visible);
    }

    #[test]
    fn rain_skips_the_hidden_roof_patch() {
        let mut config = small_config();
        config.roof_skip_size = 2;
        let (mut viewport, mut grid, mut lighting) = setup(&config);
        for dy in 0..4 {
            for dx in 0..4 {
                grid.add_item(
                    MapHex::new(28 + dx, 28 + dy),
                    ItemId(u32::from(dy) * 4 + u32::from(dx) + 1),
                    ItemProfile::roof(),
                );
            }
        }
        grid.assign_roof_components(2);
        viewport.set_rain(255);
        viewport.center_on(MapHex::new(30, 30));
        viewport.rebuild(&mut grid, &mut lighting);
        let roof_drop = grid
            .field(MapHex::new(30, 30))
            .overlays()
            .iter()
            .any(|overlay| matches!(overlay, Overlay::RainDrop { on_roof: true, .. }));
        assert!(roof_drop);

        viewport.set_skip_roof(&grid, MapHex::new(30, 30));
        viewport.rebuild(&mut grid, &mut lighting);
        let any_drop = grid
            .field(MapHex::new(30, 30))
            .overlays()
            .iter()
            .any(|overlay| matches!(overlay, Overlay::RainDrop { .. }));
        assert!(!any_drop, "drops must pause under the opened roof");
        assert!(grid
            .field(MapHex::new(26, 30))
            .overlays()
            .iter()
            .any(|overlay| matches!(overlay, Overlay::RainDrop { on_roof: false, .. })));
    }

    #[test]
    fn overhang_growth_queues_a_resize() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = rebuilt(&config);
        let before = viewport.visible_extent();
        assert!(!viewport.cover_overhang(0, 0, 0, 0));
        assert!(viewport.cover_overhang(100, 0, 0, 0));
        viewport.tick(&mut grid, &mut lighting, ScrollInput::default(), 0.0);
        let after = viewport.visible_extent();
        assert_eq!(after.0, before.0);
        assert_eq!(after.1, before.1 + 9);
    }

    #[test]
    fn scroll_to_hex_lands_on_the_target() {
        let config = small_config();
        let (mut viewport, mut grid, mut lighting) = rebuilt(&config);
        let target = MapHex::new(36, 30);
        viewport.scroll_to_hex(&grid, target, 1.0, false);
        for tick in 0..200 {
            viewport.tick(
                &mut grid,
                &mut lighting,
                ScrollInput::default(),
                tick as f64 * 100.0,
            );
            if !viewport.auto_scrolling() {
                break;
            }
        }
        assert!(!viewport.auto_scrolling());
        let dist = grid
            .size()
            .topology()
            .distance(viewport.screen_hex(), target.raw());
        assert!(dist <= 1, "stopped {dist} cells short of {target}");
    }
}
