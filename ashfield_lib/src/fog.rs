//! Look and shoot boundary fans around the viewpoint occupant.
//!
//! The fog walk visits the same radius perimeter as a light fan, but
//! instead of marking cells it collects two vertex loops: where sight
//! ends and where firing range ends. Sight shrinks along bearings away
//! from the viewer's facing and clips at shoot-blocking cells, per the
//! configured [`LookChecks`]. Recomputation is event-driven; the fans are
//! rebuilt only when the seer moves or turns, occupancy shifts under the
//! fans, or a caller flags them dirty.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::MapConfig;
use crate::fields::HexGrid;
use crate::geometry::{far_dir, step_raw, Dir, MapHex, Topology};
use crate::light::{FanPoint, Rgba};

/// The viewpoint actor the fog is computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FogSeer {
    /// Cell the seer stands on.
    pub hex: MapHex,
    /// Facing used by the directional sight attenuation.
    pub facing: Dir,
    /// Sight reach in cells.
    pub look_dist: u32,
    /// Firing reach in cells.
    pub shoot_dist: u32,
}

/// Fog state: the seer, the draw toggles and the finished fans.
#[derive(Resource, Debug)]
pub struct Fog {
    seer: Option<FogSeer>,
    draw_look: bool,
    draw_shoot: bool,
    look: Vec<FanPoint>,
    shoot: Vec<FanPoint>,
    dirty: bool,
    generation: u64,
}

impl Default for Fog {
    fn default() -> Self {
        Fog {
            seer: None,
            draw_look: true,
            draw_shoot: false,
            look: Vec::new(),
            shoot: Vec::new(),
            dirty: false,
            generation: 0,
        }
    }
}

impl Fog {
    /// Replaces the seer; `None` empties the fans on the next recompute.
    pub fn set_seer(&mut self, seer: Option<FogSeer>) {
        if self.seer != seer {
            self.seer = seer;
            self.dirty = true;
        }
    }

    /// Currently tracked seer.
    #[inline]
    #[must_use]
    pub fn seer(&self) -> Option<FogSeer> {
        self.seer
    }

    /// Toggles which fans are produced.
    pub fn set_draw(&mut self, look: bool, shoot: bool) {
        if self.draw_look != look || self.draw_shoot != shoot {
            self.draw_look = look;
            self.draw_shoot = shoot;
            self.dirty = true;
        }
    }

    /// Flags the fans stale, for occupancy changes under them.
    pub fn request_recompute(&mut self) {
        self.dirty = true;
    }

    /// Whether a recompute is pending.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Sight boundary loop: seer vertex, boundary vertices, closing copy.
    #[inline]
    #[must_use]
    pub fn look_points(&self) -> &[FanPoint] {
        &self.look
    }

    /// Firing boundary loop, in the same layout as [`Fog::look_points`].
    #[inline]
    #[must_use]
    pub fn shoot_points(&self) -> &[FanPoint] {
        &self.shoot
    }

    /// Bumped on every recompute so render extraction can diff cheaply.
    #[inline]
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Rebuilds both fans from scratch.
    ///
    /// Vertices are in seer-local pixel space, relative to the top-left
    /// corner of the seer cell's sprite; full-reach vertices and the two
    /// center vertices follow the seer's live sprite offset.
    pub fn recompute(&mut self, grid: &mut HexGrid, config: &MapConfig) {
        self.dirty = false;
        self.look.clear();
        self.shoot.clear();
        self.generation = self.generation.wrapping_add(1);

        let Some(seer) = self.seer else {
            return;
        };
        if !self.draw_look && !self.draw_shoot {
            return;
        }
        let dist = seer.look_dist + u32::from(config.fog_extra_length);
        if dist == 0 {
            return;
        }

        let size = grid.size();
        let topology = size.topology();
        let layout = config.layout;
        let offset = layout.center_offset();
        let dirs_count = i32::from(topology.dirs());
        let base = seer.hex;

        let (segments, seg_len) = match topology {
            Topology::Hexagonal => (6_u32, dist),
            Topology::Square => (4, dist * 2),
        };
        let seek_dir = Dir(match topology {
            Topology::Hexagonal => 0,
            Topology::Square => 7,
        });
        let mut walk = base.raw();

        // The walk returns to its starting corner on the final step, so
        // the loops arrive pre-closed.
        for t in 0..=segments * seg_len {
            if t == 0 {
                for _ in 0..dist {
                    walk = step_raw(topology, walk, seek_dir);
                }
            } else {
                let segment = (t - 1) / seg_len;
                let dir = Dir(match topology {
                    Topology::Hexagonal => ((segment + 2) % 6) as u8,
                    Topology::Square => (((segment + 1) * 2) % 8) as u8,
                });
                walk = step_raw(topology, walk, dir);
            }

            let mut target = size.clamp(walk);
            if config.look_checks.facing {
                let bearing = i32::from(far_dir(topology, base.raw(), target.raw()).index());
                let facing = i32::from(seer.facing.index());
                let mut fold = (facing - bearing).abs();
                if fold > dirs_count / 2 {
                    fold = dirs_count - fold;
                }
                let weight = config.look_dir[fold as usize];
                let limited = dist - dist * weight / 100;
                target = grid.trace_passage(base, target, limited, 0.0, false, None).block;
            }
            if config.look_checks.tracing {
                target = grid.trace_passage(base, target, 0, 0.0, true, None).block;
            }

            let dist_look = size.distance(base, target);
            if self.draw_look {
                let (ix, iy) = layout.hex_interval(topology, base.raw(), target.raw());
                self.look.push(FanPoint {
                    hex: target,
                    x: offset.0 + ix,
                    y: offset.1 + iy,
                    color: Rgba {
                        r: 255,
                        g: (dist_look * 255 / dist) as u8,
                        b: 0,
                        a: 0,
                    },
                    use_offset: dist_look == dist,
                });
            }
            if self.draw_shoot {
                let max_shoot = dist_look.min(seer.shoot_dist) + 1;
                let stop = grid
                    .trace_passage(base, target, max_shoot, 0.0, true, None)
                    .block;
                let result = size.distance(base, stop);
                let (ix, iy) = layout.hex_interval(topology, base.raw(), stop.raw());
                self.shoot.push(FanPoint {
                    hex: stop,
                    x: offset.0 + ix,
                    y: offset.1 + iy,
                    color: Rgba {
                        r: 255,
                        g: (result * 255 / max_shoot) as u8,
                        b: 0,
                        a: 255,
                    },
                    use_offset: result == max_shoot,
                });
            }
        }

        if let Some(&first) = self.look.first() {
            self.look.push(first);
            self.look.insert(
                0,
                FanPoint {
                    hex: base,
                    x: offset.0,
                    y: offset.1,
                    color: Rgba::default(),
                    use_offset: true,
                },
            );
        }
        if let Some(&first) = self.shoot.first() {
            self.shoot.push(first);
            self.shoot.insert(
                0,
                FanPoint {
                    hex: base,
                    x: offset.0,
                    y: offset.1,
                    color: Rgba {
                        r: 0,
                        g: 0,
                        b: 0,
                        a: 255,
                    },
                    use_offset: true,
                },
            );
        }
    }
}

/// Recomputes dirty fog fans once per fixed tick.
pub(crate) fn apply_fog(
    config: Res<MapConfig>,
    mut fog: ResMut<Fog>,
    mut grid: ResMut<HexGrid>,
) {
    if fog.dirty {
        fog.recompute(&mut grid, &config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LookChecks;
    use crate::fields::{Corner, ItemId, ItemProfile};
    use crate::geometry::GridSize;

    fn open_config() -> MapConfig {
        MapConfig {
            look_checks: LookChecks {
                facing: false,
                tracing: false,
            },
            ..MapConfig::default()
        }
    }

    fn test_grid() -> HexGrid {
        HexGrid::new(GridSize::new(30, 30, Topology::Hexagonal))
    }

    fn seer_at_center(look: u32, shoot: u32) -> FogSeer {
        FogSeer {
            hex: MapHex::new(15, 15),
            facing: Dir(0),
            look_dist: look,
            shoot_dist: shoot,
        }
    }

    #[test]
    fn recompute_clears_dirty_and_bumps_generation() {
        let mut grid = test_grid();
        let config = open_config();
        let mut fog = Fog::default();
        fog.set_seer(Some(seer_at_center(5, 3)));
        assert!(fog.is_dirty());
        fog.recompute(&mut grid, &config);
        assert!(!fog.is_dirty());
        assert_eq!(fog.generation(), 1);
        assert!(!fog.look_points().is_empty());
    }

    #[test]
    fn open_ground_look_fan_closes_on_itself() {
        let mut grid = test_grid();
        let config = open_config();
        let mut fog = Fog::default();
        let seer = seer_at_center(5, 3);
        fog.set_seer(Some(seer));
        fog.recompute(&mut grid, &config);

        let look = fog.look_points();
        // Seer vertex, the pre-closed perimeter walk, one closing copy.
        assert_eq!(look.len(), 6 * 5 + 3);
        assert_eq!(look[0].hex, seer.hex);
        assert_eq!(look[0].color, Rgba::default());
        assert!(look[0].use_offset);
        assert_eq!(look[1], *look.last().unwrap());
        for point in &look[1..] {
            assert_eq!(grid.size().distance(seer.hex, point.hex), 5);
            assert_eq!(point.color.r, 255);
            assert_eq!(point.color.g, 255);
            assert_eq!(point.color.a, 0);
            assert!(point.use_offset);
        }
        assert!(fog.shoot_points().is_empty());
    }

    #[test]
    fn facing_weights_shorten_sight_behind() {
        let mut grid = test_grid();
        let mut config = open_config();
        config.look_checks.facing = true;
        let mut fog = Fog::default();
        let seer = seer_at_center(5, 3);
        fog.set_seer(Some(seer));
        fog.recompute(&mut grid, &config);

        // Bearing 3 is directly behind a facing of 0: weight 60 trims the
        // reach from 5 to 2.
        let mut behind = seer.hex.raw();
        for _ in 0..2 {
            behind = step_raw(Topology::Hexagonal, behind, Dir(3));
        }
        let size = grid.size();
        let expected = size.contains(behind).unwrap();
        assert!(fog.look_points()[1..].iter().any(|p| p.hex == expected));

        // The facing bearing keeps its full reach.
        let mut ahead = seer.hex.raw();
        for _ in 0..5 {
            ahead = step_raw(Topology::Hexagonal, ahead, Dir(0));
        }
        let expected = size.contains(ahead).unwrap();
        assert!(fog.look_points()[1..].iter().any(|p| p.hex == expected));
    }

    #[test]
    fn trace_check_clips_sight_at_walls() {
        let mut grid = test_grid();
        let mut config = open_config();
        config.look_checks.tracing = true;
        let seer = seer_at_center(5, 3);

        let mut wall = seer.hex.raw();
        for _ in 0..2 {
            wall = step_raw(Topology::Hexagonal, wall, Dir(3));
        }
        let wall = grid.size().contains(wall).unwrap();
        grid.add_item(wall, ItemId(1), ItemProfile::wall(Corner::EastWest, false));

        let mut fog = Fog::default();
        fog.set_seer(Some(seer));
        fog.recompute(&mut grid, &config);

        let point = fog
            .look_points()
            .iter()
            .find(|p| p.hex == wall)
            .copied()
            .unwrap();
        assert_eq!(point.color.g, (2 * 255 / 5) as u8);
        assert!(!point.use_offset);
    }

    #[test]
    fn shoot_fan_tracks_attack_distance() {
        let mut grid = test_grid();
        let config = open_config();
        let mut fog = Fog::default();
        let seer = seer_at_center(5, 3);
        fog.set_seer(Some(seer));
        fog.set_draw(true, true);
        fog.recompute(&mut grid, &config);

        let shoot = fog.shoot_points();
        assert_eq!(shoot.len(), 6 * 5 + 3);
        assert_eq!(
            shoot[0].color,
            Rgba {
                r: 0,
                g: 0,
                b: 0,
                a: 255
            }
        );
        for point in &shoot[1..] {
            // Open ground: every ray runs to attack reach plus one.
            assert_eq!(grid.size().distance(seer.hex, point.hex), 4);
            assert_eq!(point.color.g, 255);
            assert_eq!(point.color.a, 255);
            assert!(point.use_offset);
        }
    }

    #[test]
    fn seer_removal_empties_the_fans() {
        let mut grid = test_grid();
        let config = open_config();
        let mut fog = Fog::default();
        fog.set_seer(Some(seer_at_center(5, 3)));
        fog.recompute(&mut grid, &config);
        assert!(!fog.look_points().is_empty());

        fog.set_seer(None);
        assert!(fog.is_dirty());
        fog.recompute(&mut grid, &config);
        assert!(fog.look_points().is_empty());
        assert_eq!(fog.generation(), 2);
    }

    #[test]
    fn draw_toggles_mark_dirty_only_on_change() {
        let mut fog = Fog::default();
        fog.set_draw(true, false);
        assert!(!fog.is_dirty());
        fog.set_draw(true, true);
        assert!(fog.is_dirty());
    }
}
