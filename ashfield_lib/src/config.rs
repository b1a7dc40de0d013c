//! Map engine configuration.
//!
//! A [`MapConfig`] is handed to [`MapPlugin`](crate::MapPlugin) and copied
//! into a resource. It is plain serializable data so embedding applications
//! can load it from their own settings files; [`MapConfig::validate`]
//! reports structural problems before any allocation happens.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{GridLayout, GridSize, Topology};
use crate::light::DayPlan;

/// Which checks the fog recompute runs per boundary cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookChecks {
    /// Shrink sight along bearings away from the viewer's facing.
    pub facing: bool,
    /// Clip sight at the first shoot-blocking cell along the line.
    pub tracing: bool,
}

impl Default for LookChecks {
    fn default() -> Self {
        LookChecks {
            facing: true,
            tracing: true,
        }
    }
}

/// Everything the map view needs to know up front.
#[derive(Resource, Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
    /// Grid width in cells.
    pub width: u16,
    /// Grid height in cells.
    pub height: u16,
    /// Neighbor arrangement of the grid.
    pub topology: Topology,
    /// Sprite metrics.
    pub layout: GridLayout,
    /// Screen width in pixels.
    pub screen_width: i32,
    /// Screen height in pixels.
    pub screen_height: i32,
    /// Longest path the pathfinder will attempt, in steps.
    pub max_path_length: u16,
    /// Alternate reconstruction probe orders to flatten staircase paths.
    pub smooth_path: bool,
    /// Manual scroll speed in pixels per tick at zoom 1.
    pub scroll_step: i32,
    /// Milliseconds of scroll accumulation per tick; zero applies input
    /// immediately.
    pub scroll_delay: u32,
    /// Stop the viewport at scroll-block cells.
    pub scroll_check: bool,
    /// Smallest permitted zoom factor.
    pub zoom_min: f32,
    /// Largest permitted zoom factor.
    pub zoom_max: f32,
    /// Milliseconds a light source takes to fade between intensities.
    pub light_fade_ms: u32,
    /// Ambient daylight table.
    pub day_plan: DayPlan,
    /// Percentage of sight retained per facing deviation step (0 = dead
    /// ahead).
    pub look_dir: [u32; 5],
    /// Which fog checks run.
    pub look_checks: LookChecks,
    /// Extra cells added to the look radius when drawing fog borders.
    pub fog_extra_length: u16,
    /// Stride of the roof component flood fill; roofs are authored on a
    /// lattice this many cells apart.
    pub roof_skip_size: u16,
    /// Width of the scroll-block band inside a clamp area, in cells.
    pub scroll_area_band: u16,
    /// Draw the cell outline overlay.
    pub show_hex_grid: bool,
    /// Draw movement track marks.
    pub show_track: bool,
    /// Draw markers on scroll-block cells.
    pub show_scroll_block: bool,
    /// Seed for the overlay jitter generator.
    pub rng_seed: u64,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            width: 200,
            height: 200,
            topology: Topology::Hexagonal,
            layout: GridLayout::FALLOUT,
            screen_width: 1024,
            screen_height: 768,
            max_path_length: 600,
            smooth_path: true,
            scroll_step: 12,
            scroll_delay: 0,
            scroll_check: true,
            zoom_min: 0.2,
            zoom_max: 10.0,
            light_fade_ms: 600,
            day_plan: DayPlan::default(),
            look_dir: [0, 20, 40, 60, 60],
            look_checks: LookChecks::default(),
            fog_extra_length: 0,
            roof_skip_size: 2,
            scroll_area_band: 2,
            show_hex_grid: false,
            show_track: false,
            show_scroll_block: false,
            rng_seed: 0x5eed_0f0e,
        }
    }
}

impl MapConfig {
    /// The configured grid dimensions.
    #[inline]
    #[must_use]
    pub fn grid_size(&self) -> GridSize {
        GridSize::new(self.width, self.height, self.topology)
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::EmptyGrid {
                width: self.width,
                height: self.height,
            });
        }
        if self.layout.hex_width <= 0 || self.layout.hex_height <= 0 || self.layout.line_height <= 0
        {
            return Err(ConfigError::DegenerateLayout(self.layout));
        }
        if self.screen_width <= 0 || self.screen_height <= 0 {
            return Err(ConfigError::EmptyScreen {
                width: self.screen_width,
                height: self.screen_height,
            });
        }
        if self.max_path_length == 0 || self.max_path_length > i16::MAX as u16 {
            return Err(ConfigError::PathLength(self.max_path_length));
        }
        if !(self.zoom_min > 0.0 && self.zoom_min <= self.zoom_max) {
            return Err(ConfigError::ZoomRange {
                min: self.zoom_min,
                max: self.zoom_max,
            });
        }
        let times = self.day_plan.times;
        if !(times.windows(2).all(|w| w[0] < w[1]) && times[0] >= 0 && times[3] < 24 * 60) {
            return Err(ConfigError::DayPlanOrder(times));
        }
        if self.roof_skip_size == 0 {
            return Err(ConfigError::ZeroRoofSkip);
        }
        Ok(())
    }
}

/// Why a [`MapConfig`] was rejected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("grid dimensions {width}x{height} must both be nonzero")]
    EmptyGrid { width: u16, height: u16 },
    #[error("layout metrics must be positive: {0:?}")]
    DegenerateLayout(GridLayout),
    #[error("screen dimensions {width}x{height} must both be positive")]
    EmptyScreen { width: i32, height: i32 },
    #[error("maximum path length {0} must be in 1..=32767, it is stored as an i16 wave stamp")]
    PathLength(u16),
    #[error("zoom range [{min}, {max}] must be positive and ordered")]
    ZoomRange { min: f32, max: f32 },
    #[error("day plan breakpoints {0:?} must ascend within one day")]
    DayPlanOrder([i32; 4]),
    #[error("roof skip size must be nonzero")]
    ZeroRoofSkip,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert_eq!(MapConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let config = MapConfig {
            width: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EmptyGrid { .. })
        ));
    }

    #[test]
    fn inverted_zoom_range_is_rejected() {
        let config = MapConfig {
            zoom_min: 3.0,
            zoom_max: 1.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::ZoomRange { .. })));
    }

    #[test]
    fn unsorted_day_plan_is_rejected() {
        let mut config = MapConfig::default();
        config.day_plan.times = [600, 300, 1140, 1380];
        assert!(matches!(config.validate(), Err(ConfigError::DayPlanOrder(_))));
    }

    #[test]
    fn config_round_trips_through_serde() {
        let config = MapConfig {
            width: 64,
            height: 48,
            show_track: true,
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: MapConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.width, 64);
        assert_eq!(back.height, 48);
        assert!(back.show_track);
        assert_eq!(back.day_plan, config.day_plan);
    }
}
