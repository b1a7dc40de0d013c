//! Headless grid-map engine: a dense per-cell field cache with dynamic
//! lighting, fog of war, wave-propagation routing and a scrolling viewport,
//! wired together behind a single Bevy plugin.
//!
//! Nothing in this crate renders or reads input devices. The embedding
//! game populates the [`fields::HexGrid`], feeds [`viewport::ScrollInput`]
//! and consumes the published overlays, light mesh and fog borders.
#![forbid(unsafe_code)]
#![warn(clippy::doc_markdown)]

pub mod config;
pub mod fields;
pub mod fog;
pub mod geometry;
pub mod light;
pub mod pathfinding;
pub mod testing;
pub mod viewport;

use bevy::prelude::*;

use crate::config::MapConfig;
use crate::fields::HexGrid;
use crate::fog::{apply_fog, Fog};
use crate::light::{process_lights, LightMesh, Lighting};
use crate::pathfinding::Pathfinder;
use crate::viewport::{tick_viewport, ScrollInput, Viewport};

/// All of the engine state and per-tick work.
///
/// Builds every resource from one validated [`MapConfig`] and chains the
/// tick systems in [`CoreSchedule::FixedUpdate`]: the viewport publishes
/// visibility first, lights react to it, fog runs last.
pub struct MapPlugin {
    /// Injected engine constants.
    pub config: MapConfig,
}

impl Plugin for MapPlugin {
    fn build(&self, app: &mut App) {
        info!("Building map plugin...");
        let config = self.config.clone();
        if let Err(error) = config.validate() {
            panic!("map config rejected: {error}");
        }

        let mut grid = HexGrid::new(config.grid_size());
        grid.set_show_track(config.show_track);
        let lighting = Lighting::new(&config);
        let viewport = Viewport::new(&config);
        let pathfinder = Pathfinder::new(&config);

        app.insert_resource(FixedTime::new_from_secs(1.0 / 30.))
            .edit_schedule(CoreSchedule::FixedUpdate, |schedule| {
                schedule.configure_set(MapSet);
            })
            .add_systems(
                (tick_viewport, process_lights, apply_fog)
                    .chain()
                    .in_set(MapSet)
                    .in_schedule(CoreSchedule::FixedUpdate),
            )
            .insert_resource(config)
            .insert_resource(grid)
            .insert_resource(lighting)
            .insert_resource(viewport)
            .insert_resource(pathfinder)
            .init_resource::<LightMesh>()
            .init_resource::<Fog>()
            .init_resource::<ScrollInput>();
    }
}

/// Map engine systems.
///
/// These run in [`CoreSchedule::FixedUpdate`], in a fixed chain; embedders
/// that add their own fixed-update work can order against this set.
#[derive(SystemSet, PartialEq, Eq, Hash, Debug, Clone)]
pub struct MapSet;
