//! Tools to make it easier to test the engine's behavior.

use bevy::prelude::*;

use crate::config::MapConfig;
use crate::geometry::Topology;
use crate::MapPlugin;

/// Just [`MinimalPlugins`]: schedules, time and the task pool, no windows.
#[must_use]
pub fn minimal_app() -> App {
    let mut app = App::new();
    app.add_plugins(MinimalPlugins);
    app
}

/// A headless [`App`] carrying the whole engine built from `config`.
#[must_use]
pub fn map_app(config: MapConfig) -> App {
    let mut app = minimal_app();
    app.add_plugin(MapPlugin { config });
    app
}

/// A grid small enough for tests to reason about cell by cell: 60x60
/// cells behind a 320x240 screen, with the scroll clamp checks off.
#[must_use]
pub fn small_config(topology: Topology) -> MapConfig {
    MapConfig {
        width: 60,
        height: 60,
        topology,
        screen_width: 320,
        screen_height: 240,
        scroll_check: false,
        ..MapConfig::default()
    }
}

/// Runs one engine tick regardless of accumulated wall time.
///
/// `App::update` alone only reaches [`CoreSchedule::FixedUpdate`] after
/// enough real time has passed, which makes tests racy; this updates the
/// app once and then drives the fixed schedule by hand.
pub fn tick(app: &mut App) {
    app.update();
    app.world.run_schedule(CoreSchedule::FixedUpdate);
}
