//! Headless demo: loads a small scenario, runs the engine for a scripted
//! number of fixed ticks and logs what the map ended up publishing.

use anyhow::{Context, Result};
use bevy::prelude::*;
use serde::Deserialize;

use ashfield_lib::config::MapConfig;
use ashfield_lib::fields::{Corner, CritterId, CritterProfile, HexGrid, ItemId, ItemProfile};
use ashfield_lib::fog::{Fog, FogSeer};
use ashfield_lib::geometry::{Dir, GridSize, MapHex, RawHex};
use ashfield_lib::light::{LightFlags, LightId, LightMesh, LightSpec, Lighting};
use ashfield_lib::pathfinding::Pathfinder;
use ashfield_lib::viewport::Viewport;
use ashfield_lib::MapPlugin;

const SCENARIO: &str = include_str!("../assets/scenario.json");

#[derive(Deserialize)]
struct Scenario {
    name: String,
    ticks: u32,
    width: u16,
    height: u16,
    world_minute: i32,
    camera: (u16, u16),
    wall_runs: Vec<WallRun>,
    roofs: Vec<Patch>,
    lamps: Vec<Lamp>,
    critters: Vec<Spawn>,
    seer: Seer,
    route: Route,
}

#[derive(Deserialize)]
struct WallRun {
    from: (u16, u16),
    to: (u16, u16),
    /// Blocks movement and shots but lets light through.
    #[serde(default)]
    translucent: bool,
}

#[derive(Deserialize)]
struct Patch {
    x0: u16,
    y0: u16,
    x1: u16,
    y1: u16,
}

#[derive(Deserialize)]
struct Lamp {
    hex: (u16, u16),
    color: [u8; 3],
    radius: u16,
    intensity: i32,
    #[serde(default)]
    global: bool,
}

#[derive(Deserialize)]
struct Spawn {
    id: u32,
    hex: (u16, u16),
    #[serde(default)]
    multihex: u16,
    #[serde(default)]
    dead: bool,
}

#[derive(Deserialize)]
struct Seer {
    hex: (u16, u16),
    facing: u8,
    look: u32,
    shoot: u32,
}

#[derive(Deserialize)]
struct Route {
    from: (u16, u16),
    to: (u16, u16),
}

fn main() -> Result<()> {
    let scenario: Scenario =
        serde_json::from_str(SCENARIO).context("scenario manifest is malformed")?;

    let config = MapConfig {
        width: scenario.width,
        height: scenario.height,
        show_track: true,
        ..MapConfig::default()
    };

    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .add_plugin(bevy::log::LogPlugin::default())
        .add_plugin(MapPlugin { config });
    app.update();

    populate(&mut app.world, &scenario)?;
    run_route(&mut app.world, &scenario)?;

    for _ in 0..scenario.ticks {
        app.update();
        app.world.run_schedule(CoreSchedule::FixedUpdate);
    }

    report(&app.world, &scenario);
    Ok(())
}

/// Resolves a scenario cell pair against the grid bounds.
fn cell(size: GridSize, pair: (u16, u16)) -> Result<MapHex> {
    size.contains(RawHex::new(i32::from(pair.0), i32::from(pair.1)))
        .with_context(|| format!("cell {},{} lies outside the {size} grid", pair.0, pair.1))
}

fn populate(world: &mut World, scenario: &Scenario) -> Result<()> {
    let size = world.resource::<HexGrid>().size();
    let roof_stride = world.resource::<MapConfig>().roof_skip_size;

    let mut grid = world.resource_mut::<HexGrid>();
    let mut next_item = 1u32;
    for run in &scenario.wall_runs {
        let corner = if run.from.0 == run.to.0 {
            Corner::NorthSouth
        } else {
            Corner::EastWest
        };
        for x in run.from.0.min(run.to.0)..=run.from.0.max(run.to.0) {
            for y in run.from.1.min(run.to.1)..=run.from.1.max(run.to.1) {
                let hex = cell(size, (x, y))?;
                grid.add_item(hex, ItemId(next_item), ItemProfile::wall(corner, !run.translucent));
                next_item += 1;
            }
        }
    }
    for patch in &scenario.roofs {
        for x in patch.x0..=patch.x1 {
            for y in patch.y0..=patch.y1 {
                let hex = cell(size, (x, y))?;
                grid.add_item(hex, ItemId(next_item), ItemProfile::roof());
                next_item += 1;
            }
        }
    }
    grid.assign_roof_components(roof_stride);

    for spawn in &scenario.critters {
        let hex = cell(size, spawn.hex)?;
        grid.add_critter(
            hex,
            CritterId(spawn.id),
            CritterProfile {
                dead: spawn.dead,
                multihex: spawn.multihex,
            },
        );
    }

    let mut lighting = world.resource_mut::<Lighting>();
    lighting.set_world_minutes(scenario.world_minute);
    for (index, lamp) in scenario.lamps.iter().enumerate() {
        lighting.upsert(
            LightId(index as u32 + 1),
            LightSpec {
                hex: cell(size, lamp.hex)?,
                color: lamp.color,
                radius: lamp.radius,
                flags: LightFlags {
                    global: lamp.global,
                    ..LightFlags::default()
                },
                intensity: lamp.intensity,
                use_offset: false,
            },
            0.0,
        );
    }

    let mut fog = world.resource_mut::<Fog>();
    fog.set_draw(true, true);
    fog.set_seer(Some(FogSeer {
        hex: cell(size, scenario.seer.hex)?,
        facing: Dir(scenario.seer.facing),
        look_dist: scenario.seer.look,
        shoot_dist: scenario.seer.shoot,
    }));

    let camera = cell(size, scenario.camera)?;
    world.resource_mut::<Viewport>().center_on(camera);
    Ok(())
}

/// Routes from the scenario's start to its goal and paints the sight line
/// so the track overlays have something to show.
fn run_route(world: &mut World, scenario: &Scenario) -> Result<()> {
    let size = world.resource::<HexGrid>().size();
    let from = cell(size, scenario.route.from)?;
    let to = cell(size, scenario.route.to)?;

    let route = world.resource_scope(|world, mut finder: Mut<Pathfinder>| {
        let grid = world.resource::<HexGrid>();
        let mut route = finder.find_path(grid, None, from, to, -1);
        if let Some(path) = route.as_mut() {
            finder.free_movement(grid, from, path);
        }
        route
    });
    match route {
        Some(path) => info!(
            "route {from} -> {to}: {} steps in {} runs",
            path.steps.len(),
            path.control_steps.len()
        ),
        None => warn!("route {from} -> {to}: no path"),
    }

    let mut grid = world.resource_mut::<HexGrid>();
    let sight = grid.trace_passage(from, to, 0, 0.0, true, None);
    if sight.block == to {
        info!("sight line {from} -> {to} is clear");
    } else {
        info!("sight line {from} -> {to} stops at {}", sight.block);
    }
    Ok(())
}

fn report(world: &World, scenario: &Scenario) {
    let grid = world.resource::<HexGrid>();
    let visible = grid
        .size()
        .iter()
        .filter(|&hex| grid.field(hex).flags().visible)
        .count();
    let lit = grid
        .size()
        .iter()
        .filter(|&hex| grid.field(hex).resolved_light() != [0, 0, 0])
        .count();

    let lighting = world.resource::<Lighting>();
    let mesh = world.resource::<LightMesh>();
    let fog = world.resource::<Fog>();
    let [r, g, b] = lighting.ambient_color();
    info!(
        "{}: {visible} cells on screen, {lit} lit by {} sources \
         ({} fans, {} soft edges), ambient {r},{g},{b}",
        scenario.name,
        lighting.len(),
        mesh.fans().len(),
        mesh.soft().len(),
    );
    info!(
        "fog: {} look points, {} shoot points, generation {}",
        fog.look_points().len(),
        fog.shoot_points().len(),
        fog.generation()
    );
}
