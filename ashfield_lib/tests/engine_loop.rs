//! Drives the whole engine through its fixed-update chain the way an
//! embedding game would: populate the grid, point the viewport somewhere,
//! then let the schedule publish visibility, light and fog.

use bevy::prelude::*;

use ashfield_lib::fields::{CritterId, CritterProfile, HexGrid, Overlay};
use ashfield_lib::fog::{Fog, FogSeer};
use ashfield_lib::geometry::{Dir, MapHex, Topology};
use ashfield_lib::light::{LightFlags, LightId, LightMesh, LightSpec, Lighting};
use ashfield_lib::pathfinding::Pathfinder;
use ashfield_lib::testing::{map_app, small_config, tick};
use ashfield_lib::viewport::Viewport;

const LAMP: LightId = LightId(7);
const CENTER: MapHex = MapHex::new(30, 30);

/// An app with a critter, a lamp and a fog seer all standing on the
/// viewport center.
fn populated_app() -> App {
    let mut app = map_app(small_config(Topology::Hexagonal));
    app.update();

    app.world.resource_mut::<Viewport>().center_on(CENTER);
    app.world
        .resource_mut::<HexGrid>()
        .add_critter(CENTER, CritterId(1), CritterProfile::default());
    app.world.resource_mut::<Lighting>().upsert(
        LAMP,
        LightSpec {
            hex: CENTER,
            color: [255, 160, 40],
            radius: 4,
            flags: LightFlags::default(),
            intensity: 50,
            use_offset: false,
        },
        0.0,
    );
    let mut fog = app.world.resource_mut::<Fog>();
    fog.set_draw(true, true);
    fog.set_seer(Some(FogSeer {
        hex: CENTER,
        facing: Dir(0),
        look_dist: 6,
        shoot_dist: 4,
    }));
    app
}

#[test]
fn viewport_visibility_feeds_light_refcounts() {
    let mut app = populated_app();
    for _ in 0..3 {
        tick(&mut app);
    }

    let lighting = app.world.resource::<Lighting>();
    let source = lighting.get(LAMP).unwrap();
    assert!(!source.marked().is_empty());
    // The whole radius-4 disk fits on screen, so every marked cell counts
    // as visible.
    assert_eq!(source.visible_marks() as usize, source.marked().len());
}

#[test]
fn occupants_publish_as_overlays() {
    let mut app = populated_app();
    for _ in 0..2 {
        tick(&mut app);
    }

    let grid = app.world.resource::<HexGrid>();
    let field = grid.field(CENTER);
    assert!(field.flags().visible);
    assert!(field
        .overlays()
        .iter()
        .any(|overlay| *overlay == Overlay::Critter(CritterId(1))));
}

#[test]
fn fog_and_light_mesh_publish_once_settled() {
    let mut app = populated_app();
    for _ in 0..2 {
        tick(&mut app);
    }

    let fog = app.world.resource::<Fog>();
    assert!(!fog.is_dirty());
    assert_eq!(fog.generation(), 1);
    assert!(!fog.look_points().is_empty());
    assert!(!fog.shoot_points().is_empty());

    let mesh = app.world.resource::<LightMesh>();
    assert!(!mesh.fans().is_empty());
    assert!(mesh.generation() >= 1);
}

#[test]
fn square_topology_runs_the_same_loop() {
    let mut app = map_app(small_config(Topology::Square));
    app.update();
    app.world.resource_mut::<Viewport>().center_on(CENTER);
    for _ in 0..2 {
        tick(&mut app);
    }

    let grid = app.world.resource::<HexGrid>();
    assert!(grid.field(CENTER).flags().visible);
}

#[test]
fn pathfinder_routes_over_the_live_grid() {
    let mut app = populated_app();
    tick(&mut app);

    let start = MapHex::new(2, 2);
    let target = MapHex::new(8, 5);
    let path = app
        .world
        .resource_scope(|world, mut finder: Mut<Pathfinder>| {
            let grid = world.resource::<HexGrid>();
            finder.find_path(grid, None, start, target, -1).unwrap()
        });
    let grid = app.world.resource::<HexGrid>();
    assert_eq!(path.steps.len() as u32, grid.size().distance(start, target));
    assert_eq!(path.end, target);
}
