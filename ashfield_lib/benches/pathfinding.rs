use criterion::{criterion_group, criterion_main, Criterion};

use ashfield_lib::config::MapConfig;
use ashfield_lib::fields::{CritterProfile, HexGrid, ItemId, ItemProfile};
use ashfield_lib::geometry::{GridSize, MapHex, Topology};
use ashfield_lib::pathfinding::Pathfinder;

/// Setup function: a full-size grid with two crossing pillar rows so the
/// wave has something to flow around.
fn pillar_grid() -> HexGrid {
    let mut grid = HexGrid::new(GridSize::new(200, 200, Topology::Hexagonal));
    let mut next = 1u32;
    for i in (10..190).step_by(3) {
        grid.add_item(MapHex::new(i, 100), ItemId(next), ItemProfile::blocker());
        next += 1;
        grid.add_item(MapHex::new(100, i), ItemId(next), ItemProfile::blocker());
        next += 1;
    }
    grid
}

fn criterion_benchmark(c: &mut Criterion) {
    let grid = pillar_grid();
    let config = MapConfig::default();

    let mut finder = Pathfinder::new(&config);
    c.bench_function("route_corner_to_corner", |b| {
        b.iter(|| {
            finder
                .find_path(&grid, None, MapHex::new(10, 10), MapHex::new(190, 190), -1)
                .unwrap()
        })
    });

    let mut finder = Pathfinder::new(&config);
    let bulky = CritterProfile {
        multihex: 2,
        ..CritterProfile::default()
    };
    c.bench_function("route_multihex", |b| {
        b.iter(|| {
            finder.find_path(
                &grid,
                Some(&bulky),
                MapHex::new(10, 10),
                MapHex::new(190, 190),
                -1,
            )
        })
    });

    let mut finder = Pathfinder::new(&config);
    c.bench_function("route_cut_to_range", |b| {
        b.iter(|| {
            finder
                .find_path(&grid, None, MapHex::new(10, 10), MapHex::new(190, 190), 5)
                .unwrap()
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
