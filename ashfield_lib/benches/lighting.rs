use criterion::{criterion_group, criterion_main, Criterion};

use ashfield_lib::config::MapConfig;
use ashfield_lib::fields::{Corner, HexGrid, ItemId, ItemProfile};
use ashfield_lib::geometry::{GridSize, MapHex, Topology};
use ashfield_lib::light::{LightFlags, LightId, LightMesh, LightSpec, Lighting};

/// Setup function: a grid with a few wall lines for the light trace to
/// clip against.
fn walled_grid() -> HexGrid {
    let mut grid = HexGrid::new(GridSize::new(200, 200, Topology::Hexagonal));
    let mut next = 1u32;
    for x in 80..95 {
        grid.add_item(
            MapHex::new(x, 90),
            ItemId(next),
            ItemProfile::wall(Corner::EastWest, true),
        );
        next += 1;
    }
    for y in 105..120 {
        grid.add_item(
            MapHex::new(110, y),
            ItemId(next),
            ItemProfile::wall(Corner::NorthSouth, true),
        );
        next += 1;
    }
    grid
}

fn lamp(hex: MapHex, radius: u16) -> LightSpec {
    LightSpec {
        hex,
        color: [240, 190, 120],
        radius,
        flags: LightFlags::default(),
        intensity: 100,
        use_offset: false,
    }
}

fn criterion_benchmark(c: &mut Criterion) {
    let config = MapConfig::default();

    let mut grid = walled_grid();
    let mut lighting = Lighting::new(&config);
    let mut mesh = LightMesh::default();
    lighting.upsert(LightId(1), lamp(MapHex::new(100, 100), 40), 0.0);
    lighting.process(&mut grid, &mut mesh, 1000.0);
    c.bench_function("rebuild_wide_fan", |b| {
        b.iter(|| {
            lighting.request_rebuild();
            lighting.process(&mut grid, &mut mesh, 1000.0);
        })
    });

    let mut grid = walled_grid();
    let mut lighting = Lighting::new(&config);
    let mut mesh = LightMesh::default();
    for i in 0..40u32 {
        let hex = MapHex::new(40 + (i % 8) as u16 * 15, 40 + (i / 8) as u16 * 25);
        lighting.upsert(LightId(i + 1), lamp(hex, 8), 0.0);
    }
    lighting.process(&mut grid, &mut mesh, 1000.0);
    c.bench_function("rebuild_many_lamps", |b| {
        b.iter(|| {
            lighting.request_rebuild();
            lighting.process(&mut grid, &mut mesh, 1000.0);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
