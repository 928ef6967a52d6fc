use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, black_box};
use glam::{Vec2, Vec3};

use terrastream::clod::{PatchSurface, RtinSurface};
use terrastream::terrain::{TerrainGenerator, TerrainParams};
use terrastream::{
    CameraSnapshot, DynamicTerrainSurface, Extents, HeightFieldGrid, HeightQuery, SurfaceOptions, TerrainMesh,
    Topology,
};

fn noise_grid(size: usize) -> Arc<HeightFieldGrid> {
    let extents = Extents::new(0.0, 2048.0, 0.0, 2048.0);
    let generator = TerrainGenerator::new(TerrainParams::default(), extents, size, size);
    Arc::new(HeightFieldGrid::from_source(&generator).expect("grid"))
}

fn camera() -> CameraSnapshot {
    let eye = Vec3::new(200.0, 180.0, 200.0);
    CameraSnapshot::look_at(eye, Vec3::new(1024.0, 40.0, 1024.0), Vec3::Y, 75.0, 16.0 / 9.0).with_clip(1.0, 3000.0)
}

fn bench_cull(c: &mut Criterion, name: &str, mut surface: Box<dyn DynamicTerrainSurface>) {
    surface.set_options(SurfaceOptions { polygon_target: 0, ..Default::default() });
    surface.init(noise_grid(513)).expect("init");
    let camera = camera();

    c.bench_function(name, |b| {
        b.iter(|| surface.do_cull(black_box(&camera)));
    });
}

fn bench_patch_cull(c: &mut Criterion) {
    bench_cull(c, "patch_cull_513", Box::new(PatchSurface::new()));
}

fn bench_rtin_cull(c: &mut Criterion) {
    bench_cull(c, "rtin_cull_513", Box::new(RtinSurface::new()));
}

fn bench_patch_render(c: &mut Criterion) {
    let mut surface = PatchSurface::new();
    surface.init(noise_grid(513)).expect("init");
    surface.do_cull(&camera());
    let mut mesh = TerrainMesh::new(Topology::TriangleStrip);

    c.bench_function("patch_render_strip_513", |b| {
        b.iter(|| {
            surface.do_render(&mut mesh);
            black_box(mesh.triangle_count())
        });
    });
}

fn bench_altitude_queries(c: &mut Criterion) {
    let grid = noise_grid(1025);

    c.bench_function("altitude_query_1k", |b| {
        b.iter(|| {
            let mut sum = 0.0;
            for i in 0..1000 {
                let p = Vec2::new((i * 37 % 2048) as f32, (i * 91 % 2048) as f32);
                sum += grid.find_altitude_at_point(Vec3::new(p.x, 0.0, p.y), false).unwrap_or(0.0);
            }
            black_box(sum)
        });
    });
}

fn bench_ray_cast(c: &mut Criterion) {
    let grid = noise_grid(513);
    let origin = Vec3::new(10.0, 400.0, 10.0);
    let direction = Vec3::new(1.0, -0.3, 1.0).normalize();

    c.bench_function("ray_cast_513", |b| {
        b.iter(|| terrastream::heightfield::cast_ray_to_surface(grid.as_ref(), black_box(origin), black_box(direction)));
    });
}

criterion_group!(
    benches,
    bench_patch_cull,
    bench_rtin_cull,
    bench_patch_render,
    bench_altitude_queries,
    bench_ray_cast,
);
criterion_main!(benches);
