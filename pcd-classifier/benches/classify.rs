use std::sync::atomic::AtomicBool;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use pcd_classifier::{GroundClassifier, Tiler};
use pcd_core::{config::ClassificationConfig, pointcloud::point::Point};

// Gently rolling terrain with a few raised blocks.
fn terrain(side: usize, spacing: f64) -> Vec<Point> {
    let mut points = Vec::with_capacity(side * side);
    for j in 0..side {
        for i in 0..side {
            let (x, y) = (i as f64 * spacing, j as f64 * spacing);
            let mut z = 0.02 * x + 0.05 * (y * 0.3).sin();
            if (i / 40 + j / 40) % 3 == 0 && i % 40 > 10 && j % 40 > 10 {
                z += 4.0;
            }
            points.push(Point::new(x, y, z));
        }
    }
    points
}

fn bench_tiler(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiler");
    for side in [200, 500] {
        let points = terrain(side, 0.25);
        group.bench_with_input(BenchmarkId::from_parameter(side * side), &points, |b, points| {
            let tiler = Tiler::new(10.0).unwrap();
            b.iter(|| tiler.tile(black_box(points)))
        });
    }
    group.finish();
}

fn bench_tile_classification(c: &mut Criterion) {
    let points = terrain(100, 0.25);
    let grid = Tiler::new(100.0).unwrap().tile(&points);
    let cancel = AtomicBool::new(false);

    let mut group = c.benchmark_group("classify_tile");
    for separate_classes in [false, true] {
        let config = ClassificationConfig {
            separate_classes,
            threads: 1,
            ..Default::default()
        };
        let classifier = GroundClassifier::new(&config);
        group.bench_function(BenchmarkId::from_parameter(separate_classes), |b| {
            b.iter(|| classifier.classify(black_box(&points), &grid.tiles[0], &cancel))
        });
    }
    group.finish();
}

// A ramp far steeper than the slope limit, so the tile has no ground and every
// height is taken against the lowest point.
fn bench_tile_without_ground(c: &mut Criterion) {
    let config = ClassificationConfig {
        separate_classes: true,
        threads: 1,
        ..Default::default()
    };
    let classifier = GroundClassifier::new(&config);
    let cancel = AtomicBool::new(false);

    let mut group = c.benchmark_group("classify_tile_without_ground");
    for side in [50, 100, 200] {
        let spacing = 25.0 / side as f64;
        let points: Vec<Point> = (0..side * side)
            .map(|k| {
                let (x, y) = ((k % side) as f64 * spacing, (k / side) as f64 * spacing);
                Point::new(x, y, 2.0 * x)
            })
            .collect();
        let grid = Tiler::new(100.0).unwrap().tile(&points);
        group.bench_with_input(BenchmarkId::from_parameter(side * side), &points, |b, points| {
            b.iter(|| classifier.classify(black_box(points), &grid.tiles[0], &cancel))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_tiler,
    bench_tile_classification,
    bench_tile_without_ground
);
criterion_main!(benches);
