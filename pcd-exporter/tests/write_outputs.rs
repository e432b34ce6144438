//! Writes classified stores to disk and reads the files back.

use std::path::PathBuf;

use pcd_core::pointcloud::{
    classification::Classification,
    point::{Color, Point, PointCloud},
    store::PointStore,
};
use pcd_exporter::{export, ExportOptions};
use pcd_parser::parsers::{
    csv::CsvParserProvider, las::LasParserProvider, Parser as _, ParserProvider as _,
};

const CLASSES: [Classification; 4] = [
    Classification::Ground,
    Classification::Building,
    Classification::HighVegetation,
    Classification::Overlap,
];

fn classified_store(n: usize) -> PointStore {
    let points = (0..n)
        .map(|i| {
            let mut point = Point::new(100.0 + i as f64 * 0.5, 200.0 + (i % 7) as f64, (i % 3) as f64 * 0.25)
                .with_intensity(i as u16);
            point.color = Some(Color {
                r: i as u16,
                g: 2 * i as u16,
                b: 3,
            });
            point.classification = CLASSES[i % CLASSES.len()];
            point
        })
        .collect();
    let mut store = PointStore::new();
    store.load(PointCloud::new(points)).unwrap();
    store
}

fn read_las(files: Vec<PathBuf>) -> Vec<Point> {
    LasParserProvider { filenames: files }
        .get_parser()
        .parse()
        .unwrap()
        .points
}

#[test]
fn las_batches_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = classified_store(25);
    let options = ExportOptions {
        points_per_file: Some(10),
        ..Default::default()
    };

    let report = export(&store, &dir.path().join("result.las"), &options).unwrap();
    assert!(report.is_success());

    let files: Vec<PathBuf> = report.written.iter().map(|b| b.destination.clone()).collect();
    assert_eq!(
        files,
        ["result-0.las", "result-1.las", "result-2.las"]
            .map(|name| dir.path().join(name))
            .to_vec()
    );
    assert_eq!(report.written[2].point_count, 5);
    assert_eq!(report.written[2].range, Some(20..25));

    let points = read_las(files);
    assert_eq!(points.len(), 25);
    for (written, read) in store.points().iter().zip(&points) {
        assert!((written.x - read.x).abs() < 1e-6);
        assert!((written.y - read.y).abs() < 1e-6);
        assert!((written.z - read.z).abs() < 1e-6);
        assert_eq!(written.classification, read.classification);
        assert_eq!(written.attributes.intensity, read.attributes.intensity);
        assert_eq!(written.color, read.color);
    }
}

#[test]
fn laz_split_by_class() {
    let dir = tempfile::tempdir().unwrap();
    let store = classified_store(12);
    let options = ExportOptions {
        split_by_class: true,
        ..Default::default()
    };

    let report = export(&store, &dir.path().join("cloud.laz"), &options).unwrap();
    assert!(report.is_success());
    let names: Vec<String> = report
        .written
        .iter()
        .map(|b| b.destination.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "cloud-ground.laz",
            "cloud-highveg.laz",
            "cloud-building.laz",
            "cloud-overlap.laz"
        ]
        .into_iter()
        .map(String::from)
        .collect::<Vec<_>>()
    );

    for batch in &report.written {
        let points = read_las(vec![batch.destination.clone()]);
        assert_eq!(points.len(), 3);
        assert!(points.iter().all(|p| Some(p.classification) == batch.class));
    }
}

#[test]
fn csv_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = classified_store(9);

    let report = export(&store, &dir.path().join("points.csv"), &ExportOptions::default()).unwrap();
    assert_eq!(report.written.len(), 1);
    assert_eq!(report.written[0].destination, dir.path().join("points.csv"));

    let cloud = CsvParserProvider {
        filenames: vec![dir.path().join("points.csv")],
    }
    .get_parser()
    .parse()
    .unwrap();
    assert_eq!(cloud.points.len(), 9);
    for (written, read) in store.points().iter().zip(&cloud.points) {
        assert_eq!(written.xyz(), read.xyz());
        assert_eq!(written.classification, read.classification);
        assert_eq!(written.color, read.color);
    }
}

#[test]
fn unusable_output_directory_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let options = ExportOptions {
        points_per_file: Some(5),
        ..Default::default()
    };
    let result = export(&classified_store(10), &blocker.join("out.las"), &options);
    assert!(result.is_err());
}
