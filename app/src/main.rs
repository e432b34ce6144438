use std::{
    ffi::OsStr,
    fs,
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Local;
use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use env_logger::Builder;
use glob::glob;
use log::LevelFilter;
use serde::Deserialize;
use thiserror::Error;

use pcd_classifier::{
    GeometricSubClassifier, JobError, JobEvent, JobPhase, JobScheduler, SubclassThresholds,
};
use pcd_core::{
    config::ClassificationConfig,
    error::FormatError,
    pointcloud::store::PointStore,
};
use pcd_exporter::{export, ExportOptions, WriteError};
use pcd_parser::parsers::{get_extension, provider_for, Extension};

#[derive(Parser, Debug)]
#[command(
    name = "pclassify",
    about = "Classifies point clouds into ground, vegetation and structure classes",
    version
)]
struct Cli {
    #[arg(short, long, required = true, num_args = 1.., value_name = "FILE")]
    input: Vec<String>,

    /// Output file; its extension picks the format (las, laz, csv, txt)
    #[arg(short, long, required = true, value_name = "FILE")]
    output: PathBuf,

    /// JSON file with classification settings and sub-classification thresholds
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    tile_size: Option<f64>,

    #[arg(long)]
    threads: Option<usize>,

    #[arg(long)]
    min_smoothness: Option<f64>,

    /// Steepest ground slope in degrees
    #[arg(long)]
    max_slope: Option<f64>,

    #[arg(long)]
    thickness: Option<f64>,

    #[arg(long)]
    overlap: Option<f64>,

    /// Points per output file, 0 for unlimited
    #[arg(long, value_name = "N")]
    points_per_file: Option<usize>,

    #[arg(long)]
    separate_classes: bool,

    /// Write one file (sequence) per class
    #[arg(long)]
    split_by_class: bool,

    /// Stop exporting at the first write failure
    #[arg(long)]
    fail_fast: bool,
}

#[derive(Debug, Error)]
enum AppError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("failed to read config {path}: {message}")]
    Config { path: String, message: String },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error("classification ended {0}")]
    Unfinished(JobPhase),
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("{0} output file(s) could not be written")]
    Export(usize),
}

/// Contents of the `--config` file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    #[serde(flatten)]
    classification: ClassificationConfig,
    thresholds: SubclassThresholds,
}

impl FileConfig {
    fn load(path: &Path) -> Result<Self, AppError> {
        let config_error = |message: String| AppError::Config {
            path: path.display().to_string(),
            message,
        };
        let text = fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| config_error(e.to_string()))?;
        config
            .thresholds
            .validate()
            .map_err(|e| config_error(e.to_string()))?;
        Ok(config)
    }
}

impl Cli {
    // Flags override the config file.
    fn classification_config(&self, mut config: ClassificationConfig) -> ClassificationConfig {
        if let Some(tile_size) = self.tile_size {
            config.tile_size = tile_size;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(min_smoothness) = self.min_smoothness {
            config.min_smoothness = min_smoothness;
        }
        if let Some(max_slope) = self.max_slope {
            config.max_slope = max_slope;
        }
        if let Some(thickness) = self.thickness {
            config.thickness = thickness;
        }
        if let Some(overlap) = self.overlap {
            config.overlap = overlap;
        }
        if let Some(points_per_file) = self.points_per_file {
            config.points_per_file = (points_per_file > 0).then_some(points_per_file);
        }
        config.separate_classes |= self.separate_classes;
        config
    }
}

fn check_and_get_extension(paths: &[PathBuf]) -> Result<Extension, AppError> {
    let mut extensions = vec![];
    for path in paths.iter() {
        let extension = path.extension().and_then(OsStr::to_str);
        match extension {
            Some(ext) => extensions.push(ext.to_ascii_lowercase()),
            None => {
                return Err(AppError::Input(format!(
                    "file extension is not found: {}",
                    path.display()
                )))
            }
        }
    }
    extensions.sort();
    extensions.dedup();

    match extensions.len() {
        0 => Err(AppError::Input("no input files".to_string())),
        1 => Ok(get_extension(&paths[0])?),
        _ => Err(AppError::Input(
            "multiple extensions are not supported".to_string(),
        )),
    }
}

fn expand_globs(input_patterns: &[String]) -> Result<Vec<PathBuf>, AppError> {
    let mut paths = Vec::new();
    for pattern in input_patterns {
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let entries = glob(pattern).map_err(|e| AppError::Input(e.to_string()))?;
            for entry in entries {
                match entry {
                    Ok(path) => paths.push(path),
                    Err(e) => log::warn!("skipping unreadable path: {}", e),
                }
            }
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }
    Ok(paths)
}

fn load_store(input_files: Vec<PathBuf>) -> Result<PointStore, AppError> {
    let extension = check_and_get_extension(&input_files)?;
    let parser = provider_for(extension, input_files).get_parser();
    let mut store = PointStore::new();
    store.load(parser.parse()?)?;
    Ok(store)
}

// Runs the job to its end, logging progress as tiles finish.
fn classify(
    scheduler: &mut JobScheduler,
    config: &ClassificationConfig,
) -> Result<(), AppError> {
    let events = scheduler.subscribe();
    let handle = scheduler.start(config)?;
    let mut last_logged = Instant::now();

    loop {
        match events.recv_timeout(Duration::from_secs(5)) {
            Ok(JobEvent::Finished { .. }) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(JobEvent::TileFailed(_)) | Ok(JobEvent::TileFinished { .. }) => {
                if last_logged.elapsed() < Duration::from_secs(5) {
                    continue;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
        }
        let progress = handle.progress();
        log::info!(
            "classified {}/{} tiles ({:.1}%), {} points",
            progress.tiles_completed + progress.tiles_failed,
            progress.tiles_total,
            progress.fraction() * 100.0,
            progress.points_classified
        );
        last_logged = Instant::now();
    }

    let report = scheduler.wait()?;
    for failure in &report.failures {
        log::warn!("{}", failure);
    }
    if report.phase != JobPhase::Completed {
        return Err(AppError::Unfinished(report.phase));
    }
    Ok(())
}

fn run(args: Cli) -> Result<(), AppError> {
    let file_config = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = args.classification_config(file_config.classification);
    config.validate().map_err(JobError::from)?;
    log::info!("classification config: {:?}", config);

    log::info!("start parsing...");
    let start_local = Instant::now();
    let input_files = expand_globs(&args.input)?;
    log::info!("expanded input files: {:?}", input_files);
    let store = load_store(input_files)?;
    log::info!(
        "finish parsing {} points in {:?}",
        store.point_count(),
        start_local.elapsed()
    );

    log::info!("start classifying...");
    let start_local = Instant::now();
    let mut scheduler = JobScheduler::new(store).with_sub_classifier(Arc::new(
        GeometricSubClassifier::new(file_config.thresholds),
    ));
    classify(&mut scheduler, &config)?;
    log::info!("finish classifying in {:?}", start_local.elapsed());

    let store = scheduler.into_store()?;
    for (class, count) in store.class_counts() {
        log::info!("{:>14}: {}", class.name(), count);
    }

    log::info!("start exporting...");
    let options = ExportOptions {
        points_per_file: config.points_per_file,
        split_by_class: args.split_by_class,
        fail_fast: args.fail_fast,
    };
    let report = export(&store, &args.output, &options)?;
    for failure in &report.failures {
        log::error!(
            "failed to write {:?}: {}",
            failure.batch.destination,
            failure.error
        );
    }
    if args.fail_fast && !report.is_success() {
        return Err(AppError::Export(report.failures.len()));
    }
    Ok(())
}

fn main() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Cli::parse();

    log::info!("input files: {:?}", args.input);
    log::info!("output file: {:?}", args.output);

    let start = Instant::now();
    if let Err(e) = run(args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
    log::info!("Elapsed: {:?}", start.elapsed());
}
