//! VEIL ANPR - License plate entry/exit logger
//!
//! Command-line front end: resolve single images, replay folders of frames
//! through the entry/exit log, evaluate on labelled datasets and push pending
//! records.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use veil_anpr::classification::YellowPlateClassifier;
use veil_anpr::config::{self, AppConfig};
use veil_anpr::eval::{collect_images, run_evaluation, EvalOptions};
use veil_anpr::pipeline::{ContourPlateDetector, FrameProcessor, PlateDetector, PlateResolver, WholeFrameDetector};
use veil_anpr::storage::{self, SqliteStore};
use veil_anpr::sync::{sync_pending, LogSyncTarget};
use veil_anpr::tracking::{ConfirmationTracker, VehicleEvent};
use veil_anpr::vision::{with_timeout, PlateCrop, TesseractCli, TextRecognizer};

/// VEIL ANPR - License plate entry/exit logger
#[derive(Parser, Debug)]
#[command(name = "veil-anpr")]
#[command(about = "Resolve license plates from images and log vehicle entries and exits")]
struct Args {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the plate in a single pre-cropped image
    Resolve {
        image: PathBuf,
    },
    /// Process every image in a folder as a camera frame
    Run {
        dir: PathBuf,
        /// Override the confirmation threshold
        #[arg(long)]
        min_hits: Option<u32>,
        #[arg(long, value_enum, default_value_t = DetectorKind::Whole)]
        detector: DetectorKind,
    },
    /// Evaluate detection and OCR against labelled images
    Eval {
        #[arg(long)]
        images: PathBuf,
        /// CSV or JSON file mapping image names to plates
        #[arg(long)]
        labels: Option<PathBuf>,
        #[arg(long, default_value = "image")]
        image_field: String,
        #[arg(long, default_value = "plate")]
        label_field: String,
        /// Per-image CSV report
        #[arg(long)]
        output: Option<PathBuf>,
        /// Evaluate at most this many images (0 = all)
        #[arg(long, default_value = "0")]
        limit: usize,
        /// Use the file stem as the label when no label is found
        #[arg(long)]
        fallback_stem: bool,
        #[arg(long, value_enum, default_value_t = DetectorKind::Whole)]
        detector: DetectorKind,
    },
    /// Push closed visits that have not been synced yet
    Sync,
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Plate detector selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DetectorKind {
    /// Treat the whole image as the plate
    Whole,
    /// Edge-contour search for plate-shaped regions
    Contour,
}

impl DetectorKind {
    fn build(self) -> Box<dyn PlateDetector> {
        match self {
            DetectorKind::Whole => Box::new(WholeFrameDetector),
            DetectorKind::Contour => Box::new(ContourPlateDetector::default()),
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match &args.config {
        Some(path) => path.clone(),
        None => default_config_path()?,
    };

    if let Command::InitConfig { force } = args.command {
        return init_config(&config_path, force);
    }

    let config = load_or_create_config(&config_path);

    match args.command {
        Command::Resolve { image } => resolve_image(&config, &image),
        Command::Run { dir, min_hits, detector } => run_folder(&config, &dir, min_hits, detector),
        Command::Eval {
            images,
            labels,
            image_field,
            label_field,
            output,
            limit,
            fallback_stem,
            detector,
        } => {
            let options = EvalOptions {
                images,
                labels,
                image_field,
                label_field,
                output,
                limit,
                fallback_stem,
            };
            evaluate(&config, &options, detector)
        }
        Command::Sync => sync_records(&config),
        Command::InitConfig { .. } => Ok(()),
    }
}

fn default_config_path() -> Result<PathBuf> {
    Ok(storage::get_config_dir()?.join("config.toml"))
}

/// Load configuration from file or fall back to defaults
fn load_or_create_config(path: &Path) -> AppConfig {
    if path.exists() {
        match config::load_config(path) {
            Ok(config) => {
                info!("Loaded configuration from {:?}", path);
                return config;
            }
            Err(e) => error!("Ignoring configuration at {:?}: {:#}", path, e),
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config::save_config(&AppConfig::default(), path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}

fn build_resolver(config: &AppConfig) -> Result<PlateResolver> {
    // The CLI kills its own process at the same deadline, so timed-out workers exit
    let tesseract: Arc<dyn TextRecognizer> = Arc::new(TesseractCli::from_settings(&config.ocr));
    let recognizer = with_timeout(tesseract, config.ocr.timeout_ms);
    PlateResolver::with_config(recognizer, config).context("Invalid plate rules")
}

fn open_store(config: &AppConfig) -> Result<SqliteStore> {
    let path = match &config.storage.database_path {
        Some(path) => path.clone(),
        None => storage::default_database_path()?,
    };
    SqliteStore::open(&path).with_context(|| format!("Failed to open database {:?}", path))
}

fn resolve_image(config: &AppConfig, path: &Path) -> Result<()> {
    let resolver = build_resolver(config)?;
    let image = image::open(path).with_context(|| format!("Failed to load image: {:?}", path))?;

    match resolver.resolve(&PlateCrop::from_dynamic(&image)) {
        Some(plate) => println!("{} ({:.2})", plate.text, plate.confidence),
        None => println!("no plate"),
    }
    Ok(())
}

fn run_folder(config: &AppConfig, dir: &Path, min_hits: Option<u32>, detector: DetectorKind) -> Result<()> {
    let resolver = build_resolver(config)?;
    let store = open_store(config)?;
    let confirmations = Arc::new(ConfirmationTracker::new(&config.tracking));

    let mut processor = FrameProcessor::new(
        detector.build(),
        resolver,
        Box::new(YellowPlateClassifier),
        confirmations,
        Box::new(store),
    )
    .with_required_hits(min_hits);
    if config.sync.enabled {
        processor = processor.with_sync(Box::new(LogSyncTarget::new(&config.sync.device_id)));
    }

    let frames = collect_images(dir)?;
    info!("Processing {} frames from {:?}", frames.len(), dir);

    let (mut entries, mut exits) = (0, 0);
    for path in &frames {
        let frame = match image::open(path) {
            Ok(image) => image.to_rgb8(),
            Err(e) => {
                error!("Skipping {:?}: {}", path, e);
                continue;
            }
        };
        for event in processor.process_frame(&frame)? {
            match event {
                VehicleEvent::Entry(_) => entries += 1,
                VehicleEvent::Exit(_) => exits += 1,
                VehicleEvent::Suppressed { .. } => {}
            }
        }
    }

    info!("Done: {} entries, {} exits", entries, exits);
    Ok(())
}

fn evaluate(config: &AppConfig, options: &EvalOptions, detector: DetectorKind) -> Result<()> {
    let resolver = build_resolver(config)?;
    let (_, summary) = run_evaluation(&resolver, detector.build().as_ref(), options)?;
    println!("{}", summary);
    Ok(())
}

fn sync_records(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    let target = LogSyncTarget::new(&config.sync.device_id);
    let synced = sync_pending(&store, &target)?;
    info!("Synced {} records", synced);
    Ok(())
}
