use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use once_cell::sync::Lazy;

use faceseek::matcher::{self, MatchEngine, MatchOptions};
use faceseek::report::{self, BatchReport, MatchReport};
use faceseek::scan::{self, CancelToken, FnSink, ScanStats, VideoScan};
use faceseek::{config, store, Error, Pipeline, VideoFile};

#[derive(Parser)]
#[command(name = "faceseek")]
#[command(
    version,
    about = "Extract unique faces from video and search them by image"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a video and extract unique faces
    Analyze {
        /// Path of the video file
        video: PathBuf,
    },
    /// Search the extracted faces for the person in an image
    Search {
        /// Path of the query image
        image: PathBuf,
        /// Comparison tolerance (smaller is stricter)
        #[arg(long)]
        tolerance: Option<f32>,
        /// Maximum number of results
        #[arg(long, default_value_t = 10)]
        max_results: usize,
    },
    /// Search the extracted faces for every image in a folder
    BatchSearch {
        /// Folder with query images
        folder: PathBuf,
        /// Comparison tolerance (smaller is stricter)
        #[arg(long)]
        tolerance: Option<f32>,
    },
    /// Show configuration and encoding store status
    Info,
}

static CANCEL: Lazy<CancelToken> = Lazy::new(CancelToken::new);

extern "C" fn handle_interrupt(_: libc::c_int) {
    CANCEL.cancel();
}

fn install_interrupt_handler() {
    let handler = handle_interrupt as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
    }
}

fn main() -> ExitCode {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();

    let cfg = match config::load_config(None) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{e:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = cfg.ensure_directories() {
        error!("failed to create output directories: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command {
        Commands::Analyze { video } => analyze(&cfg, &video),
        Commands::Search {
            image,
            tolerance,
            max_results,
        } => search(&cfg, &image, tolerance, max_results),
        Commands::BatchSearch { folder, tolerance } => batch_search(&cfg, &folder, tolerance),
        Commands::Info => show_info(&cfg),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn analyze(cfg: &config::Config, video: &Path) -> Result<ExitCode> {
    info!("Analyzing video: {}", video.display());
    install_interrupt_handler();

    let mut engine =
        Pipeline::load(&cfg.model_dir).context("initializing face recognition pipeline")?;

    let mut sink = FnSink(|progress: f64, stats: &ScanStats| {
        info!(
            "progress {:5.1}% - unique faces: {}",
            progress * 100.0,
            stats.unique_faces
        );
    });

    let outcome = VideoScan::new(cfg, CANCEL.clone()).run(
        || {
            scan::validate_video_file(video)?;
            VideoFile::open(video).map_err(|e| Error::VideoOpen(format!("{e:#}")))
        },
        &mut engine,
        &mut sink,
    )?;

    let stats = &outcome.stats;
    info!("✓ Analysis complete");
    info!("  frames sampled:  {}", stats.sampled_frames);
    info!("  faces detected:  {}", stats.faces_detected);
    info!("  passed quality:  {}", stats.faces_passed_quality);
    info!("  unique faces:    {}", stats.unique_faces);
    info!("  captures saved:  {}", stats.captures_saved);
    info!("  frame failures:  {}", stats.frame_failures);
    info!(
        "  processing time: {}",
        report::format_time(stats.processing_secs)
    );
    info!("  captures folder: {}", cfg.output_folder.display());
    info!("  encodings file:  {}", cfg.encodings_file.display());

    if outcome.cancelled {
        info!("Scan interrupted; partial results were saved");
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

fn search(
    cfg: &config::Config,
    image: &Path,
    tolerance: Option<f32>,
    max_results: usize,
) -> Result<ExitCode> {
    info!("Searching for matches: {}", image.display());

    let img = matcher::load_query_image(image)?;
    let mut engine =
        Pipeline::load(&cfg.model_dir).context("initializing face recognition pipeline")?;
    let descriptor = matcher::extract_query_descriptor(&mut engine, &img)?
        .ok_or_else(|| Error::InvalidInput("no face detected in query image".into()))?;

    let mut options = MatchOptions::from_config(cfg);
    if let Some(t) = tolerance {
        options.tolerance = t;
    }
    options.max_results = max_results;

    let mut matches_engine = MatchEngine::new(cfg.encodings_file.clone());
    let matches = matches_engine.find_matches(&descriptor, &options)?;

    if matches.is_empty() {
        info!("No matches found");
        return Ok(ExitCode::SUCCESS);
    }

    info!("Found {} matches:", matches.len());
    for (i, m) in matches.iter().enumerate() {
        info!(
            "  {}. face #{} - frame {} ({:.2}s) - confidence {:.1}% - {}",
            i + 1,
            m.face_id,
            m.frame,
            m.timestamp,
            m.confidence * 100.0,
            m.capture_path
        );
    }

    let report_doc = MatchReport::build(&image.to_string_lossy(), &matches);
    report::write_json(Path::new("match_report.json"), &report_doc)?;
    Ok(ExitCode::SUCCESS)
}

fn batch_search(cfg: &config::Config, folder: &Path, tolerance: Option<f32>) -> Result<ExitCode> {
    if !folder.is_dir() {
        return Err(Error::InvalidInput(format!("not a folder: {}", folder.display())).into());
    }

    let mut images: Vec<PathBuf> = std::fs::read_dir(folder)
        .with_context(|| format!("reading {}", folder.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| config::is_supported_image(p))
        .collect();
    images.sort();

    if images.is_empty() {
        return Err(
            Error::InvalidInput(format!("no query images in {}", folder.display())).into(),
        );
    }

    info!("Batch search over {} images", images.len());

    let mut engine =
        Pipeline::load(&cfg.model_dir).context("initializing face recognition pipeline")?;
    let mut options = MatchOptions::from_config(cfg);
    if let Some(t) = tolerance {
        options.tolerance = t;
    }

    let mut matches_engine = MatchEngine::new(cfg.encodings_file.clone());
    let results = matches_engine.batch_compare(&mut engine, &images, &options)?;

    let total: usize = results.iter().map(|(_, m)| m.len()).sum();
    for (image, matches) in &results {
        let name = Path::new(image)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| image.clone());
        match matches.first() {
            Some(best) => info!(
                "  {name}: {} matches, best frame {} ({:.1}%)",
                matches.len(),
                best.frame,
                best.confidence * 100.0
            ),
            None => info!("  {name}: no matches"),
        }
    }
    info!(
        "Batch complete: {} total matches across {} images",
        total,
        results.len()
    );

    let report_doc = BatchReport::build(&results, options.tolerance);
    report::write_json(Path::new("batch_search_report.json"), &report_doc)?;
    Ok(ExitCode::SUCCESS)
}

fn show_info(cfg: &config::Config) -> Result<ExitCode> {
    info!("Configuration:");
    info!("  min face size:        {}px", cfg.min_face_size);
    info!("  frame interval:       {}", cfg.frame_interval);
    info!("  uniqueness tolerance: {}", cfg.uniqueness_tolerance);
    info!("  comparison tolerance: {}", cfg.comparison_tolerance);
    info!("  captures folder:      {}", cfg.output_folder.display());
    info!("  encodings file:       {}", cfg.encodings_file.display());
    info!("  model directory:      {}", cfg.model_dir.display());

    match store::load(&cfg.encodings_file) {
        Ok(loaded) => {
            let size = std::fs::metadata(&cfg.encodings_file)
                .map(|m| m.len())
                .unwrap_or(0);
            let version = loaded
                .metadata
                .as_ref()
                .map(|m| m.version.clone())
                .unwrap_or_else(|| "1.0".to_string());
            info!("Encoding store:");
            info!("  faces stored: {}", loaded.faces.len());
            info!("  version:      {version}");
            info!("  size:         {}", report::format_file_size(size));
        }
        Err(Error::StoreNotFound(_)) => {
            info!("Encoding store: not found - run `analyze` first");
        }
        Err(e) => warn!("cannot read encoding store: {e}"),
    }
    Ok(ExitCode::SUCCESS)
}
