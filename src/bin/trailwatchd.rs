//! trailwatchd - trail camera monitoring daemon
//!
//! Watches one video source end to end: motion differencing over a fixed
//! region of interest, clip segmentation, classification, annotation and
//! persistence. Configuration comes from an optional TOML file
//! (`TRAILWATCH_CONFIG`), `TRAILWATCH_*` environment variables and the
//! command-line flags below, in increasing order of precedence.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use trailwatch::classify::{FrameScorer, HttpScorer, StubScorer};
use trailwatch::{
    open_source, Annotator, Pipeline, SqliteDetectionStore, TrailwatchConfig, WeatherService,
};

#[derive(Debug, Parser)]
#[command(name = "trailwatchd", version, about = "Trail camera monitoring daemon")]
struct Args {
    /// Frame source: stub://, http(s):// or a video file path.
    #[arg(long)]
    source: Option<String>,

    /// Detection database path.
    #[arg(long)]
    db: Option<String>,

    /// Motion magnitude at or above which a frame counts as active.
    #[arg(long)]
    motion_threshold: Option<u64>,

    /// Region of interest as fractions of the frame.
    #[arg(long)]
    roi_top: Option<f64>,
    #[arg(long)]
    roi_bottom: Option<f64>,
    #[arg(long)]
    roi_left: Option<f64>,
    #[arg(long)]
    roi_right: Option<f64>,

    /// Scoring sidecar endpoint; omitted selects the built-in stub scorer.
    #[arg(long, env = "TRAILWATCH_SCORER_URL")]
    scorer_url: Option<String>,

    /// OpenWeatherMap API key; omitted disables weather enrichment.
    #[arg(long, env = "TRAILWATCH_WEATHER_API_KEY", hide_env_values = true)]
    weather_api_key: Option<String>,

    /// Also encode an annotated clip video per detection.
    #[arg(long)]
    record_video: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = TrailwatchConfig::load()?;
    if let Some(source) = args.source {
        cfg.source.url = source;
    }
    if let Some(db) = args.db {
        cfg.db_path = db;
    }
    if let Some(threshold) = args.motion_threshold {
        cfg.motion.threshold = threshold;
    }
    if let Some(top) = args.roi_top {
        cfg.motion.roi_top = top;
    }
    if let Some(bottom) = args.roi_bottom {
        cfg.motion.roi_bottom = bottom;
    }
    if let Some(left) = args.roi_left {
        cfg.motion.roi_left = left;
    }
    if let Some(right) = args.roi_right {
        cfg.motion.roi_right = right;
    }
    if let Some(url) = args.scorer_url {
        cfg.classifier.scorer_url = Some(url);
    }
    if let Some(api_key) = args.weather_api_key {
        cfg.weather.api_key = Some(api_key);
    }
    if args.record_video {
        cfg.output.record_video = true;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received; finishing the open clip");
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("install interrupt handler")?;
    }

    let mut source = open_source(&cfg.source.url, cfg.source.target_fps)?;
    let mut store = SqliteDetectionStore::open(&cfg.db_path)?;

    let scorer: Box<dyn FrameScorer> = match &cfg.classifier.scorer_url {
        Some(url) => Box::new(HttpScorer::new(url)?),
        None => {
            log::warn!("no scorer endpoint configured; using the uniform stub scorer");
            Box::new(StubScorer::uniform())
        }
    };

    let weather = WeatherService::new(
        &cfg.weather.base_url,
        &cfg.weather.city,
        cfg.weather.api_key.clone(),
    );
    if !weather.is_enabled() {
        log::info!("weather enrichment disabled (no api key)");
    }

    let annotator = Annotator::new(
        PathBuf::from(&cfg.output.image_dir),
        &cfg.output.public_base,
        cfg.output.font_path.as_deref(),
    );

    log::info!(
        "trailwatchd v{} watching {} (db {})",
        env!("CARGO_PKG_VERSION"),
        cfg.source.url,
        cfg.db_path
    );

    let mut pipeline = Pipeline::new(
        cfg.motion.clone(),
        cfg.classifier.clone(),
        annotator,
        weather,
        cfg.output.record_video,
    );
    let stats = pipeline.run(source.as_mut(), scorer, &mut store, &shutdown)?;

    log::info!(
        "trailwatchd done: {} frames, {} clips, {} detections ({} stored total)",
        stats.frames_processed,
        stats.clips_emitted,
        stats.detections_recorded,
        store.count()?
    );
    Ok(())
}
