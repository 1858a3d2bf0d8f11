use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_DB_PATH: &str = "trailwatch.db";
const DEFAULT_SOURCE: &str = "stub://trail";
const DEFAULT_TARGET_FPS: u32 = 5;

const DEFAULT_MOTION_THRESHOLD: u64 = 2_000;
const DEFAULT_PIXEL_THRESHOLD: u8 = 75;
const DEFAULT_DILATE_ITERATIONS: u32 = 3;
const DEFAULT_ROI_TOP: f64 = 0.25;
const DEFAULT_ROI_BOTTOM: f64 = 1.0;
const DEFAULT_ROI_LEFT: f64 = 0.3;
const DEFAULT_ROI_RIGHT: f64 = 0.7;
const DEFAULT_PRE_ROLL_SECONDS: f64 = 1.5;
const DEFAULT_POST_ROLL_SECONDS: f64 = 1.5;
const DEFAULT_MAX_CLIP_SECONDS: f64 = 3.0;

const DEFAULT_DETECTION_THRESHOLD: f64 = 0.4;
const DEFAULT_FIXED_LABELS: &[&str] = &["railway track", "tree"];
const DEFAULT_MOVING_LABELS: &[&str] = &["pedestrian", "dog", "cyclist"];

const DEFAULT_WEATHER_URL: &str = "http://api.openweathermap.org/data/2.5/weather";
const DEFAULT_WEATHER_CITY: &str = "Cupertino";

const DEFAULT_IMAGE_DIR: &str = "/usr/share/grafana/public/img/trail_pics/";
const DEFAULT_PUBLIC_BASE: &str = "/public/img/trail_pics";
const DEFAULT_FONT_PATH: &str = "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf";

#[derive(Debug, Deserialize, Default)]
struct TrailwatchConfigFile {
    db_path: Option<String>,
    source: Option<SourceConfigFile>,
    motion: Option<MotionConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    weather: Option<WeatherConfigFile>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    threshold: Option<u64>,
    pixel_threshold: Option<u8>,
    dilate_iterations: Option<u32>,
    roi_top: Option<f64>,
    roi_bottom: Option<f64>,
    roi_left: Option<f64>,
    roi_right: Option<f64>,
    pre_roll_seconds: Option<f64>,
    post_roll_seconds: Option<f64>,
    max_clip_seconds: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    scorer_url: Option<String>,
    detection_threshold: Option<f64>,
    fixed_labels: Option<Vec<String>>,
    moving_labels: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct WeatherConfigFile {
    base_url: Option<String>,
    city: Option<String>,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    image_dir: Option<String>,
    public_base: Option<String>,
    font_path: Option<String>,
    record_video: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct TrailwatchConfig {
    pub db_path: String,
    pub source: SourceSettings,
    pub motion: MotionSettings,
    pub classifier: ClassifierSettings,
    pub weather: WeatherSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub threshold: u64,
    /// Intensity cutoff for binarizing the blurred difference image.
    pub pixel_threshold: u8,
    /// Dilation passes applied to the binary mask.
    pub dilate_iterations: u32,
    /// Fractions of the frame; converted to pixel offsets at connect time.
    pub roi_top: f64,
    pub roi_bottom: f64,
    pub roi_left: f64,
    pub roi_right: f64,
    pub pre_roll_seconds: f64,
    pub post_roll_seconds: f64,
    pub max_clip_seconds: f64,
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    /// Scoring sidecar endpoint; `None` selects the built-in stub scorer.
    pub scorer_url: Option<String>,
    pub detection_threshold: f64,
    pub fixed_labels: Vec<String>,
    pub moving_labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct WeatherSettings {
    pub base_url: String,
    pub city: String,
    /// `None` disables weather enrichment.
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OutputSettings {
    pub image_dir: String,
    pub public_base: String,
    pub font_path: Option<PathBuf>,
    pub record_video: bool,
}

impl TrailwatchConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TRAILWATCH_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrailwatchConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let source = SourceSettings {
            url: file
                .source
                .as_ref()
                .and_then(|source| source.url.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            target_fps: file
                .source
                .as_ref()
                .and_then(|source| source.target_fps)
                .unwrap_or(DEFAULT_TARGET_FPS),
        };
        let motion = MotionSettings {
            threshold: file
                .motion
                .as_ref()
                .and_then(|motion| motion.threshold)
                .unwrap_or(DEFAULT_MOTION_THRESHOLD),
            pixel_threshold: file
                .motion
                .as_ref()
                .and_then(|motion| motion.pixel_threshold)
                .unwrap_or(DEFAULT_PIXEL_THRESHOLD),
            dilate_iterations: file
                .motion
                .as_ref()
                .and_then(|motion| motion.dilate_iterations)
                .unwrap_or(DEFAULT_DILATE_ITERATIONS),
            roi_top: file
                .motion
                .as_ref()
                .and_then(|motion| motion.roi_top)
                .unwrap_or(DEFAULT_ROI_TOP),
            roi_bottom: file
                .motion
                .as_ref()
                .and_then(|motion| motion.roi_bottom)
                .unwrap_or(DEFAULT_ROI_BOTTOM),
            roi_left: file
                .motion
                .as_ref()
                .and_then(|motion| motion.roi_left)
                .unwrap_or(DEFAULT_ROI_LEFT),
            roi_right: file
                .motion
                .as_ref()
                .and_then(|motion| motion.roi_right)
                .unwrap_or(DEFAULT_ROI_RIGHT),
            pre_roll_seconds: file
                .motion
                .as_ref()
                .and_then(|motion| motion.pre_roll_seconds)
                .unwrap_or(DEFAULT_PRE_ROLL_SECONDS),
            post_roll_seconds: file
                .motion
                .as_ref()
                .and_then(|motion| motion.post_roll_seconds)
                .unwrap_or(DEFAULT_POST_ROLL_SECONDS),
            max_clip_seconds: file
                .motion
                .as_ref()
                .and_then(|motion| motion.max_clip_seconds)
                .unwrap_or(DEFAULT_MAX_CLIP_SECONDS),
        };
        let classifier = ClassifierSettings {
            scorer_url: file
                .classifier
                .as_ref()
                .and_then(|classifier| classifier.scorer_url.clone()),
            detection_threshold: file
                .classifier
                .as_ref()
                .and_then(|classifier| classifier.detection_threshold)
                .unwrap_or(DEFAULT_DETECTION_THRESHOLD),
            fixed_labels: file
                .classifier
                .as_ref()
                .and_then(|classifier| classifier.fixed_labels.clone())
                .unwrap_or_else(|| to_strings(DEFAULT_FIXED_LABELS)),
            moving_labels: file
                .classifier
                .as_ref()
                .and_then(|classifier| classifier.moving_labels.clone())
                .unwrap_or_else(|| to_strings(DEFAULT_MOVING_LABELS)),
        };
        let weather = WeatherSettings {
            base_url: file
                .weather
                .as_ref()
                .and_then(|weather| weather.base_url.clone())
                .unwrap_or_else(|| DEFAULT_WEATHER_URL.to_string()),
            city: file
                .weather
                .as_ref()
                .and_then(|weather| weather.city.clone())
                .unwrap_or_else(|| DEFAULT_WEATHER_CITY.to_string()),
            api_key: file.weather.and_then(|weather| weather.api_key),
        };
        let output = OutputSettings {
            image_dir: file
                .output
                .as_ref()
                .and_then(|output| output.image_dir.clone())
                .unwrap_or_else(|| DEFAULT_IMAGE_DIR.to_string()),
            public_base: file
                .output
                .as_ref()
                .and_then(|output| output.public_base.clone())
                .unwrap_or_else(|| DEFAULT_PUBLIC_BASE.to_string()),
            font_path: Some(
                file.output
                    .as_ref()
                    .and_then(|output| output.font_path.clone())
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_FONT_PATH)),
            ),
            record_video: file
                .output
                .and_then(|output| output.record_video)
                .unwrap_or(false),
        };
        Self {
            db_path,
            source,
            motion,
            classifier,
            weather,
            output,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("TRAILWATCH_SOURCE") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(db_path) = std::env::var("TRAILWATCH_DB_PATH") {
            if !db_path.trim().is_empty() {
                self.db_path = db_path;
            }
        }
        if let Ok(threshold) = std::env::var("TRAILWATCH_MOTION_THRESHOLD") {
            self.motion.threshold = threshold
                .parse()
                .map_err(|_| anyhow!("TRAILWATCH_MOTION_THRESHOLD must be an integer"))?;
        }
        if let Ok(url) = std::env::var("TRAILWATCH_SCORER_URL") {
            if !url.trim().is_empty() {
                self.classifier.scorer_url = Some(url);
            }
        }
        if let Ok(api_key) = std::env::var("TRAILWATCH_WEATHER_API_KEY") {
            if !api_key.trim().is_empty() {
                self.weather.api_key = Some(api_key);
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        for (name, value) in [
            ("roi_top", self.motion.roi_top),
            ("roi_bottom", self.motion.roi_bottom),
            ("roi_left", self.motion.roi_left),
            ("roi_right", self.motion.roi_right),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.motion.roi_top >= self.motion.roi_bottom {
            return Err(anyhow!("roi_top must be below roi_bottom"));
        }
        if self.motion.roi_left >= self.motion.roi_right {
            return Err(anyhow!("roi_left must be left of roi_right"));
        }
        for (name, value) in [
            ("pre_roll_seconds", self.motion.pre_roll_seconds),
            ("post_roll_seconds", self.motion.post_roll_seconds),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(anyhow!("{} must be non-negative, got {}", name, value));
            }
        }
        if !self.motion.max_clip_seconds.is_finite() || self.motion.max_clip_seconds <= 0.0 {
            return Err(anyhow!(
                "max_clip_seconds must be positive, got {}",
                self.motion.max_clip_seconds
            ));
        }
        if !(0.0..=1.0).contains(&self.classifier.detection_threshold) {
            return Err(anyhow!(
                "detection_threshold must be within [0, 1], got {}",
                self.classifier.detection_threshold
            ));
        }
        if self.classifier.moving_labels.is_empty() {
            return Err(anyhow!("at least one moving label is required"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<TrailwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn to_strings(labels: &[&str]) -> Vec<String> {
    labels.iter().map(|label| label.to_string()).collect()
}
