//! Trailwatch
//!
//! A trail-camera monitoring daemon: watches a video stream for motion in a
//! fixed region of interest, cuts motion events into bounded clips with
//! pre-roll and post-roll context, classifies each clip against a small
//! label vocabulary and records positive detections with weather context.
//!
//! # Module Structure
//!
//! - `frame`: frames, region of interest, pre-roll sliding window
//! - `ingest`: frame sources (synthetic, HTTP MJPEG, video files)
//! - `motion`: frame-difference motion magnitude
//! - `segment`: the clip segmentation state machine
//! - `classify`: frame scorers and the clip evaluation policy
//! - `annotate`: detection overlays and media output
//! - `weather`: detection-time weather enrichment
//! - `storage`: detection record persistence
//! - `pipeline`: the capture-to-record loop
//! - `config`: file + environment configuration

pub mod annotate;
pub mod classify;
pub mod config;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod pipeline;
pub mod segment;
pub mod storage;
pub mod weather;

pub use annotate::Annotator;
pub use classify::{ClipEvaluator, ClipVerdict, FrameScorer, HttpScorer, StubScorer};
pub use config::TrailwatchConfig;
pub use frame::{Frame, Roi, SlidingWindow};
#[cfg(feature = "ingest-file-ffmpeg")]
pub use ingest::FfmpegFileSource;
pub use ingest::{open_source, FrameSource, HttpMjpegSource, StreamInfo, SyntheticSource};
pub use motion::{MotionConfig, MotionDetector};
pub use pipeline::{Pipeline, PipelineStats};
pub use segment::{Clip, Segmenter, SegmenterConfig};
pub use storage::{DetectionRecord, DetectionStore, InMemoryDetectionStore, SqliteDetectionStore};
pub use weather::{WeatherReport, WeatherService};
