//! End-to-end pipeline runs against the synthetic source.
//!
//! The stub scene shows a moving square during two scripted windows
//! (frames 40..=52 and 90..=102). At 5 fps with the default 1.5 s rolls and
//! 3 s cap, each window produces two clips: one truncated at the cap while
//! motion continues, and a follow-up closed by post-roll.

use std::sync::atomic::AtomicBool;

use anyhow::Result;
use chrono::{Local, TimeZone};

use trailwatch::classify::FrameScorer;
use trailwatch::config::{ClassifierSettings, MotionSettings};
use trailwatch::ingest::{FrameSource, SourceStats, StreamInfo};
use trailwatch::storage::{DetectionRecord, DetectionStore, InMemoryDetectionStore};
use trailwatch::{open_source, Annotator, Frame, Pipeline, Roi, WeatherService};

/// Every frame qualifies, with "dog" the clear winner.
struct DogScorer;

impl FrameScorer for DogScorer {
    fn name(&self) -> &'static str {
        "dog-stub"
    }

    fn score(&mut self, _frame: &Frame, _roi: &Roi, labels: &[String]) -> Result<Vec<f64>> {
        Ok(labels
            .iter()
            .map(|label| if label == "dog" { 0.5 } else { 0.125 })
            .collect())
    }
}

/// No frame ever qualifies.
struct QuietScorer;

impl FrameScorer for QuietScorer {
    fn name(&self) -> &'static str {
        "quiet-stub"
    }

    fn score(&mut self, _frame: &Frame, _roi: &Roi, labels: &[String]) -> Result<Vec<f64>> {
        let mut probs = vec![0.05; labels.len()];
        probs[0] = 1.0 - 0.05 * (labels.len() as f64 - 1.0);
        Ok(probs)
    }
}

/// Alternates between two full-frame fills (constant motion), then fails
/// with a read error mid-event.
struct FlickerSource {
    index: u64,
    frames_before_failure: u64,
}

impl FrameSource for FlickerSource {
    fn connect(&mut self) -> Result<StreamInfo> {
        Ok(StreamInfo {
            fps: 5.0,
            width: 64,
            height: 64,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.index >= self.frames_before_failure {
            anyhow::bail!("camera connection reset");
        }
        let fill = if self.index % 2 == 0 { 20 } else { 230 };
        let ts = Local
            .timestamp_opt(1_700_000_000 + self.index as i64, 0)
            .unwrap();
        self.index += 1;
        Ok(Some(Frame::new(vec![fill; 64 * 64 * 3], 64, 64, ts)))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.index,
            source: "flicker".to_string(),
        }
    }
}

struct FailingStore;

impl DetectionStore for FailingStore {
    fn append(&mut self, _record: &DetectionRecord) -> Result<()> {
        anyhow::bail!("disk full")
    }
}

fn motion_settings() -> MotionSettings {
    MotionSettings {
        threshold: 200,
        pixel_threshold: 75,
        dilate_iterations: 3,
        // Full frame so the whole square path is visible to differencing.
        roi_top: 0.0,
        roi_bottom: 1.0,
        roi_left: 0.0,
        roi_right: 1.0,
        pre_roll_seconds: 1.5,
        post_roll_seconds: 1.5,
        max_clip_seconds: 3.0,
    }
}

fn classifier_settings() -> ClassifierSettings {
    ClassifierSettings {
        scorer_url: None,
        detection_threshold: 0.4,
        fixed_labels: vec!["railway track".to_string(), "tree".to_string()],
        moving_labels: vec![
            "pedestrian".to_string(),
            "dog".to_string(),
            "cyclist".to_string(),
        ],
    }
}

fn pipeline(image_dir: &std::path::Path) -> Pipeline {
    Pipeline::new(
        motion_settings(),
        classifier_settings(),
        Annotator::new(image_dir, "/public/img/trail_pics", None),
        WeatherService::new("http://127.0.0.1:9/nowhere", "Cupertino", None),
        false,
    )
}

#[test]
fn synthetic_run_records_one_detection_per_clip() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = open_source("stub://trail?frames=120&fps=5", 5).unwrap();
    let mut store = InMemoryDetectionStore::new();
    let shutdown = AtomicBool::new(false);

    let stats = pipeline(dir.path())
        .run(
            source.as_mut(),
            Box::new(DogScorer),
            &mut store,
            &shutdown,
        )
        .unwrap();

    assert_eq!(stats.frames_processed, 120);
    assert_eq!(stats.clips_emitted, 4);
    assert_eq!(stats.detections_recorded, 4);
    assert_eq!(store.records().len(), 4);

    for record in store.records() {
        assert_eq!(record.label, "dog");
        assert!(record.video_url.is_none());
        // Weather service is disabled: enrichment degrades to all-None.
        assert!(record.weather.temperature.is_none());
        assert!(record.image_url.starts_with("/public/img/trail_pics/"));
        assert!(record
            .image_url
            .ends_with(&format!("{}.png", record.event_epoch)));
        assert!(dir.path().join(format!("{}.png", record.event_epoch)).exists());
        // Frame scores cover the whole clip, capped at 3 s of frames.
        assert!(!record.frame_scores.is_empty());
        assert!(record.frame_scores.len() <= 15);
    }

    // Events are recorded in capture order with distinct epochs.
    let epochs: Vec<i64> = store.records().iter().map(|r| r.event_epoch).collect();
    let mut sorted = epochs.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(epochs, sorted);
}

#[test]
fn clips_without_qualifying_frames_leave_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = open_source("stub://trail?frames=120&fps=5", 5).unwrap();
    let mut store = InMemoryDetectionStore::new();
    let shutdown = AtomicBool::new(false);

    let stats = pipeline(dir.path())
        .run(
            source.as_mut(),
            Box::new(QuietScorer),
            &mut store,
            &shutdown,
        )
        .unwrap();

    assert_eq!(stats.clips_emitted, 4);
    assert_eq!(stats.detections_recorded, 0);
    assert!(store.records().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn source_failure_flushes_the_open_clip() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = FlickerSource {
        index: 0,
        frames_before_failure: 10,
    };
    let mut store = InMemoryDetectionStore::new();
    let shutdown = AtomicBool::new(false);

    // The source dies while an event is still open; the run must end
    // normally with the pending clip flushed and evaluated.
    let stats = pipeline(dir.path())
        .run(&mut source, Box::new(DogScorer), &mut store, &shutdown)
        .unwrap();

    assert_eq!(stats.frames_processed, 10);
    assert_eq!(stats.clips_emitted, 1);
    assert_eq!(stats.detections_recorded, 1);
    assert_eq!(store.records().len(), 1);
    // The flushed clip carries the first frame as pre-roll plus the nine
    // active frames that followed.
    assert_eq!(store.records()[0].frame_scores.len(), 10);
}

#[test]
fn store_failure_ends_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut source = open_source("stub://trail?frames=120&fps=5", 5).unwrap();
    let mut store = FailingStore;
    let shutdown = AtomicBool::new(false);

    let err = pipeline(dir.path())
        .run(
            source.as_mut(),
            Box::new(DogScorer),
            &mut store,
            &shutdown,
        )
        .unwrap_err();
    assert!(err.to_string().contains("persist detection record"));
}
