//! The capture-to-record pipeline.
//!
//! Single-threaded loop over a frame source: compute a motion magnitude for
//! each frame against its predecessor, feed the segmenter, and whenever a
//! clip is finalized run it through the evaluator. Positive verdicts are
//! annotated, enriched with weather context and appended to the detection
//! store.
//!
//! Evaluation failures drop the clip with a warning; the stream outlives a
//! flaky scorer. A source read failure ends the run the same way end of
//! stream does, pending clip flushed and evaluated. Store and image-write
//! failures end the run with an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use image::Rgb;

use crate::annotate::Annotator;
use crate::classify::{ClipEvaluator, ClipVerdict, FrameScorer};
use crate::config::{ClassifierSettings, MotionSettings};
use crate::frame::Roi;
use crate::ingest::FrameSource;
use crate::motion::{MotionConfig, MotionDetector};
use crate::segment::{Clip, Segmenter, SegmenterConfig};
use crate::storage::{DetectionRecord, DetectionStore};
use crate::weather::WeatherService;

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(30);
const OVERLAY_BG: Rgb<u8> = Rgb([0, 0, 0]);
const TIMESTAMP_POS: (i32, i32) = (10, 50);
const SCORES_POS: (i32, i32) = (10, 100);

/// Counters reported when a run ends.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineStats {
    pub frames_processed: u64,
    pub clips_emitted: u64,
    pub detections_recorded: u64,
}

pub struct Pipeline {
    motion: MotionSettings,
    classifier: ClassifierSettings,
    detector: MotionDetector,
    annotator: Annotator,
    weather: WeatherService,
    record_video: bool,
}

impl Pipeline {
    pub fn new(
        motion: MotionSettings,
        classifier: ClassifierSettings,
        annotator: Annotator,
        weather: WeatherService,
        record_video: bool,
    ) -> Self {
        let detector = MotionDetector::new(MotionConfig {
            pixel_threshold: motion.pixel_threshold,
            dilate_iterations: motion.dilate_iterations,
        });
        Self {
            motion,
            classifier,
            detector,
            annotator,
            weather,
            record_video,
        }
    }

    /// Run the loop until the source ends (end of stream or read failure)
    /// or `shutdown` is raised. The segmenter is flushed on the way out, so
    /// a clip that was open when the stream stopped is still evaluated.
    pub fn run(
        &mut self,
        source: &mut dyn FrameSource,
        scorer: Box<dyn FrameScorer>,
        store: &mut dyn DetectionStore,
        shutdown: &AtomicBool,
    ) -> Result<PipelineStats> {
        let info = source.connect()?;
        if info.fps > 10.0 {
            log::warn!(
                "source reports {:.1} fps; motion differencing above 10 fps wastes work \
                 and inflates clip frame counts",
                info.fps
            );
        }

        let roi = Roi::from_fractions(
            self.motion.roi_top,
            self.motion.roi_bottom,
            self.motion.roi_left,
            self.motion.roi_right,
            info.width,
            info.height,
        )?;
        let segmenter_config = SegmenterConfig::from_rate(
            info.fps,
            self.motion.threshold,
            self.motion.pre_roll_seconds,
            self.motion.post_roll_seconds,
            self.motion.max_clip_seconds,
        )?;
        let mut segmenter = Segmenter::new(segmenter_config)?;
        let mut evaluator = ClipEvaluator::new(
            scorer,
            roi,
            self.classifier.fixed_labels.clone(),
            self.classifier.moving_labels.clone(),
            self.classifier.detection_threshold,
        )?;
        if let Err(e) = evaluator.warm_up() {
            log::warn!("scorer '{}' warm-up failed: {}", evaluator.scorer_name(), e);
        }

        log::info!(
            "pipeline running: {}x{} at {:.1} fps, roi {:?}, scorer '{}'",
            info.width,
            info.height,
            info.fps,
            roi,
            evaluator.scorer_name()
        );

        let roi_width = roi.width() as usize;
        let roi_height = roi.height() as usize;
        let mut prev_gray: Option<Vec<u8>> = None;
        let mut stats = PipelineStats::default();
        let mut last_health_log = Instant::now();

        while !shutdown.load(Ordering::SeqCst) {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    log::info!("source ended after {} frames", stats.frames_processed);
                    break;
                }
                Err(e) => {
                    // A dead source is normal termination, not a run error;
                    // the pending clip is still flushed below.
                    log::warn!(
                        "source read failed after {} frames: {}",
                        stats.frames_processed,
                        e
                    );
                    break;
                }
            };
            stats.frames_processed += 1;

            let gray = frame.roi_gray(&roi);
            // First frame has no predecessor and is treated as quiet.
            let magnitude = match &prev_gray {
                Some(prev) => self.detector.magnitude(prev, &gray, roi_width, roi_height),
                None => 0,
            };
            prev_gray = Some(gray);

            if let Some(clip) = segmenter.push(frame, magnitude) {
                stats.clips_emitted += 1;
                self.handle_clip(&clip, &mut evaluator, store, info.fps, &mut stats)?;
            }

            if last_health_log.elapsed() >= HEALTH_LOG_INTERVAL {
                let source_stats = source.stats();
                log::info!(
                    "health={} frames={} clips={} detections={} source={}",
                    source.is_healthy(),
                    source_stats.frames_read,
                    stats.clips_emitted,
                    stats.detections_recorded,
                    source_stats.source
                );
                last_health_log = Instant::now();
            }
        }

        if shutdown.load(Ordering::SeqCst) {
            log::info!("shutdown requested; flushing open clip");
        }
        if let Some(clip) = segmenter.finish() {
            stats.clips_emitted += 1;
            self.handle_clip(&clip, &mut evaluator, store, info.fps, &mut stats)?;
        }

        log::info!(
            "pipeline finished: {} frames, {} clips, {} detections",
            stats.frames_processed,
            stats.clips_emitted,
            stats.detections_recorded
        );
        Ok(stats)
    }

    fn handle_clip(
        &self,
        clip: &Clip,
        evaluator: &mut ClipEvaluator,
        store: &mut dyn DetectionStore,
        fps: f64,
        stats: &mut PipelineStats,
    ) -> Result<()> {
        let verdict = match evaluator.evaluate(clip) {
            Ok(verdict) => verdict,
            Err(e) => {
                log::warn!(
                    "clip evaluation failed ({} frames dropped): {}",
                    clip.len(),
                    e
                );
                return Ok(());
            }
        };
        let Some(label) = verdict.label.clone() else {
            log::debug!(
                "clip started {} ({} frames) had no qualifying object",
                clip.started_at().format("%Y-%m-%d %H:%M:%S"),
                clip.len()
            );
            return Ok(());
        };

        let trigger = &clip.frames()[verdict.frame_index];
        let epoch = trigger.epoch_secs();
        let scores_text = probability_overlay(&verdict, verdict.frame_index)?;

        let mut img = trigger.to_rgb_image();
        self.annotator
            .draw_label(&mut img, &trigger.timestamp_text(), TIMESTAMP_POS, OVERLAY_BG);
        self.annotator
            .draw_label(&mut img, &scores_text, SCORES_POS, OVERLAY_BG);
        let (image_path, image_url) = self.annotator.write_image(&img, epoch)?;

        let video_url = if self.record_video {
            let overlays: Vec<String> = (0..clip.len())
                .map(|index| probability_overlay(&verdict, index))
                .collect::<Result<_>>()?;
            match self.annotator.write_video(clip.frames(), &overlays, epoch, fps) {
                Ok((_, url)) => Some(url),
                Err(e) => {
                    log::warn!("clip video not written: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let weather = self.weather.fetch();
        let record = DetectionRecord {
            event_epoch: epoch,
            event_time: trigger.timestamp_text(),
            day: trigger.timestamp().format("%A").to_string(),
            weather,
            label: label.clone(),
            frame_scores: verdict.frame_scores,
            image_url,
            video_url,
        };
        store.append(&record).context("persist detection record")?;
        stats.detections_recorded += 1;

        log::info!(
            "detection #{}: {} at {} ({} frames, image {})",
            stats.detections_recorded,
            label,
            record.event_time,
            clip.len(),
            image_path.display()
        );
        Ok(())
    }
}

/// Overlay line for one frame's score map, e.g.
/// `Likelihood (%): {"dog":30.0,...}`.
fn probability_overlay(verdict: &ClipVerdict, index: usize) -> Result<String> {
    let scores = serde_json::to_string(&verdict.frame_scores[index])
        .context("serialize frame scores for overlay")?;
    Ok(format!("Likelihood (%): {}", scores))
}
