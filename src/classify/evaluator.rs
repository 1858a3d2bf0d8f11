//! Clip evaluation policy.
//!
//! Scores every frame of a finalized clip against the fixed + moving label
//! vocabulary and decides whether a moving object occurred. Scoring the
//! whole clip instead of just a middle frame trades latency for fewer false
//! positives.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};

use crate::classify::scorer::FrameScorer;
use crate::frame::Roi;
use crate::segment::Clip;

/// Outcome of evaluating one clip.
#[derive(Clone, Debug)]
pub struct ClipVerdict {
    /// Best moving-label candidate, or `None` when no frame qualified.
    pub label: Option<String>,
    /// Index of the frame that triggered the detection (0 when none did).
    pub frame_index: usize,
    /// Per-frame label -> percentage maps over the full vocabulary,
    /// rounded to 0.1.
    pub frame_scores: Vec<BTreeMap<String, f64>>,
}

impl ClipVerdict {
    pub fn is_positive(&self) -> bool {
        self.label.is_some()
    }
}

/// Applies the detection policy on top of a `FrameScorer`.
///
/// A frame qualifies when the sum of its moving-label probabilities exceeds
/// `detection_threshold`; among qualifying frames the winner is the single
/// highest moving-label probability.
pub struct ClipEvaluator {
    scorer: Box<dyn FrameScorer>,
    roi: Roi,
    labels: Vec<String>,
    fixed_count: usize,
    moving_labels: Vec<String>,
    detection_threshold: f64,
}

impl ClipEvaluator {
    pub fn new(
        scorer: Box<dyn FrameScorer>,
        roi: Roi,
        fixed_labels: Vec<String>,
        moving_labels: Vec<String>,
        detection_threshold: f64,
    ) -> Result<Self> {
        if moving_labels.is_empty() {
            return Err(anyhow!("at least one moving label is required"));
        }
        if !(0.0..=1.0).contains(&detection_threshold) {
            return Err(anyhow!(
                "detection_threshold must be within [0, 1], got {}",
                detection_threshold
            ));
        }
        let fixed_count = fixed_labels.len();
        let mut labels = fixed_labels;
        labels.extend(moving_labels.iter().cloned());
        Ok(Self {
            scorer,
            roi,
            labels,
            fixed_count,
            moving_labels,
            detection_threshold,
        })
    }

    pub fn scorer_name(&self) -> &'static str {
        self.scorer.name()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        self.scorer.warm_up()
    }

    /// Evaluate a finalized clip frame by frame.
    pub fn evaluate(&mut self, clip: &Clip) -> Result<ClipVerdict> {
        let mut best_label: Option<String> = None;
        let mut best_prob = 0.0f64;
        let mut best_index = 0usize;
        let mut frame_scores = Vec::with_capacity(clip.len());

        for (index, frame) in clip.frames().iter().enumerate() {
            let probs = self.scorer.score(frame, &self.roi, &self.labels)?;
            if probs.len() != self.labels.len() {
                return Err(anyhow!(
                    "scorer '{}' returned {} probabilities for {} labels",
                    self.scorer.name(),
                    probs.len(),
                    self.labels.len()
                ));
            }

            let mut percentages = BTreeMap::new();
            for (label, prob) in self.labels.iter().zip(probs.iter()) {
                percentages.insert(label.clone(), (prob * 1000.0).round() / 10.0);
            }
            frame_scores.push(percentages);

            let moving = &probs[self.fixed_count..];
            if moving.iter().sum::<f64>() > self.detection_threshold {
                let (slot, &prob) = moving
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .expect("moving labels are non-empty");
                if prob > best_prob {
                    best_label = Some(self.moving_labels[slot].clone());
                    best_prob = prob;
                    best_index = index;
                }
            }
        }

        Ok(ClipVerdict {
            label: best_label,
            frame_index: best_index,
            frame_scores,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::backends::StubScorer;
    use crate::frame::Frame;
    use crate::segment::{Clip, Segmenter, SegmenterConfig};
    use chrono::{Local, TimeZone};

    fn labels() -> (Vec<String>, Vec<String>) {
        let fixed = vec!["railway track".to_string(), "tree".to_string()];
        let moving = vec![
            "pedestrian".to_string(),
            "dog".to_string(),
            "cyclist".to_string(),
        ];
        (fixed, moving)
    }

    fn clip_of(frames: usize) -> Clip {
        // Build a clip through the segmenter so invariants hold.
        let mut seg = Segmenter::new(SegmenterConfig {
            motion_threshold: 1,
            pre_roll_frames: 0,
            post_roll_frames: 1,
            max_clip_frames: frames + 1,
        })
        .unwrap();
        for n in 0..frames {
            let ts = Local.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap();
            let emitted = seg.push(Frame::new(vec![0u8; 12], 2, 2, ts), 10);
            assert!(emitted.is_none());
        }
        seg.finish().expect("pending clip")
    }

    fn evaluator(script: Vec<Vec<f64>>, threshold: f64) -> ClipEvaluator {
        let (fixed, moving) = labels();
        let roi = Roi {
            top: 0,
            bottom: 2,
            left: 0,
            right: 2,
        };
        ClipEvaluator::new(
            Box::new(StubScorer::scripted(script)),
            roi,
            fixed,
            moving,
            threshold,
        )
        .unwrap()
    }

    #[test]
    fn qualifying_frame_wins_with_its_best_moving_label() {
        // Frame 1's moving sum is 0.5 > 0.4; "dog" is its top moving label.
        let script = vec![
            vec![0.5, 0.4, 0.05, 0.03, 0.02], // sum 0.10, no detection
            vec![0.3, 0.2, 0.10, 0.30, 0.10], // sum 0.50, dog at 0.30
            vec![0.5, 0.4, 0.05, 0.03, 0.02],
        ];
        let mut eval = evaluator(script, 0.4);
        let verdict = eval.evaluate(&clip_of(3)).unwrap();
        assert_eq!(verdict.label.as_deref(), Some("dog"));
        assert_eq!(verdict.frame_index, 1);
        assert_eq!(verdict.frame_scores.len(), 3);
        assert_eq!(verdict.frame_scores[1]["dog"], 30.0);
        assert_eq!(verdict.frame_scores[1]["railway track"], 30.0);
    }

    #[test]
    fn no_qualifying_frame_means_no_detection() {
        let script = vec![
            vec![0.6, 0.3, 0.04, 0.03, 0.03],
            vec![0.7, 0.2, 0.05, 0.03, 0.02],
        ];
        let mut eval = evaluator(script, 0.4);
        let verdict = eval.evaluate(&clip_of(2)).unwrap();
        assert!(verdict.label.is_none());
        assert!(!verdict.is_positive());
        assert_eq!(verdict.frame_index, 0);
        assert_eq!(verdict.frame_scores.len(), 2);
    }

    #[test]
    fn later_frame_must_beat_earlier_best() {
        // Both frames qualify; frame 0's cyclist (0.45) outranks frame 1's
        // pedestrian (0.40), so the earlier frame stays the trigger.
        let script = vec![
            vec![0.2, 0.2, 0.05, 0.05, 0.45],
            vec![0.2, 0.2, 0.40, 0.05, 0.05],
        ];
        let mut eval = evaluator(script, 0.4);
        let verdict = eval.evaluate(&clip_of(2)).unwrap();
        assert_eq!(verdict.label.as_deref(), Some("cyclist"));
        assert_eq!(verdict.frame_index, 0);
    }

    #[test]
    fn sum_at_threshold_does_not_qualify() {
        // Moving sum exactly equal to the threshold is not "exceeds".
        let script = vec![vec![0.4, 0.2, 0.2, 0.1, 0.1]];
        let mut eval = evaluator(script, 0.4);
        let verdict = eval.evaluate(&clip_of(1)).unwrap();
        assert!(verdict.label.is_none());
    }

    #[test]
    fn rejects_empty_moving_vocabulary() {
        let roi = Roi {
            top: 0,
            bottom: 2,
            left: 0,
            right: 2,
        };
        let result = ClipEvaluator::new(
            Box::new(StubScorer::uniform()),
            roi,
            vec!["tree".to_string()],
            vec![],
            0.4,
        );
        assert!(result.is_err());
    }
}
