use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::classify::scorer::FrameScorer;
use crate::frame::{Frame, Roi};

/// Stub scorer for tests and `stub://` runs.
///
/// `uniform()` spreads probability evenly over the vocabulary, so no frame
/// ever crosses a moving-label detection threshold below 1. `scripted(...)`
/// replays canned score vectors, one per call, falling back to uniform when
/// the script runs out.
pub struct StubScorer {
    script: VecDeque<Vec<f64>>,
}

impl StubScorer {
    pub fn uniform() -> Self {
        Self {
            script: VecDeque::new(),
        }
    }

    pub fn scripted(scores: Vec<Vec<f64>>) -> Self {
        Self {
            script: scores.into(),
        }
    }
}

impl FrameScorer for StubScorer {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn score(&mut self, _frame: &Frame, _roi: &Roi, labels: &[String]) -> Result<Vec<f64>> {
        if labels.is_empty() {
            return Err(anyhow!("empty label vocabulary"));
        }
        if let Some(scores) = self.script.pop_front() {
            if scores.len() != labels.len() {
                return Err(anyhow!(
                    "scripted scores have {} entries, vocabulary has {}",
                    scores.len(),
                    labels.len()
                ));
            }
            return Ok(scores);
        }
        Ok(vec![1.0 / labels.len() as f64; labels.len()])
    }
}
