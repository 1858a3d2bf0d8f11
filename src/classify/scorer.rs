use anyhow::Result;

use crate::frame::{Frame, Roi};

/// Frame scoring backend.
///
/// Implementations score the ROI crop of one frame against an ordered label
/// vocabulary and return softmax probabilities in `[0, 1]`, one per label,
/// normalized over the full vocabulary.
///
/// Whatever capability a backend needs (a remote inference endpoint, model
/// weights, a device handle) is acquired at construction, not per call:
/// inference latency is a per-call cost, initialization is not.
pub trait FrameScorer: Send {
    /// Backend identifier, for logs.
    fn name(&self) -> &'static str;

    /// Score one frame. `scores.len() == labels.len()` on success.
    fn score(&mut self, frame: &Frame, roi: &Roi, labels: &[String]) -> Result<Vec<f64>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
