//! Motion event segmentation.
//!
//! The `Segmenter` consumes one (frame, motion magnitude) sample at a time
//! and emits bounded `Clip`s: pre-roll seeded from the sliding window, the
//! active motion span, and a post-roll tail. It is the only stateful stage
//! of the pipeline.
//!
//! Threshold comparison: `magnitude >= motion_threshold` is active, `<` is
//! quiet. A magnitude exactly at the threshold therefore counts as active.
//!
//! Post-roll counting: the first quiet frame after an event is appended and
//! counts as post-roll frame 1; the clip is emitted as soon as the quiet
//! count reaches `post_roll_frames`. A new event starting during post-roll
//! preempts the pending clip: it is emitted with exactly the frames
//! accumulated so far, and the new clip opens in the same step with its own
//! pre-roll seed.
//!
//! Every emitted clip has `1 <= len <= max_clip_frames` and non-decreasing
//! timestamps. Reaching the cap emits the clip outright and resets to idle;
//! a still-active event restarts fresh on the next active sample.

use crate::frame::{Frame, SlidingWindow};
use anyhow::{anyhow, Result};

/// Segmentation policy, in frame counts derived from the source frame rate.
#[derive(Clone, Copy, Debug)]
pub struct SegmenterConfig {
    /// Contour-area magnitude at or above which a sample is active.
    pub motion_threshold: u64,
    /// Frames retained before event start, seeded from the sliding window.
    pub pre_roll_frames: usize,
    /// Quiet frames retained after motion ends before finalizing.
    pub post_roll_frames: usize,
    /// Hard cap on total frames in one clip.
    pub max_clip_frames: usize,
}

impl SegmenterConfig {
    /// Derive frame counts from durations in seconds at the source rate.
    pub fn from_rate(
        fps: f64,
        motion_threshold: u64,
        pre_roll_seconds: f64,
        post_roll_seconds: f64,
        max_clip_seconds: f64,
    ) -> Result<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(anyhow!("source frame rate must be positive, got {}", fps));
        }
        let config = Self {
            motion_threshold,
            pre_roll_frames: (pre_roll_seconds * fps) as usize,
            post_roll_frames: (post_roll_seconds * fps) as usize,
            max_clip_frames: ((max_clip_seconds * fps) as usize).max(1),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_clip_frames == 0 {
            return Err(anyhow!("max_clip_frames must be at least 1"));
        }
        if self.pre_roll_frames + 1 > self.max_clip_frames {
            return Err(anyhow!(
                "pre_roll_frames ({}) must leave room under max_clip_frames ({})",
                self.pre_roll_frames,
                self.max_clip_frames
            ));
        }
        Ok(())
    }
}

/// A finalized frame sequence for one motion event.
///
/// Invariants (upheld by the segmenter): at least one frame, at most
/// `max_clip_frames`, timestamps non-decreasing in capture order.
#[derive(Debug)]
pub struct Clip {
    frames: Vec<Frame>,
}

impl Clip {
    fn new(frames: Vec<Frame>) -> Self {
        debug_assert!(!frames.is_empty());
        debug_assert!(frames
            .windows(2)
            .all(|pair| pair[0].timestamp() <= pair[1].timestamp()));
        Self { frames }
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Timestamp of the first frame (includes pre-roll context).
    pub fn started_at(&self) -> chrono::DateTime<chrono::Local> {
        self.frames[0].timestamp()
    }
}

enum State {
    Idle,
    InEvent,
    PostRoll { quiet: usize },
}

/// Online segmenter: (frame, magnitude) stream in, completed clips out.
///
/// At most one clip is emitted per sample; preemption emits the pending
/// clip while the successor is still open.
pub struct Segmenter {
    config: SegmenterConfig,
    state: State,
    window: SlidingWindow,
    pending: Vec<Frame>,
    clips_emitted: u64,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            window: SlidingWindow::new(config.pre_roll_frames),
            config,
            state: State::Idle,
            pending: Vec::new(),
            clips_emitted: 0,
        })
    }

    pub fn config(&self) -> &SegmenterConfig {
        &self.config
    }

    /// Total clips finalized so far (including forced flushes).
    pub fn clips_emitted(&self) -> u64 {
        self.clips_emitted
    }

    /// Feed one sample. Returns a clip when this sample finalizes one.
    pub fn push(&mut self, frame: Frame, magnitude: u64) -> Option<Clip> {
        let active = magnitude >= self.config.motion_threshold;

        // A clip opened by preemption with pre_roll_frames + 1 ==
        // max_clip_frames is already full; finalize it before touching it.
        if matches!(self.state, State::InEvent)
            && self.pending.len() >= self.config.max_clip_frames
        {
            self.state = State::Idle;
            let full = self.take_pending();
            // Reprocess this sample from idle; an idle transition never
            // emits, so no second clip can be produced here.
            let followup = self.push(frame, magnitude);
            debug_assert!(followup.is_none());
            return full;
        }

        let emitted = match (&mut self.state, active) {
            (State::Idle, false) => None,
            (State::Idle, true) => {
                self.open_clip(&frame);
                None
            }
            (State::InEvent, true) => {
                self.pending.push(frame.clone());
                if self.pending.len() >= self.config.max_clip_frames {
                    // At the size cap the clip is emitted outright; event
                    // continuation restarts fresh on the next active sample.
                    self.state = State::Idle;
                    self.take_pending()
                } else {
                    None
                }
            }
            (State::InEvent, false) => {
                // The first quiet frame is included and counts as post-roll
                // frame 1.
                self.pending.push(frame.clone());
                if self.pending.len() >= self.config.max_clip_frames
                    || self.config.post_roll_frames <= 1
                {
                    self.state = State::Idle;
                    self.take_pending()
                } else {
                    self.state = State::PostRoll { quiet: 1 };
                    None
                }
            }
            (State::PostRoll { quiet }, false) => {
                self.pending.push(frame.clone());
                let quiet = *quiet + 1;
                if self.pending.len() >= self.config.max_clip_frames
                    || quiet >= self.config.post_roll_frames
                {
                    self.state = State::Idle;
                    self.take_pending()
                } else {
                    self.state = State::PostRoll { quiet };
                    None
                }
            }
            (State::PostRoll { .. }, true) => {
                // Preemption: a new event wins over finishing the previous
                // clip's post-roll.
                let clip = self.take_pending();
                self.open_clip(&frame);
                clip
            }
        };

        // The window advances after the transition, so pre-roll seeding
        // never includes the frame that opened the event.
        self.window.push(frame);
        emitted
    }

    /// End-of-stream flush: finalize any pending clip before shutdown.
    pub fn finish(&mut self) -> Option<Clip> {
        match self.state {
            State::Idle => None,
            State::InEvent | State::PostRoll { .. } => {
                self.state = State::Idle;
                self.take_pending()
            }
        }
    }

    fn open_clip(&mut self, frame: &Frame) {
        debug_assert!(self.pending.is_empty());
        self.pending = self
            .window
            .tail(self.config.pre_roll_frames)
            .cloned()
            .collect();
        self.pending.push(frame.clone());
        self.state = State::InEvent;
    }

    fn take_pending(&mut self) -> Option<Clip> {
        if self.pending.is_empty() {
            return None;
        }
        self.clips_emitted += 1;
        Some(Clip::new(std::mem::take(&mut self.pending)))
    }
}
