//! Synthetic frame source.
//!
//! Renders a deterministic scene: a static background with a bright square
//! passing through during two scripted windows. Useful for exercising the
//! whole pipeline without a camera, and for demos
//! (`trailwatchd --source 'stub://trail?frames=200'`).

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Local};
use url::Url;

use super::{FrameSource, SourceStats, StreamInfo};
use crate::frame::Frame;

const DEFAULT_FRAMES: u64 = 120;
const DEFAULT_FPS: u32 = 5;
const DEFAULT_WIDTH: u32 = 160;
const DEFAULT_HEIGHT: u32 = 120;
const SQUARE_SIDE: u32 = 24;

pub struct SyntheticSource {
    url: String,
    total_frames: u64,
    fps: u32,
    width: u32,
    height: u32,
    next_index: u64,
    started_at: Option<DateTime<Local>>,
}

impl SyntheticSource {
    /// Parse a `stub://<name>?frames=N&fps=N&width=N&height=N` URL.
    pub fn new(source: &str) -> Result<Self> {
        let url = Url::parse(source).context("parse stub url")?;
        if url.scheme() != "stub" {
            return Err(anyhow!("expected stub:// url, got '{}'", source));
        }

        let mut total_frames = DEFAULT_FRAMES;
        let mut fps = DEFAULT_FPS;
        let mut width = DEFAULT_WIDTH;
        let mut height = DEFAULT_HEIGHT;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "frames" => total_frames = value.parse().context("parse frames parameter")?,
                "fps" => fps = value.parse().context("parse fps parameter")?,
                "width" => width = value.parse().context("parse width parameter")?,
                "height" => height = value.parse().context("parse height parameter")?,
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }
        if fps == 0 || width < SQUARE_SIDE * 2 || height < SQUARE_SIDE * 2 {
            return Err(anyhow!("stub source too small or fps is zero"));
        }

        Ok(Self {
            url: source.to_string(),
            total_frames,
            fps,
            width,
            height,
            next_index: 0,
            started_at: None,
        })
    }

    /// The square is visible during two windows so a run produces at least
    /// two distinct motion events.
    fn square_origin(&self, index: u64) -> Option<(u32, u32)> {
        let visible = (40..=52).contains(&index) || (90..=102).contains(&index);
        if !visible {
            return None;
        }
        let step = (index % 40) as u32 * 4;
        let x = step % (self.width - SQUARE_SIDE);
        let y = self.height / 3;
        Some((x, y))
    }

    fn render(&self, index: u64) -> Vec<u8> {
        let mut pixels = vec![0u8; (self.width * self.height * 3) as usize];
        // Static vertical gradient background.
        for y in 0..self.height {
            let shade = (y * 96 / self.height) as u8 + 16;
            for x in 0..self.width {
                let i = ((y * self.width + x) * 3) as usize;
                pixels[i] = shade;
                pixels[i + 1] = shade;
                pixels[i + 2] = shade;
            }
        }
        if let Some((ox, oy)) = self.square_origin(index) {
            for y in oy..oy + SQUARE_SIDE {
                for x in ox..ox + SQUARE_SIDE {
                    let i = ((y * self.width + x) * 3) as usize;
                    pixels[i] = 250;
                    pixels[i + 1] = 250;
                    pixels[i + 2] = 250;
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<StreamInfo> {
        self.started_at = Some(Local::now());
        log::info!(
            "SyntheticSource: {} frames at {} fps, {}x{}",
            self.total_frames,
            self.fps,
            self.width,
            self.height
        );
        Ok(StreamInfo {
            fps: self.fps as f64,
            width: self.width,
            height: self.height,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let started_at = self
            .started_at
            .ok_or_else(|| anyhow!("stub source not connected; call connect() first"))?;
        if self.next_index >= self.total_frames {
            return Ok(None);
        }

        let index = self.next_index;
        self.next_index += 1;
        let offset_ms = (index as i64) * 1000 / (self.fps as i64);
        let timestamp = started_at + ChronoDuration::milliseconds(offset_ms);
        Ok(Some(Frame::new(
            self.render(index),
            self.width,
            self.height,
            timestamp,
        )))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.next_index,
            source: self.url.clone(),
        }
    }
}
