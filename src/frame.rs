//! Frames, region of interest, and the pre-roll sliding window.
//!
//! - `Frame`: immutable RGB24 pixel grid tagged with a capture timestamp.
//! - `Roi`: the sub-rectangle of each frame used for motion comparison and
//!   classification, fixed for the lifetime of a run.
//! - `SlidingWindow`: bounded FIFO of the most recent frames, used only to
//!   seed a clip's pre-roll.
//!
//! Pixel data is shared (`Arc`): the sliding window and a pending clip may
//! both hold the same frame, so cloning a `Frame` never copies pixels.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::Arc;

/// One captured video frame. RGB24, row-major, no padding.
#[derive(Clone)]
pub struct Frame {
    pixels: Arc<[u8]>,
    width: u32,
    height: u32,
    timestamp: DateTime<Local>,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, timestamp: DateTime<Local>) -> Self {
        debug_assert_eq!(pixels.len(), (width as usize) * (height as usize) * 3);
        Self {
            pixels: pixels.into(),
            width,
            height,
            timestamp,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn timestamp(&self) -> DateTime<Local> {
        self.timestamp
    }

    /// Capture time as seconds since the epoch.
    pub fn epoch_secs(&self) -> i64 {
        self.timestamp.timestamp()
    }

    /// Capture time formatted for overlays and records.
    pub fn timestamp_text(&self) -> String {
        self.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Owned copy as an `RgbImage`, for annotation and encoding.
    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_raw(self.width, self.height, self.pixels.to_vec())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Grayscale of the ROI sub-rectangle, row-major, one byte per pixel.
    ///
    /// This is what the motion detector and classifier backends consume.
    pub fn roi_gray(&self, roi: &Roi) -> Vec<u8> {
        let mut out = Vec::with_capacity((roi.width() as usize) * (roi.height() as usize));
        for y in roi.top..roi.bottom {
            let row = (y as usize) * (self.width as usize) * 3;
            for x in roi.left..roi.right {
                let i = row + (x as usize) * 3;
                let r = self.pixels[i] as u32;
                let g = self.pixels[i + 1] as u32;
                let b = self.pixels[i + 2] as u32;
                // ITU-R BT.601 luma, integer arithmetic.
                out.push(((r * 299 + g * 587 + b * 114) / 1000) as u8);
            }
        }
        out
    }

    /// RGB crop of the ROI sub-rectangle.
    pub fn roi_rgb(&self, roi: &Roi) -> RgbImage {
        let mut out = RgbImage::new(roi.width(), roi.height());
        for y in roi.top..roi.bottom {
            let row = (y as usize) * (self.width as usize) * 3;
            for x in roi.left..roi.right {
                let i = row + (x as usize) * 3;
                out.put_pixel(
                    x - roi.left,
                    y - roi.top,
                    image::Rgb([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]),
                );
            }
        }
        out
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp", &self.timestamp_text())
            .finish()
    }
}

/// Region of interest in pixel offsets.
///
/// Invariant: `0 <= top < bottom <= height`, `0 <= left < right <= width`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Roi {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl Roi {
    /// Build a ROI from fractional offsets and the source dimensions.
    pub fn from_fractions(
        top: f64,
        bottom: f64,
        left: f64,
        right: f64,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let roi = Self {
            top: (top * height as f64) as u32,
            bottom: (bottom * height as f64) as u32,
            left: (left * width as f64) as u32,
            right: (right * width as f64) as u32,
        };
        roi.validate(width, height)?;
        Ok(roi)
    }

    fn validate(&self, width: u32, height: u32) -> Result<()> {
        if self.top >= self.bottom || self.bottom > height {
            return Err(anyhow!(
                "invalid roi rows: top={} bottom={} height={}",
                self.top,
                self.bottom,
                height
            ));
        }
        if self.left >= self.right || self.right > width {
            return Err(anyhow!(
                "invalid roi columns: left={} right={} width={}",
                self.left,
                self.right,
                width
            ));
        }
        Ok(())
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }
}

/// Bounded FIFO of the most recent raw frames.
///
/// Advances on every incoming frame regardless of segmenter state; its only
/// consumer is pre-roll seeding when an event opens.
pub struct SlidingWindow {
    frames: VecDeque<Frame>,
    capacity: usize,
}

impl SlidingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a frame, evicting the oldest when at capacity.
    pub fn push(&mut self, frame: Frame) {
        if self.capacity == 0 {
            return;
        }
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Up to `n` most recent frames, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &Frame> {
        let skip = self.frames.len().saturating_sub(n);
        self.frames.iter().skip(skip)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame_at(n: i64, width: u32, height: u32, fill: u8) -> Frame {
        let ts = Local.timestamp_opt(1_700_000_000 + n, 0).unwrap();
        Frame::new(vec![fill; (width * height * 3) as usize], width, height, ts)
    }

    #[test]
    fn roi_from_fractions_matches_source_offsets() {
        let roi = Roi::from_fractions(0.25, 1.0, 0.3, 0.7, 640, 480).unwrap();
        assert_eq!(roi.top, 120);
        assert_eq!(roi.bottom, 480);
        assert_eq!(roi.left, 192);
        assert_eq!(roi.right, 448);
        assert_eq!(roi.width(), 256);
        assert_eq!(roi.height(), 360);
    }

    #[test]
    fn roi_rejects_inverted_bounds() {
        assert!(Roi::from_fractions(0.8, 0.2, 0.0, 1.0, 640, 480).is_err());
        assert!(Roi::from_fractions(0.0, 1.0, 0.5, 0.5, 640, 480).is_err());
    }

    #[test]
    fn roi_gray_extracts_sub_rectangle() {
        let mut pixels = vec![0u8; 4 * 4 * 3];
        // One white pixel at (x=2, y=1).
        let i = (4 + 2) * 3;
        pixels[i] = 255;
        pixels[i + 1] = 255;
        pixels[i + 2] = 255;
        let ts = Local.timestamp_opt(1_700_000_000, 0).unwrap();
        let frame = Frame::new(pixels, 4, 4, ts);

        let roi = Roi {
            top: 1,
            bottom: 3,
            left: 1,
            right: 4,
        };
        let gray = frame.roi_gray(&roi);
        assert_eq!(gray.len(), 6);
        assert_eq!(gray[1], 255);
        assert_eq!(gray.iter().filter(|&&p| p == 0).count(), 5);
    }

    #[test]
    fn sliding_window_evicts_oldest() {
        let mut window = SlidingWindow::new(3);
        for n in 0..5 {
            window.push(frame_at(n, 2, 2, n as u8));
        }
        assert_eq!(window.len(), 3);
        let fills: Vec<u8> = window.tail(3).map(|f| f.pixels()[0]).collect();
        assert_eq!(fills, vec![2, 3, 4]);
    }

    #[test]
    fn tail_returns_most_recent_in_order() {
        let mut window = SlidingWindow::new(4);
        for n in 0..4 {
            window.push(frame_at(n, 2, 2, n as u8));
        }
        let fills: Vec<u8> = window.tail(2).map(|f| f.pixels()[0]).collect();
        assert_eq!(fills, vec![2, 3]);
        // Asking for more than present returns everything.
        assert_eq!(window.tail(10).count(), 4);
    }
}
