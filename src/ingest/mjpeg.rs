//! HTTP camera source.
//!
//! Supports both MJPEG multipart streams and plain JPEG snapshot endpoints;
//! the variant is detected from the Content-Type at connect time. MJPEG
//! streams carry no frame-rate metadata, so the configured target rate is
//! reported and enforced by decimation.

use anyhow::{anyhow, Context, Result};
use std::io::Read;
use std::time::{Duration, Instant};

use chrono::Local;
use image::GenericImageView;
use url::Url;

use super::{FrameSource, SourceStats, StreamInfo};
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

pub struct HttpMjpegSource {
    url: String,
    target_fps: u32,
    stream: Option<HttpStream>,
    /// First decoded frame, held back from connect() for the first
    /// next_frame() call.
    pending: Option<Frame>,
    /// Dimensions pinned by the first frame; the ROI is derived from them,
    /// so a mid-stream resolution change must not get past decode.
    dimensions: Option<(u32, u32)>,
    last_frame_at: Option<Instant>,
    connected_at: Option<Instant>,
    frame_count: u64,
    ended: bool,
}

enum HttpStream {
    Mjpeg(MjpegStream),
    SingleJpeg,
}

impl HttpMjpegSource {
    pub fn new(source: &str, target_fps: u32) -> Result<Self> {
        let url = Url::parse(source).context("parse camera url")?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(anyhow!("expected http(s) camera url, got '{}'", source));
        }
        Ok(Self {
            url: source.to_string(),
            target_fps,
            stream: None,
            pending: None,
            dimensions: None,
            last_frame_at: None,
            connected_at: None,
            frame_count: 0,
            ended: false,
        })
    }

    fn read_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("camera source not connected; call connect() first"))?;
        match stream {
            HttpStream::Mjpeg(stream) => stream.read_next_jpeg(),
            HttpStream::SingleJpeg => fetch_single_jpeg(&self.url).map(Some),
        }
    }

    fn decode(&mut self, jpeg_bytes: &[u8]) -> Result<Frame> {
        let image = image::load_from_memory(jpeg_bytes).context("decode jpeg frame")?;
        let (width, height) = image.dimensions();
        match self.dimensions {
            None => self.dimensions = Some((width, height)),
            Some((expected_w, expected_h)) if (expected_w, expected_h) != (width, height) => {
                return Err(anyhow!(
                    "camera frame size changed mid-stream: {}x{} then {}x{}",
                    expected_w,
                    expected_h,
                    width,
                    height
                ));
            }
            Some(_) => {}
        }
        let rgb = image.into_rgb8();
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Frame::new(rgb.into_raw(), width, height, Local::now()))
    }
}

impl FrameSource for HttpMjpegSource {
    fn connect(&mut self) -> Result<StreamInfo> {
        let response = ureq::get(&self.url)
            .call()
            .context("connect to camera http stream")?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            let reader = response.into_reader();
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(reader)));
        } else {
            self.stream = Some(HttpStream::SingleJpeg);
        }
        self.connected_at = Some(Instant::now());

        // Dimensions come from the first frame; hold it for next_frame().
        let jpeg_bytes = self
            .read_jpeg()?
            .ok_or_else(|| anyhow!("camera stream ended before the first frame"))?;
        let frame = self.decode(&jpeg_bytes)?;
        let info = StreamInfo {
            fps: self.target_fps as f64,
            width: frame.width(),
            height: frame.height(),
        };
        self.pending = Some(frame);
        log::info!(
            "HttpMjpegSource: connected to {} ({}x{})",
            self.url,
            info.width,
            info.height
        );
        Ok(info)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Ok(Some(frame));
        }
        if self.ended {
            return Ok(None);
        }

        let min_interval = frame_interval(self.target_fps);
        loop {
            let jpeg_bytes = match self.read_jpeg()? {
                Some(bytes) => bytes,
                None => {
                    self.ended = true;
                    return Ok(None);
                }
            };

            // Decimate to the target rate; snapshot endpoints are paced
            // instead of hammered.
            if let Some(last) = self.last_frame_at {
                let since = last.elapsed();
                if since < min_interval {
                    if matches!(self.stream, Some(HttpStream::SingleJpeg)) {
                        std::thread::sleep(min_interval - since);
                    } else {
                        continue;
                    }
                }
            }

            return self.decode(&jpeg_bytes).map(Some);
        }
    }

    fn is_healthy(&self) -> bool {
        if self.ended {
            return false;
        }
        let Some(connected_at) = self.connected_at else {
            return false;
        };
        let Some(last_frame_at) = self.last_frame_at else {
            return connected_at.elapsed() <= Duration::from_secs(5);
        };
        last_frame_at.elapsed() <= health_grace(self.target_fps)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frame_count,
            source: self.url.clone(),
        }
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    /// Next complete JPEG, or `None` when the stream has closed.
    fn read_next_jpeg(&mut self) -> Result<Option<Vec<u8>>> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(Some(frame));
            }

            let read = self.reader.read(&mut chunk).context("read mjpeg chunk")?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let keep = 2.min(self.buffer.len());
                let drain_len = self.buffer.len() - keep;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn fetch_single_jpeg(url: &str) -> Result<Vec<u8>> {
    let response = ureq::get(url)
        .call()
        .with_context(|| format!("fetch jpeg snapshot from {}", url))?;
    let mut bytes = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut bytes)
        .context("read jpeg snapshot")?;
    if bytes.is_empty() {
        return Err(anyhow!("empty jpeg snapshot"));
    }
    Ok(bytes)
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut start = None;
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i] == 0xFF && buffer[i + 1] == 0xD8 {
            start = Some(i);
            break;
        }
        i += 1;
    }
    let start = start?;
    let mut j = start + 2;
    while j + 1 < buffer.len() {
        if buffer[j] == 0xFF && buffer[j + 1] == 0xD9 {
            return Some((start, j + 2));
        }
        j += 1;
    }
    None
}

fn frame_interval(target_fps: u32) -> Duration {
    if target_fps == 0 {
        Duration::from_millis(0)
    } else {
        Duration::from_millis((1000 / target_fps).max(1) as u64)
    }
}

fn health_grace(target_fps: u32) -> Duration {
    let base_ms = if target_fps == 0 {
        2_000
    } else {
        (1000 / target_fps).saturating_mul(6)
    };
    Duration::from_millis(base_ms.max(2_000) as u64)
}
