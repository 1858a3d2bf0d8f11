//! Video file source backed by FFmpeg.
//!
//! Decodes the best video track, converts to RGB24 and synthesizes capture
//! timestamps from the stream's frame rate so clips from recorded footage
//! line up the same way as live ones.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;

use chrono::{DateTime, Duration as ChronoDuration, Local};

use super::{FrameSource, SourceStats, StreamInfo};
use crate::frame::Frame;

pub struct FfmpegFileSource {
    path: String,
    target_fps: u32,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    fps: f64,
    frame_count: u64,
    started_at: Option<DateTime<Local>>,
    drained: bool,
}

impl FfmpegFileSource {
    pub fn new(path: &str, target_fps: u32) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&path)
            .with_context(|| format!("open video file '{}' with ffmpeg", path))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("file has no video track"))?;
        let stream_index = input_stream.index();
        let rate = input_stream.avg_frame_rate();
        let fps = if rate.denominator() > 0 && rate.numerator() > 0 {
            rate.numerator() as f64 / rate.denominator() as f64
        } else {
            target_fps as f64
        };

        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            path: path.to_string(),
            target_fps,
            input,
            stream_index,
            decoder,
            scaler,
            fps,
            frame_count: 0,
            started_at: None,
            drained: false,
        })
    }

    fn emit(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Frame> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb_frame)
            .context("scale frame to RGB")?;
        let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;

        let started_at = self
            .started_at
            .ok_or_else(|| anyhow!("file source not connected; call connect() first"))?;
        let offset_ms = (self.frame_count as f64 * 1000.0 / self.fps) as i64;
        self.frame_count += 1;
        Ok(Frame::new(
            pixels,
            width,
            height,
            started_at + ChronoDuration::milliseconds(offset_ms),
        ))
    }
}

impl FrameSource for FfmpegFileSource {
    fn connect(&mut self) -> Result<StreamInfo> {
        self.started_at = Some(Local::now());
        log::info!(
            "FfmpegFileSource: {} at {:.1} fps (target {} fps)",
            self.path,
            self.fps,
            self.target_fps
        );
        Ok(StreamInfo {
            fps: self.fps,
            width: self.decoder.width(),
            height: self.decoder.height(),
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.emit(&decoded).map(Some);
            }
            if self.drained {
                return Ok(None);
            }

            let next_packet = {
                let stream_index = self.stream_index;
                self.input
                    .packets()
                    .find(|(stream, _)| stream.index() == stream_index)
                    .map(|(_, packet)| packet)
            };
            match next_packet {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?,
                None => {
                    // Packets exhausted; flush the decoder once, then the
                    // receive loop above reports end of stream.
                    self.drained = true;
                    self.decoder
                        .send_eof()
                        .context("flush ffmpeg decoder at end of file")?;
                }
            }
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_read: self.frame_count,
            source: self.path.clone(),
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        return Ok((data.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
