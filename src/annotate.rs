//! Detection overlays and media output.
//!
//! Positive detections get a timestamp and probability overlay drawn onto
//! the triggering frame, written as a timestamp-named PNG in the configured
//! output directory. A parallel "public" URL (same name, different base)
//! is produced for the dashboard. Video recording is optional and
//! feature-gated (`record-video`).

use std::path::{Path, PathBuf};

use ab_glyph::{Font, FontVec, PxScale, ScaleFont};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::frame::Frame;

/// Character-count cutoff: longer strings render at the smaller scale.
const LABEL_SCALE_CUTOFF: usize = 30;
const LABEL_SCALE_LARGE: f32 = 32.0;
const LABEL_SCALE_SMALL: f32 = 20.0;
const LABEL_MARGIN: i32 = 20;

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Draws overlays and writes detection media.
pub struct Annotator {
    out_dir: PathBuf,
    public_base: String,
    font: Option<FontVec>,
}

impl Annotator {
    /// `font_path` is optional: without a font, labels degrade to the
    /// filled background rectangle alone (logged once here).
    pub fn new(out_dir: impl Into<PathBuf>, public_base: &str, font_path: Option<&Path>) -> Self {
        let font = font_path.and_then(|path| match load_font(path) {
            Ok(font) => Some(font),
            Err(e) => {
                log::warn!("annotation font unavailable ({}); labels will be boxes only", e);
                None
            }
        });
        Self {
            out_dir: out_dir.into(),
            public_base: public_base.trim_end_matches('/').to_string(),
            font,
        }
    }

    /// Overlay a filled-background text label with its top-left corner at
    /// `pos`. Short strings use the larger scale, strings beyond the
    /// character cutoff the smaller one.
    pub fn draw_label(&self, img: &mut RgbImage, text: &str, pos: (i32, i32), bg: Rgb<u8>) {
        if text.is_empty() {
            return;
        }
        let scale = if text.len() > LABEL_SCALE_CUTOFF {
            PxScale::from(LABEL_SCALE_SMALL)
        } else {
            PxScale::from(LABEL_SCALE_LARGE)
        };

        let text_width = match &self.font {
            Some(font) => measured_width(font, scale, text),
            // Rough advance estimate when no font is available.
            None => text.len() as f32 * scale.x * 0.5,
        };
        let text_height = scale.y;

        let x0 = pos.0 - LABEL_MARGIN / 2;
        let y0 = pos.1 - LABEL_MARGIN / 2;
        let rect_w = (text_width as i32 + LABEL_MARGIN).max(1) as u32;
        let rect_h = (text_height as i32 + LABEL_MARGIN).max(1) as u32;
        draw_filled_rect_mut(img, Rect::at(x0, y0).of_size(rect_w, rect_h), bg);

        if let Some(font) = &self.font {
            draw_text_mut(img, TEXT_COLOR, pos.0, pos.1, scale, font, text);
        }
    }

    /// Write the annotated frame as `<epoch>.png`; returns the local path
    /// and the parallel public URL.
    pub fn write_image(&self, img: &RgbImage, epoch: i64) -> Result<(PathBuf, String)> {
        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("create output directory {}", self.out_dir.display()))?;
        let name = format!("{}.png", epoch);
        let path = self.out_dir.join(&name);
        img.save(&path)
            .with_context(|| format!("write detection image {}", path.display()))?;
        Ok((path, self.public_url(&name)))
    }

    /// Encode the clip as `<epoch>.mp4`, timestamp and probability overlays
    /// on every frame; returns the local path and the public URL.
    #[cfg(feature = "record-video")]
    pub fn write_video(
        &self,
        frames: &[Frame],
        overlays: &[String],
        epoch: i64,
        fps: f64,
    ) -> Result<(PathBuf, String)> {
        use anyhow::anyhow;

        let first = frames.first().ok_or_else(|| anyhow!("empty clip"))?;
        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("create output directory {}", self.out_dir.display()))?;
        let name = format!("{}.mp4", epoch);
        let path = self.out_dir.join(&name);

        let width = first.width();
        let mut annotated = Vec::with_capacity(frames.len());
        for (frame, overlay) in frames.iter().zip(overlays.iter()) {
            let mut img = frame.to_rgb_image();
            let center_x = (0.45 * width as f64) as i32;
            self.draw_label(&mut img, &frame.timestamp_text(), (center_x, 30), Rgb([0, 0, 0]));
            self.draw_label(&mut img, overlay, (10, 10), Rgb([0, 0, 0]));
            annotated.push(img);
        }

        video::encode_mp4(&annotated, &path, fps)
            .with_context(|| format!("encode detection video {}", path.display()))?;
        Ok((path, self.public_url(&name)))
    }

    #[cfg(not(feature = "record-video"))]
    pub fn write_video(
        &self,
        _frames: &[Frame],
        _overlays: &[String],
        _epoch: i64,
        _fps: f64,
    ) -> Result<(PathBuf, String)> {
        anyhow::bail!("built without the record-video feature")
    }

    fn public_url(&self, name: &str) -> String {
        format!("{}/{}", self.public_base, name)
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes =
        std::fs::read(path).with_context(|| format!("read font file {}", path.display()))?;
    FontVec::try_from_vec(bytes).with_context(|| format!("parse font file {}", path.display()))
}

fn measured_width(font: &FontVec, scale: PxScale, text: &str) -> f32 {
    let scaled = font.as_scaled(scale);
    text.chars()
        .map(|c| scaled.h_advance(scaled.glyph_id(c)))
        .sum()
}

#[cfg(feature = "record-video")]
mod video {
    //! MPEG-4 encoding via ffmpeg, mirroring the decode path in
    //! `ingest::file_ffmpeg` in the opposite direction.

    use anyhow::{anyhow, Context, Result};
    use ffmpeg_next as ffmpeg;
    use image::RgbImage;
    use std::path::Path;

    pub(super) fn encode_mp4(frames: &[RgbImage], path: &Path, fps: f64) -> Result<()> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let first = frames.first().ok_or_else(|| anyhow!("no frames to encode"))?;
        let (width, height) = (first.width(), first.height());
        let fps_int = fps.round().max(1.0) as i32;

        let mut output = ffmpeg::format::output(&path).context("open output container")?;
        let codec = ffmpeg::encoder::find(ffmpeg::codec::Id::MPEG4)
            .ok_or_else(|| anyhow!("mpeg4 encoder unavailable"))?;
        let mut stream = output.add_stream(codec).context("add video stream")?;

        let mut encoder = ffmpeg::codec::context::Context::new_with_codec(codec)
            .encoder()
            .video()
            .context("open mpeg4 encoder context")?;
        encoder.set_width(width);
        encoder.set_height(height);
        encoder.set_format(ffmpeg::util::format::pixel::Pixel::YUV420P);
        encoder.set_time_base(ffmpeg::Rational::new(1, fps_int));
        encoder.set_frame_rate(Some(ffmpeg::Rational::new(fps_int, 1)));
        let mut encoder = encoder.open_as(codec).context("open mpeg4 encoder")?;
        stream.set_parameters(&encoder);
        let stream_time_base = stream.time_base();

        output.write_header().context("write container header")?;

        let mut scaler = ffmpeg::software::scaling::context::Context::get(
            ffmpeg::util::format::pixel::Pixel::RGB24,
            width,
            height,
            ffmpeg::util::format::pixel::Pixel::YUV420P,
            width,
            height,
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create rgb->yuv scaler")?;

        let mut yuv = ffmpeg::frame::Video::empty();
        for (index, img) in frames.iter().enumerate() {
            let mut rgb = ffmpeg::frame::Video::new(
                ffmpeg::util::format::pixel::Pixel::RGB24,
                width,
                height,
            );
            copy_rgb_rows(img, &mut rgb);
            scaler.run(&rgb, &mut yuv).context("scale frame to YUV")?;
            yuv.set_pts(Some(index as i64));
            encoder.send_frame(&yuv).context("send frame to encoder")?;
            drain_packets(&mut encoder, &mut output, stream_time_base)?;
        }

        encoder.send_eof().context("flush encoder")?;
        drain_packets(&mut encoder, &mut output, stream_time_base)?;
        output.write_trailer().context("write container trailer")?;
        Ok(())
    }

    fn copy_rgb_rows(img: &RgbImage, frame: &mut ffmpeg::frame::Video) {
        let width = img.width() as usize;
        let stride = frame.stride(0);
        let row_bytes = width * 3;
        let src = img.as_raw();
        let dst = frame.data_mut(0);
        for row in 0..img.height() as usize {
            dst[row * stride..row * stride + row_bytes]
                .copy_from_slice(&src[row * row_bytes..(row + 1) * row_bytes]);
        }
    }

    fn drain_packets(
        encoder: &mut ffmpeg::codec::encoder::Video,
        output: &mut ffmpeg::format::context::Output,
        stream_time_base: ffmpeg::Rational,
    ) -> Result<()> {
        let encoder_time_base = encoder.time_base();
        let mut packet = ffmpeg::Packet::empty();
        while encoder.receive_packet(&mut packet).is_ok() {
            packet.set_stream(0);
            packet.rescale_ts(encoder_time_base, stream_time_base);
            packet
                .write_interleaved(output)
                .context("write encoded packet")?;
        }
        Ok(())
    }
}
