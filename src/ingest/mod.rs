//! Frame sources.
//!
//! All sources produce `Frame`s for the pipeline and signal end of stream
//! with `Ok(None)`: running out of input is normal termination, not an
//! error. Stream properties (frame rate, dimensions) are reported once at
//! connect time.
//!
//! - `stub://`: synthetic scripted scene (tests, demos)
//! - `http(s)://`: MJPEG streams and JPEG snapshot endpoints
//! - local paths: video files via FFmpeg (feature: ingest-file-ffmpeg)

#[cfg(feature = "ingest-file-ffmpeg")]
mod file_ffmpeg;
mod mjpeg;
mod synthetic;

use anyhow::{anyhow, Result};

use crate::frame::Frame;

#[cfg(feature = "ingest-file-ffmpeg")]
pub use file_ffmpeg::FfmpegFileSource;
pub use mjpeg::HttpMjpegSource;
pub use synthetic::SyntheticSource;

/// Stream properties, queried once at startup.
#[derive(Clone, Copy, Debug)]
pub struct StreamInfo {
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

/// Ingest statistics for health logging.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_read: u64,
    pub source: String,
}

/// A sequential frame source.
pub trait FrameSource {
    /// Establish the stream and report its properties.
    fn connect(&mut self) -> Result<StreamInfo>;

    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats;
}

/// Select a source implementation from the configured URL or path.
pub fn open_source(source: &str, target_fps: u32) -> Result<Box<dyn FrameSource>> {
    if source.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(source)?));
    }
    if source.starts_with("http://") || source.starts_with("https://") {
        return Ok(Box::new(HttpMjpegSource::new(source, target_fps)?));
    }
    if source.contains("://") {
        return Err(anyhow!(
            "unsupported source scheme in '{}'; expected stub://, http(s)://, or a local path",
            source
        ));
    }
    #[cfg(feature = "ingest-file-ffmpeg")]
    {
        Ok(Box::new(FfmpegFileSource::new(source, target_fps)?))
    }
    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    {
        Err(anyhow!(
            "local file sources require the ingest-file-ffmpeg feature"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_scheme() {
        assert!(open_source("rtmp://cam/live", 5).is_err());
    }

    #[test]
    fn opens_stub_source() {
        assert!(open_source("stub://trail?frames=10", 5).is_ok());
    }
}
