//! Frame ingestion sources.
//!
//! This module provides the sources the control loop pulls frames from:
//! - Synthetic scenes (`stub://<name>`) for tests and demos
//! - Local video files and `rtsp://` streams (feature: ingest-ffmpeg)
//!
//! Every source hands out owned RGB24 `Frame`s, one per capture call, and reports
//! liveness so the loop can tell a stalled stream from an ended one.

#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod ffmpeg;
pub mod synthetic;

use anyhow::Result;
use std::time::Duration;

use crate::config::InputSettings;
use crate::frame::Frame;

pub use synthetic::SyntheticSource;

/// Result of one bounded capture call.
pub enum Capture {
    Frame(Frame),
    /// No frame within the timeout. Check `is_live` to tell a stall from end-of-stream.
    Timeout,
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub uri: String,
}

/// A video source the control loop captures from.
pub trait FrameSource {
    /// Prepare the source. Called once before the first capture.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Block for at most `timeout` waiting for the next frame.
    ///
    /// `Err` is a transient capture failure; the loop logs it and tries again.
    fn capture(&mut self, timeout: Duration) -> Result<Capture>;

    /// False once the stream has ended or failed permanently.
    fn is_live(&self) -> bool;

    fn frame_width(&self) -> u32;

    fn frame_height(&self) -> u32;

    fn stats(&self) -> SourceStats;

    /// Release the source. Called once when the loop drains.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source selected from an input URI.
pub struct VideoSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(ffmpeg::FfmpegSource),
}

impl VideoSource {
    pub fn open(settings: &InputSettings) -> Result<Self> {
        if settings.uri.starts_with("stub://") {
            Ok(Self {
                backend: SourceBackend::Synthetic(SyntheticSource::new(settings.clone())?),
            })
        } else {
            #[cfg(feature = "ingest-ffmpeg")]
            {
                Ok(Self {
                    backend: SourceBackend::Ffmpeg(ffmpeg::FfmpegSource::new(settings.clone())?),
                })
            }
            #[cfg(not(feature = "ingest-ffmpeg"))]
            {
                anyhow::bail!(
                    "input '{}' requires the ingest-ffmpeg feature (only stub:// is built in)",
                    settings.uri
                )
            }
        }
    }
}

impl FrameSource for VideoSource {
    fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.connect(),
        }
    }

    fn capture(&mut self, timeout: Duration) -> Result<Capture> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.capture(timeout),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.capture(timeout),
        }
    }

    fn is_live(&self) -> bool {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.is_live(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.is_live(),
        }
    }

    fn frame_width(&self) -> u32 {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.frame_width(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.frame_width(),
        }
    }

    fn frame_height(&self) -> u32 {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.frame_height(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.frame_height(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.stats(),
        }
    }

    fn close(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-ffmpeg")]
            SourceBackend::Ffmpeg(source) => source.close(),
        }
    }
}
