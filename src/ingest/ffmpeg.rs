//! FFmpeg-backed source for local video files and `rtsp://` streams.
//!
//! Frames are decoded in-memory and converted to packed RGB24. End of file (or a
//! closed stream) marks the source not-live so the loop can stop cleanly.

use anyhow::{Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::{Duration, Instant};

use super::{Capture, FrameSource, SourceStats};
use crate::config::InputSettings;
use crate::frame::{Frame, BYTES_PER_PIXEL};

pub(crate) struct FfmpegSource {
    settings: InputSettings,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    connected_at: Option<Instant>,
    eof_sent: bool,
    ended: bool,
}

impl FfmpegSource {
    pub(crate) fn new(settings: InputSettings) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&settings.uri)
            .with_context(|| format!("failed to open input '{}' with ffmpeg", settings.uri))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow::anyhow!("input has no video track"))?;
        let stream_index = input_stream.index();
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
            settings,
            input,
            stream_index,
            decoder,
            scaler,
            frame_count: 0,
            connected_at: None,
            eof_sent: false,
            ended: false,
        })
    }
}

impl FrameSource for FfmpegSource {
    fn connect(&mut self) -> Result<()> {
        self.connected_at = Some(Instant::now());
        log::info!(
            "FfmpegSource: connected to {} ({}x{})",
            self.settings.uri,
            self.decoder.width(),
            self.decoder.height()
        );
        Ok(())
    }

    fn capture(&mut self, timeout: Duration) -> Result<Capture> {
        if self.ended {
            return Ok(Capture::Timeout);
        }
        let started = Instant::now();
        let mut decoded = ffmpeg::frame::Video::empty();

        loop {
            // Drain frames the decoder already holds before feeding more packets.
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                let mut rgb_frame = ffmpeg::frame::Video::empty();
                self.scaler
                    .run(&decoded, &mut rgb_frame)
                    .context("scale frame to RGB")?;
                let (pixels, width, height) = frame_to_pixels(&rgb_frame)?;
                self.frame_count += 1;
                return Ok(Capture::Frame(Frame::new(pixels, width, height)?));
            }

            if self.eof_sent {
                log::info!(
                    "FfmpegSource: end of stream after {} frames",
                    self.frame_count
                );
                self.ended = true;
                return Ok(Capture::Timeout);
            }

            if started.elapsed() >= timeout {
                return Ok(Capture::Timeout);
            }

            let mut fed = false;
            for (stream, packet) in self.input.packets() {
                if stream.index() != self.stream_index {
                    continue;
                }
                self.decoder
                    .send_packet(&packet)
                    .context("send packet to ffmpeg decoder")?;
                fed = true;
                break;
            }
            if !fed {
                self.decoder.send_eof().context("flush ffmpeg decoder")?;
                self.eof_sent = true;
            }
        }
    }

    fn is_live(&self) -> bool {
        !self.ended
    }

    fn frame_width(&self) -> u32 {
        self.decoder.width()
    }

    fn frame_height(&self) -> u32 {
        self.decoder.height()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.settings.uri.clone(),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.ended = true;
        if let Some(connected_at) = self.connected_at {
            log::info!(
                "FfmpegSource: closed {} after {:.1}s",
                self.settings.uri,
                connected_at.elapsed().as_secs_f64()
            );
        }
        Ok(())
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * BYTES_PER_PIXEL;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let pixels = data
            .get(..row_bytes * height as usize)
            .context("ffmpeg frame is shorter than its dimensions")?;
        return Ok((pixels.to_vec(), width, height));
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
