//! Synthetic frame source (`stub://`).
//!
//! Renders a dark gradient background with one bright square "subject" that drifts
//! around the frame and bounces off the edges. Every `APPEARANCE_FRAMES` frames the
//! subject takes a new size and brightness, so some appearances are too dim to pass
//! the default confidence threshold of the cpu backend.
//!
//! Frames are paced to `target_fps`. With `max_frames` set the stream ends after that
//! many frames and the source reports itself not-live.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use super::{Capture, FrameSource, SourceStats};
use crate::config::InputSettings;
use crate::frame::{Frame, BYTES_PER_PIXEL};

/// Frames between subject re-rolls.
const APPEARANCE_FRAMES: u64 = 90;
/// Background channel values stay below this, well under the cpu backend luma threshold.
const BACKGROUND_CEILING: u32 = 120;
const MIN_SUBJECT_SIDE: u32 = 48;
const MAX_SUBJECT_SIDE: u32 = 160;
const MIN_SUBJECT_BRIGHTNESS: u8 = 150;

pub struct SyntheticSource {
    settings: InputSettings,
    rng: StdRng,
    frame_count: u64,
    next_due: Option<Instant>,
    ended: bool,
    subject: Subject,
}

#[derive(Clone, Copy, Debug)]
struct Subject {
    x: i64,
    y: i64,
    dx: i64,
    dy: i64,
    side: u32,
    brightness: u8,
}

impl SyntheticSource {
    pub fn new(settings: InputSettings) -> Result<Self> {
        if settings.width == 0 || settings.height == 0 {
            return Err(anyhow!("synthetic source needs non-zero frame dimensions"));
        }
        let mut rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let subject = Subject::spawn(&mut rng, settings.width, settings.height);
        Ok(Self {
            settings,
            rng,
            frame_count: 0,
            next_due: None,
            ended: false,
            subject,
        })
    }

    fn frame_interval(&self) -> Option<Duration> {
        (self.settings.target_fps > 0)
            .then(|| Duration::from_secs(1) / self.settings.target_fps)
    }

    fn render(&mut self) -> Result<Frame> {
        let width = self.settings.width;
        let height = self.settings.height;

        if self.frame_count % APPEARANCE_FRAMES == 0 {
            self.subject.reroll(&mut self.rng, width, height);
        }
        self.subject.advance(width, height);

        let mut pixels = vec![0u8; width as usize * height as usize * BYTES_PER_PIXEL];
        let shift = self.frame_count as u32;
        for (i, px) in pixels.chunks_exact_mut(BYTES_PER_PIXEL).enumerate() {
            let x = (i % width as usize) as u32;
            let y = (i / width as usize) as u32;
            px[0] = ((x / 8 + shift) % BACKGROUND_CEILING) as u8;
            px[1] = ((y / 8) % BACKGROUND_CEILING) as u8;
            px[2] = (BACKGROUND_CEILING / 2) as u8;
        }

        let (x0, y0, x1, y1) = self.subject.bounds(width, height);
        let value = self.subject.brightness;
        for y in y0..y1 {
            let row = y as usize * width as usize;
            for x in x0..x1 {
                let offset = (row + x as usize) * BYTES_PER_PIXEL;
                pixels[offset..offset + BYTES_PER_PIXEL].copy_from_slice(&[value, value, value]);
            }
        }

        Frame::new(pixels, width, height)
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{} @ {} fps)",
            self.settings.uri,
            self.settings.width,
            self.settings.height,
            self.settings.target_fps
        );
        Ok(())
    }

    fn capture(&mut self, timeout: Duration) -> Result<Capture> {
        if self.ended {
            return Ok(Capture::Timeout);
        }
        if let Some(max) = self.settings.max_frames {
            if self.frame_count >= max {
                log::info!("SyntheticSource: end of stream after {} frames", max);
                self.ended = true;
                return Ok(Capture::Timeout);
            }
        }

        if let (Some(due), Some(interval)) = (self.next_due, self.frame_interval()) {
            let now = Instant::now();
            let wait = due.saturating_duration_since(now);
            if wait > timeout {
                std::thread::sleep(timeout);
                return Ok(Capture::Timeout);
            }
            std::thread::sleep(wait);
            // Fall back to "now" when the consumer is slower than the source.
            self.next_due = Some(due.max(now) + interval);
        } else {
            self.next_due = self.frame_interval().map(|interval| Instant::now() + interval);
        }

        let frame = self.render()?;
        self.frame_count += 1;
        Ok(Capture::Frame(frame))
    }

    fn is_live(&self) -> bool {
        !self.ended
    }

    fn frame_width(&self) -> u32 {
        self.settings.width
    }

    fn frame_height(&self) -> u32 {
        self.settings.height
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.settings.uri.clone(),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.ended = true;
        log::info!("SyntheticSource: closed {}", self.settings.uri);
        Ok(())
    }
}

impl Subject {
    fn spawn(rng: &mut StdRng, width: u32, height: u32) -> Self {
        let mut subject = Subject {
            x: 0,
            y: 0,
            dx: 0,
            dy: 0,
            side: MIN_SUBJECT_SIDE,
            brightness: MIN_SUBJECT_BRIGHTNESS,
        };
        subject.reroll(rng, width, height);
        subject.x = rng.gen_range(0..=i64::from(width.saturating_sub(subject.side)));
        subject.y = rng.gen_range(0..=i64::from(height.saturating_sub(subject.side)));
        subject
    }

    fn reroll(&mut self, rng: &mut StdRng, width: u32, height: u32) {
        let max_side = MAX_SUBJECT_SIDE.min(width).min(height).max(1);
        let min_side = MIN_SUBJECT_SIDE.min(max_side);
        self.side = rng.gen_range(min_side..=max_side);
        self.brightness = rng.gen_range(MIN_SUBJECT_BRIGHTNESS..=u8::MAX);
        let speed = |rng: &mut StdRng| {
            let magnitude = rng.gen_range(2..=12);
            if rng.gen_bool(0.5) {
                magnitude
            } else {
                -magnitude
            }
        };
        self.dx = speed(rng);
        self.dy = speed(rng);
    }

    fn advance(&mut self, width: u32, height: u32) {
        let max_x = i64::from(width.saturating_sub(self.side));
        let max_y = i64::from(height.saturating_sub(self.side));
        self.x += self.dx;
        self.y += self.dy;
        if self.x < 0 || self.x > max_x {
            self.dx = -self.dx;
            self.x = self.x.clamp(0, max_x);
        }
        if self.y < 0 || self.y > max_y {
            self.dy = -self.dy;
            self.y = self.y.clamp(0, max_y);
        }
    }

    /// Pixel rectangle `[x0, x1) x [y0, y1)` clipped to the frame.
    fn bounds(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x0 = self.x.clamp(0, i64::from(width)) as u32;
        let y0 = self.y.clamp(0, i64::from(height)) as u32;
        let x1 = (x0 + self.side).min(width);
        let y1 = (y0 + self.side).min(height);
        (x0, y0, x1, y1)
    }
}
