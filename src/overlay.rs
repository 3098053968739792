//! Display-only detection overlays.
//!
//! Overlays are drawn by frame outputs onto their own copy of the pixels. The captured
//! frame is never modified, so crops never contain overlay pixels.

use anyhow::{anyhow, Result};

use crate::detect::Detection;
use crate::frame::BYTES_PER_PIXEL;

const LINE_THICKNESS: u32 = 2;
const BOX_COLOR: [u8; 3] = [0, 255, 128];

/// Which annotations a frame output draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OverlayFlags {
    /// Translucent filled box.
    pub boxes: bool,
    /// Box outline.
    pub lines: bool,
    pub labels: bool,
    pub confidence: bool,
}

impl OverlayFlags {
    pub const NONE: OverlayFlags = OverlayFlags {
        boxes: false,
        lines: false,
        labels: false,
        confidence: false,
    };

    /// Parse a comma-separated list such as `"box,labels,conf"`.
    ///
    /// Recognized tokens: `box`, `lines`, `labels`, `conf`, `none`. `none` clears the
    /// flags set so far.
    pub fn parse(value: &str) -> Result<Self> {
        let mut flags = Self::NONE;
        for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token.to_ascii_lowercase().as_str() {
                "box" => flags.boxes = true,
                "lines" => flags.lines = true,
                "labels" => flags.labels = true,
                "conf" => flags.confidence = true,
                "none" => flags = Self::NONE,
                other => return Err(anyhow!("unknown overlay flag '{}'", other)),
            }
        }
        Ok(flags)
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::NONE
    }

    pub fn draws_shapes(&self) -> bool {
        self.boxes || self.lines
    }
}

impl Default for OverlayFlags {
    fn default() -> Self {
        Self {
            boxes: true,
            lines: false,
            labels: true,
            confidence: true,
        }
    }
}

/// Detections to annotate on one rendered frame.
#[derive(Clone, Copy, Debug)]
pub struct Overlay<'a> {
    pub detections: &'a [Detection],
    pub flags: OverlayFlags,
}

impl<'a> Overlay<'a> {
    pub fn new(detections: &'a [Detection], flags: OverlayFlags) -> Self {
        Self { detections, flags }
    }

    pub fn empty() -> Overlay<'static> {
        Overlay {
            detections: &[],
            flags: OverlayFlags::NONE,
        }
    }

    /// Text caption for a detection, per the label/confidence flags.
    pub fn caption(&self, detection: &Detection) -> Option<String> {
        match (self.flags.labels, self.flags.confidence) {
            (true, true) => Some(format!(
                "{} {:.1}%",
                detection.label,
                detection.confidence * 100.0
            )),
            (true, false) => Some(detection.label.clone()),
            (false, true) => Some(format!("{:.1}%", detection.confidence * 100.0)),
            (false, false) => None,
        }
    }

    /// Draw box fills and outlines onto a packed RGB24 buffer.
    pub fn draw(&self, pixels: &mut [u8], width: u32, height: u32) {
        if !self.flags.draws_shapes() || width == 0 || height == 0 {
            return;
        }
        for detection in self.detections {
            let Some((x0, y0, x1, y1)) = pixel_rect(detection, width, height) else {
                continue;
            };
            if self.flags.boxes {
                for y in y0..y1 {
                    for x in x0..x1 {
                        blend(pixels, width, x, y);
                    }
                }
            }
            if self.flags.lines {
                for y in y0..y1 {
                    for x in x0..x1 {
                        let on_edge = x < x0 + LINE_THICKNESS
                            || x + LINE_THICKNESS >= x1
                            || y < y0 + LINE_THICKNESS
                            || y + LINE_THICKNESS >= y1;
                        if on_edge {
                            put(pixels, width, x, y, BOX_COLOR);
                        }
                    }
                }
            }
        }
    }
}

/// Detection box clipped to the frame, as `[x0, x1) x [y0, y1)`.
fn pixel_rect(detection: &Detection, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
    let clip = |v: f32, max: u32| v.max(0.0).min(max as f32) as u32;
    let x0 = clip(detection.bbox.left, width);
    let y0 = clip(detection.bbox.top, height);
    let x1 = clip(detection.bbox.right, width);
    let y1 = clip(detection.bbox.bottom, height);
    (x1 > x0 && y1 > y0).then_some((x0, y0, x1, y1))
}

fn offset(width: u32, x: u32, y: u32) -> usize {
    (y as usize * width as usize + x as usize) * BYTES_PER_PIXEL
}

fn put(pixels: &mut [u8], width: u32, x: u32, y: u32, color: [u8; 3]) {
    let o = offset(width, x, y);
    if let Some(px) = pixels.get_mut(o..o + BYTES_PER_PIXEL) {
        px.copy_from_slice(&color);
    }
}

fn blend(pixels: &mut [u8], width: u32, x: u32, y: u32) {
    let o = offset(width, x, y);
    if let Some(px) = pixels.get_mut(o..o + BYTES_PER_PIXEL) {
        for (channel, tint) in px.iter_mut().zip(BOX_COLOR) {
            *channel = ((u16::from(*channel) + u16::from(tint)) / 2) as u8;
        }
    }
}
