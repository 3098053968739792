//! Frame ownership layer.
//!
//! - `Frame`: owned RGB24 pixel buffer captured by a `FrameSource`. One frame per
//!   loop iteration; it is dropped (released) when the iteration ends.
//! - `CropBuffer`: single fixed-size buffer reused for every crop emission.
//! - `extract_crop`: pixel copy from a frame into the crop buffer.
//!
//! Frames are never cloned by the loop. Consumers borrow them for the duration of
//! the iteration that captured them.

use anyhow::{anyhow, Result};
use std::time::Instant;

use crate::roi::Roi;

/// Bytes per pixel. All frames are normalized to packed RGB24 at ingest.
pub const BYTES_PER_PIXEL: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Owned RGB24 frame. Deliberately not `Clone`.
pub struct Frame {
    data: Vec<u8>,

    /// Dimensions bound at capture time.
    pub width: u32,
    pub height: u32,

    captured_at: Instant,
}

impl Frame {
    /// Wrap packed RGB24 pixels. Fails if the buffer length disagrees with the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            captured_at: Instant::now(),
        })
    }

    /// Read-only pixel access for detectors, crop extraction and outputs.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Milliseconds since capture.
    pub fn age_ms(&self) -> u128 {
        self.captured_at.elapsed().as_millis()
    }

    /// RGB value at (x, y), or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }
}

// ----------------------------------------------------------------------------
// CropBuffer
// ----------------------------------------------------------------------------

/// Fixed-size crop destination, allocated once and owned by the control loop.
///
/// Written by `extract_crop`, then rendered synchronously before the next crop, so a
/// single buffer is enough.
pub struct CropBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// Frame index of the last crop written into this buffer.
    source_frame: Option<u64>,
}

impl CropBuffer {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("crop dimensions must be non-zero"));
        }
        Ok(Self {
            data: vec![0u8; rgb_len(width, height)?],
            width,
            height,
            source_frame: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn source_frame(&self) -> Option<u64> {
        self.source_frame
    }
}

/// Copy the pixels under `roi` from `frame` into `dest`.
///
/// The ROI must have exactly the buffer's dimensions and lie inside the frame. The
/// policy engine guarantees both; violations are reported as errors rather than
/// producing a partial crop.
pub fn extract_crop(
    frame: &Frame,
    roi: &Roi,
    frame_index: u64,
    dest: &mut CropBuffer,
) -> Result<()> {
    if roi.width != dest.width || roi.height != dest.height {
        return Err(anyhow!(
            "roi {}x{} does not match crop buffer {}x{}",
            roi.width,
            roi.height,
            dest.width,
            dest.height
        ));
    }
    if !roi.fits_within(frame.width, frame.height) {
        return Err(anyhow!(
            "roi {:?} exceeds frame bounds {}x{}",
            roi,
            frame.width,
            frame.height
        ));
    }

    let src_stride = frame.width as usize * BYTES_PER_PIXEL;
    let row_bytes = roi.width as usize * BYTES_PER_PIXEL;
    let x_offset = roi.x as usize * BYTES_PER_PIXEL;

    for (row, dest_row) in dest.data.chunks_exact_mut(row_bytes).enumerate() {
        let start = (roi.y as usize + row) * src_stride + x_offset;
        dest_row.copy_from_slice(&frame.data[start..start + row_bytes]);
    }
    dest.source_frame = Some(frame_index);
    Ok(())
}

fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(BYTES_PER_PIXEL))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
