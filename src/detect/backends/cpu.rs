use anyhow::Result;

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::labels::ClassLabels;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::{Frame, BYTES_PER_PIXEL};

/// Pixels at or above this luma belong to the foreground blob.
pub const DEFAULT_LUMA_THRESHOLD: u8 = 160;

/// Only every Nth column and row is sampled.
const SAMPLE_STEP: usize = 2;

/// Fewer sampled foreground pixels than this is treated as noise.
const MIN_BLOB_SAMPLES: u64 = 4;

/// Label table used when no labels file is configured.
const DEFAULT_LABELS: [&str; 1] = ["dog"];

/// CPU backend: reports the bright foreground region of a frame as one detection.
///
/// Confidence is the blob's mean luma scaled to 0..1, so dim objects fall under the
/// policy threshold. Every blob is class 0.
pub struct CpuBackend {
    labels: ClassLabels,
    luma_threshold: u8,
}

impl CpuBackend {
    pub fn new(labels: ClassLabels) -> Self {
        Self {
            labels,
            luma_threshold: DEFAULT_LUMA_THRESHOLD,
        }
    }

    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let labels = match &settings.labels_path {
            Some(path) => ClassLabels::load(path)?,
            None => ClassLabels::from_list(DEFAULT_LABELS),
        };
        Ok(Self::new(labels))
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new(ClassLabels::from_list(DEFAULT_LABELS))
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let width = frame.width as usize;
        let pixels = frame.pixels();
        let threshold = u32::from(self.luma_threshold);

        let mut min_x = usize::MAX;
        let mut min_y = usize::MAX;
        let mut max_x = 0usize;
        let mut max_y = 0usize;
        let mut luma_sum = 0u64;
        let mut samples = 0u64;

        for y in (0..frame.height as usize).step_by(SAMPLE_STEP) {
            for x in (0..width).step_by(SAMPLE_STEP) {
                let offset = (y * width + x) * BYTES_PER_PIXEL;
                let value = luma(&pixels[offset..offset + BYTES_PER_PIXEL]);
                if value < threshold {
                    continue;
                }
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
                luma_sum += u64::from(value);
                samples += 1;
            }
        }

        if samples < MIN_BLOB_SAMPLES {
            return Ok(Vec::new());
        }

        let mean_luma = luma_sum as f32 / samples as f32;
        Ok(vec![Detection {
            class_id: 0,
            label: self.class_label(0),
            confidence: (mean_luma / 255.0).clamp(0.0, 1.0),
            bbox: BoundingBox {
                left: min_x as f32,
                top: min_y as f32,
                right: (max_x + 1) as f32,
                bottom: (max_y + 1) as f32,
            },
        }])
    }

    fn class_label(&self, class_id: u32) -> String {
        self.labels.resolve(class_id)
    }
}

/// Integer BT.601 luma.
fn luma(rgb: &[u8]) -> u32 {
    (u32::from(rgb[0]) * 299 + u32::from(rgb[1]) * 587 + u32::from(rgb[2]) * 114) / 1000
}
