#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::config::DetectorSettings;
use crate::detect::backend::DetectorBackend;
use crate::detect::labels::ClassLabels;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::{Frame, BYTES_PER_PIXEL};

/// Values per output row: left, top, right, bottom, confidence, class id.
const ROW_LEN: usize = 6;

/// Rows under this score are dropped before they reach the policy engine.
const MIN_REPORTED_CONFIDENCE: f32 = 0.05;

/// Tract-based backend for ONNX object detection.
///
/// The model takes a `1x3xHxW` f32 tensor in 0..1 and produces `[1, N, 6]` rows in
/// model-input pixels. Frames of any size are sampled (nearest neighbour) to the model
/// input and boxes are scaled back to frame pixels.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    labels: ClassLabels,
    width: u32,
    height: u32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(
        model_path: P,
        width: u32,
        height: u32,
        labels: ClassLabels,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            labels,
            width,
            height,
        })
    }

    pub fn from_settings(settings: &DetectorSettings) -> Result<Self> {
        let model_path = settings
            .model_path
            .as_ref()
            .ok_or_else(|| anyhow!("tract backend requires detector.model_path"))?;
        let labels = match &settings.labels_path {
            Some(path) => ClassLabels::load(path)?,
            None => ClassLabels::default(),
        };
        Self::new(model_path, settings.model_width, settings.model_height, labels)
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width == 0 || frame.height == 0 {
            return Err(anyhow!("cannot run inference on an empty frame"));
        }
        let pixels = frame.pixels();
        let frame_width = frame.width as usize;
        let x_scale = frame.width as f32 / self.width as f32;
        let y_scale = frame.height as f32 / self.height as f32;

        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, self.width as usize),
            |(_, channel, y, x)| {
                let src_x = ((x as f32 * x_scale) as usize).min(frame_width - 1);
                let src_y = ((y as f32 * y_scale) as usize).min(frame.height as usize - 1);
                let idx = (src_y * frame_width + src_x) * BYTES_PER_PIXEL + channel;
                pixels[idx] as f32 / 255.0
            },
        );

        Ok(input.into_tensor())
    }

    fn decode_rows(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let values: Vec<f32> = rows.iter().copied().collect();
        if values.len() % ROW_LEN != 0 {
            return Err(anyhow!(
                "model output has {} values, expected a multiple of {}",
                values.len(),
                ROW_LEN
            ));
        }

        let x_scale = frame.width as f32 / self.width as f32;
        let y_scale = frame.height as f32 / self.height as f32;

        let detections = values
            .chunks_exact(ROW_LEN)
            .filter(|row| row[4].is_finite() && row[4] >= MIN_REPORTED_CONFIDENCE)
            .map(|row| {
                let class_id = row[5].max(0.0) as u32;
                Detection {
                    class_id,
                    label: self.labels.resolve(class_id),
                    confidence: row[4].clamp(0.0, 1.0),
                    bbox: BoundingBox {
                        left: row[0] * x_scale,
                        top: row[1] * y_scale,
                        right: row[2] * x_scale,
                        bottom: row[3] * y_scale,
                    },
                }
            })
            .collect();
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode_rows(outputs, frame)
    }

    fn class_label(&self, class_id: u32) -> String {
        self.labels.resolve(class_id)
    }
}
