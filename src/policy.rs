//! Detection policy engine.
//!
//! Filters one frame's detections by confidence, target class and size, consults the
//! emission pacer, and picks the crop window for at most one detection per frame. The
//! first qualifying detection in detector order wins; there is no ranking.

use anyhow::{anyhow, Result};

use crate::detect::Detection;
use crate::pacer::EmissionPacer;
use crate::roi::{select_roi, Roi};

/// Immutable filtering and crop parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyConfig {
    /// Substring that must appear in a detection's class label.
    pub target_class: String,
    /// Detections at or below this confidence are ignored.
    pub min_confidence: f32,
    pub crop_width: u32,
    pub crop_height: u32,
    /// Minimum number of frames between crop emissions (exclusive).
    pub min_pacing_frames: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            target_class: "dog".to_string(),
            min_confidence: 0.70,
            crop_width: 416,
            crop_height: 416,
            min_pacing_frames: 20,
        }
    }
}

impl PolicyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.target_class.trim().is_empty() {
            return Err(anyhow!("target class must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!(
                "min confidence must be within 0..=1 (got {})",
                self.min_confidence
            ));
        }
        if self.crop_width == 0 || self.crop_height == 0 {
            return Err(anyhow!("crop dimensions must be non-zero"));
        }
        Ok(())
    }
}

/// Why a single detection was filtered out. Not an error; this is the normal path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    LowConfidence,
    ClassMismatch,
    TooLarge,
}

/// Outcome of evaluating one frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Crop `roi` around detection `detection`.
    Emit { detection: usize, roi: Roi },
    /// Detection `detection` qualified but the pacer blocked emission for this frame.
    Paced { detection: usize },
    /// Detection `detection` qualified but the frame is smaller than the crop window.
    FrameTooSmall { detection: usize },
    /// No detection qualified.
    NoMatch,
}

impl Decision {
    pub fn roi(&self) -> Option<Roi> {
        match self {
            Decision::Emit { roi, .. } => Some(*roi),
            _ => None,
        }
    }
}

pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Pacer sized for this policy's interval.
    pub fn new_pacer(&self) -> EmissionPacer {
        EmissionPacer::new(self.config.min_pacing_frames)
    }

    /// Confidence, class and size checks for a single detection.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn screen(&self, detection: &Detection) -> Result<(), Rejection> {
        // Written as a negated `>` so NaN confidences are rejected.
        if !(detection.confidence > self.config.min_confidence) {
            return Err(Rejection::LowConfidence);
        }
        if !detection.label.contains(self.config.target_class.as_str()) {
            return Err(Rejection::ClassMismatch);
        }
        // Negated for the same reason: a NaN box never fits.
        let fits = detection.width() <= self.config.crop_width as f32
            && detection.height() <= self.config.crop_height as f32;
        if !fits {
            return Err(Rejection::TooLarge);
        }
        Ok(())
    }

    /// Decide for one frame without touching pacer state.
    ///
    /// Scanning stops at the first detection that passes `screen`: pacing applies to the
    /// whole frame, so later detections could not emit either.
    pub fn decide(
        &self,
        detections: &[Detection],
        frame_index: u64,
        frame_width: u32,
        frame_height: u32,
        pacer: &EmissionPacer,
    ) -> Decision {
        for (index, detection) in detections.iter().enumerate() {
            if let Err(reason) = self.screen(detection) {
                log::trace!(
                    "frame {}: detection {} ({}) rejected: {:?}",
                    frame_index,
                    index,
                    detection.label,
                    reason
                );
                continue;
            }

            log::debug!(
                "frame {}: hit on detection {} ({} {:.2})",
                frame_index,
                index,
                detection.label,
                detection.confidence
            );

            if frame_width < self.config.crop_width || frame_height < self.config.crop_height {
                return Decision::FrameTooSmall { detection: index };
            }
            if !pacer.should_emit(frame_index) {
                return Decision::Paced { detection: index };
            }
            let roi = select_roi(
                &detection.bbox,
                frame_width,
                frame_height,
                self.config.crop_width,
                self.config.crop_height,
            );
            return Decision::Emit {
                detection: index,
                roi,
            };
        }
        Decision::NoMatch
    }

    /// Decide for one frame and record the emission in `pacer` when one is made.
    pub fn evaluate(
        &self,
        detections: &[Detection],
        frame_index: u64,
        frame_width: u32,
        frame_height: u32,
        pacer: &mut EmissionPacer,
    ) -> Decision {
        let decision = self.decide(detections, frame_index, frame_width, frame_height, pacer);
        if let Decision::Emit { .. } = decision {
            pacer.record_emission(frame_index);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn det(label: &str, confidence: f32, cx: f32, cy: f32, size: f32) -> Detection {
        Detection {
            class_id: 0,
            label: label.to_string(),
            confidence,
            bbox: BoundingBox {
                left: cx - size / 2.0,
                top: cy - size / 2.0,
                right: cx + size / 2.0,
                bottom: cy + size / 2.0,
            },
        }
    }

    fn engine() -> PolicyEngine {
        PolicyEngine::new(PolicyConfig::default()).unwrap()
    }

    #[test]
    fn low_confidence_is_always_rejected() {
        let engine = engine();
        assert_eq!(
            engine.screen(&det("dog", 0.65, 500.0, 500.0, 50.0)),
            Err(Rejection::LowConfidence)
        );
        assert_eq!(
            engine.screen(&det("dog", 0.70, 500.0, 500.0, 50.0)),
            Err(Rejection::LowConfidence)
        );
        assert_eq!(
            engine.screen(&det("dog", f32::NAN, 500.0, 500.0, 50.0)),
            Err(Rejection::LowConfidence)
        );
        assert_eq!(engine.screen(&det("dog", 0.71, 500.0, 500.0, 50.0)), Ok(()));
    }

    #[test]
    fn class_match_is_substring() {
        let engine = engine();
        assert_eq!(engine.screen(&det("hotdog", 0.9, 500.0, 500.0, 50.0)), Ok(()));
        assert_eq!(
            engine.screen(&det("cat", 0.9, 500.0, 500.0, 50.0)),
            Err(Rejection::ClassMismatch)
        );
        assert_eq!(
            engine.screen(&det("Dog", 0.9, 500.0, 500.0, 50.0)),
            Err(Rejection::ClassMismatch)
        );
    }

    #[test]
    fn oversized_boxes_are_rejected_not_shrunk() {
        let engine = engine();
        assert_eq!(engine.screen(&det("dog", 0.9, 500.0, 500.0, 416.0)), Ok(()));
        assert_eq!(
            engine.screen(&det("dog", 0.9, 500.0, 500.0, 417.0)),
            Err(Rejection::TooLarge)
        );
    }

    #[test]
    fn nan_box_is_rejected_as_too_large() {
        let engine = engine();
        let mut pacer = engine.new_pacer();
        let nan_box = det("dog", 0.9, f32::NAN, f32::NAN, f32::NAN);
        assert_eq!(engine.screen(&nan_box), Err(Rejection::TooLarge));
        assert_eq!(
            engine.evaluate(&[nan_box], 30, 1920, 1080, &mut pacer),
            Decision::NoMatch
        );
        assert_eq!(pacer.last_emission(), None);
    }

    #[test]
    fn first_qualifying_detection_wins() {
        let engine = engine();
        let mut pacer = engine.new_pacer();
        let detections = vec![
            det("cat", 0.99, 100.0, 100.0, 40.0),
            det("dog", 0.80, 900.0, 500.0, 40.0),
            det("dog", 0.99, 300.0, 300.0, 40.0),
        ];

        let decision = engine.evaluate(&detections, 1, 1920, 1080, &mut pacer);
        match decision {
            Decision::Emit { detection, roi } => {
                assert_eq!(detection, 1);
                assert_eq!(roi.center(), (900, 500));
            }
            other => panic!("expected emission, got {:?}", other),
        }
        assert_eq!(pacer.last_emission(), Some(1));
    }

    #[test]
    fn pacing_blocks_the_whole_frame() {
        let engine = engine();
        let mut pacer = engine.new_pacer();
        let detections = vec![det("dog", 0.9, 500.0, 500.0, 40.0)];

        assert!(engine.evaluate(&detections, 1, 1920, 1080, &mut pacer).roi().is_some());
        assert_eq!(
            engine.evaluate(&detections, 15, 1920, 1080, &mut pacer),
            Decision::Paced { detection: 0 }
        );
        assert_eq!(pacer.last_emission(), Some(1));
        assert!(engine.evaluate(&detections, 25, 1920, 1080, &mut pacer).roi().is_some());
        assert_eq!(pacer.last_emission(), Some(25));
    }

    #[test]
    fn decide_is_pure() {
        let engine = engine();
        let pacer = engine.new_pacer();
        let detections = vec![
            det("dog", 0.9, 10.0, 10.0, 20.0),
            det("dog", 0.9, 700.0, 700.0, 20.0),
        ];
        let first = engine.decide(&detections, 7, 1920, 1080, &pacer);
        let second = engine.decide(&detections, 7, 1920, 1080, &pacer);
        assert_eq!(first, second);
        assert_eq!(pacer.last_emission(), None);
        assert_eq!(
            first.roi(),
            Some(Roi {
                x: 0,
                y: 0,
                width: 416,
                height: 416
            })
        );
    }

    #[test]
    fn frame_smaller_than_crop_never_emits() {
        let engine = engine();
        let mut pacer = engine.new_pacer();
        let detections = vec![det("dog", 0.9, 100.0, 100.0, 20.0)];
        assert_eq!(
            engine.evaluate(&detections, 1, 320, 240, &mut pacer),
            Decision::FrameTooSmall { detection: 0 }
        );
        assert_eq!(pacer.last_emission(), None);
    }

    #[test]
    fn empty_detection_list_is_no_match() {
        let engine = engine();
        let mut pacer = engine.new_pacer();
        assert_eq!(engine.evaluate(&[], 3, 1920, 1080, &mut pacer), Decision::NoMatch);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = PolicyConfig {
            min_confidence: 1.5,
            ..PolicyConfig::default()
        };
        assert!(PolicyEngine::new(config).is_err());
        let config = PolicyConfig {
            target_class: "  ".to_string(),
            ..PolicyConfig::default()
        };
        assert!(PolicyEngine::new(config).is_err());
    }
}
