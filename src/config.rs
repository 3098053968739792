use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::overlay::OverlayFlags;
use crate::policy::PolicyConfig;

const DEFAULT_INPUT_URI: &str = "stub://camera";
const DEFAULT_INPUT_WIDTH: u32 = 1280;
const DEFAULT_INPUT_HEIGHT: u32 = 720;
const DEFAULT_INPUT_FPS: u32 = 30;
const DEFAULT_BACKEND: &str = "cpu";
const DEFAULT_MODEL_WIDTH: u32 = 640;
const DEFAULT_MODEL_HEIGHT: u32 = 640;
const DEFAULT_OVERLAY: &str = "box,labels,conf";
const DEFAULT_CAPTURE_TIMEOUT_MS: u64 = 1000;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    input: Option<InputConfigFile>,
    output: Option<OutputConfigFile>,
    detector: Option<DetectorConfigFile>,
    policy: Option<PolicyConfigFile>,
    overlay: Option<String>,
    capture_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct InputConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_frames: Option<u64>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    frame_uri: Option<String>,
    crop_uri: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    model_width: Option<u32>,
    model_height: Option<u32>,
    deadline_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    target_class: Option<String>,
    min_confidence: Option<f32>,
    crop_width: Option<u32>,
    crop_height: Option<u32>,
    min_pacing_frames: Option<u64>,
}

/// Startup configuration. Built once, never mutated while the loop runs.
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub input: InputSettings,
    pub output: OutputSettings,
    pub detector: DetectorSettings,
    pub policy: PolicyConfig,
    pub overlay: OverlayFlags,
    /// Bounded wait for each capture call.
    pub capture_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct InputSettings {
    pub uri: String,
    /// Frame size for synthetic sources; decoded sources report their own.
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// End the stream after this many frames (synthetic sources only).
    pub max_frames: Option<u64>,
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct OutputSettings {
    pub frame_uri: Option<String>,
    pub crop_uri: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub model_width: u32,
    pub model_height: u32,
    /// Detect calls slower than this are discarded and the frame skipped.
    pub deadline: Option<Duration>,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_INPUT_URI.to_string(),
            width: DEFAULT_INPUT_WIDTH,
            height: DEFAULT_INPUT_HEIGHT,
            target_fps: DEFAULT_INPUT_FPS,
            max_frames: None,
            seed: None,
        }
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            model_path: None,
            labels_path: None,
            model_width: DEFAULT_MODEL_WIDTH,
            model_height: DEFAULT_MODEL_HEIGHT,
            deadline: None,
        }
    }
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            input: InputSettings::default(),
            output: OutputSettings::default(),
            detector: DetectorSettings::default(),
            policy: PolicyConfig::default(),
            overlay: OverlayFlags::default(),
            capture_timeout: Duration::from_millis(DEFAULT_CAPTURE_TIMEOUT_MS),
        }
    }
}

impl SentinelConfig {
    /// Load from `SENTINEL_CONFIG` (if set), then apply `SENTINEL_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Result<Self> {
        let defaults = Self::default();

        let input = match file.input {
            Some(input) => InputSettings {
                uri: input.uri.unwrap_or(defaults.input.uri),
                width: input.width.unwrap_or(defaults.input.width),
                height: input.height.unwrap_or(defaults.input.height),
                target_fps: input.target_fps.unwrap_or(defaults.input.target_fps),
                max_frames: input.max_frames,
                seed: input.seed,
            },
            None => defaults.input,
        };

        let output = match file.output {
            Some(output) => OutputSettings {
                frame_uri: non_empty(output.frame_uri),
                crop_uri: non_empty(output.crop_uri),
            },
            None => defaults.output,
        };

        let detector = match file.detector {
            Some(detector) => DetectorSettings {
                backend: detector.backend.unwrap_or(defaults.detector.backend),
                model_path: detector.model_path,
                labels_path: detector.labels_path,
                model_width: detector.model_width.unwrap_or(defaults.detector.model_width),
                model_height: detector
                    .model_height
                    .unwrap_or(defaults.detector.model_height),
                deadline: detector.deadline_ms.map(Duration::from_millis),
            },
            None => defaults.detector,
        };

        let policy = match file.policy {
            Some(policy) => PolicyConfig {
                target_class: policy.target_class.unwrap_or(defaults.policy.target_class),
                min_confidence: policy
                    .min_confidence
                    .unwrap_or(defaults.policy.min_confidence),
                crop_width: policy.crop_width.unwrap_or(defaults.policy.crop_width),
                crop_height: policy.crop_height.unwrap_or(defaults.policy.crop_height),
                min_pacing_frames: policy
                    .min_pacing_frames
                    .unwrap_or(defaults.policy.min_pacing_frames),
            },
            None => defaults.policy,
        };

        let overlay = OverlayFlags::parse(file.overlay.as_deref().unwrap_or(DEFAULT_OVERLAY))?;
        let capture_timeout = Duration::from_millis(
            file.capture_timeout_ms
                .unwrap_or(DEFAULT_CAPTURE_TIMEOUT_MS),
        );

        Ok(Self {
            input,
            output,
            detector,
            policy,
            overlay,
            capture_timeout,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("SENTINEL_INPUT_URI") {
            if !uri.trim().is_empty() {
                self.input.uri = uri;
            }
        }
        if let Ok(uri) = std::env::var("SENTINEL_OUTPUT_URI") {
            if !uri.trim().is_empty() {
                self.output.frame_uri = Some(uri);
            }
        }
        if let Ok(uri) = std::env::var("SENTINEL_CROP_URI") {
            if !uri.trim().is_empty() {
                self.output.crop_uri = Some(uri);
            }
        }
        if let Ok(backend) = std::env::var("SENTINEL_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend;
            }
        }
        if let Ok(target) = std::env::var("SENTINEL_TARGET_CLASS") {
            if !target.trim().is_empty() {
                self.policy.target_class = target;
            }
        }
        if let Ok(confidence) = std::env::var("SENTINEL_MIN_CONFIDENCE") {
            self.policy.min_confidence = confidence.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_MIN_CONFIDENCE must be a number between 0 and 1")
            })?;
        }
        if let Ok(frames) = std::env::var("SENTINEL_PACING_FRAMES") {
            self.policy.min_pacing_frames = frames.trim().parse().map_err(|_| {
                anyhow!("SENTINEL_PACING_FRAMES must be a non-negative integer frame count")
            })?;
        }
        if let Ok(overlay) = std::env::var("SENTINEL_OVERLAY") {
            self.overlay = OverlayFlags::parse(&overlay)?;
        }
        Ok(())
    }

    /// Check invariants. Called after every layer of overrides has been applied.
    pub fn validate(&self) -> Result<()> {
        if self.input.uri.trim().is_empty() {
            return Err(anyhow!("input uri must not be empty"));
        }
        if self.capture_timeout.is_zero() {
            return Err(anyhow!("capture timeout must be greater than zero"));
        }
        if self.detector.model_width == 0 || self.detector.model_height == 0 {
            return Err(anyhow!("detector model dimensions must be non-zero"));
        }
        self.policy.validate()
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_policy() {
        let cfg = SentinelConfig::default();
        assert_eq!(cfg.policy.target_class, "dog");
        assert_eq!(cfg.policy.min_confidence, 0.70);
        assert_eq!((cfg.policy.crop_width, cfg.policy.crop_height), (416, 416));
        assert_eq!(cfg.policy.min_pacing_frames, 20);
        assert_eq!(cfg.capture_timeout, Duration::from_millis(1000));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn file_sections_fill_missing_fields_with_defaults() -> Result<()> {
        let file: SentinelConfigFile = toml::from_str(
            r#"
            overlay = "box"

            [policy]
            target_class = "cat"

            [detector]
            deadline_ms = 250
            "#,
        )?;
        let cfg = SentinelConfig::from_file(file)?;
        assert_eq!(cfg.policy.target_class, "cat");
        assert_eq!(cfg.policy.min_confidence, 0.70);
        assert_eq!(cfg.detector.backend, "cpu");
        assert_eq!(cfg.detector.deadline, Some(Duration::from_millis(250)));
        assert!(cfg.overlay.boxes);
        assert!(!cfg.overlay.labels);
        Ok(())
    }

    #[test]
    fn empty_output_uris_mean_absent() -> Result<()> {
        let file: SentinelConfigFile = serde_json::from_str(
            r#"{ "output": { "frame_uri": " ", "crop_uri": "log://crops" } }"#,
        )?;
        let cfg = SentinelConfig::from_file(file)?;
        assert_eq!(cfg.output.frame_uri, None);
        assert_eq!(cfg.output.crop_uri.as_deref(), Some("log://crops"));
        Ok(())
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let cfg = SentinelConfig {
            capture_timeout: Duration::ZERO,
            ..SentinelConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
