//! ROI Sentinel
//!
//! Real-time object detection with a crop policy: frames are pulled from a video source,
//! run through a detector backend, and the first detection that matches the target class
//! above the confidence threshold gets a fixed-size crop window centered on it. Crops are
//! paced so at most one is emitted per pacing interval.
//!
//! # Pipeline
//!
//! ```text
//! FrameSource -> DetectorBackend -> PolicyEngine (+ EmissionPacer) -> CropOutput
//!                                \-> FrameOutput (overlay + status)
//! ```
//!
//! # Module Structure
//!
//! - `frame`: owned RGB24 frames and the reusable crop buffer
//! - `ingest`: frame sources (synthetic `stub://`, ffmpeg-decoded files and streams)
//! - `detect`: detector backend trait, registry, class labels, built-in backends
//! - `roi`, `pacer`, `policy`: crop window selection, emission pacing, filtering rules
//! - `overlay`, `output`: display annotations and frame/crop sinks
//! - `control`: the capture/detect/emit loop and its shutdown token
//! - `config`: file and environment configuration

pub mod config;
pub mod control;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod output;
pub mod overlay;
pub mod pacer;
pub mod policy;
pub mod roi;

pub use config::{DetectorSettings, InputSettings, OutputSettings, SentinelConfig};
pub use control::{ControlLoop, LoopState, LoopSummary, Shutdown, StopReason};
pub use detect::{
    BackendRegistry, BoundingBox, ClassLabels, Detection, DetectorBackend, Precision,
};
pub use frame::{extract_crop, CropBuffer, Frame};
pub use ingest::{Capture, FrameSource, SourceStats, VideoSource};
pub use output::{open_crop_output, open_frame_output, CropOutput, FrameOutput};
pub use overlay::{Overlay, OverlayFlags};
pub use pacer::EmissionPacer;
pub use policy::{Decision, PolicyConfig, PolicyEngine, Rejection};
pub use roi::{select_roi, Roi};
