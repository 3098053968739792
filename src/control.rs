//! Frame-processing control loop.
//!
//! One thread drives capture -> detect -> policy -> crop -> render per iteration:
//!
//! 1. Capture with a bounded wait. A timeout on a live source skips the iteration; a
//!    timeout or error on a dead source ends the loop.
//! 2. Advance the frame counter and run the detector (no preemption; an optional
//!    deadline discards late results).
//! 3. Let the policy engine choose at most one crop window, copy it into the single
//!    reusable crop buffer and hand it to the crop output.
//! 4. Render the full frame with its status annotation.
//! 5. Stop on a closed frame output or a triggered `Shutdown` token.
//!
//! States: RUNNING -> DRAINING on end-of-stream, closed output or interrupt;
//! DRAINING -> STOPPED once the source and outputs are closed. Owned resources are
//! dropped with the loop on every exit path.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SentinelConfig;
use crate::detect::{Detection, DetectorBackend};
use crate::frame::{extract_crop, CropBuffer, Frame};
use crate::ingest::{Capture, FrameSource};
use crate::output::{CropOutput, FrameOutput};
use crate::overlay::{Overlay, OverlayFlags};
use crate::pacer::EmissionPacer;
use crate::policy::{Decision, PolicyEngine};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_millis(1000);
/// Weight of the newest sample in the smoothed detector rate.
const RATE_SMOOTHING: f64 = 0.1;

// ----------------------------------------------------------------------------
// Shutdown token
// ----------------------------------------------------------------------------

/// Cooperative cancellation token, polled once per loop iteration.
#[derive(Clone, Debug, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ----------------------------------------------------------------------------
// Loop state and summary
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoopState {
    #[default]
    Running,
    Draining,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    OutputClosed,
    Interrupted,
}

/// Counters reported when the loop stops.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Frames captured (the final frame counter).
    pub frames: u64,
    pub crops_emitted: u64,
    /// Frames with a qualifying detection that the pacer held back.
    pub paced_frames: u64,
    pub capture_timeouts: u64,
    pub capture_errors: u64,
    pub detector_errors: u64,
    pub deadline_overruns: u64,
    pub crop_errors: u64,
    pub output_errors: u64,
    pub stop_reason: Option<StopReason>,
    /// State the loop was in when `run` returned.
    pub final_state: LoopState,
}

/// Exponentially smoothed detector throughput.
#[derive(Clone, Copy, Debug, Default)]
struct RateMeter {
    fps: Option<f64>,
}

impl RateMeter {
    fn record(&mut self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return;
        }
        let sample = 1.0 / secs;
        self.fps = Some(match self.fps {
            Some(prev) => prev + RATE_SMOOTHING * (sample - prev),
            None => sample,
        });
    }

    fn fps(&self) -> f64 {
        self.fps.unwrap_or(0.0)
    }
}

// ----------------------------------------------------------------------------
// Control loop
// ----------------------------------------------------------------------------

pub struct ControlLoop {
    source: Box<dyn FrameSource>,
    detector: Box<dyn DetectorBackend>,
    frame_output: Option<Box<dyn FrameOutput>>,
    crop_output: Option<Box<dyn CropOutput>>,
    policy: PolicyEngine,
    pacer: EmissionPacer,
    crop_buffer: CropBuffer,
    frame_counter: u64,
    overlay: OverlayFlags,
    capture_timeout: Duration,
    detect_deadline: Option<Duration>,
    shutdown: Shutdown,
    state: LoopState,
    rate: RateMeter,
    summary: LoopSummary,
    last_health_log: Instant,
}

impl ControlLoop {
    pub fn new(
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        policy: PolicyEngine,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let crop_buffer =
            CropBuffer::new(policy.config().crop_width, policy.config().crop_height)?;
        let pacer = policy.new_pacer();
        Ok(Self {
            source,
            detector,
            frame_output: None,
            crop_output: None,
            policy,
            pacer,
            crop_buffer,
            frame_counter: 0,
            overlay: OverlayFlags::default(),
            capture_timeout: DEFAULT_CAPTURE_TIMEOUT,
            detect_deadline: None,
            shutdown,
            state: LoopState::Running,
            rate: RateMeter::default(),
            summary: LoopSummary::default(),
            last_health_log: Instant::now(),
        })
    }

    /// Loop wired with the policy, overlay, timeout and deadline from `config`.
    pub fn from_config(
        config: &SentinelConfig,
        source: Box<dyn FrameSource>,
        detector: Box<dyn DetectorBackend>,
        shutdown: Shutdown,
    ) -> Result<Self> {
        let policy = PolicyEngine::new(config.policy.clone())?;
        Ok(Self::new(source, detector, policy, shutdown)?
            .with_overlay(config.overlay)
            .with_capture_timeout(config.capture_timeout)
            .with_detect_deadline(config.detector.deadline))
    }

    pub fn with_frame_output(mut self, output: Option<Box<dyn FrameOutput>>) -> Self {
        self.frame_output = output;
        self
    }

    pub fn with_crop_output(mut self, output: Option<Box<dyn CropOutput>>) -> Self {
        self.crop_output = output;
        self
    }

    pub fn with_overlay(mut self, overlay: OverlayFlags) -> Self {
        self.overlay = overlay;
        self
    }

    pub fn with_capture_timeout(mut self, timeout: Duration) -> Self {
        self.capture_timeout = timeout;
        self
    }

    pub fn with_detect_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.detect_deadline = deadline;
        self
    }

    /// Run until end-of-stream, a closed frame output or shutdown, then release
    /// everything the loop owns.
    pub fn run(mut self) -> LoopSummary {
        log::info!(
            "control loop running: target='{}' min_conf={:.2} crop={}x{} pacing={} frames",
            self.policy.config().target_class,
            self.policy.config().min_confidence,
            self.policy.config().crop_width,
            self.policy.config().crop_height,
            self.policy.config().min_pacing_frames
        );

        let mut stop = self.shutdown_requested();
        while stop.is_none() {
            stop = self.iterate();
        }
        if let Some(reason) = stop {
            self.drain(reason);
        }
        self.summary.clone()
    }

    /// One capture/detect/policy/render cycle. Returns why the loop should stop, if it
    /// should.
    fn iterate(&mut self) -> Option<StopReason> {
        let frame = match self.source.capture(self.capture_timeout) {
            Ok(Capture::Frame(frame)) => frame,
            Ok(Capture::Timeout) => {
                if !self.source.is_live() {
                    return Some(StopReason::EndOfStream);
                }
                self.summary.capture_timeouts += 1;
                log::debug!("capture timed out after {:?}", self.capture_timeout);
                return self.shutdown_requested();
            }
            Err(e) => {
                if !self.source.is_live() {
                    log::info!("source ended: {}", e);
                    return Some(StopReason::EndOfStream);
                }
                self.summary.capture_errors += 1;
                log::error!("failed to capture video frame: {:#}", e);
                return self.shutdown_requested();
            }
        };

        self.frame_counter += 1;
        self.summary.frames = self.frame_counter;

        let detections = self.detect(&frame);
        if let Some(detections) = &detections {
            self.apply_policy(&frame, detections);
        }
        self.render(&frame, detections.as_deref().unwrap_or_default());
        self.log_health();

        if let Some(output) = &self.frame_output {
            if !output.is_live() {
                log::info!("frame output '{}' closed", output.name());
                return Some(StopReason::OutputClosed);
            }
        }
        self.shutdown_requested()
    }

    /// Run the detector. `None` means the frame is skipped for policy purposes.
    fn detect(&mut self, frame: &Frame) -> Option<Vec<Detection>> {
        let started = Instant::now();
        let result = self.detector.detect(frame);
        let elapsed = started.elapsed();
        self.rate.record(elapsed);
        log::debug!(
            "frame {}: {} inference {:.2} ms",
            self.frame_counter,
            self.detector.name(),
            elapsed.as_secs_f64() * 1000.0
        );

        let detections = match result {
            Ok(detections) => detections,
            Err(e) => {
                self.summary.detector_errors += 1;
                log::warn!("frame {}: detection failed: {:#}", self.frame_counter, e);
                return None;
            }
        };
        if let Some(deadline) = self.detect_deadline {
            if elapsed > deadline {
                self.summary.deadline_overruns += 1;
                log::warn!(
                    "frame {}: detection took {:?} (deadline {:?}), skipping frame",
                    self.frame_counter,
                    elapsed,
                    deadline
                );
                return None;
            }
        }

        if !detections.is_empty() {
            log::debug!("{} objects detected", detections.len());
        }
        for (n, det) in detections.iter().enumerate() {
            log::debug!(
                "obj {} class #{} ({}) conf={:.3} box=({:.1},{:.1})-({:.1},{:.1}) {:.1}x{:.1}",
                n,
                det.class_id,
                det.label,
                det.confidence,
                det.bbox.left,
                det.bbox.top,
                det.bbox.right,
                det.bbox.bottom,
                det.width(),
                det.height()
            );
        }
        Some(detections)
    }

    fn apply_policy(&mut self, frame: &Frame, detections: &[Detection]) {
        let decision = self.policy.decide(
            detections,
            self.frame_counter,
            frame.width,
            frame.height,
            &self.pacer,
        );
        match decision {
            Decision::Emit { detection, roi } => {
                let extracted =
                    extract_crop(frame, &roi, self.frame_counter, &mut self.crop_buffer);
                if let Err(e) = extracted {
                    self.summary.crop_errors += 1;
                    log::error!("frame {}: crop extraction failed: {:#}", self.frame_counter, e);
                    return;
                }
                self.pacer.record_emission(self.frame_counter);
                self.summary.crops_emitted += 1;
                log::info!(
                    "frame {}: emitting crop ({}, {})-({}, {}) for '{}'",
                    self.frame_counter,
                    roi.x,
                    roi.y,
                    roi.right(),
                    roi.bottom(),
                    detections[detection].label
                );
                if let Some(output) = self.crop_output.as_mut() {
                    if let Err(e) = output.render_crop(&self.crop_buffer) {
                        self.summary.output_errors += 1;
                        log::error!("crop output '{}' failed: {:#}", output.name(), e);
                    }
                }
            }
            Decision::Paced { .. } => {
                self.summary.paced_frames += 1;
                log::debug!(
                    "frame {}: hit paced (last emission {:?})",
                    self.frame_counter,
                    self.pacer.last_emission()
                );
            }
            Decision::FrameTooSmall { .. } => {
                log::warn!(
                    "frame {}: {}x{} frame is smaller than the {}x{} crop, not cropping",
                    self.frame_counter,
                    frame.width,
                    frame.height,
                    self.policy.config().crop_width,
                    self.policy.config().crop_height
                );
            }
            Decision::NoMatch => {}
        }
    }

    fn render(&mut self, frame: &Frame, detections: &[Detection]) {
        let Some(output) = self.frame_output.as_mut() else {
            return;
        };
        let overlay = Overlay::new(detections, self.overlay);
        if let Err(e) = output.render(frame, &overlay) {
            self.summary.output_errors += 1;
            log::error!("frame output '{}' failed: {:#}", output.name(), e);
        }
        let status = format!(
            "{} | {} | Network {:.0} FPS",
            self.detector.name(),
            self.detector.precision(),
            self.rate.fps()
        );
        output.set_status(&status);
    }

    fn log_health(&mut self) {
        if self.last_health_log.elapsed() < HEALTH_LOG_INTERVAL {
            return;
        }
        let stats = self.source.stats();
        log::info!(
            "source live={} frames={} crops={} paced={} network={:.1} fps uri={}",
            self.source.is_live(),
            stats.frames_captured,
            self.summary.crops_emitted,
            self.summary.paced_frames,
            self.rate.fps(),
            stats.uri
        );
        self.last_health_log = Instant::now();
    }

    fn shutdown_requested(&self) -> Option<StopReason> {
        self.shutdown
            .is_triggered()
            .then_some(StopReason::Interrupted)
    }

    fn drain(&mut self, reason: StopReason) {
        self.state = LoopState::Draining;
        self.summary.stop_reason = Some(reason);
        log::info!("shutting down ({:?})...", reason);

        if let Err(e) = self.source.close() {
            log::error!("failed to close source: {:#}", e);
        }
        if let Some(output) = self.frame_output.as_mut() {
            if let Err(e) = output.close() {
                log::error!("failed to close frame output '{}': {:#}", output.name(), e);
            }
        }
        if let Some(output) = self.crop_output.as_mut() {
            if let Err(e) = output.close() {
                log::error!("failed to close crop output '{}': {:#}", output.name(), e);
            }
        }

        self.state = LoopState::Stopped;
        self.summary.final_state = self.state;
        log::info!(
            "shutdown complete: {} frames, {} crops",
            self.summary.frames,
            self.summary.crops_emitted
        );
    }
}
