use anyhow::{anyhow, Result};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use roi_sentinel::detect::ScriptedBackend;
use roi_sentinel::{
    BoundingBox, Capture, ControlLoop, CropBuffer, CropOutput, Detection, DetectorBackend,
    Frame, FrameOutput, FrameSource, LoopState, Overlay, PolicyConfig, PolicyEngine, Shutdown,
    SourceStats, StopReason,
};

const FRAME_WIDTH: u32 = 300;
const FRAME_HEIGHT: u32 = 200;
const CROP_SIDE: u32 = 64;

enum Step {
    Frame,
    Timeout,
    Error,
}

#[derive(Default)]
struct SourceLog {
    captured: u64,
    closed: bool,
}

/// Replays capture outcomes, then reports end of stream.
struct ScriptedSource {
    steps: VecDeque<Step>,
    width: u32,
    height: u32,
    live: bool,
    log: Rc<RefCell<SourceLog>>,
    /// Trigger this token while capturing the given (1-based) frame.
    interrupt_at: Option<(u64, Shutdown)>,
}

impl ScriptedSource {
    fn new(steps: Vec<Step>) -> (Self, Rc<RefCell<SourceLog>>) {
        let log = Rc::new(RefCell::new(SourceLog::default()));
        let source = Self {
            steps: steps.into(),
            width: FRAME_WIDTH,
            height: FRAME_HEIGHT,
            live: true,
            log: Rc::clone(&log),
            interrupt_at: None,
        };
        (source, log)
    }

    fn frames(count: usize) -> (Self, Rc<RefCell<SourceLog>>) {
        Self::new((0..count).map(|_| Step::Frame).collect())
    }

    fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn interrupt_at(mut self, frame: u64, shutdown: Shutdown) -> Self {
        self.interrupt_at = Some((frame, shutdown));
        self
    }

    /// Pixel (x, y) of frame n is `[x, y, n]`, truncated to bytes.
    fn render(&self, frame_no: u64) -> Result<Frame> {
        let mut data = Vec::with_capacity((self.width * self.height * 3) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                data.extend_from_slice(&[x as u8, y as u8, frame_no as u8]);
            }
        }
        Frame::new(data, self.width, self.height)
    }
}

impl FrameSource for ScriptedSource {
    fn capture(&mut self, _timeout: Duration) -> Result<Capture> {
        match self.steps.pop_front() {
            Some(Step::Frame) => {
                let frame_no = {
                    let mut log = self.log.borrow_mut();
                    log.captured += 1;
                    log.captured
                };
                if let Some((at, shutdown)) = &self.interrupt_at {
                    if *at == frame_no {
                        shutdown.trigger();
                    }
                }
                Ok(Capture::Frame(self.render(frame_no)?))
            }
            Some(Step::Timeout) => Ok(Capture::Timeout),
            Some(Step::Error) => Err(anyhow!("decoder hiccup")),
            None => {
                self.live = false;
                Ok(Capture::Timeout)
            }
        }
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn frame_width(&self) -> u32 {
        self.width
    }

    fn frame_height(&self) -> u32 {
        self.height
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.log.borrow().captured,
            uri: "scripted://test".to_string(),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.log.borrow_mut().closed = true;
        Ok(())
    }
}

#[derive(Default)]
struct OutputLog {
    frames: u64,
    overlay_sizes: Vec<usize>,
    statuses: Vec<String>,
    /// (source frame, first pixel) per crop.
    crops: Vec<(u64, [u8; 3])>,
    frame_output_closed: bool,
    crop_output_closed: bool,
}

struct RecordingFrameOutput {
    log: Rc<RefCell<OutputLog>>,
    close_after: Option<u64>,
}

impl FrameOutput for RecordingFrameOutput {
    fn name(&self) -> &str {
        "recording"
    }

    fn render(&mut self, _frame: &Frame, overlay: &Overlay<'_>) -> Result<()> {
        let mut log = self.log.borrow_mut();
        log.frames += 1;
        log.overlay_sizes.push(overlay.detections.len());
        Ok(())
    }

    fn set_status(&mut self, status: &str) {
        self.log.borrow_mut().statuses.push(status.to_string());
    }

    fn is_live(&self) -> bool {
        self.close_after
            .map_or(true, |limit| self.log.borrow().frames < limit)
    }

    fn close(&mut self) -> Result<()> {
        self.log.borrow_mut().frame_output_closed = true;
        Ok(())
    }
}

struct RecordingCropOutput {
    log: Rc<RefCell<OutputLog>>,
}

impl CropOutput for RecordingCropOutput {
    fn name(&self) -> &str {
        "recording-crops"
    }

    fn render_crop(&mut self, crop: &CropBuffer) -> Result<()> {
        let first = [crop.pixels()[0], crop.pixels()[1], crop.pixels()[2]];
        let source = crop.source_frame().unwrap_or_default();
        self.log.borrow_mut().crops.push((source, first));
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.log.borrow_mut().crop_output_closed = true;
        Ok(())
    }
}

/// Detector that always takes longer than any reasonable deadline.
struct SlowBackend;

impl DetectorBackend for SlowBackend {
    fn name(&self) -> &'static str {
        "slow"
    }

    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        std::thread::sleep(Duration::from_millis(20));
        Ok(vec![det("dog", 0.95, 100.0, 100.0, 20.0)])
    }

    fn class_label(&self, class_id: u32) -> String {
        format!("class #{}", class_id)
    }
}

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

fn policy(min_pacing_frames: u64) -> PolicyEngine {
    PolicyEngine::new(PolicyConfig {
        crop_width: CROP_SIDE,
        crop_height: CROP_SIDE,
        min_pacing_frames,
        ..PolicyConfig::default()
    })
    .unwrap()
}

/// Script with a qualifying dog on the given 1-based frames, empty elsewhere.
fn dogs_on(frames: &[u64], total: u64) -> Vec<Vec<Detection>> {
    (1..=total)
        .map(|n| {
            if frames.contains(&n) {
                vec![det("dog", 0.9, 160.0, 120.0, 40.0)]
            } else {
                Vec::new()
            }
        })
        .collect()
}

fn build(
    source: ScriptedSource,
    detector: Box<dyn DetectorBackend>,
    pacing: u64,
    shutdown: Shutdown,
) -> (ControlLoop, Rc<RefCell<OutputLog>>) {
    build_with_close(source, detector, pacing, shutdown, None)
}

fn build_with_close(
    source: ScriptedSource,
    detector: Box<dyn DetectorBackend>,
    pacing: u64,
    shutdown: Shutdown,
    close_after: Option<u64>,
) -> (ControlLoop, Rc<RefCell<OutputLog>>) {
    let log = Rc::new(RefCell::new(OutputLog::default()));
    let control = ControlLoop::new(Box::new(source), detector, policy(pacing), shutdown)
        .unwrap()
        .with_frame_output(Some(Box::new(RecordingFrameOutput {
            log: Rc::clone(&log),
            close_after,
        })))
        .with_crop_output(Some(Box::new(RecordingCropOutput {
            log: Rc::clone(&log),
        })));
    (control, log)
}

#[test]
fn pacing_skips_hits_inside_the_interval() {
    let (source, _) = ScriptedSource::frames(30);
    let detector = ScriptedBackend::new(dogs_on(&[1, 15, 25], 30));
    let (control, log) = build(source, Box::new(detector), 20, Shutdown::new());

    let summary = control.run();

    let crops: Vec<u64> = log.borrow().crops.iter().map(|(frame, _)| *frame).collect();
    assert_eq!(crops, vec![1, 25]);
    assert_eq!(summary.frames, 30);
    assert_eq!(summary.crops_emitted, 2);
    assert_eq!(summary.paced_frames, 1);
    assert_eq!(summary.stop_reason, Some(StopReason::EndOfStream));
    assert_eq!(summary.final_state, LoopState::Stopped);
}

#[test]
fn crop_is_centered_on_first_qualifying_detection() {
    let (source, _) = ScriptedSource::frames(1);
    let detector = ScriptedBackend::new(vec![vec![
        det("cat", 0.99, 40.0, 40.0, 20.0),
        det("dog", 0.60, 250.0, 50.0, 20.0),
        det("dog", 0.80, 200.0, 150.0, 20.0),
        det("dog", 0.99, 100.0, 100.0, 20.0),
    ]]);
    let (control, log) = build(source, Box::new(detector), 20, Shutdown::new());

    let summary = control.run();

    assert_eq!(summary.crops_emitted, 1);
    // Window of 64 centered on (200, 150) starts at (168, 118).
    assert_eq!(log.borrow().crops, vec![(1, [168, 118, 1])]);
}

#[test]
fn crop_window_is_clamped_at_frame_edges() {
    let (source, _) = ScriptedSource::frames(2);
    let detector = ScriptedBackend::new(vec![
        vec![det("dog", 0.9, 5.0, 5.0, 10.0)],
        vec![det("dog", 0.9, 298.0, 198.0, 4.0)],
    ]);
    let (control, log) = build(source, Box::new(detector), 0, Shutdown::new());

    control.run();

    let crops = log.borrow().crops.clone();
    assert_eq!(crops.len(), 2);
    assert_eq!(crops[0], (1, [0, 0, 1]));
    let far_corner = [
        (FRAME_WIDTH - CROP_SIDE) as u8,
        (FRAME_HEIGHT - CROP_SIDE) as u8,
        2,
    ];
    assert_eq!(crops[1], (2, far_corner));
}

#[test]
fn frames_smaller_than_the_crop_are_never_cropped() {
    let (source, _) = ScriptedSource::frames(3);
    let source = source.with_size(32, 32);
    let detector = ScriptedBackend::new(vec![vec![det("dog", 0.9, 16.0, 16.0, 8.0)]; 3]);
    let (control, log) = build(source, Box::new(detector), 0, Shutdown::new());

    let summary = control.run();

    assert_eq!(summary.crops_emitted, 0);
    assert!(log.borrow().crops.is_empty());
    assert_eq!(log.borrow().frames, 3);
}

#[test]
fn closed_frame_output_stops_the_loop() {
    let (source, source_log) = ScriptedSource::frames(10);
    let detector = ScriptedBackend::new(Vec::new());
    let (control, log) = build_with_close(source, Box::new(detector), 20, Shutdown::new(), Some(3));

    let summary = control.run();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.stop_reason, Some(StopReason::OutputClosed));
    assert_eq!(summary.final_state, LoopState::Stopped);
    assert_eq!(source_log.borrow().captured, 3);
    assert!(source_log.borrow().closed);
    assert!(log.borrow().frame_output_closed);
    assert!(log.borrow().crop_output_closed);
}

#[test]
fn shutdown_finishes_the_current_iteration() {
    let shutdown = Shutdown::new();
    let (source, source_log) = ScriptedSource::frames(10);
    let source = source.interrupt_at(4, shutdown.clone());
    let detector = ScriptedBackend::new(dogs_on(&[4], 10));
    let (control, log) = build(source, Box::new(detector), 20, shutdown);

    let summary = control.run();

    assert_eq!(summary.stop_reason, Some(StopReason::Interrupted));
    assert_eq!(summary.final_state, LoopState::Stopped);
    assert_eq!(summary.frames, 4);
    // The interrupted frame is still cropped and rendered.
    assert_eq!(log.borrow().crops.len(), 1);
    assert_eq!(log.borrow().frames, 4);
    assert!(source_log.borrow().closed);
}

#[test]
fn triggered_shutdown_stops_before_first_capture() {
    let shutdown = Shutdown::new();
    shutdown.trigger();
    let (source, source_log) = ScriptedSource::frames(5);
    let detector = ScriptedBackend::new(Vec::new());
    let (control, _) = build(source, Box::new(detector), 20, shutdown);

    let summary = control.run();

    assert_eq!(summary.frames, 0);
    assert_eq!(summary.stop_reason, Some(StopReason::Interrupted));
    assert_eq!(source_log.borrow().captured, 0);
    assert!(source_log.borrow().closed);
}

#[test]
fn transient_failures_do_not_stop_the_loop() {
    let (source, _) = ScriptedSource::new(vec![
        Step::Frame,
        Step::Error,
        Step::Timeout,
        Step::Frame,
        Step::Frame,
    ]);
    let detector = ScriptedBackend::new(vec![
        vec![det("dog", 0.9, 160.0, 120.0, 40.0)],
        vec![det("dog", 0.9, 160.0, 120.0, 40.0)],
        Vec::new(),
    ])
    .fail_on_call(1);
    let (control, log) = build(source, Box::new(detector), 20, Shutdown::new());

    let summary = control.run();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.capture_errors, 1);
    assert_eq!(summary.capture_timeouts, 1);
    assert_eq!(summary.detector_errors, 1);
    assert_eq!(summary.stop_reason, Some(StopReason::EndOfStream));
    // Frame 1 failed detection, so the first crop comes from frame 2.
    let crops: Vec<u64> = log.borrow().crops.iter().map(|(frame, _)| *frame).collect();
    assert_eq!(crops, vec![2]);
    // Every captured frame is still rendered.
    assert_eq!(log.borrow().frames, 3);
}

#[test]
fn late_detections_are_discarded() {
    let (source, _) = ScriptedSource::frames(3);
    let log = Rc::new(RefCell::new(OutputLog::default()));
    let control = ControlLoop::new(
        Box::new(source),
        Box::new(SlowBackend),
        policy(0),
        Shutdown::new(),
    )
    .unwrap()
    .with_detect_deadline(Some(Duration::from_millis(1)))
    .with_crop_output(Some(Box::new(RecordingCropOutput {
        log: Rc::clone(&log),
    })));

    let summary = control.run();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.deadline_overruns, 3);
    assert_eq!(summary.crops_emitted, 0);
    assert!(log.borrow().crops.is_empty());
}

#[test]
fn status_annotation_reports_backend_and_rate() {
    let (source, _) = ScriptedSource::frames(2);
    let detector = ScriptedBackend::new(dogs_on(&[2], 2));
    let (control, log) = build(source, Box::new(detector), 20, Shutdown::new());

    control.run();

    let log = log.borrow();
    assert_eq!(log.statuses.len(), 2);
    for status in &log.statuses {
        assert!(status.starts_with("scripted | FP32 | Network "), "{}", status);
        assert!(status.ends_with(" FPS"), "{}", status);
    }
    assert_eq!(log.overlay_sizes, vec![0, 1]);
}

#[test]
fn loop_runs_without_outputs() {
    let (source, source_log) = ScriptedSource::frames(25);
    let detector = ScriptedBackend::new(dogs_on(&[1, 22], 25));
    let control = ControlLoop::new(
        Box::new(source),
        Box::new(detector),
        policy(20),
        Shutdown::new(),
    )
    .unwrap();

    let summary = control.run();

    assert_eq!(summary.frames, 25);
    assert_eq!(summary.crops_emitted, 2);
    assert_eq!(summary.stop_reason, Some(StopReason::EndOfStream));
    assert!(source_log.borrow().closed);
}
