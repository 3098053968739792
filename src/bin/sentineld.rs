//! sentineld - ROI Sentinel daemon
//!
//! This daemon:
//! 1. Opens the configured video source (stub://, files and rtsp:// with ingest-ffmpeg)
//! 2. Loads the detector backend from the registry
//! 3. Opens the frame and crop outputs (a failed output is logged and skipped)
//! 4. Runs the control loop until end of stream, a closed frame output or Ctrl-C
//!
//! Startup failures of the source or detector exit with status 1.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use roi_sentinel::{
    open_crop_output, open_frame_output, BackendRegistry, ControlLoop, FrameSource,
    OverlayFlags, SentinelConfig, Shutdown, VideoSource,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Detect objects in a video stream and emit paced crops around the target class"
)]
struct Args {
    /// Video source URI (stub://<name>, a video file, rtsp://...).
    input_uri: Option<String>,

    /// Frame output URI (log://<name>, dir://<path>, none).
    output_uri: Option<String>,

    /// Crop output URI (log://<name>, dir://<path>, none).
    crop_uri: Option<String>,

    /// Class label substring to crop around.
    #[arg(long)]
    target: Option<String>,

    /// Minimum detection confidence (exclusive), 0..=1.
    #[arg(long)]
    threshold: Option<f32>,

    /// Minimum frames between crop emissions.
    #[arg(long)]
    pacing: Option<u64>,

    /// Overlay flags: box, lines, labels, conf, none.
    #[arg(long)]
    overlay: Option<String>,

    /// Detector backend name (cpu, tract).
    #[arg(long)]
    backend: Option<String>,

    /// Model file for model-based backends.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Newline-separated class labels file.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Stop after this many frames (synthetic sources).
    #[arg(long)]
    max_frames: Option<u64>,

    /// Run without a frame output.
    #[arg(long)]
    headless: bool,

    /// Per-detection and per-frame timing logs.
    #[arg(long, short)]
    verbose: bool,

    /// Progress UI: auto, plain or pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut config = SentinelConfig::load()?;
    apply_args(&mut config, &args)?;
    config.validate()?;

    let shutdown = Shutdown::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            log::info!("shutdown signal received");
            shutdown.trigger();
        })
        .expect("error setting Ctrl-C handler");
    }

    let source = startup_stage(&ui, "Open video source", || {
        let mut source = VideoSource::open(&config.input)
            .with_context(|| format!("failed to create video source '{}'", config.input.uri))?;
        source
            .connect()
            .with_context(|| format!("failed to connect to '{}'", config.input.uri))?;
        Ok(source)
    })?;
    log::info!(
        "source {} ready ({}x{})",
        config.input.uri,
        source.frame_width(),
        source.frame_height()
    );

    let detector = startup_stage(&ui, "Load detector", || {
        let registry = BackendRegistry::with_builtin();
        registry.create(&config.detector).with_context(|| {
            format!(
                "failed to load detector '{}' (available: {})",
                config.detector.backend,
                registry.list().join(", ")
            )
        })
    })?;

    let frame_output = optional_stage(&ui, "Open frame output", || {
        open_frame_output(config.output.frame_uri.as_deref())
    });
    let crop_output = optional_stage(&ui, "Open crop output", || {
        open_crop_output(config.output.crop_uri.as_deref())
    });
    if frame_output.is_none() {
        log::info!("no frame output, running headless");
    }
    if crop_output.is_none() {
        log::info!("no crop output, crops will only be logged");
    }

    let control = ControlLoop::from_config(&config, Box::new(source), detector, shutdown)?
        .with_frame_output(frame_output)
        .with_crop_output(crop_output);
    let summary = control.run();

    log::info!(
        "sentineld stopped ({:?}): frames={} crops={} paced={}",
        summary.stop_reason,
        summary.frames,
        summary.crops_emitted,
        summary.paced_frames
    );
    log::info!(
        "errors: timeouts={} capture={} detector={} overruns={} output={}",
        summary.capture_timeouts,
        summary.capture_errors,
        summary.detector_errors,
        summary.deadline_overruns,
        summary.output_errors
    );
    Ok(())
}

fn apply_args(config: &mut SentinelConfig, args: &Args) -> Result<()> {
    if let Some(uri) = &args.input_uri {
        config.input.uri = uri.clone();
    }
    if let Some(uri) = &args.output_uri {
        config.output.frame_uri = Some(uri.clone());
    }
    if let Some(uri) = &args.crop_uri {
        config.output.crop_uri = Some(uri.clone());
    }
    if let Some(target) = &args.target {
        config.policy.target_class = target.clone();
    }
    if let Some(threshold) = args.threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(anyhow!("--threshold must be within 0..=1 (got {})", threshold));
        }
        config.policy.min_confidence = threshold;
    }
    if let Some(pacing) = args.pacing {
        config.policy.min_pacing_frames = pacing;
    }
    if let Some(overlay) = &args.overlay {
        config.overlay = OverlayFlags::parse(overlay)?;
    }
    if let Some(backend) = &args.backend {
        config.detector.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        config.detector.model_path = Some(model.clone());
    }
    if let Some(labels) = &args.labels {
        config.detector.labels_path = Some(labels.clone());
    }
    if let Some(max_frames) = args.max_frames {
        config.input.max_frames = Some(max_frames);
    }
    if args.headless {
        config.output.frame_uri = None;
    }
    Ok(())
}

/// A stage whose failure ends startup. The error is logged before it is returned.
fn startup_stage<T>(ui: &ui::Ui, name: &str, work: impl FnOnce() -> Result<T>) -> Result<T> {
    ui.run_stage(name, work).map_err(|e| {
        log::error!("{} failed: {:#}", name, e);
        e
    })
}

/// A stage whose failure is logged and treated as "not configured".
fn optional_stage<T>(
    ui: &ui::Ui,
    name: &str,
    work: impl FnOnce() -> Result<Option<T>>,
) -> Option<T> {
    match ui.run_stage(name, work) {
        Ok(value) => value,
        Err(e) => {
            log::error!("{} failed, continuing without it: {:#}", name, e);
            None
        }
    }
}
