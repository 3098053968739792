//! recognize - run a detector backend once over a single image
//!
//! Prints the highest-confidence detection, and optionally writes a copy of the image
//! with the overlay drawn on it.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use roi_sentinel::{BackendRegistry, Detection, Frame, Overlay, OverlayFlags, SentinelConfig};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify a single image with a detector backend")]
struct Args {
    /// Image to classify (JPEG or PNG).
    image: PathBuf,

    /// Write the annotated image here.
    output: Option<PathBuf>,

    /// Detector backend name (cpu, tract).
    #[arg(long)]
    backend: Option<String>,

    /// Model file for model-based backends.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Newline-separated class labels file.
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Overlay flags for the annotated image.
    #[arg(long, default_value = "lines,labels,conf")]
    overlay: String,

    /// Progress UI: auto, plain or pretty.
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut config = SentinelConfig::load()?;
    if let Some(backend) = &args.backend {
        config.detector.backend = backend.clone();
    }
    if let Some(model) = &args.model {
        config.detector.model_path = Some(model.clone());
    }
    if let Some(labels) = &args.labels {
        config.detector.labels_path = Some(labels.clone());
    }
    let flags = OverlayFlags::parse(&args.overlay)?;

    let frame = ui.run_stage("Load image", || load_frame(&args.image))?;
    log::info!(
        "loaded image {} ({}x{})",
        args.image.display(),
        frame.width,
        frame.height
    );

    let mut detector = ui.run_stage("Load detector", || {
        BackendRegistry::with_builtin().create(&config.detector)
    })?;
    let detections = ui.run_stage("Classify", || detector.detect(&frame))?;

    let Some(best) = best_detection(&detections) else {
        log::error!("failed to classify image");
        return Err(anyhow!("failed to classify image"));
    };
    println!(
        "image is recognized as '{}' (class #{}) with {:.2}% confidence",
        best.label,
        best.class_id,
        best.confidence * 100.0
    );

    if let Some(path) = &args.output {
        ui.run_stage("Save annotated image", || {
            save_annotated(&frame, &Overlay::new(&detections, flags), path)
        })?;
        log::info!("annotated image written to {}", path.display());
    }
    Ok(())
}

fn best_detection(detections: &[Detection]) -> Option<&Detection> {
    detections
        .iter()
        .filter(|d| !d.confidence.is_nan())
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

fn load_frame(path: &Path) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to load image {}", path.display()))?
        .to_rgb8();
    let (width, height) = image.dimensions();
    Frame::new(image.into_raw(), width, height)
}

fn save_annotated(frame: &Frame, overlay: &Overlay<'_>, path: &Path) -> Result<()> {
    let mut pixels = frame.pixels().to_vec();
    overlay.draw(&mut pixels, frame.width, frame.height);
    let image = image::RgbImage::from_raw(frame.width, frame.height, pixels)
        .ok_or_else(|| anyhow!("annotated buffer does not match image dimensions"))?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}
